use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates failures surfaced by the stdio JSON-RPC layer.
pub enum RpcError {
    #[error("stdio launch command is empty")]
    EmptyCommand,
    #[error("failed to launch stdio process: {0}")]
    Launch(String),
    #[error("timed out waiting for {waiting_for}{}", stderr_suffix(.stderr))]
    Timeout { waiting_for: String, stderr: String },
    #[error("no response from stdio process{}", stderr_suffix(.stderr))]
    NoResponse { stderr: String },
    #[error("{0}")]
    Rpc(String),
    #[error("invalid stdio JSON-RPC response: {0}")]
    InvalidResponse(String),
    #[error("stdio transport I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl RpcError {
    /// Returns the stderr tail captured with the failure, when one was captured.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Timeout { stderr, .. } | Self::NoResponse { stderr } if !stderr.is_empty() => {
                Some(stderr.as_str())
            }
            _ => None,
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" (stderr: {stderr})")
    }
}

#[cfg(test)]
mod tests {
    use super::RpcError;

    #[test]
    fn unit_timeout_display_includes_stderr_tail_when_present() {
        let error = RpcError::Timeout {
            waiting_for: "response to thread/start".to_string(),
            stderr: "boot | failed".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "timed out waiting for response to thread/start (stderr: boot | failed)"
        );
        assert_eq!(error.stderr(), Some("boot | failed"));
    }

    #[test]
    fn unit_no_response_display_omits_empty_stderr() {
        let error = RpcError::NoResponse {
            stderr: String::new(),
        };
        assert_eq!(error.to_string(), "no response from stdio process");
        assert_eq!(error.stderr(), None);
    }
}
