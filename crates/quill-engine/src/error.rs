use quill_rpc::RpcError;
use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates failures surfaced by transform sessions and catalog queries.
pub enum EngineError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("app server finished without returning any text{}", stderr_suffix(.stderr))]
    NoOutput { stderr: String },
    #[error("{method} did not return any model identifiers.")]
    EmptyResult { method: String },
}

impl EngineError {
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Rpc(error) => error.stderr(),
            Self::NoOutput { stderr } if !stderr.is_empty() => Some(stderr.as_str()),
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
