use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use quill_engine::{DEFAULT_SANDBOX_MODE, DEFAULT_STDIO_COMMAND};
use quill_rpc::DEFAULT_SHELL;

const DEFAULT_TRANSFORM_TIMEOUT_MS: u64 = 90_000;
const DEFAULT_MODELS_TIMEOUT_MS: u64 = 20_000;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "quill",
    about = "Rewrite text through a local codex app-server over stdio JSON-RPC",
    version
)]
/// Public struct `Cli` used across Quill components.
pub struct Cli {
    #[arg(
        long = "stdio-command",
        env = "QUILL_STDIO_COMMAND",
        default_value = DEFAULT_STDIO_COMMAND,
        global = true,
        help = "Command line that launches the app server; run through the configured shell"
    )]
    pub stdio_command: String,

    #[arg(
        long,
        env = "QUILL_MODEL",
        global = true,
        help = "Model override; defaults to the model of the selected transform mode"
    )]
    pub model: Option<String>,

    #[arg(
        long = "timeout-ms",
        env = "QUILL_TIMEOUT_MS",
        default_value_t = DEFAULT_TRANSFORM_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        global = true,
        help = "Timeout for each transform request and for turn completion"
    )]
    pub timeout_ms: u64,

    #[arg(
        long = "models-timeout-ms",
        env = "QUILL_MODELS_TIMEOUT_MS",
        default_value_t = DEFAULT_MODELS_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        global = true,
        help = "Timeout for each model/list request"
    )]
    pub models_timeout_ms: u64,

    #[arg(
        long,
        env = "QUILL_SANDBOX",
        default_value = DEFAULT_SANDBOX_MODE,
        global = true,
        help = "Sandbox mode requested when the app server starts a thread"
    )]
    pub sandbox: String,

    #[arg(
        long = "modes-file",
        env = "QUILL_MODES_FILE",
        global = true,
        help = "JSON transform modes file (schema_version 1); built-in modes are used when omitted"
    )]
    pub modes_file: Option<PathBuf>,

    #[arg(
        long,
        env = "QUILL_MODE",
        global = true,
        help = "Transform mode name, matched case-insensitively; defaults to the active mode"
    )]
    pub mode: Option<String>,

    #[arg(
        long,
        env = "QUILL_SHELL",
        default_value = DEFAULT_SHELL,
        global = true,
        help = "Shell used to launch --stdio-command"
    )]
    pub shell: String,

    #[arg(
        long = "login-shell",
        env = "QUILL_LOGIN_SHELL",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        global = true,
        help = "Launch through a login shell (-lc) so profile PATH entries apply"
    )]
    pub login_shell: bool,

    #[arg(
        long = "log-sensitive-text",
        env = "QUILL_LOG_SENSITIVE_TEXT",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        global = true,
        help = "Include escaped text previews in payload logs instead of only length and digest"
    )]
    pub log_sensitive_text: bool,

    #[arg(short, long, global = true, help = "Log at debug level unless RUST_LOG is set")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum CliCommand {
    /// Transform text with the selected mode and print the result.
    Transform {
        #[arg(long, help = "Text to transform; read from stdin when omitted")]
        input: Option<String>,

        #[arg(
            long = "dry-run",
            help = "Print the prompt that would be sent instead of starting the app server"
        )]
        dry_run: bool,
    },
    /// List model identifiers reported by the app server.
    Models,
    /// List transform modes, marking the selected one.
    Modes,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{parse_positive_u64, Cli, CliCommand};

    #[test]
    fn unit_parse_positive_u64_rejects_zero_and_garbage() {
        assert_eq!(parse_positive_u64("250"), Ok(250));
        assert_eq!(
            parse_positive_u64("0"),
            Err("value must be greater than 0".to_string())
        );
        assert!(parse_positive_u64("soon")
            .expect_err("non-numeric")
            .starts_with("failed to parse integer"));
    }

    #[test]
    fn unit_defaults_target_codex_app_server() {
        let cli = Cli::try_parse_from(["quill", "models"]).expect("parse");
        assert_eq!(cli.stdio_command, "codex app-server --listen stdio://");
        assert_eq!(cli.timeout_ms, 90_000);
        assert_eq!(cli.models_timeout_ms, 20_000);
        assert_eq!(cli.shell, "/bin/sh");
        assert_eq!(cli.sandbox, "workspace-write");
        assert!(!cli.login_shell);
        assert_eq!(cli.command, CliCommand::Models);
    }

    #[test]
    fn functional_global_flags_are_accepted_after_subcommand() {
        let cli = Cli::try_parse_from([
            "quill",
            "transform",
            "--input",
            "hello",
            "--mode",
            "Shorten",
            "--login-shell",
            "--timeout-ms",
            "500",
        ])
        .expect("parse");
        assert_eq!(cli.mode.as_deref(), Some("Shorten"));
        assert!(cli.login_shell);
        assert_eq!(cli.timeout_ms, 500);
        assert_eq!(
            cli.command,
            CliCommand::Transform {
                input: Some("hello".to_string()),
                dry_run: false,
            }
        );
    }

    #[test]
    fn regression_zero_timeout_is_rejected() {
        let error = Cli::try_parse_from(["quill", "--timeout-ms", "0", "models"])
            .expect_err("zero timeout");
        assert!(error.to_string().contains("value must be greater than 0"));
    }
}
