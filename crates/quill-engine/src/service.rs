use std::sync::Arc;
use std::time::Instant;

use crate::engine::{TransformEngine, TransformRequest};
use crate::error::EngineError;
use crate::metrics::TransformMetrics;
use crate::modes::TransformMode;
use crate::payload_log::log_payload;

pub const DEFAULT_PROMPT_TEMPLATE: &str =
    "Rewrite the input text to be clearer while preserving meaning.";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `TransformContext` naming the mode and model of one transform.
pub struct TransformContext {
    pub mode_name: String,
    pub prompt_template: String,
    pub model: String,
}

impl From<&TransformMode> for TransformContext {
    fn from(mode: &TransformMode) -> Self {
        Self {
            mode_name: mode.name.clone(),
            prompt_template: mode.prompt_template.clone(),
            model: mode.model.clone(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn build_prompt(&self, input: &str, context: &TransformContext) -> String {
        let template = context.prompt_template.trim();
        let template = if template.is_empty() {
            DEFAULT_PROMPT_TEMPLATE
        } else {
            template
        };
        format!("{template}\n\nInput:\n{input}")
    }

    pub fn make_request(&self, input: &str, context: &TransformContext) -> TransformRequest {
        TransformRequest {
            model: context.model.clone(),
            prompt: self.build_prompt(input, context),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutcome {
    pub text: String,
    pub metrics: TransformMetrics,
}

/// Builds prompts, drives an engine and normalizes what it returns.
#[derive(Clone)]
pub struct TransformService {
    engine: Arc<dyn TransformEngine>,
    prompt_builder: PromptBuilder,
    log_sensitive_text: bool,
}

impl TransformService {
    pub fn new(engine: Arc<dyn TransformEngine>) -> Self {
        Self {
            engine,
            prompt_builder: PromptBuilder,
            log_sensitive_text: false,
        }
    }

    /// Includes escaped payload previews in logs, not just length and digest.
    pub fn with_sensitive_text_logging(mut self, enabled: bool) -> Self {
        self.log_sensitive_text = enabled;
        self
    }

    pub async fn transform(
        &self,
        input: &str,
        context: &TransformContext,
    ) -> Result<TransformOutcome, EngineError> {
        if input.is_empty() {
            return Ok(TransformOutcome {
                text: String::new(),
                metrics: TransformMetrics::new(input, input, 0),
            });
        }

        log_payload("transform input", input, self.log_sensitive_text);
        let request = self.prompt_builder.make_request(input, context);
        tracing::info!(
            mode = %context.mode_name,
            model = %context.model,
            "transform request built"
        );

        let started = Instant::now();
        let output = self.engine.transform(request).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        let output = match output {
            Ok(output) => output,
            Err(error) => {
                tracing::warn!(
                    latency_ms,
                    result = "failure",
                    mode = %context.mode_name,
                    model = %context.model,
                    error = %error,
                    "transform completed"
                );
                return Err(error);
            }
        };
        tracing::info!(
            latency_ms,
            result = "success",
            mode = %context.mode_name,
            model = %context.model,
            "transform completed"
        );

        log_payload("transform output (engine)", &output, self.log_sensitive_text);
        let text = normalize_output(&output);
        log_payload("transform output (final)", &text, self.log_sensitive_text);
        Ok(TransformOutcome {
            metrics: TransformMetrics::new(input, &text, latency_ms),
            text,
        })
    }
}

/// Converts CRLF to LF, trims whitespace on every line and trims the whole
/// text.
pub fn normalize_output(text: &str) -> String {
    text.replace("\r\n", "\n")
        .split('\n')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use quill_rpc::RpcError;

    use super::{normalize_output, PromptBuilder, TransformContext, TransformService};
    use crate::engine::{EchoEngine, TransformEngine, TransformRequest};
    use crate::error::EngineError;

    fn context(template: &str) -> TransformContext {
        TransformContext {
            mode_name: "General".to_string(),
            prompt_template: template.to_string(),
            model: "gpt-5.2".to_string(),
        }
    }

    struct RecordingEngine {
        reply: Result<String, String>,
        delay: Duration,
        calls: AtomicUsize,
        last_request: Mutex<Option<TransformRequest>>,
    }

    impl RecordingEngine {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl TransformEngine for RecordingEngine {
        async fn transform(&self, request: TransformRequest) -> Result<String, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().expect("request lock") = Some(request);
            tokio::time::sleep(self.delay).await;
            self.reply
                .clone()
                .map_err(|message| EngineError::Rpc(RpcError::Rpc(message)))
        }
    }

    #[test]
    fn unit_prompt_uses_trimmed_template_and_input_section() {
        let prompt = PromptBuilder.build_prompt("hello", &context("  Make it formal.\n"));
        assert_eq!(prompt, "Make it formal.\n\nInput:\nhello");
    }

    #[test]
    fn unit_blank_template_falls_back_to_default() {
        let request = PromptBuilder.make_request("hello", &context("  \n "));
        assert_eq!(
            request.prompt,
            "Rewrite the input text to be clearer while preserving meaning.\n\nInput:\nhello"
        );
        assert_eq!(request.model, "gpt-5.2");
    }

    #[test]
    fn unit_normalize_output_trims_lines_and_converts_crlf() {
        assert_eq!(
            normalize_output("\r\n  first line \t\r\n\tsecond\u{3000}\r\n\n"),
            "first line\nsecond"
        );
        assert_eq!(normalize_output("  a\n\n  b  "), "a\n\nb");
    }

    #[tokio::test]
    async fn functional_empty_input_skips_engine() {
        let engine = Arc::new(RecordingEngine::replying("unused"));
        let service = TransformService::new(engine.clone());
        let outcome = service
            .transform("", &context("template"))
            .await
            .expect("empty transform");
        assert_eq!(outcome.text, "");
        assert_eq!(outcome.metrics.source_chars, 0);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn functional_service_normalizes_engine_output_and_reports_metrics() {
        let engine = Arc::new(RecordingEngine {
            delay: Duration::from_millis(30),
            ..RecordingEngine::replying("  Clear text. \r\n  Next line.  \n")
        });
        let service = TransformService::new(engine.clone()).with_sensitive_text_logging(true);
        let input = "some wordy input text";
        let outcome = service
            .transform(input, &context("Shorten it."))
            .await
            .expect("transform");

        assert_eq!(outcome.text, "Clear text.\nNext line.");
        assert_eq!(outcome.metrics.source_chars, input.chars().count());
        assert_eq!(outcome.metrics.result_chars, outcome.text.chars().count());
        assert!(outcome.metrics.elapsed_ms >= 30);

        let request = engine
            .last_request
            .lock()
            .expect("request lock")
            .clone()
            .expect("engine called");
        assert_eq!(request.prompt, "Shorten it.\n\nInput:\nsome wordy input text");
    }

    #[tokio::test]
    async fn functional_engine_errors_propagate_unchanged() {
        let engine = Arc::new(RecordingEngine {
            reply: Err("boom".to_string()),
            ..RecordingEngine::replying("")
        });
        let service = TransformService::new(engine);
        let error = service
            .transform("input", &context(""))
            .await
            .expect_err("engine failure");
        assert_eq!(error.to_string(), "boom");
    }

    #[tokio::test]
    async fn integration_echo_engine_round_trips_prompt_through_service() {
        let service = TransformService::new(Arc::new(EchoEngine));
        let outcome = service
            .transform("hello", &context("Fix typos."))
            .await
            .expect("echo transform");
        assert_eq!(outcome.text, "Fix typos.\n\nInput:\nhello");
    }
}
