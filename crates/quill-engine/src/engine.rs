use async_trait::async_trait;

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `TransformRequest` used across Quill components.
pub struct TransformRequest {
    pub model: String,
    pub prompt: String,
}

#[async_trait]
/// Trait contract for `TransformEngine` behavior.
pub trait TransformEngine: Send + Sync {
    async fn transform(&self, request: TransformRequest) -> Result<String, EngineError>;
}

/// Returns the prompt unchanged. Used for dry runs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoEngine;

#[async_trait]
impl TransformEngine for EchoEngine {
    async fn transform(&self, request: TransformRequest) -> Result<String, EngineError> {
        Ok(request.prompt)
    }
}
