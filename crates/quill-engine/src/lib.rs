//! Conversation sessions and model catalog queries against a stdio app server,
//! plus the transform service that turns user text into prompts and cleans up
//! what comes back.

mod catalog;
mod engine;
mod error;
pub mod extract;
mod metrics;
mod modes;
mod payload_log;
mod service;
mod session;

pub use catalog::{
    ModelCatalogClient, ModelCatalogConfig, ModelPage, DEFAULT_MODEL_LIST_TIMEOUT,
    MAX_MODEL_LIST_PAGES, MODEL_LIST_METHOD,
};
pub use engine::{EchoEngine, TransformEngine, TransformRequest};
pub use error::EngineError;
pub use metrics::TransformMetrics;
pub use modes::{
    load_transform_modes, TransformMode, TransformModeSet, DEFAULT_MODEL,
    MAX_TRANSFORM_MODES, MODES_FILE_SCHEMA_VERSION,
};
pub use payload_log::{payload_digest, payload_preview};
pub use service::{
    normalize_output, PromptBuilder, TransformContext, TransformOutcome, TransformService,
    DEFAULT_PROMPT_TEMPLATE,
};
pub use session::{
    AppServerEngine, AppServerEngineConfig, SessionPhase, SessionState, DEFAULT_SANDBOX_MODE,
    DEFAULT_STDIO_COMMAND, DEFAULT_TRANSFORM_TIMEOUT,
};
