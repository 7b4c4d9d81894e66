use std::time::Duration;

use quill_rpc::{ClientInfo, IgnoreNotifications, RpcConnection, TransportConfig};
use serde_json::{json, Map, Value};

use crate::error::EngineError;
use crate::extract::{dedupe_trimmed, next_cursor, page_items};
use crate::session::DEFAULT_STDIO_COMMAND;

pub const MODEL_LIST_METHOD: &str = "model/list";
pub const MAX_MODEL_LIST_PAGES: usize = 50;
pub const DEFAULT_MODEL_LIST_TIMEOUT: Duration = Duration::from_secs(20);
const MODEL_LIST_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Public struct `ModelPage` used across Quill components.
pub struct ModelPage {
    pub models: Vec<String>,
    pub next_cursor: Option<String>,
}

impl ModelPage {
    pub fn from_result(result: &Value) -> Self {
        Self {
            models: page_items(result),
            next_cursor: next_cursor(result),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `ModelCatalogConfig` used across Quill components.
pub struct ModelCatalogConfig {
    pub launch_command: String,
    pub timeout: Duration,
    pub max_pages: usize,
    pub client: ClientInfo,
    pub transport: TransportConfig,
}

impl Default for ModelCatalogConfig {
    fn default() -> Self {
        Self {
            launch_command: DEFAULT_STDIO_COMMAND.to_string(),
            timeout: DEFAULT_MODEL_LIST_TIMEOUT,
            max_pages: MAX_MODEL_LIST_PAGES,
            client: ClientInfo::default(),
            transport: TransportConfig {
                label: "model-catalog".to_string(),
                ..TransportConfig::default()
            },
        }
    }
}

/// Lists models by following `nextCursor` across pages on one connection.
#[derive(Debug, Clone)]
pub struct ModelCatalogClient {
    config: ModelCatalogConfig,
}

impl ModelCatalogClient {
    pub fn new(config: ModelCatalogConfig) -> Self {
        Self { config }
    }

    pub async fn fetch_models(&self) -> Result<Vec<String>, EngineError> {
        self.list_all(
            MODEL_LIST_METHOD,
            json!({ "includeHidden": true, "limit": MODEL_LIST_PAGE_LIMIT }),
        )
        .await
    }

    /// Collects every item of a cursor-paginated list method.
    ///
    /// Returns as soon as the last page arrives; the subprocess is stopped
    /// rather than awaited.
    pub async fn list_all(
        &self,
        method: &str,
        base_params: Value,
    ) -> Result<Vec<String>, EngineError> {
        let connection = RpcConnection::open(
            &self.config.launch_command,
            &self.config.transport,
            IgnoreNotifications,
        )?;
        let collected = self.collect_pages(&connection, method, &base_params).await;
        connection.shutdown().await;

        let items = dedupe_trimmed(collected?);
        if items.is_empty() {
            return Err(EngineError::EmptyResult {
                method: method.to_string(),
            });
        }
        tracing::debug!(method, items = items.len(), "listed items");
        Ok(items)
    }

    async fn collect_pages(
        &self,
        connection: &RpcConnection,
        method: &str,
        base_params: &Value,
    ) -> Result<Vec<String>, EngineError> {
        connection
            .initialize(&self.config.client, self.config.timeout)
            .await?;

        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        for page_number in 1..=self.config.max_pages {
            let result = connection
                .request(
                    method,
                    page_params(base_params, cursor.as_deref()),
                    self.config.timeout,
                )
                .await?;
            let page = ModelPage::from_result(&result);
            tracing::debug!(
                method,
                page = page_number,
                items = page.models.len(),
                has_next = page.next_cursor.is_some(),
                "received list page"
            );
            items.extend(page.models);
            cursor = page.next_cursor;
            if cursor.is_none() {
                return Ok(items);
            }
        }
        tracing::warn!(
            method,
            max_pages = self.config.max_pages,
            "stopped following list cursor at page limit"
        );
        Ok(items)
    }
}

fn page_params(base_params: &Value, cursor: Option<&str>) -> Value {
    let mut params = match base_params {
        Value::Object(object) => object.clone(),
        _ => Map::new(),
    };
    if let Some(cursor) = cursor {
        params.insert("cursor".to_string(), Value::String(cursor.to_string()));
    }
    Value::Object(params)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{page_params, ModelCatalogConfig, ModelPage};

    #[test]
    fn unit_page_params_add_cursor_only_when_present() {
        let base = json!({"includeHidden": true, "limit": 100});
        assert_eq!(page_params(&base, None), base);
        let with_cursor = page_params(&base, Some("p2"));
        assert_eq!(with_cursor["cursor"], "p2");
        assert_eq!(with_cursor["limit"], 100);
        assert_eq!(page_params(&json!(null), Some("p3")), json!({"cursor": "p3"}));
    }

    #[test]
    fn unit_model_page_reads_items_and_cursor() {
        let page = ModelPage::from_result(&json!({
            "data": [{"id": "gpt-5.2"}, {"model": "gpt-5.2-codex"}],
            "nextCursor": "p2"
        }));
        assert_eq!(page.models, vec!["gpt-5.2", "gpt-5.2-codex"]);
        assert_eq!(page.next_cursor.as_deref(), Some("p2"));
    }

    #[test]
    fn unit_default_catalog_config_caps_pages_and_timeout() {
        let config = ModelCatalogConfig::default();
        assert_eq!(config.max_pages, 50);
        assert_eq!(config.timeout.as_secs(), 20);
        assert_eq!(config.transport.stderr_tail_capacity, 20);
    }
}
