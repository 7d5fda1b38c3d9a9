use async_trait::async_trait;
use confab_common::{Error, Result};
use reqwest::Client;
use serde_json::json;

use crate::tools::{Tool, ToolContext, ToolOutput};

const DUCKDUCKGO_API_BASE: &str = "https://api.duckduckgo.com";

/// Web search via the DuckDuckGo Instant Answer API.
///
/// The backend's answer is passed through without shaping; the model decides
/// what to quote from it.
pub struct SearchTool {
    client: Client,
    base_url: String,
}

impl SearchTool {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: DUCKDUCKGO_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

impl Default for SearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> &'static str {
        "Searches the web for a query and returns the raw search results."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, _context: &ToolContext, args: serde_json::Value) -> Result<ToolOutput> {
        let Some(query) = args["query"].as_str() else {
            return Ok(ToolOutput::error("missing or invalid 'query'"));
        };

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("q", query), ("format", "json"), ("no_html", "1")])
            .send()
            .await
            .map_err(|e| Error::Agent(format!("search request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Ok(ToolOutput::error(format!(
                "search backend returned HTTP {status}"
            )));
        }

        let results: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Agent(format!("invalid search response: {e}")))?;

        Ok(ToolOutput::ok(results))
    }
}
