//! Web search tool backed by the Tavily search API

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::config::SearchConfig;
use crate::tools::{ParameterProperty, ParameterSchema, Tool, ToolContext, ToolResult};
use llm_core::SecretString;

/// Upper bound on results the model may request
const MAX_RESULTS_LIMIT: u64 = 10;

const SEARCH_DEPTHS: [&str; 2] = ["basic", "advanced"];

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: u64,
    search_depth: &'a str,
    include_answer: bool,
}

/// Search results as handed back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default)]
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Tool for searching the web
pub struct WebSearchTool {
    client: reqwest::Client,
    api_key: SecretString,
    search_url: String,
    default_max_results: u64,
    search_depth: String,
}

impl WebSearchTool {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client for web search")?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            search_url: format!("{}/search", config.base_url.trim_end_matches('/')),
            default_max_results: u64::from(config.max_results),
            search_depth: config.search_depth.clone(),
        })
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "tavily_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Use this for recent events, facts you are \
         unsure about, or anything after your knowledge cutoff. Returns titles, URLs, and content snippets."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("query", ParameterProperty::string("The search query"))
            .with_property(
                "max_results",
                ParameterProperty::integer("Maximum number of results to return")
                    .with_default(Value::from(self.default_max_results)),
            )
            .with_property(
                "search_depth",
                ParameterProperty::string("Use \"advanced\" for harder questions; slower")
                    .with_enum(SEARCH_DEPTHS.iter().map(|d| d.to_string()).collect())
                    .with_default(Value::from(self.search_depth.as_str())),
            )
    }

    #[instrument(skip(self, args, _ctx), fields(query = tracing::field::Empty))]
    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Missing required parameter: query"))?;

        tracing::Span::current().record("query", query.chars().take(50).collect::<String>().as_str());

        let max_results = args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.default_max_results)
            .clamp(1, MAX_RESULTS_LIMIT);

        let search_depth = args
            .get("search_depth")
            .and_then(|v| v.as_str())
            .filter(|d| SEARCH_DEPTHS.contains(d))
            .unwrap_or(self.search_depth.as_str());

        debug!(max_results, depth = %search_depth, "Sending search request");

        let request = SearchRequest {
            query,
            max_results,
            search_depth,
            include_answer: true,
        };

        let response = match self
            .client
            .post(&self.search_url)
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Search request failed");
                return Ok(ToolResult::error(format!("Search request failed: {}", e)));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Search returned error status");
            return Ok(ToolResult::error(format!(
                "Search failed with status {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let mut parsed: SearchResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::error(format!("Failed to parse search response: {}", e))),
        };
        if parsed.query.is_empty() {
            parsed.query = query.to_string();
        }
        parsed.results.truncate(max_results as usize);

        debug!(results = parsed.results.len(), "Search complete");
        Ok(ToolResult::success(serde_json::to_string(&parsed)?))
    }
}
