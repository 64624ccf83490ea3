use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    error::{self, Error},
    search::{DEFAULT_TOP_N, SearchHit, SearchMode, SearchParams, Stage},
    service::SearchService,
};

#[derive(Clone)]
pub struct KbMcpServer {
    service: SearchService,
    tool_router: ToolRouter<Self>,
}

impl KbMcpServer {
    pub fn new(service: SearchService) -> Self {
        Self {
            service,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl KbMcpServer {
    /// Exact phrase search with semantic fallback.
    #[tool(
        name = "kb_search",
        description = "Find knowledge-base entries for a phrase. Exact phrase matches are returned first; if there are none, entries are ranked by semantic similarity."
    )]
    pub async fn kb_search(
        &self,
        params: Parameters<KbSearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let phrase = params.phrase.clone();

        let outcome = self
            .service
            .search(SearchParams {
                phrase: params.phrase,
                top_n: params.limit.unwrap_or(DEFAULT_TOP_N),
                mode: params.mode.unwrap_or_default(),
                min_score: params.min_score,
            })
            .await
            .map_err(|e| mcp_error("search failed", e))?;

        let summary = format_search_summary(&outcome.hits, &phrase);
        let structured = serde_json::to_value(SearchResponse {
            phrase,
            stage: outcome.stage,
            result_count: outcome.hits.len(),
            results: outcome.hits,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e.into()))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }

    /// Fetch a single entry by id.
    #[tool(name = "kb_get", description = "Fetch a knowledge-base entry by its numeric id.")]
    pub async fn kb_get(
        &self,
        params: Parameters<KbGetParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let id = params.0.id;
        let entry = self
            .service
            .get(id)
            .await
            .map_err(|e| mcp_error("lookup failed", e))?
            .ok_or_else(|| {
                mcp_error(
                    "entry not found",
                    Error::NotFound {
                        kind: "entry",
                        name: id.to_string(),
                    },
                )
            })?;

        let text = format!(
            "#{} {}\n\nQ: {}\n\nA: {}",
            entry.id, entry.title, entry.question, entry.answer
        );
        let structured = serde_json::to_value(&entry)
            .map_err(|e| mcp_error("failed to serialize entry", e.into()))?;

        let mut result = CallToolResult::success(vec![Content::text(text)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for KbMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut implementation = Implementation::default();
        implementation.name = "kbseek".to_string();
        implementation.title = Some("kbseek MCP".to_string());
        implementation.version = env!("CARGO_PKG_VERSION").to_string();

        let mut info = ServerInfo::default();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.server_info = implementation;
        info.instructions = Some(
            "Use kb_search to look up knowledge-base answers for a user's question, then kb_get to read a full entry."
                .to_string(),
        );
        info
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KbSearchParams {
    /// Phrase to look up.
    pub phrase: String,
    /// Maximum number of results (default: 5).
    pub limit: Option<usize>,
    /// Retrieval stages to use (default: auto).
    pub mode: Option<SearchMode>,
    /// Minimum similarity for semantic results.
    pub min_score: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KbGetParams {
    /// Entry id.
    pub id: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    phrase: String,
    stage: Stage,
    result_count: usize,
    results: Vec<SearchHit>,
}

fn format_search_summary(hits: &[SearchHit], phrase: &str) -> String {
    if hits.is_empty() {
        return format!("No entries found for \"{phrase}\"");
    }

    let mut lines = Vec::with_capacity(hits.len() + 1);
    let suffix = if hits.len() == 1 { "y" } else { "ies" };
    lines.push(format!(
        "Found {} entr{} for \"{phrase}\":",
        hits.len(),
        suffix
    ));

    for hit in hits {
        match hit.score {
            Some(score) => lines.push(format!(
                "#{} {:.3} {}",
                hit.entry.id, score, hit.entry.title
            )),
            None => lines.push(format!("#{} {}", hit.entry.id, hit.entry.title)),
        }
    }

    lines.join("\n")
}

fn mcp_error(message: &str, error: Error) -> rmcp::ErrorData {
    let data = Some(json!({ "kind": error.kind(), "error": error.to_string() }));
    match error {
        Error::InvalidQuery(_) => {
            rmcp::ErrorData::invalid_params(message.to_string(), data)
        }
        Error::NotFound { .. } => {
            rmcp::ErrorData::resource_not_found(message.to_string(), data)
        }
        _ => rmcp::ErrorData::internal_error(message.to_string(), data),
    }
}

/// Serve the MCP tools over stdio until the client disconnects.
pub fn run_mcp(service: SearchService) -> error::Result<()> {
    let server = KbMcpServer::new(service);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            Error::Config(format!("MCP server initialization failed: {e}"))
        })?;
        running
            .waiting()
            .await
            .map_err(|e| Error::Config(format!("MCP server error: {e}")))?;
        Ok(())
    })
}
