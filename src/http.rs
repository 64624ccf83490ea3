//! HTTP front end.
//!
//! `GET /search?phrase=...&limit=N` answers with a JSON array of entries in
//! rank order. The stage that produced them is reported in the
//! `x-search-stage` header. Failures are JSON objects of the form
//! `{"kind": ..., "error": ...}`.

use std::net::SocketAddr;

use axum::{
    Json,
    Router,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    entry::Entry,
    error::{Error, Result},
    search::{DEFAULT_TOP_N, SearchMode, SearchParams, Stage},
    service::SearchService,
};

pub const STAGE_HEADER: &str = "x-search-stage";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SearchQuery {
    #[serde(default)]
    pub phrase: String,
    pub limit: Option<usize>,
    pub mode: Option<SearchMode>,
    pub min_score: Option<f32>,
}

/// Build the router for the search API.
pub fn router(service: SearchService) -> Router {
    Router::new()
        .route("/search", get(search))
        .route("/entries/{id}", get(get_entry))
        .route("/health", get(health))
        .with_state(service)
}

/// Listen on `addr` until ctrl-c.
pub async fn serve(service: SearchService, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router(service))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
            }
        })
        .await?;
    Ok(())
}

async fn search(
    State(service): State<SearchService>,
    query: std::result::Result<Query<SearchQuery>, QueryRejection>,
) -> std::result::Result<Response, ApiError> {
    let Query(query) =
        query.map_err(|e| Error::InvalidQuery(e.body_text()))?;
    let outcome = service
        .search(SearchParams {
            phrase: query.phrase,
            top_n: query.limit.unwrap_or(DEFAULT_TOP_N),
            mode: query.mode.unwrap_or_default(),
            min_score: query.min_score,
        })
        .await?;

    let stage = match outcome.stage {
        Stage::FullText => "full_text",
        Stage::Semantic => "semantic",
    };
    let entries: Vec<Entry> = outcome.into_entries();

    let mut response = Json(entries).into_response();
    response
        .headers_mut()
        .insert(STAGE_HEADER, HeaderValue::from_static(stage));
    Ok(response)
}

async fn get_entry(
    State(service): State<SearchService>,
    Path(id): Path<u64>,
) -> std::result::Result<Json<Entry>, ApiError> {
    service.get(id).await?.map(Json).ok_or_else(|| {
        ApiError(Error::NotFound {
            kind: "entry",
            name: id.to_string(),
        })
    })
}

async fn health(State(service): State<SearchService>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "encoder": service.encoder().model_id(),
    }))
}

/// Error wrapper mapping error kinds onto HTTP status codes.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            Error::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, kind = self.0.kind(), "request failed");
        }
        let body = Json(json!({
            "kind": self.0.kind(),
            "error": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}
