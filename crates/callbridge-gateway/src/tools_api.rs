//! Tool control plane: list, upsert and delete tool declarations.
//!
//! Every mutation persists the definitions store and publishes a new
//! registry snapshot; calls in flight keep the snapshot they started with.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;

use callbridge_core::error::CallBridgeError;
use callbridge_tools::ToolDefinition;

use crate::state::GatewayState;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal server error: {0}")]
    Internal(String),
}

impl From<CallBridgeError> for ApiError {
    fn from(e: CallBridgeError) -> Self {
        match e {
            CallBridgeError::Tool(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ToolEntry {
    #[serde(flatten)]
    pub definition: ToolDefinition,
    /// A compiled-in implementation is bound to the declaration.
    pub implemented: bool,
}

/// `GET /tools`: the current registry snapshot.
pub async fn list_tools(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let snapshot = state.registry.snapshot();
    let tools: Vec<ToolEntry> = snapshot
        .definitions()
        .into_iter()
        .map(|definition| {
            let implemented = snapshot
                .get(&definition.name)
                .is_some_and(|t| t.implementation.is_some());
            ToolEntry {
                definition,
                implemented,
            }
        })
        .collect();
    Json(json!({ "tools": tools }))
}

/// `POST /tools`: insert or replace a declaration by name.
pub async fn upsert_tool(
    State(state): State<Arc<GatewayState>>,
    Json(definition): Json<ToolDefinition>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let name = definition.name.clone();
    let replaced = state.store.upsert(definition.clone()).await?;
    let count = state.reload_tools().await?;
    info!(tool = %name, replaced, tools = count, "Tool declaration saved");

    let status = if replaced {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(json!({ "tool": definition, "replaced": replaced }))))
}

/// `DELETE /tools/{name}`: remove a stored declaration.
pub async fn delete_tool(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.store.remove(&name).await? {
        return Err(ApiError::NotFound(format!("tool '{name}' is not in the definitions store")));
    }
    let count = state.reload_tools().await?;
    info!(tool = %name, tools = count, "Tool declaration deleted");
    Ok(Json(json!({ "deleted": name })))
}
