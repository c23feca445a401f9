//! Read-only HTTP/JSON surface over an analyzed image.
//!
//! The only mutable state is the load handoff (`image` or `error`) behind a
//! reader-writer lock: the loader thread writes once, every request reads.
//! The analyzed image itself is immutable and shared via `Arc`.

use std::sync::{Arc, RwLock};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::analyzer::Image;
use crate::assets;
use crate::tree::FileNode;

#[derive(Default)]
struct LoadState {
    image: Option<Arc<Image>>,
    error: Option<String>,
}

/// Shared service state handed to every request handler.
pub struct ServerState {
    reference: String,
    inner: RwLock<LoadState>,
}

impl ServerState {
    pub fn new(reference: String) -> Arc<Self> {
        Arc::new(ServerState {
            reference,
            inner: RwLock::new(LoadState::default()),
        })
    }

    /// Publishes the analyzed image. Called once by the loader thread.
    pub fn set_image(&self, image: Image) {
        let mut inner = self.inner.write().expect("state lock poisoned");
        inner.image = Some(Arc::new(image));
    }

    /// Publishes a load failure. Called once by the loader thread.
    pub fn set_error(&self, message: String) {
        let mut inner = self.inner.write().expect("state lock poisoned");
        inner.error = Some(message);
    }

    fn image(&self) -> std::result::Result<Arc<Image>, Response> {
        let inner = self.inner.read().expect("state lock poisoned");
        if let Some(message) = &inner.error {
            return Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, message));
        }
        match &inner.image {
            Some(image) => Ok(image.clone()),
            None => Err(error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "image is still loading",
            )),
        }
    }
}

/// Builds the API router with the embedded-asset fallback.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/image", get(image_info))
        .route("/api/layers", get(layers))
        .route("/api/layers/{id}/tree", get(layer_tree))
        .route("/api/layers/{id}/diff", get(layer_diff))
        .route("/api/files/{layer}/{*path}", get(file_content))
        .fallback(get(assets::serve))
        .with_state(state)
}

/// Serves the API on an already-bound listener until the process exits.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: Arc<ServerState>,
) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn health(State(state): State<Arc<ServerState>>) -> Response {
    let status = {
        let inner = state.inner.read().expect("state lock poisoned");
        if inner.error.is_some() {
            "error"
        } else if inner.image.is_some() {
            "ready"
        } else {
            "loading"
        }
    };
    Json(json!({ "status": status, "ref": state.reference })).into_response()
}

async fn image_info(State(state): State<Arc<ServerState>>) -> Response {
    match state.image() {
        Ok(image) => Json(image.info()).into_response(),
        Err(resp) => resp,
    }
}

async fn layers(State(state): State<Arc<ServerState>>) -> Response {
    match state.image() {
        Ok(image) => Json(image.layers()).into_response(),
        Err(resp) => resp,
    }
}

fn parse_layer_id(raw: &str) -> std::result::Result<usize, Response> {
    raw.parse::<usize>()
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "invalid layer id"))
}

async fn layer_tree(State(state): State<Arc<ServerState>>, Path(id): Path<String>) -> Response {
    let image = match state.image() {
        Ok(image) => image,
        Err(resp) => return resp,
    };
    let id = match parse_layer_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match image.tree(id) {
        // Slots before the first content layer have no tree yet
        Ok(None) => Json(FileNode::root()).into_response(),
        Ok(Some(tree)) => Json(&**tree).into_response(),
        Err(_) => error_response(StatusCode::NOT_FOUND, "layer not found"),
    }
}

async fn layer_diff(State(state): State<Arc<ServerState>>, Path(id): Path<String>) -> Response {
    let image = match state.image() {
        Ok(image) => image,
        Err(resp) => return resp,
    };
    let id = match parse_layer_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match image.diff(id) {
        Ok(diff) => Json(diff).into_response(),
        Err(_) => error_response(StatusCode::NOT_FOUND, "layer not found"),
    }
}

async fn file_content(
    State(state): State<Arc<ServerState>>,
    Path((layer, path)): Path<(String, String)>,
) -> Response {
    let image = match state.image() {
        Ok(image) => image,
        Err(resp) => return resp,
    };
    let layer = match parse_layer_id(&layer) {
        Ok(layer) => layer,
        Err(resp) => return resp,
    };
    let file_path = format!("/{path}");

    // Scanning layer tars is blocking work
    let result =
        tokio::task::spawn_blocking(move || image.read_file(layer, &file_path)).await;

    match result {
        Ok(Ok(content)) => Json(content).into_response(),
        Ok(Err(e)) if e.is_not_found() => error_response(StatusCode::NOT_FOUND, &e.to_string()),
        Ok(Err(e)) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}
