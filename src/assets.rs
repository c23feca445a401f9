//! Frontend assets embedded into the binary at compile time.

use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use rust_embed::Embed;

#[derive(Embed)]
#[folder = "web/dist/"]
pub struct Assets;

/// Serves an embedded asset, falling back to `index.html` for app routes.
pub async fn serve(uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');
    let path = if path.is_empty() { "index.html" } else { path };

    match Assets::get(path) {
        Some(file) => asset_response(path, file.data.into_owned()),
        None => match Assets::get("index.html") {
            Some(file) => asset_response("index.html", file.data.into_owned()),
            None => (StatusCode::NOT_FOUND, "not found").into_response(),
        },
    }
}

fn asset_response(path: &str, data: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, content_type_for(path))], data).into_response()
}

fn content_type_for(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json" | "map") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}
