//! Task status views.

use std::fmt::Write as _;

use axum::{
    extract::State,
    http::header,
    response::{Html, IntoResponse},
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// `GET /status`: every task in an HTML table, ordered by id.
pub async fn status_page(State(state): State<AppState>) -> Html<String> {
    let mut rows = String::new();
    for status in state.registry.get_all() {
        let _ = write!(
            rows,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            status.id,
            escape_html(&status.src),
            status.code,
            escape_html(&status.desc)
        );
    }

    Html(format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>monitor-encoder</title></head>\
         <body><table border=\"1\"><tr><th>ID</th><th>Source</th><th>Code</th><th>Detail</th></tr>\
         {rows}</table></body></html>"
    ))
}

/// `GET /api/status`: JSON object keyed by source path.
pub async fn status_json(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let body = state
        .registry
        .get_all_serialized()
        .map_err(|e| ApiError::internal(format!("Failed to serialize status: {e}")))?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body))
}
