use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, MatchedPath, Path, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::{error::Error, lifecycle::is_valid_id, metrics::Metrics, AppState};

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Create ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRequest {
    pub content: Option<String>,
    #[serde(alias = "lifetime_hours")]
    pub expiration_hours: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateResponse {
    pub id: String,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

pub async fn create_secret(
    State(state): State<AppState>,
    payload: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateResponse>), Error> {
    let Json(body) = payload.map_err(|rejection| {
        debug!(error = %rejection, "rejected create payload");
        Error::invalid("invalid request payload")
    })?;

    let content = body.content.unwrap_or_default();
    let hours = body
        .expiration_hours
        .ok_or_else(|| Error::invalid("expiration hours must be 24, 48, or 72"))?;

    let created = state.lifecycle.create(&content, hours).await?;

    let url = format!("{}/secret/{}", state.base_url, created.id);
    Ok((
        StatusCode::CREATED,
        Json(CreateResponse {
            expires_at: timestamp(created.expires_at)?,
            id: created.id,
            url,
        }),
    ))
}

// ── Read ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct SecretResponse {
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub async fn get_secret(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SecretResponse>, Error> {
    let revealed = state.lifecycle.consume(&id).await?;
    Ok(Json(SecretResponse {
        created_at: timestamp(revealed.created_at)?,
        expires_at: timestamp(revealed.expires_at)?,
        content: revealed.content,
    }))
}

// ── Metrics ───────────────────────────────────────────────────────────────────

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(buffer) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        )
            .into_response(),
        Err(e) => Error::Internal(format!("{e:#}")).into_response(),
    }
}

/// Count and time every request except scrapes of `/metrics` itself.
pub async fn track_metrics(
    State(metrics): State<Arc<Metrics>>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == "/metrics" {
        return next.run(request).await;
    }

    let endpoint = match request.extensions().get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_owned(),
        None => normalize_path(request.uri().path()),
    };
    let method = request.method().clone();
    let started = Instant::now();

    let response = next.run(request).await;

    metrics.observe_request(
        method.as_str(),
        &endpoint,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Collapse id-shaped path segments so unmatched paths keep label cardinality low.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| if is_valid_id(segment) { "{id}" } else { segment })
        .collect::<Vec<_>>()
        .join("/")
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn timestamp(secs: i64) -> Result<DateTime<Utc>, Error> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| Error::Internal(format!("timestamp out of range: {secs}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_ids_only() {
        let id = "0123456789abcdef0123456789abcdef";
        assert_eq!(
            normalize_path(&format!("/api/secrets/{id}")),
            "/api/secrets/{id}"
        );
        assert_eq!(normalize_path("/api/secrets"), "/api/secrets");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn timestamps_render_as_rfc3339() {
        let ts = timestamp(86_400).unwrap();
        assert_eq!(ts.to_rfc3339(), "1970-01-02T00:00:00+00:00");
    }

    #[test]
    fn create_request_accepts_both_field_names() {
        let a: CreateRequest =
            serde_json::from_str(r#"{"content":"x","expiration_hours":48}"#).unwrap();
        let b: CreateRequest =
            serde_json::from_str(r#"{"content":"x","lifetime_hours":48}"#).unwrap();
        assert_eq!(a.expiration_hours, Some(48));
        assert_eq!(b.expiration_hours, Some(48));
    }
}
