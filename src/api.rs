//! HTTP API for the operator UI
//!
//! Thin axum handlers over the Broker plus the SSE stream endpoint.
//! Everything lives under a single local origin; CORS is permissive so
//! a dev UI served elsewhere can talk to it.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::sse::{Event, Sse},
    response::IntoResponse,
    routing::get,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::Stream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::engine::broker::Broker;
use crate::engine::models::{
    CreatePositionRequest, Position, PositionStatus, SettingsUpdate, UpdateSlTpRequest,
};
use crate::engine::storage::Store;
use crate::engine::TriggerEngine;
use crate::error::AppError;
use crate::stream::ClientSession;
use crate::websocket::PriceFeed;

/// Shared application state injected into every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub feed: PriceFeed,
    pub engine: Arc<TriggerEngine>,
    pub broker: Arc<Broker>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/positions", post(create_position).get(list_positions))
        .route(
            "/positions/:id",
            get(get_position).patch(update_position).delete(delete_position),
        )
        .route("/positions/:id/close", post(close_position))
        .route("/stats", get(get_stats))
        .route("/events", get(get_events))
        .route("/stream", get(stream))
        .route("/export", get(export_csv))
        .route("/settings", get(get_settings).post(update_settings))
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<PositionStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsQuery {
    position_id: Option<i64>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportQuery {
    start_date: Option<String>,
    end_date: Option<String>,
    symbol: Option<String>,
}

async fn create_position(
    State(state): State<AppState>,
    Json(req): Json<CreatePositionRequest>,
) -> Result<(StatusCode, Json<Position>), AppError> {
    let position = state.broker.create_position(req).await?;
    Ok((StatusCode::CREATED, Json(position)))
}

async fn list_positions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Position>>, AppError> {
    Ok(Json(state.broker.list_positions(query.status).await?))
}

async fn get_position(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Position>, AppError> {
    Ok(Json(state.broker.get_position(id).await?))
}

async fn update_position(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<UpdateSlTpRequest>,
) -> Result<Json<Position>, AppError> {
    Ok(Json(state.broker.update_sl_tp(id, update).await?))
}

async fn close_position(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Position>, AppError> {
    Ok(Json(state.broker.close_position_manual(id).await?))
}

async fn delete_position(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.broker.delete_position(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_stats(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.broker.get_stats().await?))
}

async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(
        state
            .broker
            .get_events(query.position_id, query.limit)
            .await?,
    ))
}

async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session = ClientSession::new(
        state.store.clone(),
        state.feed.clone(),
        state.engine.subscribe_prices(),
        state.engine.subscribe_triggers(),
    );
    Sse::new(session.spawn())
}

async fn export_csv(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, AppError> {
    let start = query
        .start_date
        .as_deref()
        .map(|s| parse_date(s, false))
        .transpose()?;
    let end = query
        .end_date
        .as_deref()
        .map(|s| parse_date(s, true))
        .transpose()?;
    let csv = state.broker.export_csv(start, end, query.symbol).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"positions.csv\"",
            ),
        ],
        csv,
    ))
}

async fn get_settings(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.broker.get_settings().await?))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.broker.update_settings(update).await?))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "component": "paper-perps",
        "feedConnected": state.feed.is_connected(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn prometheus_metrics() -> String {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Accepts ms-epoch, RFC 3339 or plain dates; plain end dates extend to
/// the end of the day so ranges stay inclusive
fn parse_date(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, AppError> {
    if let Ok(ms) = raw.parse::<i64>() {
        return DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| AppError::Validation(format!("timestamp out of range: {raw}")));
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(date) = raw.parse::<NaiveDate>() {
        let time = if end_of_day {
            date.and_hms_milli_opt(23, 59, 59, 999)
        } else {
            date.and_hms_opt(0, 0, 0)
        };
        if let Some(naive) = time {
            return Ok(naive.and_utc());
        }
    }
    Err(AppError::Validation(format!("unparseable date '{raw}'")))
}
