//! HTTP endpoints for the compost monitor.
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /` | dashboard polling `/data.json` |
//! | `GET /data.json` | latest sample |
//! | `GET /csv` | full log export, streamed |
//! | `GET /delete` | clear the log |
//! | `GET /api/health` | liveness |
//! | `GET /api/status` | scheduler counters and log size |
//!
//! # Locking
//!
//! Handlers hold `state.log` only to take a snapshot or to clear; the export
//! itself streams from the snapshot after the lock is released. The latest
//! sample is copied out of a watch channel without locking the log at all.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::state::{AppState, SchedulerStats};

const DASHBOARD: &str = include_str!("../assets/index.html");

/// Create the router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(dashboard))
        .route("/data.json", get(data_json))
        .route("/csv", get(export_csv))
        .route("/delete", get(delete_log))
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
}

/// The router with tracing and CORS layers, bound to `state`.
pub fn app(state: Arc<AppState>) -> Router {
    router()
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD)
}

/// Live snapshot. All fields are `null` until the first sample.
#[derive(Debug, Serialize)]
pub struct DataResponse {
    pub temperatura: Option<f32>,
    pub humedad: Option<f32>,
    pub gas_ppm: Option<f32>,
    pub timestamp: Option<String>,
}

async fn data_json(State(state): State<Arc<AppState>>) -> Json<DataResponse> {
    let latest = state.latest_sample();
    Json(DataResponse {
        temperatura: latest.map(|s| s.temperature_c),
        humedad: latest.map(|s| s.humidity_pct),
        gas_ppm: latest.map(|s| s.methane_ppm),
        timestamp: latest.map(|s| s.timestamp.to_string()),
    })
}

async fn export_csv(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let snapshot = {
        let log = state.log.lock().await;
        log.snapshot()?
    };

    let (file, len) = snapshot.into_parts();
    let reader = tokio::fs::File::from_std(file).take(len);
    let body = Body::from_stream(ReaderStream::new(reader));

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", compost_store::LOG_FILE_NAME),
            ),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        body,
    )
        .into_response())
}

async fn delete_log(State(state): State<Arc<AppState>>) -> Result<Html<&'static str>, AppError> {
    state.log.lock().await.clear()?;
    info!("Log cleared via HTTP");
    Ok(Html(
        "<!DOCTYPE html><html><body><p>Registro borrado.</p><p><a href=\"/\">Volver</a></p></body></html>",
    ))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Service status.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub running: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    pub scheduler: SchedulerStats,
    pub log: LogStatus,
    pub sync: SyncStatus,
}

#[derive(Debug, Serialize)]
pub struct LogStatus {
    pub path: String,
    pub size_bytes: u64,
    pub capacity_bytes: Option<u64>,
    pub last_id: u64,
    /// Every record up to this id is settled with the remote endpoint.
    pub delivered_through: u64,
    pub undelivered: u64,
    pub oldest_undelivered: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SyncStatus {
    pub enabled: bool,
    pub endpoint: Option<String>,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let sync = {
        let config = state.config.read().await;
        SyncStatus {
            enabled: config.sync.enabled,
            endpoint: config
                .sync
                .enabled
                .then(|| config.sync.endpoint.clone()),
        }
    };
    let log = {
        let log = state.log.lock().await;
        let oldest_undelivered = match log.undelivered(1) {
            Ok(readings) => readings.first().map(|r| r.timestamp.to_string()),
            Err(e) => {
                warn!("Failed to read undelivered records: {}", e);
                None
            }
        };
        LogStatus {
            path: log.path().display().to_string(),
            size_bytes: log.len_bytes(),
            capacity_bytes: log.capacity(),
            last_id: log.last_id(),
            delivered_through: log.delivered_through(),
            undelivered: log.last_id() - log.delivered_through(),
            oldest_undelivered,
        }
    };
    let scheduler = state.scheduler.stats.read().await.clone();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        running: state.scheduler.is_running(),
        started_at: state.scheduler.started_at(),
        scheduler,
        log,
        sync,
    })
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Store(compost_store::Error),
}

impl From<compost_store::Error> for AppError {
    fn from(e: compost_store::Error) -> Self {
        if let compost_store::Error::StorageUnavailable { path, source } = &e
            && source.kind() == std::io::ErrorKind::NotFound
        {
            return AppError::NotFound(format!("{} not found", path.display()));
        }
        AppError::Store(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use compost_store::{CSV_HEADER, DurableLog, LogOptions};
    use compost_types::{Sample, Timestamp};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::Config;

    fn create_test_state() -> (Arc<AppState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let log = DurableLog::open(dir.path(), LogOptions::default()).unwrap();
        (AppState::new(log, Config::default()), dir)
    }

    fn sample(secs: u64) -> Sample {
        Sample {
            timestamp: Timestamp::Uptime(secs),
            temperature_c: 62.5,
            humidity_pct: 41.0,
            methane_ppm: 305.0,
        }
    }

    async fn get(state: &Arc<AppState>, uri: &str) -> Response {
        router()
            .with_state(Arc::clone(state))
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn response_body(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (state, _dir) = create_test_state();
        let response = get(&state, "/api/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&response_body(response).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_dashboard() {
        let (state, _dir) = create_test_state();
        let response = get(&state, "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/html"));
        assert!(response_body(response).await.contains("/data.json"));
    }

    #[tokio::test]
    async fn test_data_json_before_first_sample() {
        let (state, _dir) = create_test_state();
        let response = get(&state, "/data.json").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&response_body(response).await).unwrap();
        assert!(json["temperatura"].is_null());
        assert!(json["humedad"].is_null());
        assert!(json["gas_ppm"].is_null());
        assert!(json["timestamp"].is_null());
    }

    #[tokio::test]
    async fn test_data_json_latest_sample() {
        let (state, _dir) = create_test_state();
        state.publish_sample(sample(10));
        state.publish_sample(sample(20));

        let json: serde_json::Value =
            serde_json::from_str(&response_body(get(&state, "/data.json").await).await).unwrap();
        assert_eq!(json["temperatura"], 62.5);
        assert_eq!(json["humedad"], 41.0);
        assert_eq!(json["gas_ppm"], 305.0);
        assert_eq!(json["timestamp"], "20");
    }

    #[tokio::test]
    async fn test_csv_export() {
        let (state, _dir) = create_test_state();
        {
            let mut log = state.log.lock().await;
            log.append(sample(60)).unwrap();
            log.append(sample(120)).unwrap();
        }

        let response = get(&state, "/csv").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        let expected = state.log.lock().await.export_all().unwrap();
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH],
            expected.len().to_string().as_str()
        );

        let body = response_body(response).await;
        assert_eq!(body.as_bytes(), &expected[..]);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("2,120,"));
    }

    #[tokio::test]
    async fn test_csv_missing_file_is_404() {
        let (state, _dir) = create_test_state();
        let path = state.log.lock().await.path().to_path_buf();
        std::fs::remove_file(&path).unwrap();

        let response = get(&state, "/csv").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_str(&response_body(response).await).unwrap();
        assert!(json["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_delete_clears_log() {
        let (state, _dir) = create_test_state();
        {
            let mut log = state.log.lock().await;
            log.append(sample(60)).unwrap();
            log.append(sample(120)).unwrap();
        }

        let response = get(&state, "/delete").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response_body(response).await.contains("href=\"/\""));

        let log = state.log.lock().await;
        assert_eq!(log.last_id(), 0);
        assert_eq!(
            &log.export_all().unwrap()[..],
            format!("{}\n", CSV_HEADER).as_bytes()
        );
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let (state, _dir) = create_test_state();
        state.log.lock().await.append(sample(60)).unwrap();
        state.scheduler.stats.write().await.appends = 1;

        let response = get(&state, "/api/status").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&response_body(response).await).unwrap();
        assert_eq!(json["running"], false);
        assert_eq!(json["log"]["last_id"], 1);
        assert!(json["log"]["size_bytes"].as_u64().unwrap() > CSV_HEADER.len() as u64);
        assert_eq!(json["scheduler"]["appends"], 1);
        assert_eq!(json["sync"]["enabled"], false);
        assert!(json["sync"]["endpoint"].is_null());
    }

    #[tokio::test]
    async fn test_status_reports_undelivered_records() {
        let (state, _dir) = create_test_state();
        {
            let mut log = state.log.lock().await;
            for secs in [60, 120, 180] {
                log.append(sample(secs)).unwrap();
            }
            log.set_delivered_through(1).unwrap();
        }

        let response = get(&state, "/api/status").await;
        let json: serde_json::Value = serde_json::from_str(&response_body(response).await).unwrap();
        assert_eq!(json["log"]["delivered_through"], 1);
        assert_eq!(json["log"]["undelivered"], 2);
        assert_eq!(json["log"]["oldest_undelivered"], "120");
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (state, _dir) = create_test_state();
        let response = get(&state, "/nope").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_app_error_status() {
        let response = AppError::NotFound("log.csv".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let err: AppError = compost_store::Error::StorageFull {
            needed: 40,
            available: 0,
        }
        .into();
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
