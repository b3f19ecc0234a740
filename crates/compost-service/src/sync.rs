//! Best-effort delivery of durable records to the remote telemetry endpoint.
//!
//! A [`SyncAgent`] makes at most one bounded request per call and never
//! retries internally. It has no local side effects: the durable log is
//! neither read nor written here, and the caller decides what to do with the
//! returned [`DeliveryResult`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use compost_types::{DeliveryResult, LogEntry, Reading};

use crate::config::SyncConfig;

/// JSON body expected by the endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryPayload {
    pub timestamp_dispositivo: String,
    pub temperatura: f32,
    pub humedad: f32,
    pub gas_ppm: f32,
}

impl From<&Reading> for TelemetryPayload {
    fn from(reading: &Reading) -> Self {
        Self {
            timestamp_dispositivo: reading.timestamp.to_string(),
            temperatura: reading.temperature_c,
            humedad: reading.humidity_pct,
            gas_ppm: reading.methane_ppm,
        }
    }
}

/// Cheap check run before spending the request timeout.
#[async_trait]
pub trait Reachability: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Reachability by opening (and dropping) a TCP connection to the endpoint.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    /// Probe for the host and port of `url`, if it has both.
    pub fn for_url(url: &Url, timeout: Duration) -> Option<Self> {
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(Self::new(host, port, timeout))
    }
}

#[async_trait]
impl Reachability for TcpProbe {
    async fn is_reachable(&self) -> bool {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        matches!(tokio::time::timeout(self.timeout, connect).await, Ok(Ok(_)))
    }
}

/// Skips the probe; the request timeout alone bounds the attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReachable;

#[async_trait]
impl Reachability for AlwaysReachable {
    async fn is_reachable(&self) -> bool {
        true
    }
}

/// Delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Endpoint {0} is unreachable")]
    NetworkUnavailable(String),
    #[error("Delivery timed out after {0:?}")]
    DeliveryTimeout(Duration),
    #[error("Transport error: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("Endpoint rejected record with status {status}: {body}")]
    DeliveryRejected { status: StatusCode, body: String },
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// How the scheduler should treat this failure.
    pub fn classify(&self) -> DeliveryResult {
        match self {
            SyncError::DeliveryRejected { status, .. } if is_permanent_status(*status) => {
                DeliveryResult::PermanentFailure
            }
            SyncError::InvalidConfig(_) => DeliveryResult::PermanentFailure,
            _ => DeliveryResult::TransientFailure,
        }
    }
}

/// Client errors that retrying cannot fix.
///
/// Authentication, request-timeout and rate-limit responses may clear up
/// without changes to the record, so they stay retryable.
pub fn is_permanent_status(status: StatusCode) -> bool {
    status.is_client_error() && !matches!(status.as_u16(), 401 | 403 | 408 | 429)
}

/// Longest rejection body kept for logging.
const MAX_BODY_LOG: usize = 200;

/// Pushes single records to the configured endpoint.
pub struct SyncAgent {
    client: Client,
    endpoint: Url,
    timeout: Duration,
    probe: Box<dyn Reachability>,
}

impl SyncAgent {
    /// Build an agent from the `[sync]` section.
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        let agent = Self::from_parts(&config.endpoint, &config.headers, config.timeout())?;
        let probe = TcpProbe::for_url(&agent.endpoint, config.probe_timeout())
            .ok_or_else(|| SyncError::InvalidConfig("endpoint has no host".to_string()))?;
        Ok(agent.with_probe(probe))
    }

    /// Build an agent without a reachability probe.
    pub fn from_parts(
        endpoint: &str,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| SyncError::InvalidConfig(format!("invalid endpoint '{}': {}", endpoint, e)))?;

        let mut default_headers = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SyncError::InvalidConfig(format!("header '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SyncError::InvalidConfig(format!("header '{}': {}", name, e)))?;
            default_headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            timeout,
            probe: Box::new(AlwaysReachable),
        })
    }

    /// Replace the reachability check.
    pub fn with_probe(mut self, probe: impl Reachability + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Attempt one delivery, returning the detailed error on failure.
    pub async fn deliver(&self, entry: &LogEntry) -> Result<(), SyncError> {
        if !self.probe.is_reachable().await {
            return Err(SyncError::NetworkUnavailable(
                self.endpoint.host_str().unwrap_or_default().to_string(),
            ));
        }

        let payload = TelemetryPayload::from(&entry.reading);
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SyncError::DeliveryTimeout(self.timeout)
                } else {
                    SyncError::Transport(e)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_BODY_LOG {
            let mut cut = MAX_BODY_LOG;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(SyncError::DeliveryRejected { status, body })
    }

    /// Attempt one delivery and report only the outcome class.
    pub async fn try_deliver(&self, entry: &LogEntry) -> DeliveryResult {
        let id = entry.sequence_id();
        match self.deliver(entry).await {
            Ok(()) => {
                debug!("Delivered record {}", id);
                DeliveryResult::Delivered
            }
            Err(e) => {
                let result = e.classify();
                warn!("Delivery of record {} failed ({:?}): {}", id, result, e);
                result
            }
        }
    }
}

impl std::fmt::Debug for SyncAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncAgent")
            .field("endpoint", &self.endpoint.as_str())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};

    use axum::{Json, Router, extract::State, http::HeaderMap as AxumHeaders, routing::post};
    use compost_types::{Sample, Timestamp};
    use tokio::sync::Mutex;

    /// Fake remote endpoint recording what it receives.
    #[derive(Default)]
    struct Endpoint {
        status: AtomicU16,
        delay_ms: AtomicU64,
        hits: AtomicU64,
        bodies: Mutex<Vec<serde_json::Value>>,
        api_keys: Mutex<Vec<String>>,
    }

    async fn ingest(
        State(endpoint): State<Arc<Endpoint>>,
        headers: AxumHeaders,
        Json(body): Json<serde_json::Value>,
    ) -> axum::http::StatusCode {
        endpoint.hits.fetch_add(1, Ordering::SeqCst);
        let delay = endpoint.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if let Some(key) = headers.get("apikey").and_then(|v| v.to_str().ok()) {
            endpoint.api_keys.lock().await.push(key.to_string());
        }
        endpoint.bodies.lock().await.push(body);
        axum::http::StatusCode::from_u16(endpoint.status.load(Ordering::SeqCst))
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    async fn spawn_endpoint(status: u16) -> (Arc<Endpoint>, SocketAddr) {
        let endpoint = Arc::new(Endpoint::default());
        endpoint.status.store(status, Ordering::SeqCst);
        let app = Router::new()
            .route("/rest/v1/lecturas", post(ingest))
            .with_state(Arc::clone(&endpoint));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (endpoint, addr)
    }

    fn agent_for(addr: SocketAddr, timeout: Duration) -> SyncAgent {
        let mut headers = BTreeMap::new();
        headers.insert("apikey".to_string(), "test-key".to_string());
        headers.insert("Authorization".to_string(), "Bearer test-key".to_string());
        SyncAgent::from_parts(
            &format!("http://{}/rest/v1/lecturas", addr),
            &headers,
            timeout,
        )
        .unwrap()
    }

    fn entry(id: u64) -> LogEntry {
        LogEntry::pending(Reading::from_sample(
            id,
            Sample {
                timestamp: Timestamp::Uptime(120),
                temperature_c: 57.5,
                humidity_pct: 48.0,
                methane_ppm: 230.0,
            },
        ))
    }

    struct Unreachable;

    #[async_trait]
    impl Reachability for Unreachable {
        async fn is_reachable(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_payload_field_names() {
        let json = serde_json::to_value(TelemetryPayload::from(&entry(1).reading)).unwrap();
        assert_eq!(json["timestamp_dispositivo"], "120");
        assert_eq!(json["temperatura"], 57.5);
        assert_eq!(json["humedad"], 48.0);
        assert_eq!(json["gas_ppm"], 230.0);
        assert_eq!(json.as_object().unwrap().len(), 4);
    }

    #[test]
    fn test_status_classification() {
        let rejected = |code: u16| SyncError::DeliveryRejected {
            status: StatusCode::from_u16(code).unwrap(),
            body: String::new(),
        };

        assert_eq!(rejected(400).classify(), DeliveryResult::PermanentFailure);
        assert_eq!(rejected(404).classify(), DeliveryResult::PermanentFailure);
        assert_eq!(rejected(422).classify(), DeliveryResult::PermanentFailure);
        assert_eq!(rejected(401).classify(), DeliveryResult::TransientFailure);
        assert_eq!(rejected(403).classify(), DeliveryResult::TransientFailure);
        assert_eq!(rejected(408).classify(), DeliveryResult::TransientFailure);
        assert_eq!(rejected(429).classify(), DeliveryResult::TransientFailure);
        assert_eq!(rejected(500).classify(), DeliveryResult::TransientFailure);
        assert_eq!(rejected(503).classify(), DeliveryResult::TransientFailure);
        assert_eq!(
            SyncError::DeliveryTimeout(Duration::from_secs(5)).classify(),
            DeliveryResult::TransientFailure
        );
        assert_eq!(
            SyncError::NetworkUnavailable("host".to_string()).classify(),
            DeliveryResult::TransientFailure
        );
    }

    #[tokio::test]
    async fn test_created_is_delivered() {
        let (endpoint, addr) = spawn_endpoint(201).await;
        let agent = agent_for(addr, Duration::from_secs(5));

        assert_eq!(agent.try_deliver(&entry(7)).await, DeliveryResult::Delivered);

        let bodies = endpoint.bodies.lock().await;
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["temperatura"], 57.5);
        assert_eq!(endpoint.api_keys.lock().await.as_slice(), ["test-key"]);
    }

    #[tokio::test]
    async fn test_rejections_map_to_results() {
        for (code, expected) in [
            (400, DeliveryResult::PermanentFailure),
            (401, DeliveryResult::TransientFailure),
            (429, DeliveryResult::TransientFailure),
            (500, DeliveryResult::TransientFailure),
        ] {
            let (_endpoint, addr) = spawn_endpoint(code).await;
            let agent = agent_for(addr, Duration::from_secs(5));
            assert_eq!(agent.try_deliver(&entry(1)).await, expected, "status {code}");
        }
    }

    #[tokio::test]
    async fn test_rejection_carries_status() {
        let (_endpoint, addr) = spawn_endpoint(422).await;
        let agent = agent_for(addr, Duration::from_secs(5));
        let err = agent.deliver(&entry(1)).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::DeliveryRejected { status, .. } if status == StatusCode::UNPROCESSABLE_ENTITY
        ));
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let (endpoint, addr) = spawn_endpoint(201).await;
        endpoint.delay_ms.store(2_000, Ordering::SeqCst);
        let agent = agent_for(addr, Duration::from_millis(200));

        let err = agent.deliver(&entry(1)).await.unwrap_err();
        assert!(matches!(err, SyncError::DeliveryTimeout(_)));
        assert_eq!(err.classify(), DeliveryResult::TransientFailure);
    }

    #[tokio::test]
    async fn test_unreachable_skips_request() {
        let (endpoint, addr) = spawn_endpoint(201).await;
        let agent = agent_for(addr, Duration::from_secs(5)).with_probe(Unreachable);

        let err = agent.deliver(&entry(1)).await.unwrap_err();
        assert!(matches!(err, SyncError::NetworkUnavailable(_)));
        assert_eq!(endpoint.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tcp_probe() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let probe = TcpProbe::new("127.0.0.1", addr.port(), Duration::from_millis(500));
        assert!(probe.is_reachable().await);

        drop(listener);
        assert!(!probe.is_reachable().await);
    }

    #[test]
    fn test_tcp_probe_for_url() {
        let url = Url::parse("https://telemetry.example.com/rest/v1/lecturas").unwrap();
        let probe = TcpProbe::for_url(&url, Duration::from_millis(100)).unwrap();
        assert_eq!(probe.host, "telemetry.example.com");
        assert_eq!(probe.port, 443);
    }

    #[test]
    fn test_new_from_config() {
        let config = SyncConfig {
            enabled: true,
            endpoint: "https://telemetry.example.com/ingest".to_string(),
            ..SyncConfig::default()
        };
        let agent = SyncAgent::new(&config).unwrap();
        assert_eq!(agent.endpoint().host_str(), Some("telemetry.example.com"));

        let bad = SyncConfig {
            endpoint: "not a url".to_string(),
            ..SyncConfig::default()
        };
        assert!(matches!(SyncAgent::new(&bad), Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        let result = SyncAgent::from_parts("https://example.com", &headers, Duration::from_secs(1));
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }
}
