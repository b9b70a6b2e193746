//! Typed HTTP clients for the compliance-data provider and the WFS
//! feature server. Every response body is validated against a declared
//! schema before callers see it; transient upstream failures are retried
//! with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use agrotrace_core::{
    normalize_property_code, normalize_tax_id, ComplianceStatus, Coordinate, Culture,
    EsgIssueCounters, EsgSnapshot, EudrLayerResult, EudrSnapshot, Feature, FeatureCollection,
    Geometry, Position, ProducerEsgSnapshot, ProductivityRecord,
};

pub const CRATE_NAME: &str = "agrotrace-client";

const API_KEY_HEADER: &str = "x-api-key";
const COOPERATIVE_HEADER: &str = "x-cooperative-id";
const PRODUCTIVITY_SOURCE: &str = "municipal_average";

/// Raw status + body pair handed back by the transport, before any schema
/// validation happens.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error)]
#[error("transport failure: {0}")]
pub struct TransportError(pub String);

/// Seam between the typed clients and the wire. Production uses reqwest;
/// tests use counting fakes.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<RawResponse, TransportError>;
}

/// reqwest-backed transport. Constructed explicitly and injected; there is
/// no process-wide client.
#[derive(Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<RawResponse, TransportError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|err| TransportError(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError(err.to_string()))?
            .to_vec();
        Ok(RawResponse { status, body })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// 429 and every 5xx are transient; any other non-2xx means the request
/// itself was rejected and retrying cannot help.
pub fn classify_status(status: u16) -> RetryDisposition {
    if status == 429 || (500..600).contains(&status) {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Failure taxonomy exposed to callers. `status_code` drives the
/// user-facing mapping at the API boundary: 404 means "no data for this
/// identifier", 0/429/5xx mean "service unavailable, try later".
#[derive(Debug, Error)]
pub enum RemoteApiError {
    #[error("upstream returned status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("response validation failed: {0}")]
    Validation(String),
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

impl RemoteApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            RemoteApiError::Status { status, .. } => *status,
            RemoteApiError::Transport(_) | RemoteApiError::Validation(_) => 0,
            RemoteApiError::InvalidIdentifier(_) => 400,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub cooperative_id: Option<String>,
    pub backoff: BackoffPolicy,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            cooperative_id: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Percent-encode a value for use in a path segment or query parameter.
fn escape_component(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// Candidate property returned by the reverse-geocoding search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateProperty {
    pub car_code: String,
    pub municipality: Option<String>,
    pub state: Option<String>,
    pub declared_area: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct EsgResumePayload {
    status: ComplianceStatus,
    #[serde(flatten)]
    counters: EsgIssueCounters,
    #[serde(default)]
    total_issues: u32,
    municipality: Option<String>,
    #[serde(alias = "uf")]
    state: Option<String>,
    declared_area: Option<f64>,
    registry_status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProducerEsgPayload {
    status: ComplianceStatus,
    #[serde(default)]
    total_issues: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct EudrPayload {
    property_data_eu: EudrPropertyData,
    #[serde(default)]
    layer_data: Vec<EudrLayerPayload>,
    #[serde(default)]
    prodes_layer_data: Vec<EudrLayerPayload>,
}

#[derive(Debug, Clone, Deserialize)]
struct EudrPropertyData {
    eu_status: ComplianceStatus,
    forest_loss_area: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct EudrLayerPayload {
    layer: String,
    #[serde(default)]
    issues: u32,
    status: ComplianceStatus,
    area: Option<f64>,
    details: Option<String>,
}

impl EudrLayerPayload {
    fn into_result(self) -> EudrLayerResult {
        EudrLayerResult {
            layer: self.layer,
            issues: self.issues,
            status: self.status,
            area: self.area,
            details: self.details,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ProductivityPayload {
    culture: Culture,
    harvest: Option<String>,
    year: Option<i32>,
    planted_area: Option<f64>,
    declared_area: Option<f64>,
    municipal_average_yield: Option<f64>,
    estimated_production: Option<f64>,
    geometry: Option<FeatureCollection>,
}

/// Options for a productivity query.
#[derive(Debug, Clone, Default)]
pub struct ProductivityOptions {
    pub year: Option<i32>,
    pub harvest: Option<String>,
    pub include_geometry: bool,
}

/// Authenticated client for the compliance-data provider. Guarantees that
/// callers only ever receive data matching the declared schemas, or a
/// typed failure.
pub struct ComplianceClient {
    transport: Arc<dyn HttpTransport>,
    config: ClientConfig,
}

impl ComplianceClient {
    pub fn new(transport: Arc<dyn HttpTransport>, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![(API_KEY_HEADER.to_string(), self.config.api_key.clone())];
        if let Some(coop) = &self.config.cooperative_id {
            headers.push((COOPERATIVE_HEADER.to_string(), coop.clone()));
        }
        headers
    }

    /// Fetch a path as raw JSON. Retries 429/5xx and transport failures up
    /// to `max_attempts` total tries with exponential waits; any other
    /// non-2xx fails immediately. Schema validation happens separately in
    /// [`decode`].
    async fn fetch_json(&self, path: &str, retry: bool) -> Result<serde_json::Value, RemoteApiError> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let headers = self.headers();
        let span = info_span!("compliance_fetch", url = %url);

        let max_attempts = if retry {
            self.config.backoff.max_attempts.max(1)
        } else {
            1
        };
        async {
            for attempt in 0..max_attempts {
                match self.transport.get(&url, &headers).await {
                    Ok(response) if response.is_success() => {
                        return serde_json::from_slice(&response.body).map_err(|err| {
                            RemoteApiError::Validation(format!("body is not JSON: {err}"))
                        });
                    }
                    Ok(response) => {
                        let disposition = classify_status(response.status);
                        if disposition == RetryDisposition::Retryable && attempt + 1 < max_attempts
                        {
                            tokio::time::sleep(self.config.backoff.delay_for_attempt(attempt))
                                .await;
                            continue;
                        }
                        return Err(RemoteApiError::Status {
                            status: response.status,
                            url: url.clone(),
                        });
                    }
                    Err(err) => {
                        if attempt + 1 < max_attempts {
                            tokio::time::sleep(self.config.backoff.delay_for_attempt(attempt))
                                .await;
                            continue;
                        }
                        return Err(RemoteApiError::Transport(err.0));
                    }
                }
            }
            unreachable!("retry loop always returns")
        }
        .instrument(span)
        .await
    }

    /// `GET /esg/cars/{id}:resume`
    pub async fn fetch_property_esg_summary(
        &self,
        identifier: &str,
    ) -> Result<EsgSnapshot, RemoteApiError> {
        if identifier.trim().is_empty() {
            return Err(RemoteApiError::InvalidIdentifier(
                "property identifier must be non-empty".into(),
            ));
        }
        let normalized = normalize_property_code(identifier);
        let path = format!("/esg/cars/{}:resume", escape_component(&normalized));
        let value = self.fetch_json(&path, true).await?;
        let payload: EsgResumePayload = decode(value)?;

        let snapshot = EsgSnapshot {
            id: Uuid::new_v4(),
            identifier: normalized,
            status: payload.status,
            counters: payload.counters,
            total_issues: payload.total_issues,
            municipality: payload.municipality,
            state: payload.state,
            declared_area: payload.declared_area,
            registry_status: payload.registry_status,
            fetched_at: Utc::now(),
        };
        if !snapshot.is_consistent() {
            // Upstream owns the total; we keep it but flag the drift.
            warn!(
                identifier = %snapshot.identifier,
                declared = snapshot.total_issues,
                computed = snapshot.counters.sum(),
                "esg total_issues disagrees with layer counters"
            );
        }
        Ok(snapshot)
    }

    /// `GET /esg/social-identities/{taxId}:resume`
    pub async fn fetch_producer_esg_summary(
        &self,
        tax_id: &str,
    ) -> Result<ProducerEsgSnapshot, RemoteApiError> {
        let digits = normalize_tax_id(tax_id);
        if digits.is_empty() {
            return Err(RemoteApiError::InvalidIdentifier(
                "tax id must contain digits".into(),
            ));
        }
        let path = format!("/esg/social-identities/{digits}:resume");
        let value = self.fetch_json(&path, true).await?;
        let payload: ProducerEsgPayload = decode(value)?;
        Ok(ProducerEsgSnapshot {
            tax_id: digits,
            status: payload.status,
            total_issues: payload.total_issues,
            fetched_at: Utc::now(),
        })
    }

    /// `GET /eudr/cars/{id}` (detailed) or `GET /eudr/cars/{id}:resumed`.
    pub async fn fetch_eudr_summary(
        &self,
        identifier: &str,
        detailed: bool,
    ) -> Result<EudrSnapshot, RemoteApiError> {
        if identifier.trim().is_empty() {
            return Err(RemoteApiError::InvalidIdentifier(
                "property identifier must be non-empty".into(),
            ));
        }
        let normalized = normalize_property_code(identifier);
        let escaped = escape_component(&normalized);
        let path = if detailed {
            format!("/eudr/cars/{escaped}")
        } else {
            format!("/eudr/cars/{escaped}:resumed")
        };
        let value = self.fetch_json(&path, true).await?;
        let payload: EudrPayload = decode(value)?;
        Ok(EudrSnapshot {
            id: Uuid::new_v4(),
            identifier: normalized,
            eu_status: payload.property_data_eu.eu_status,
            forest_loss_area: payload.property_data_eu.forest_loss_area,
            layer_results: payload
                .layer_data
                .into_iter()
                .map(EudrLayerPayload::into_result)
                .collect(),
            prodes_results: payload
                .prodes_layer_data
                .into_iter()
                .map(EudrLayerPayload::into_result)
                .collect(),
            fetched_at: Utc::now(),
        })
    }

    /// `GET /productivity/{id}?culture=...&source=...&includeGeoJson=...`
    pub async fn fetch_productivity(
        &self,
        identifier: &str,
        culture: Culture,
        options: &ProductivityOptions,
    ) -> Result<Vec<ProductivityRecord>, RemoteApiError> {
        if identifier.trim().is_empty() {
            return Err(RemoteApiError::InvalidIdentifier(
                "property identifier must be non-empty".into(),
            ));
        }
        let normalized = normalize_property_code(identifier);
        let mut path = format!(
            "/productivity/{}?culture={}&source={}&includeGeoJson={}",
            escape_component(&normalized),
            culture.as_query_value(),
            PRODUCTIVITY_SOURCE,
            options.include_geometry
        );
        if let Some(year) = options.year {
            path.push_str(&format!("&year={year}"));
        }
        if let Some(harvest) = &options.harvest {
            path.push_str(&format!("&harvest={}", escape_component(harvest)));
        }
        let value = self.fetch_json(&path, true).await?;
        let payloads: Vec<ProductivityPayload> = decode(value)?;
        Ok(payloads
            .into_iter()
            .map(|p| ProductivityRecord {
                id: Uuid::new_v4(),
                identifier: normalized.clone(),
                culture: p.culture,
                harvest: p.harvest,
                year: p.year,
                planted_area: p.planted_area,
                declared_area: p.declared_area,
                municipal_average_yield: p.municipal_average_yield,
                estimated_production: p.estimated_production,
                geometry: p.geometry,
            })
            .collect())
    }

    /// `GET /car/getCarsByLatLong?latitude=&longitude=`. Best-effort
    /// reverse search, single attempt, no retry.
    pub async fn fetch_properties_near(
        &self,
        lat: f64,
        lon: f64,
    ) -> Result<Vec<CandidateProperty>, RemoteApiError> {
        let path = format!("/car/getCarsByLatLong?latitude={lat}&longitude={lon}");
        let value = self.fetch_json(&path, false).await?;
        decode(value)
    }
}

/// Validate a raw JSON value against a declared schema. Kept separate from
/// fetching so validation failures are testable without a transport.
pub fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, RemoteApiError> {
    serde_json::from_value(value)
        .map_err(|err| RemoteApiError::Validation(format!("unexpected response shape: {err}")))
}

/// WFS-side failure. No retry policy here: the feature server is queried
/// once and a non-2xx answer surfaces immediately.
#[derive(Debug, Error)]
#[error("geo service error (status {status}): {message}")]
pub struct GeoServiceError {
    pub status: u16,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct GeoClientConfig {
    pub wfs_url: String,
    pub feature_type: String,
}

/// Client for the WFS feature server holding property boundary polygons.
pub struct GeoClient {
    transport: Arc<dyn HttpTransport>,
    config: GeoClientConfig,
}

impl GeoClient {
    pub fn new(transport: Arc<dyn HttpTransport>, config: GeoClientConfig) -> Self {
        Self { transport, config }
    }

    /// Single `GetFeature` call filtered by CAR code. An empty feature
    /// list is a valid result meaning "no boundary on file".
    pub async fn fetch_polygon(&self, identifier: &str) -> Result<FeatureCollection, GeoServiceError> {
        let normalized = normalize_property_code(identifier);
        let filter = escape_component(&format!("cod_imovel='{normalized}'"));
        let url = format!(
            "{}?service=WFS&version=2.0.0&request=GetFeature&typeNames={}&outputFormat=application/json&cql_filter={}",
            self.config.wfs_url.trim_end_matches('/'),
            escape_component(&self.config.feature_type),
            filter
        );
        let span = info_span!("wfs_fetch", identifier = %normalized);
        async {
            let response = self
                .transport
                .get(&url, &[])
                .await
                .map_err(|err| GeoServiceError {
                    status: 0,
                    message: err.0,
                })?;
            if !response.is_success() {
                return Err(GeoServiceError {
                    status: response.status,
                    message: format!("feature server rejected GetFeature for {normalized}"),
                });
            }
            serde_json::from_slice(&response.body).map_err(|err| GeoServiceError {
                status: response.status,
                message: format!("feature collection did not parse: {err}"),
            })
        }
        .instrument(span)
        .await
    }
}

/// Average of every vertex across all rings of all features. This is not
/// an area-weighted centroid; the approximation is kept deliberately for
/// parity with the upstream consumer. `None` for an empty collection.
pub fn centroid(collection: &FeatureCollection) -> Option<Coordinate> {
    let mut sum_lat = 0.0;
    let mut sum_lon = 0.0;
    let mut count = 0usize;

    let mut push = |pos: &Position| {
        sum_lon += pos[0];
        sum_lat += pos[1];
        count += 1;
    };

    for feature in &collection.features {
        match &feature.geometry {
            Some(Geometry::Polygon { coordinates }) => {
                for ring in coordinates {
                    ring.iter().for_each(&mut push);
                }
            }
            Some(Geometry::MultiPolygon { coordinates }) => {
                for polygon in coordinates {
                    for ring in polygon {
                        ring.iter().for_each(&mut push);
                    }
                }
            }
            None => {}
        }
    }

    if count == 0 {
        return None;
    }
    Some(Coordinate {
        lat: sum_lat / count as f64,
        lon: sum_lon / count as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeTransport {
        responses: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
        sticky: Option<RawResponse>,
        calls: AtomicUsize,
        urls: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn new(responses: Vec<Result<RawResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                sticky: None,
                calls: AtomicUsize::new(0),
                urls: Mutex::new(Vec::new()),
            })
        }

        /// Answers every call with the same status, regardless of count.
        fn always(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(VecDeque::new()),
                sticky: Some(RawResponse {
                    status,
                    body: body.as_bytes().to_vec(),
                }),
                calls: AtomicUsize::new(0),
                urls: Mutex::new(Vec::new()),
            })
        }

        fn urls(&self) -> Vec<String> {
            self.urls.lock().unwrap().clone()
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpTransport for FakeTransport {
        async fn get(
            &self,
            url: &str,
            _headers: &[(String, String)],
        ) -> Result<RawResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_string());
            if let Some(next) = self.responses.lock().unwrap().pop_front() {
                return next;
            }
            match &self.sticky {
                Some(response) => Ok(response.clone()),
                None => Err(TransportError("fake transport queue exhausted".into())),
            }
        }
    }

    fn client_with(transport: Arc<FakeTransport>) -> ComplianceClient {
        ComplianceClient::new(
            transport,
            ClientConfig::new("https://compliance.example", "test-key"),
        )
    }

    fn esg_body() -> String {
        serde_json::json!({
            "status": "NAO_CONFORME",
            "embargo_ibama": 2,
            "prodes_cerrado": 1,
            "total_issues": 3,
            "municipality": "Sorriso",
            "state": "MT",
            "declared_area": 1520.5,
            "registry_status": "ATIVO"
        })
        .to_string()
    }

    fn ok(body: &str) -> Result<RawResponse, TransportError> {
        Ok(RawResponse {
            status: 200,
            body: body.as_bytes().to_vec(),
        })
    }

    #[tokio::test]
    async fn esg_summary_decodes_counters_and_metadata() {
        let transport = FakeTransport::new(vec![ok(&esg_body())]);
        let client = client_with(transport.clone());
        let snapshot = client
            .fetch_property_esg_summary("mt.5107925.6d58f3ca")
            .await
            .expect("snapshot");
        assert_eq!(snapshot.identifier, "MT-5107925-6D58F3CA");
        assert_eq!(snapshot.status, ComplianceStatus::NaoConforme);
        assert_eq!(snapshot.counters.embargo_ibama, 2);
        assert_eq!(snapshot.counters.prodes_cerrado, 1);
        assert_eq!(snapshot.total_issues, 3);
        assert!(snapshot.is_consistent());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn empty_identifier_is_rejected_without_a_request() {
        let transport = FakeTransport::new(vec![]);
        let client = client_with(transport.clone());
        let err = client
            .fetch_property_esg_summary("   ")
            .await
            .expect_err("must fail");
        assert_eq!(err.status_code(), 400);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_503_is_tried_three_times_with_backoff() {
        let transport = FakeTransport::always(503, "");
        let client = client_with(transport.clone());
        let started = tokio::time::Instant::now();
        let err = client
            .fetch_property_esg_summary("MT-5107925-ABC")
            .await
            .expect_err("must fail");
        let waited = started.elapsed();
        assert_eq!(transport.calls(), 3);
        assert!(waited >= Duration::from_millis(3000), "waited {waited:?}");
        assert!(waited < Duration::from_millis(3500), "waited {waited:?}");
        assert_eq!(err.status_code(), 503);
    }

    #[tokio::test]
    async fn not_found_is_raised_on_first_attempt() {
        let transport = FakeTransport::always(404, "");
        let client = client_with(transport.clone());
        let err = client
            .fetch_property_esg_summary("MT-5107925-ABC")
            .await
            .expect_err("must fail");
        assert_eq!(transport.calls(), 1);
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_retry_then_surface_as_status_zero() {
        let transport = FakeTransport::new(vec![
            Err(TransportError("connection reset".into())),
            Err(TransportError("connection reset".into())),
            Err(TransportError("dns failure".into())),
        ]);
        let client = client_with(transport.clone());
        let err = client
            .fetch_property_esg_summary("MT-5107925-ABC")
            .await
            .expect_err("must fail");
        assert_eq!(transport.calls(), 3);
        assert_eq!(err.status_code(), 0);
        assert!(matches!(err, RemoteApiError::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_mid_retry_returns_the_snapshot() {
        let transport = FakeTransport::new(vec![
            Ok(RawResponse { status: 429, body: Vec::new() }),
            ok(&esg_body()),
        ]);
        let client = client_with(transport.clone());
        let snapshot = client
            .fetch_property_esg_summary("MT-5107925-ABC")
            .await
            .expect("snapshot");
        assert_eq!(transport.calls(), 2);
        assert_eq!(snapshot.status, ComplianceStatus::NaoConforme);
    }

    #[tokio::test]
    async fn unrecognized_shape_is_a_validation_error() {
        let transport = FakeTransport::new(vec![ok(r#"{"unexpected": true}"#)]);
        let client = client_with(transport);
        let err = client
            .fetch_property_esg_summary("MT-5107925-ABC")
            .await
            .expect_err("must fail");
        assert!(matches!(err, RemoteApiError::Validation(_)));
        assert_eq!(err.status_code(), 0);
    }

    #[tokio::test]
    async fn producer_summary_normalizes_tax_id_first() {
        let body = serde_json::json!({"status": "CONFORME", "total_issues": 0}).to_string();
        let transport = FakeTransport::new(vec![ok(&body)]);
        let client = client_with(transport);
        let snapshot = client
            .fetch_producer_esg_summary("123.456.789-01")
            .await
            .expect("snapshot");
        assert_eq!(snapshot.tax_id, "12345678901");
        assert!(snapshot.status.is_compliant());
    }

    #[tokio::test]
    async fn eudr_summary_decodes_both_layer_lists() {
        let body = serde_json::json!({
            "property_data_eu": {"eu_status": "NAO_CONFORME", "forest_loss_area": 12.3},
            "layer_data": [
                {"layer": "ibama_embargo", "issues": 1, "status": "NAO_CONFORME"}
            ],
            "prodes_layer_data": [
                {"layer": "prodes_2023", "issues": 2, "status": "NAO_CONFORME", "area": 4.2, "details": "clearing"}
            ]
        })
        .to_string();
        let transport = FakeTransport::new(vec![ok(&body)]);
        let client = client_with(transport);
        let snapshot = client
            .fetch_eudr_summary("MT-5107925-ABC", false)
            .await
            .expect("snapshot");
        assert_eq!(snapshot.eu_status, ComplianceStatus::NaoConforme);
        assert_eq!(snapshot.forest_loss_area, Some(12.3));
        assert_eq!(snapshot.layer_results.len(), 1);
        assert_eq!(snapshot.prodes_results[0].details.as_deref(), Some("clearing"));
    }

    #[tokio::test]
    async fn eudr_detailed_flag_selects_the_unsuffixed_path() {
        let body = serde_json::json!({
            "property_data_eu": {"eu_status": "CONFORME"},
            "layer_data": [],
            "prodes_layer_data": []
        })
        .to_string();
        let transport = FakeTransport::new(vec![ok(&body), ok(&body)]);
        let client = client_with(transport.clone());

        client
            .fetch_eudr_summary("MT-5107925-ABC", true)
            .await
            .expect("detailed");
        client
            .fetch_eudr_summary("MT-5107925-ABC", false)
            .await
            .expect("resumed");

        let urls = transport.urls();
        assert!(urls[0].ends_with("/eudr/cars/MT-5107925-ABC"), "{}", urls[0]);
        assert!(urls[1].ends_with("/eudr/cars/MT-5107925-ABC:resumed"), "{}", urls[1]);
    }

    #[tokio::test]
    async fn geo_search_does_not_retry() {
        let transport = FakeTransport::always(503, "");
        let client = client_with(transport.clone());
        let err = client
            .fetch_properties_near(-12.5, -55.7)
            .await
            .expect_err("must fail");
        assert_eq!(transport.calls(), 1);
        assert_eq!(err.status_code(), 503);
    }

    #[tokio::test]
    async fn wfs_non_2xx_raises_geo_error_immediately() {
        let transport = FakeTransport::always(500, "");
        let geo = GeoClient::new(
            transport.clone(),
            GeoClientConfig {
                wfs_url: "https://geo.example/wfs".into(),
                feature_type: "sicar:imoveis".into(),
            },
        );
        let err = geo.fetch_polygon("MT-5107925-ABC").await.expect_err("must fail");
        assert_eq!(err.status, 500);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn wfs_empty_feature_list_is_valid() {
        let transport = FakeTransport::new(vec![ok(r#"{"features": []}"#)]);
        let geo = GeoClient::new(
            transport,
            GeoClientConfig {
                wfs_url: "https://geo.example/wfs".into(),
                feature_type: "sicar:imoveis".into(),
            },
        );
        let collection = geo.fetch_polygon("MT-5107925-ABC").await.expect("collection");
        assert!(collection.is_empty());
    }

    #[test]
    fn centroid_of_empty_collection_is_none() {
        assert!(centroid(&FeatureCollection::default()).is_none());
    }

    #[test]
    fn centroid_averages_all_vertices() {
        let collection = FeatureCollection {
            features: vec![Feature {
                geometry: Some(Geometry::Polygon {
                    coordinates: vec![vec![[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0]]],
                }),
            }],
        };
        let center = centroid(&collection).expect("centroid");
        assert_eq!(center.lon, 1.0);
        assert_eq!(center.lat, 1.0);
    }

    #[test]
    fn escape_component_encodes_reserved_characters() {
        assert_eq!(escape_component("cod_imovel='MT-1'"), "cod_imovel%3D%27MT-1%27");
        assert_eq!(escape_component("MT-5107925-ABC"), "MT-5107925-ABC");
    }
}
