//! Compliance snapshot ingestion: refresh every compliance dimension of a
//! property in one logical operation, tolerating partial upstream failure.
//! The ESG leg is the primary signal; its failure aborts the refresh with
//! nothing committed, while EUDR and productivity legs degrade gracefully.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use agrotrace_client::{
    ClientConfig, ComplianceClient, GeoClient, GeoClientConfig, ProductivityOptions,
    RemoteApiError, ReqwestTransport,
};
use agrotrace_core::{
    detect_history_changes, detect_status_change, normalize_property_code, normalize_tax_id,
    AlertDraft, ComplianceStatus, Culture, Dimension,
};
use agrotrace_store::{
    PropertyRecord, PropertyStore, RefreshCommit, StoreError, SupplierCheck, SupplierRecord,
};

pub const CRATE_NAME: &str = "agrotrace-ingest";

/// Environment-driven configuration for the refresh pipeline.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub api_base_url: String,
    pub api_key: String,
    pub cooperative_id: Option<String>,
    pub wfs_url: String,
    pub wfs_feature_type: String,
    pub http_timeout_secs: u64,
}

impl RefreshConfig {
    pub fn from_env() -> Self {
        Self {
            api_base_url: std::env::var("AGROTRACE_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.compliance.example".to_string()),
            api_key: std::env::var("AGROTRACE_API_KEY").unwrap_or_default(),
            cooperative_id: std::env::var("AGROTRACE_COOPERATIVE_ID").ok(),
            wfs_url: std::env::var("AGROTRACE_WFS_URL")
                .unwrap_or_else(|_| "https://geo.compliance.example/wfs".to_string()),
            wfs_feature_type: std::env::var("AGROTRACE_WFS_FEATURE_TYPE")
                .unwrap_or_else(|_| "sicar:imoveis".to_string()),
            http_timeout_secs: std::env::var("AGROTRACE_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        }
    }
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("property {0} is not registered")]
    UnknownProperty(String),
    #[error("supplier {0} is not registered")]
    UnknownSupplier(String),
    #[error("primary compliance fetch failed: {0}")]
    Esg(#[from] RemoteApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RefreshError {
    /// Upstream-style status code the web boundary maps onto HTTP.
    pub fn status_code(&self) -> u16 {
        match self {
            RefreshError::UnknownProperty(_) | RefreshError::UnknownSupplier(_) => 404,
            RefreshError::Esg(inner) => inner.status_code(),
            RefreshError::Store(_) => 500,
        }
    }
}

/// What a completed property refresh did.
#[derive(Debug, Clone)]
pub struct RefreshSummary {
    pub identifier: String,
    pub esg_status: ComplianceStatus,
    pub eudr_refreshed: bool,
    pub cultures_refreshed: usize,
    pub polygon_fetched: bool,
    pub alerts_emitted: usize,
}

#[derive(Debug, Clone)]
pub struct SupplierRefreshSummary {
    pub tax_id: String,
    pub status: ComplianceStatus,
    pub alerts_emitted: usize,
}

/// Orchestrates the five-way fan-out and the commit. Clients and store are
/// injected; there is no hidden global state.
pub struct Ingestor {
    client: ComplianceClient,
    geo: GeoClient,
    store: Arc<dyn PropertyStore>,
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Ingestor {
    pub fn new(config: &RefreshConfig, store: Arc<dyn PropertyStore>) -> anyhow::Result<Self> {
        let transport = Arc::new(
            ReqwestTransport::new(Duration::from_secs(config.http_timeout_secs))
                .context("building http transport")?,
        );
        let mut client_config = ClientConfig::new(&config.api_base_url, &config.api_key);
        client_config.cooperative_id = config.cooperative_id.clone();
        let client = ComplianceClient::new(transport.clone(), client_config);
        let geo = GeoClient::new(
            transport,
            GeoClientConfig {
                wfs_url: config.wfs_url.clone(),
                feature_type: config.wfs_feature_type.clone(),
            },
        );
        Ok(Self::with_parts(client, geo, store))
    }

    /// Wire the ingestor from already-built clients. This is the seam the
    /// tests use with fake transports.
    pub fn with_parts(client: ComplianceClient, geo: GeoClient, store: Arc<dyn PropertyStore>) -> Self {
        Self {
            client,
            geo,
            store,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    // One entry per identifier ever refreshed, never evicted; the map is
    // bounded by the size of the registry.
    async fn lock_for(&self, identifier: &str) -> Arc<Mutex<()>> {
        let mut map = self.refresh_locks.lock().await;
        map.entry(identifier.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Register a property and proactively run its first refresh. A failed
    /// first refresh does not undo the registration.
    pub async fn register_property(
        &self,
        identifier: &str,
        workspace_id: &str,
        name: Option<String>,
    ) -> Result<PropertyRecord, RefreshError> {
        let normalized = normalize_property_code(identifier);
        let mut record = PropertyRecord::new(normalized.clone(), workspace_id);
        record.name = name;
        self.store.upsert_property(record).await?;

        if let Err(err) = self.refresh_property(&normalized).await {
            warn!(identifier = %normalized, error = %err, "initial refresh failed; property kept");
        }
        self.store
            .get_property(&normalized)
            .await?
            .ok_or(RefreshError::UnknownProperty(normalized))
    }

    /// Refresh all compliance dimensions of one property.
    ///
    /// The fan-out legs are isolated: a failure in one never cancels the
    /// others. Only the ESG leg is fatal; EUDR and productivity failures
    /// are logged and swallowed, leaving that dimension's stored data
    /// untouched.
    pub async fn refresh_property(&self, identifier: &str) -> Result<RefreshSummary, RefreshError> {
        let normalized = normalize_property_code(identifier);
        // Serialize concurrent refreshes of the same property. The lock must
        // cover the previous-status read as well as the commit, otherwise two
        // refreshes both compare against the same stale status and each
        // emits an alert for one transition.
        let lock = self.lock_for(&normalized).await;
        let _guard = lock.lock().await;

        let property = self
            .store
            .get_property(&normalized)
            .await?
            .ok_or_else(|| RefreshError::UnknownProperty(normalized.clone()))?;

        let track_soy = property.cultures.contains(&Culture::Soy);
        let track_corn = property.cultures.contains(&Culture::Corn);
        let need_polygon = property.boundary.is_none();
        let options = ProductivityOptions::default();

        let esg_fut = self.client.fetch_property_esg_summary(&normalized);
        let eudr_fut = self.client.fetch_eudr_summary(&normalized, false);
        let soy_fut = async {
            if track_soy {
                Some(
                    self.client
                        .fetch_productivity(&normalized, Culture::Soy, &options)
                        .await,
                )
            } else {
                None
            }
        };
        let corn_fut = async {
            if track_corn {
                Some(
                    self.client
                        .fetch_productivity(&normalized, Culture::Corn, &options)
                        .await,
                )
            } else {
                None
            }
        };
        let polygon_fut = async {
            if need_polygon {
                Some(self.geo.fetch_polygon(&normalized).await)
            } else {
                None
            }
        };

        let (esg_res, eudr_res, soy_res, corn_res, polygon_res) =
            tokio::join!(esg_fut, eudr_fut, soy_fut, corn_fut, polygon_fut);

        // ESG is the primary signal: without it nothing is committed.
        let snapshot = esg_res?;

        let label = property.display_name().to_string();
        let mut drafts: Vec<AlertDraft> = Vec::new();
        if let Some(draft) = detect_status_change(
            &label,
            Dimension::Esg,
            property.esg_status.as_ref(),
            Some(&snapshot.status),
        ) {
            drafts.push(draft);
        }

        let mut eudr_status = None;
        let mut eudr_snapshot = None;
        match eudr_res {
            Ok(fetched) => {
                if let Some(draft) = detect_status_change(
                    &label,
                    Dimension::Eudr,
                    property.eudr_status.as_ref(),
                    Some(&fetched.eu_status),
                ) {
                    drafts.push(draft);
                }
                eudr_status = Some(fetched.eu_status.clone());
                eudr_snapshot = Some(fetched);
            }
            Err(err) => {
                warn!(identifier = %normalized, error = %err, "eudr leg failed; keeping stale data");
            }
        }

        let boundary = match polygon_res {
            Some(Ok(collection)) if !collection.is_empty() => Some(collection),
            Some(Ok(_)) => {
                info!(identifier = %normalized, "no boundary on file at the feature server");
                None
            }
            Some(Err(err)) => {
                warn!(identifier = %normalized, error = %err, "polygon leg failed");
                None
            }
            None => None,
        };
        let polygon_fetched = boundary.is_some();

        let now = Utc::now();
        let alerts: Vec<_> = drafts
            .into_iter()
            .map(|draft| draft.into_event(&normalized, &property.workspace_id, now))
            .collect();
        let alerts_emitted = alerts.len();
        let esg_status = snapshot.status.clone();

        self.store
            .commit_refresh(RefreshCommit {
                snapshot,
                eudr_status,
                boundary,
                alerts,
            })
            .await?;

        // Non-critical replacements commit after the primary transaction.
        let eudr_refreshed = eudr_snapshot.is_some();
        if let Some(fetched) = eudr_snapshot {
            if let Err(err) = self.store.replace_eudr(&normalized, fetched).await {
                warn!(identifier = %normalized, error = %err, "eudr replacement failed");
            }
        }

        let mut cultures_refreshed = 0usize;
        for (culture, result) in [(Culture::Soy, soy_res), (Culture::Corn, corn_res)] {
            match result {
                Some(Ok(rows)) => {
                    match self
                        .store
                        .replace_productivity(&normalized, culture, rows)
                        .await
                    {
                        Ok(()) => cultures_refreshed += 1,
                        Err(err) => {
                            warn!(identifier = %normalized, error = %err, "productivity replacement failed");
                        }
                    }
                }
                Some(Err(err)) => {
                    warn!(
                        identifier = %normalized,
                        culture = culture.as_query_value(),
                        error = %err,
                        "productivity leg failed; keeping stale data"
                    );
                }
                None => {}
            }
        }

        Ok(RefreshSummary {
            identifier: normalized,
            esg_status,
            eudr_refreshed,
            cultures_refreshed,
            polygon_fetched,
            alerts_emitted,
        })
    }

    /// Best-effort reverse search for CAR candidates around a coordinate.
    /// Single upstream attempt, no retry.
    pub async fn find_properties_near(
        &self,
        lat: f64,
        lon: f64,
    ) -> Result<Vec<agrotrace_client::CandidateProperty>, RemoteApiError> {
        self.client.fetch_properties_near(lat, lon).await
    }

    /// Refresh a supplier's producer-level ESG status and append a check
    /// to its history.
    pub async fn refresh_supplier(
        &self,
        tax_id: &str,
    ) -> Result<SupplierRefreshSummary, RefreshError> {
        let digits = normalize_tax_id(tax_id);
        // Same ordering as refresh_property: lock, then read the previous
        // status the detector compares against.
        let lock = self.lock_for(&digits).await;
        let _guard = lock.lock().await;

        let supplier = self
            .store
            .get_supplier(&digits)
            .await?
            .ok_or_else(|| RefreshError::UnknownSupplier(digits.clone()))?;

        let fetched = self.client.fetch_producer_esg_summary(&digits).await?;
        let label = supplier.display_name().to_string();
        let now = Utc::now();
        let alerts: Vec<_> = detect_status_change(
            &label,
            Dimension::Esg,
            supplier.status.as_ref(),
            Some(&fetched.status),
        )
        .into_iter()
        .map(|draft| draft.into_event(&digits, &supplier.workspace_id, now))
        .collect();
        let alerts_emitted = alerts.len();
        let status = fetched.status.clone();

        self.store
            .commit_supplier_check(
                &digits,
                SupplierCheck {
                    status: fetched.status,
                    total_issues: fetched.total_issues,
                    checked_at: fetched.fetched_at,
                },
                alerts,
            )
            .await?;

        Ok(SupplierRefreshSummary {
            tax_id: digits,
            status,
            alerts_emitted,
        })
    }

    /// Reconstruct every status transition in a supplier's stored check
    /// history (newest first), without emitting anything.
    pub async fn supplier_transition_report(
        &self,
        tax_id: &str,
    ) -> Result<Vec<AlertDraft>, RefreshError> {
        let digits = normalize_tax_id(tax_id);
        let supplier = self
            .store
            .get_supplier(&digits)
            .await?
            .ok_or_else(|| RefreshError::UnknownSupplier(digits.clone()))?;
        let statuses: Vec<ComplianceStatus> = supplier
            .checks
            .iter()
            .map(|check| check.status.clone())
            .collect();
        Ok(detect_history_changes(
            supplier.display_name(),
            Dimension::Esg,
            &statuses,
        ))
    }

    /// Register a supplier for monitoring; first check runs proactively.
    pub async fn register_supplier(
        &self,
        tax_id: &str,
        workspace_id: &str,
        name: Option<String>,
    ) -> Result<SupplierRecord, RefreshError> {
        let digits = normalize_tax_id(tax_id);
        let mut record = SupplierRecord::new(digits.clone(), workspace_id);
        record.name = name;
        self.store.upsert_supplier(record).await?;

        if let Err(err) = self.refresh_supplier(&digits).await {
            warn!(tax_id = %digits, error = %err, "initial supplier check failed; supplier kept");
        }
        self.store
            .get_supplier(&digits)
            .await?
            .ok_or(RefreshError::UnknownSupplier(digits))
    }
}
