//! Persistence seam for Agrotrace: typed record stores behind traits, plus
//! the in-memory implementation used by the web surface and tests. The
//! relational backend lives outside this workspace; everything here is the
//! interface the ingestion core requires.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use agrotrace_core::{
    AlertEvent, AlertSeverity, ComplianceStatus, Culture, EsgSnapshot, EudrSnapshot,
    FeatureCollection, ProductivityRecord,
};

pub const CRATE_NAME: &str = "agrotrace-store";

/// Persisted property row. Status fields are denormalized from the latest
/// successful refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub identifier: String,
    pub workspace_id: String,
    pub name: Option<String>,
    pub esg_status: Option<ComplianceStatus>,
    pub eudr_status: Option<ComplianceStatus>,
    pub municipality: Option<String>,
    pub state: Option<String>,
    pub declared_area: Option<f64>,
    pub registry_status: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub boundary: Option<FeatureCollection>,
    pub cultures: Vec<Culture>,
    pub created_at: DateTime<Utc>,
}

impl PropertyRecord {
    pub fn new(identifier: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            workspace_id: workspace_id.into(),
            name: None,
            esg_status: None,
            eudr_status: None,
            municipality: None,
            state: None,
            declared_area: None,
            registry_status: None,
            last_checked_at: None,
            boundary: None,
            cultures: vec![Culture::Soy, Culture::Corn],
            created_at: Utc::now(),
        }
    }

    /// Label used in alert messages: the given name, falling back to the
    /// identifier.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.identifier)
    }
}

/// One historical supplier compliance check, newest first in the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierCheck {
    pub status: ComplianceStatus,
    pub total_issues: u32,
    pub checked_at: DateTime<Utc>,
}

/// Third-party producer being monitored, linked to zero or more
/// properties. Mirrors the property snapshot/alert pattern at a coarser
/// grain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierRecord {
    pub tax_id: String,
    pub workspace_id: String,
    pub name: Option<String>,
    pub status: Option<ComplianceStatus>,
    pub linked_properties: Vec<String>,
    pub checks: Vec<SupplierCheck>,
}

impl SupplierRecord {
    pub fn new(tax_id: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        Self {
            tax_id: tax_id.into(),
            workspace_id: workspace_id.into(),
            name: None,
            status: None,
            linked_properties: Vec::new(),
            checks: Vec::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.tax_id)
    }
}

/// Everything a successful refresh commits in one transaction: the new ESG
/// snapshot row, the property's denormalized status fields, and any alerts
/// the detector produced. EUDR/productivity replacements commit separately
/// because they are explicitly non-critical.
#[derive(Debug, Clone)]
pub struct RefreshCommit {
    pub snapshot: EsgSnapshot,
    pub eudr_status: Option<ComplianceStatus>,
    pub boundary: Option<FeatureCollection>,
    pub alerts: Vec<AlertEvent>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("property {0} not found")]
    PropertyNotFound(String),
    #[error("supplier {0} not found")]
    SupplierNotFound(String),
}

#[async_trait]
pub trait PropertyStore: Send + Sync {
    async fn get_property(&self, identifier: &str) -> Result<Option<PropertyRecord>, StoreError>;
    async fn upsert_property(&self, record: PropertyRecord) -> Result<(), StoreError>;
    /// Cascades to snapshots, productivity rows, and alerts.
    async fn delete_property(&self, identifier: &str) -> Result<(), StoreError>;

    /// Atomic: snapshot append + status-field update + alert append.
    async fn commit_refresh(&self, commit: RefreshCommit) -> Result<(), StoreError>;
    /// EUDR history is not retained: delete prior rows, insert the latest.
    async fn replace_eudr(&self, identifier: &str, snapshot: EudrSnapshot)
        -> Result<(), StoreError>;
    /// Wholesale replacement of one culture's productivity rows.
    async fn replace_productivity(
        &self,
        identifier: &str,
        culture: Culture,
        rows: Vec<ProductivityRecord>,
    ) -> Result<(), StoreError>;

    /// Append-only ESG history, newest first.
    async fn esg_history(&self, identifier: &str) -> Result<Vec<EsgSnapshot>, StoreError>;
    async fn latest_eudr(&self, identifier: &str) -> Result<Option<EudrSnapshot>, StoreError>;
    async fn productivity(&self, identifier: &str) -> Result<Vec<ProductivityRecord>, StoreError>;

    async fn get_supplier(&self, tax_id: &str) -> Result<Option<SupplierRecord>, StoreError>;
    async fn upsert_supplier(&self, record: SupplierRecord) -> Result<(), StoreError>;
    /// Atomic: prepend check + update supplier status + append alerts.
    async fn commit_supplier_check(
        &self,
        tax_id: &str,
        check: SupplierCheck,
        alerts: Vec<AlertEvent>,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AlertFilter {
    pub severity: Option<AlertSeverity>,
    pub read: Option<bool>,
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn count_unread(&self, workspace_id: &str) -> Result<u64, StoreError>;
    async fn list(
        &self,
        workspace_id: &str,
        filter: &AlertFilter,
    ) -> Result<Vec<AlertEvent>, StoreError>;
    /// Returns how many alerts actually flipped to read.
    async fn mark_read(&self, ids: &[Uuid]) -> Result<u64, StoreError>;
}

#[derive(Debug, Default)]
struct StoreState {
    properties: HashMap<String, PropertyRecord>,
    esg_history: HashMap<String, Vec<EsgSnapshot>>,
    eudr: HashMap<String, EudrSnapshot>,
    productivity: HashMap<String, Vec<ProductivityRecord>>,
    suppliers: HashMap<String, SupplierRecord>,
    alerts: Vec<AlertEvent>,
}

/// In-memory store. All state sits behind one `RwLock`, which is what
/// makes `commit_refresh` atomic with respect to readers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PropertyStore for MemoryStore {
    async fn get_property(&self, identifier: &str) -> Result<Option<PropertyRecord>, StoreError> {
        Ok(self.state.read().await.properties.get(identifier).cloned())
    }

    async fn upsert_property(&self, record: PropertyRecord) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .properties
            .insert(record.identifier.clone(), record);
        Ok(())
    }

    async fn delete_property(&self, identifier: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.properties.remove(identifier).is_none() {
            return Err(StoreError::PropertyNotFound(identifier.to_string()));
        }
        state.esg_history.remove(identifier);
        state.eudr.remove(identifier);
        state.productivity.remove(identifier);
        state.alerts.retain(|alert| alert.property_id != identifier);
        Ok(())
    }

    async fn commit_refresh(&self, commit: RefreshCommit) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let identifier = commit.snapshot.identifier.clone();
        let property = state
            .properties
            .get_mut(&identifier)
            .ok_or_else(|| StoreError::PropertyNotFound(identifier.clone()))?;

        property.esg_status = Some(commit.snapshot.status.clone());
        if let Some(eudr_status) = commit.eudr_status {
            property.eudr_status = Some(eudr_status);
        }
        if commit.snapshot.municipality.is_some() {
            property.municipality = commit.snapshot.municipality.clone();
        }
        if commit.snapshot.state.is_some() {
            property.state = commit.snapshot.state.clone();
        }
        if commit.snapshot.declared_area.is_some() {
            property.declared_area = commit.snapshot.declared_area;
        }
        if commit.snapshot.registry_status.is_some() {
            property.registry_status = commit.snapshot.registry_status.clone();
        }
        if let Some(boundary) = commit.boundary {
            property.boundary = Some(boundary);
        }
        property.last_checked_at = Some(commit.snapshot.fetched_at);

        state
            .esg_history
            .entry(identifier)
            .or_default()
            .insert(0, commit.snapshot);
        state.alerts.extend(commit.alerts);
        Ok(())
    }

    async fn replace_eudr(
        &self,
        identifier: &str,
        snapshot: EudrSnapshot,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.properties.contains_key(identifier) {
            return Err(StoreError::PropertyNotFound(identifier.to_string()));
        }
        state.eudr.insert(identifier.to_string(), snapshot);
        Ok(())
    }

    async fn replace_productivity(
        &self,
        identifier: &str,
        culture: Culture,
        rows: Vec<ProductivityRecord>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.properties.contains_key(identifier) {
            return Err(StoreError::PropertyNotFound(identifier.to_string()));
        }
        let existing = state.productivity.entry(identifier.to_string()).or_default();
        existing.retain(|row| row.culture != culture);
        existing.extend(rows);
        Ok(())
    }

    async fn esg_history(&self, identifier: &str) -> Result<Vec<EsgSnapshot>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .esg_history
            .get(identifier)
            .cloned()
            .unwrap_or_default())
    }

    async fn latest_eudr(&self, identifier: &str) -> Result<Option<EudrSnapshot>, StoreError> {
        Ok(self.state.read().await.eudr.get(identifier).cloned())
    }

    async fn productivity(&self, identifier: &str) -> Result<Vec<ProductivityRecord>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .productivity
            .get(identifier)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_supplier(&self, tax_id: &str) -> Result<Option<SupplierRecord>, StoreError> {
        Ok(self.state.read().await.suppliers.get(tax_id).cloned())
    }

    async fn upsert_supplier(&self, record: SupplierRecord) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .suppliers
            .insert(record.tax_id.clone(), record);
        Ok(())
    }

    async fn commit_supplier_check(
        &self,
        tax_id: &str,
        check: SupplierCheck,
        alerts: Vec<AlertEvent>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let supplier = state
            .suppliers
            .get_mut(tax_id)
            .ok_or_else(|| StoreError::SupplierNotFound(tax_id.to_string()))?;
        supplier.status = Some(check.status.clone());
        supplier.checks.insert(0, check);
        state.alerts.extend(alerts);
        Ok(())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn count_unread(&self, workspace_id: &str) -> Result<u64, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .alerts
            .iter()
            .filter(|alert| alert.workspace_id == workspace_id && !alert.read)
            .count() as u64)
    }

    async fn list(
        &self,
        workspace_id: &str,
        filter: &AlertFilter,
    ) -> Result<Vec<AlertEvent>, StoreError> {
        let state = self.state.read().await;
        let mut alerts: Vec<AlertEvent> = state
            .alerts
            .iter()
            .filter(|alert| alert.workspace_id == workspace_id)
            .filter(|alert| filter.severity.map_or(true, |s| alert.severity == s))
            .filter(|alert| filter.read.map_or(true, |r| alert.read == r))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(alerts)
    }

    async fn mark_read(&self, ids: &[Uuid]) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let mut flipped = 0u64;
        for alert in &mut state.alerts {
            if !alert.read && ids.contains(&alert.id) {
                alert.read = true;
                flipped += 1;
            }
        }
        Ok(flipped)
    }
}
