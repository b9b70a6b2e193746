//! Core domain model for Agrotrace: identifiers, compliance status,
//! snapshots, property boundaries, and alert derivation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "agrotrace-core";

/// Normalize a raw CAR property code: uppercase, strip everything that is
/// not alphanumeric, then re-hyphenate as `{region}-{municipality}-{hash}`
/// when the remainder after the two-letter region prefix opens with seven
/// digits (the IBGE municipality code). Idempotent.
pub fn normalize_property_code(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if cleaned.len() <= 2 {
        return cleaned;
    }
    let (region, rest) = cleaned.split_at(2);
    if rest.len() > 7 && rest[..7].chars().all(|c| c.is_ascii_digit()) {
        format!("{}-{}-{}", region, &rest[..7], &rest[7..])
    } else {
        format!("{region}-{rest}")
    }
}

/// Strip a raw tax identifier down to its digits.
pub fn normalize_tax_id(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// A normalized tax id is valid at 11 digits (individual) or 14 (company).
pub fn is_valid_tax_id(digits: &str) -> bool {
    matches!(digits.len(), 11 | 14) && digits.chars().all(|c| c.is_ascii_digit())
}

/// Identifier handed to the compliance provider: either a CAR property code
/// or a producer tax id. Immutable once assigned to a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum ComplianceIdentifier {
    PropertyCode(String),
    TaxId(String),
}

impl ComplianceIdentifier {
    /// Classify and normalize a raw identifier. All-digit inputs of a valid
    /// tax-id length become tax ids; everything else is treated as a
    /// property code.
    pub fn parse(raw: &str) -> Self {
        let has_letters = raw.chars().any(|c| c.is_ascii_alphabetic());
        let digits = normalize_tax_id(raw);
        if !has_letters && is_valid_tax_id(&digits) {
            ComplianceIdentifier::TaxId(digits)
        } else {
            ComplianceIdentifier::PropertyCode(normalize_property_code(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ComplianceIdentifier::PropertyCode(code) => code,
            ComplianceIdentifier::TaxId(digits) => digits,
        }
    }
}

impl fmt::Display for ComplianceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream compliance status. Open set: the provider emits `CONFORME` and
/// `NAO_CONFORME` plus occasional ad-hoc values, so anything unrecognized is
/// preserved verbatim rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComplianceStatus {
    Conforme,
    NaoConforme,
    Other(String),
}

impl ComplianceStatus {
    pub fn from_upstream(raw: &str) -> Self {
        match raw {
            "CONFORME" => ComplianceStatus::Conforme,
            "NAO_CONFORME" => ComplianceStatus::NaoConforme,
            other => ComplianceStatus::Other(other.to_string()),
        }
    }

    pub fn as_upstream(&self) -> &str {
        match self {
            ComplianceStatus::Conforme => "CONFORME",
            ComplianceStatus::NaoConforme => "NAO_CONFORME",
            ComplianceStatus::Other(raw) => raw,
        }
    }

    /// Human label used in alert messages.
    pub fn label(&self) -> &str {
        match self {
            ComplianceStatus::Conforme => "Conforme",
            ComplianceStatus::NaoConforme => "Não conforme",
            ComplianceStatus::Other(raw) => raw,
        }
    }

    pub fn is_compliant(&self) -> bool {
        matches!(self, ComplianceStatus::Conforme)
    }
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_upstream())
    }
}

impl Serialize for ComplianceStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_upstream())
    }
}

impl<'de> Deserialize<'de> for ComplianceStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ComplianceStatus::from_upstream(&raw))
    }
}

/// Named issue counters, one per regulatory layer contributing to an ESG
/// snapshot. Counter names mirror the upstream payload fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EsgIssueCounters {
    #[serde(default)]
    pub embargo_ibama: u32,
    #[serde(default)]
    pub embargo_sema: u32,
    #[serde(default)]
    pub embargo_icmbio: u32,
    #[serde(default)]
    pub indigenous_land: u32,
    #[serde(default)]
    pub quilombola_area: u32,
    #[serde(default)]
    pub conservation_unit: u32,
    #[serde(default)]
    pub prodes_amazon: u32,
    #[serde(default)]
    pub prodes_cerrado: u32,
    #[serde(default)]
    pub prodes_mata_atlantica: u32,
    #[serde(default)]
    pub prodes_caatinga: u32,
    #[serde(default)]
    pub prodes_pampa: u32,
    #[serde(default)]
    pub prodes_pantanal: u32,
    #[serde(default)]
    pub public_forest: u32,
    #[serde(default)]
    pub legal_reserve: u32,
    #[serde(default)]
    pub app_area: u32,
}

impl EsgIssueCounters {
    pub fn sum(&self) -> u32 {
        self.embargo_ibama
            + self.embargo_sema
            + self.embargo_icmbio
            + self.indigenous_land
            + self.quilombola_area
            + self.conservation_unit
            + self.prodes_amazon
            + self.prodes_cerrado
            + self.prodes_mata_atlantica
            + self.prodes_caatinga
            + self.prodes_pampa
            + self.prodes_pantanal
            + self.public_forest
            + self.legal_reserve
            + self.app_area
    }
}

/// One point-in-time ESG query result for a property. Append-only: a new
/// row is created on every refresh and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EsgSnapshot {
    pub id: Uuid,
    pub identifier: String,
    pub status: ComplianceStatus,
    pub counters: EsgIssueCounters,
    pub total_issues: u32,
    pub municipality: Option<String>,
    pub state: Option<String>,
    pub declared_area: Option<f64>,
    pub registry_status: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl EsgSnapshot {
    /// Upstream declares `total_issues`; the counters should add up to it.
    pub fn is_consistent(&self) -> bool {
        self.total_issues == self.counters.sum()
    }
}

/// Producer-level (tax-id) ESG result, coarser than a property snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerEsgSnapshot {
    pub tax_id: String,
    pub status: ComplianceStatus,
    pub total_issues: u32,
    pub fetched_at: DateTime<Utc>,
}

/// One regulatory layer's contribution to an EUDR result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EudrLayerResult {
    pub layer: String,
    pub issues: u32,
    pub status: ComplianceStatus,
    pub area: Option<f64>,
    pub details: Option<String>,
}

/// One point-in-time EUDR query result. Unlike ESG, history is not
/// retained: each refresh replaces the prior rows for the property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EudrSnapshot {
    pub id: Uuid,
    pub identifier: String,
    pub eu_status: ComplianceStatus,
    pub forest_loss_area: Option<f64>,
    pub layer_results: Vec<EudrLayerResult>,
    pub prodes_results: Vec<EudrLayerResult>,
    pub fetched_at: DateTime<Utc>,
}

/// Tracked crop cultures for productivity queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Culture {
    Soy,
    Corn,
}

impl Culture {
    pub fn as_query_value(&self) -> &'static str {
        match self {
            Culture::Soy => "SOY",
            Culture::Corn => "CORN",
        }
    }
}

/// One (property, culture, harvest) productivity row. Replaced wholesale
/// on each refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductivityRecord {
    pub id: Uuid,
    pub identifier: String,
    pub culture: Culture,
    pub harvest: Option<String>,
    pub year: Option<i32>,
    pub planted_area: Option<f64>,
    pub declared_area: Option<f64>,
    pub municipal_average_yield: Option<f64>,
    pub estimated_production: Option<f64>,
    pub geometry: Option<FeatureCollection>,
}

/// GeoJSON position pair. Upstream order is `[longitude, latitude]`.
pub type Position = [f64; 2];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub geometry: Option<Geometry>,
}

/// Boundary polygon(s) for a property as returned by the feature server.
/// An empty `features` list is a valid "no boundary on file" result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(default)]
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

/// Alert classification: ESG transitions vs EUDR transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    #[serde(rename = "STATUS_CHANGE")]
    StatusChange,
    #[serde(rename = "EUDR_CHANGE")]
    EudrChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// Persisted alert row. Created only by status-change detection; mutated
/// only by the read-flag toggle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: Uuid,
    pub property_id: String,
    pub workspace_id: String,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Alert content before it is bound to a property row and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertDraft {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
}

impl AlertDraft {
    pub fn into_event(
        self,
        property_id: &str,
        workspace_id: &str,
        created_at: DateTime<Utc>,
    ) -> AlertEvent {
        AlertEvent {
            id: Uuid::new_v4(),
            property_id: property_id.to_string(),
            workspace_id: workspace_id.to_string(),
            kind: self.kind,
            severity: self.severity,
            message: self.message,
            read: false,
            created_at,
        }
    }
}

/// Compliance dimension a status transition belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Esg,
    Eudr,
}

impl Dimension {
    fn name(&self) -> &'static str {
        match self {
            Dimension::Esg => "ESG",
            Dimension::Eudr => "EUDR",
        }
    }

    fn kind(&self) -> AlertKind {
        match self {
            Dimension::Esg => AlertKind::StatusChange,
            Dimension::Eudr => AlertKind::EudrChange,
        }
    }
}

/// Decide whether a status transition warrants an alert.
///
/// An alert is emitted iff a previous status existed, a new one was
/// obtained, and the two differ. The first-ever check never alerts.
/// Improvements (to `CONFORME`) are informational; regressions are
/// `CRITICAL` for ESG and `WARNING` for EUDR.
pub fn detect_status_change(
    label: &str,
    dimension: Dimension,
    previous: Option<&ComplianceStatus>,
    next: Option<&ComplianceStatus>,
) -> Option<AlertDraft> {
    let previous = previous?;
    let next = next?;
    if previous == next {
        return None;
    }
    let severity = if next.is_compliant() {
        AlertSeverity::Info
    } else {
        match dimension {
            Dimension::Esg => AlertSeverity::Critical,
            Dimension::Eudr => AlertSeverity::Warning,
        }
    };
    Some(AlertDraft {
        kind: dimension.kind(),
        severity,
        message: format!(
            "{} status for {} changed from {} to {}",
            dimension.name(),
            label,
            previous.label(),
            next.label()
        ),
    })
}

/// Walk a time-descending status history and emit one change per adjacent
/// pair that differs. Used for supplier and supplier-property check
/// histories, where transitions are reconstructed after the fact.
pub fn detect_history_changes(
    label: &str,
    dimension: Dimension,
    newest_first: &[ComplianceStatus],
) -> Vec<AlertDraft> {
    newest_first
        .windows(2)
        .filter_map(|pair| detect_status_change(label, dimension, Some(&pair[1]), Some(&pair[0])))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_code_normalization_matches_car_format() {
        assert_eq!(
            normalize_property_code("mt.5107925.6d58f3ca"),
            "MT-5107925-6D58F3CA"
        );
        assert_eq!(
            normalize_property_code("MT-5107925-6D58F3CA"),
            "MT-5107925-6D58F3CA"
        );
    }

    #[test]
    fn property_code_normalization_is_idempotent() {
        for raw in ["mt.5107925.6d58f3ca", "pa 1234567 abc", "XX-42", "a", ""] {
            let once = normalize_property_code(raw);
            assert_eq!(normalize_property_code(&once), once, "input {raw:?}");
        }
    }

    #[test]
    fn short_remainder_gets_single_hyphen() {
        assert_eq!(normalize_property_code("xx42abc"), "XX-42ABC");
        assert_eq!(normalize_property_code("xx1234567"), "XX-1234567");
    }

    #[test]
    fn tax_id_strips_to_digits_and_validates_length() {
        assert_eq!(normalize_tax_id("123.456.789-01"), "12345678901");
        assert!(is_valid_tax_id("12345678901"));
        assert!(is_valid_tax_id("12345678000190"));
        assert!(!is_valid_tax_id("1234567890"));
    }

    #[test]
    fn identifier_parse_classifies_tax_ids_and_codes() {
        assert_eq!(
            ComplianceIdentifier::parse("123.456.789-01"),
            ComplianceIdentifier::TaxId("12345678901".into())
        );
        assert_eq!(
            ComplianceIdentifier::parse("mt.5107925.6d58f3ca"),
            ComplianceIdentifier::PropertyCode("MT-5107925-6D58F3CA".into())
        );
    }

    #[test]
    fn status_round_trips_open_values() {
        assert_eq!(
            ComplianceStatus::from_upstream("CONFORME"),
            ComplianceStatus::Conforme
        );
        let odd = ComplianceStatus::from_upstream("RISK");
        assert_eq!(odd.as_upstream(), "RISK");
        assert!(!odd.is_compliant());
    }

    #[test]
    fn counters_sum_backs_consistency_check() {
        let mut counters = EsgIssueCounters::default();
        counters.embargo_ibama = 2;
        counters.prodes_cerrado = 1;
        let snapshot = EsgSnapshot {
            id: Uuid::new_v4(),
            identifier: "MT-5107925-ABC".into(),
            status: ComplianceStatus::NaoConforme,
            counters,
            total_issues: 3,
            municipality: None,
            state: None,
            declared_area: None,
            registry_status: None,
            fetched_at: Utc::now(),
        };
        assert!(snapshot.is_consistent());
    }

    #[test]
    fn first_check_never_alerts() {
        let next = ComplianceStatus::NaoConforme;
        assert!(detect_status_change("Fazenda Alpha", Dimension::Esg, None, Some(&next)).is_none());
    }

    #[test]
    fn identical_statuses_are_suppressed() {
        let status = ComplianceStatus::Other("RISK".into());
        assert!(detect_status_change(
            "Fazenda Alpha",
            Dimension::Eudr,
            Some(&status),
            Some(&status)
        )
        .is_none());
    }

    #[test]
    fn esg_regression_is_critical() {
        let draft = detect_status_change(
            "Fazenda Alpha",
            Dimension::Esg,
            Some(&ComplianceStatus::Conforme),
            Some(&ComplianceStatus::NaoConforme),
        )
        .expect("alert");
        assert_eq!(draft.kind, AlertKind::StatusChange);
        assert_eq!(draft.severity, AlertSeverity::Critical);
        assert!(draft.message.contains("Fazenda Alpha"));
    }

    #[test]
    fn eudr_improvement_is_info() {
        let draft = detect_status_change(
            "MT-5107925-ABC",
            Dimension::Eudr,
            Some(&ComplianceStatus::NaoConforme),
            Some(&ComplianceStatus::Conforme),
        )
        .expect("alert");
        assert_eq!(draft.kind, AlertKind::EudrChange);
        assert_eq!(draft.severity, AlertSeverity::Info);
    }

    #[test]
    fn eudr_regression_is_warning_not_critical() {
        let draft = detect_status_change(
            "x",
            Dimension::Eudr,
            Some(&ComplianceStatus::Conforme),
            Some(&ComplianceStatus::NaoConforme),
        )
        .expect("alert");
        assert_eq!(draft.severity, AlertSeverity::Warning);
    }

    #[test]
    fn history_walk_emits_one_alert_per_differing_pair() {
        let history = vec![
            ComplianceStatus::Conforme,
            ComplianceStatus::NaoConforme,
            ComplianceStatus::NaoConforme,
            ComplianceStatus::Conforme,
        ];
        let drafts = detect_history_changes("Supplier X", Dimension::Esg, &history);
        assert_eq!(drafts.len(), 2);
        // Newest pair first: Não conforme -> Conforme is an improvement.
        assert_eq!(drafts[0].severity, AlertSeverity::Info);
        assert_eq!(drafts[1].severity, AlertSeverity::Critical);
    }

    #[test]
    fn empty_or_single_history_is_quiet() {
        assert!(detect_history_changes("x", Dimension::Esg, &[]).is_empty());
        assert!(
            detect_history_changes("x", Dimension::Esg, &[ComplianceStatus::Conforme]).is_empty()
        );
    }
}
