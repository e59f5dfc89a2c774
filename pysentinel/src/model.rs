//! Declarative alert definitions and the threshold predicates they carry.

use serde::{Deserialize, Serialize};

/// Alert severity. The string form (lowercase) is authoritative everywhere —
/// this type is never compared against a bare string by accident, which is
/// the bug the source's `update_thresholds_async` stumbled into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A threshold predicate: violated when the metric value exceeds `Max`, falls
/// below `Min`, or never (`None`, when neither key is present in config).
///
/// Deserialized from `{max: T}` / `{min: T}` / an absent `threshold` key —
/// this can't be a derived `Deserialize` impl because the two variants share
/// one config object rather than being tagged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Threshold {
    Max(f64),
    Min(f64),
    None,
}

impl<'de> Deserialize<'de> for Threshold {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            max: Option<f64>,
            min: Option<f64>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(match (raw.max, raw.min) {
            (Some(max), _) => Threshold::Max(max),
            (None, Some(min)) => Threshold::Min(min),
            (None, None) => Threshold::None,
        })
    }
}

impl Serialize for Threshold {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Threshold::Max(v) => map.serialize_entry("max", v)?,
            Threshold::Min(v) => map.serialize_entry("min", v)?,
            Threshold::None => {}
        }
        map.end()
    }
}

/// The comparison operator recorded on a `Violation`.
///
/// Per the spec's §9 open question, this is intentionally the *inverse* of
/// the evaluated predicate: a `max` threshold violates on `v > max` but
/// records `<=` (describing the allowed range), and vice versa for `min`.
/// This preserves the source's possibly-buggy behavior rather than silently
/// fixing it; flagged here for implementer review as instructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Operator::Le => "<=",
            Operator::Ge => ">=",
        })
    }
}

/// A declarative alert: a query on a datasource, a threshold predicate, and
/// a list of delivery channels. Immutable after config load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertDefinition {
    /// Unique identifier, used as the cooldown/ledger key.
    pub name: String,
    /// Field extracted from the datasource's fetch-result map.
    pub metric_key: String,
    /// Opaque query string passed to the datasource.
    pub query: String,
    /// Must resolve in `Scanner::datasources`.
    pub datasource_name: String,
    #[serde(default)]
    pub threshold: Threshold,
    pub severity: Severity,
    /// 0 means "check every tick".
    #[serde(default)]
    pub interval_seconds: u64,
    /// Ordered list of channel names.
    #[serde(default)]
    pub alert_channels: Vec<String>,
    #[serde(default)]
    pub description: String,
    pub alert_group: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Threshold {
    fn default() -> Self {
        Threshold::None
    }
}
