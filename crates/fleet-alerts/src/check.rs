use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

// Application labels which are understood by the alert engine.
pub const ALERTS_ENABLED: &str = "alerts.enabled";
pub const ALERTS_ROUTES: &str = "alerts.routes";
// Application labels which are understood by notifiers.
pub const ALERTS_WEBHOOK_URLS: &str = "alerts.webhook.urls";

/// Severity is the classification of a check result.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    /// Resolved is assigned only by the alert engine, when a previously
    /// failing check passes again.
    Resolved,
    Pass,
}

/// Failing severities which may hold a suppression, in lookup priority order.
pub const SUPPRESSED_SEVERITIES: [Severity; 2] = [Severity::Warning, Severity::Critical];

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Resolved => "resolved",
            Severity::Pass => "pass",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("expected one of warning / critical / pass / resolved but {0:?} found")]
pub struct UnknownSeverity(pub String);

impl std::str::FromStr for Severity {
    type Err = UnknownSeverity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            "pass" => Ok(Severity::Pass),
            "resolved" => Ok(Severity::Resolved),
            other => Err(UnknownSeverity(other.to_string())),
        }
    }
}

/// CheckResultEvent is one observation of one check against one application.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResultEvent {
    /// Stable identifier of the checked application.
    pub app_id: String,
    /// Name of the check which produced this event.
    pub check_name: String,
    pub severity: Severity,
    /// Human-readable detail of the observation.
    #[serde(default)]
    pub message: String,
    /// When the underlying condition was observed.
    pub timestamp: DateTime<Utc>,
    /// Labels of the application, which may override alerting behavior.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Number of consecutive notifications of this check since its last
    /// resolution. Assigned by the alert engine.
    #[serde(default)]
    pub times: u32,
}

impl CheckResultEvent {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    /// Returns whether alerting is enabled for the event's application.
    /// Alerting is enabled unless the `alerts.enabled` label parses as false.
    pub fn alerts_enabled(&self) -> bool {
        self.label(ALERTS_ENABLED)
            .and_then(parse_bool)
            .unwrap_or(true)
    }

    /// Returns the application's routing specification override,
    /// or `default` if the application doesn't provide one.
    pub fn routes_spec<'s>(&'s self, default: &'s str) -> &'s str {
        self.label(ALERTS_ROUTES).unwrap_or(default)
    }
}

/// Parse a boolean-ish label value, returning None if it's not recognized.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
