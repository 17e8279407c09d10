use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of an audit event; drives retention in `activity_log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Authorization changes. Never auto-deleted.
    Critical,
    #[default]
    Important,
    /// Self-healing bookkeeping, trimmed aggressively
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }
}

/// Anything that can be written to the audit trail.
///
/// The event name is `{entity_type}.{action}`, e.g. `role_permission_override.updated`.
pub trait Loggable: Serialize + Send + Sync {
    fn entity_type() -> &'static str;

    fn subject_id(&self) -> Uuid;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "deleted" | "removed" => Severity::Critical,
            "created" | "updated" => self.severity(),
            _ => Severity::Important,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Sample;

    impl Loggable for Sample {
        fn entity_type() -> &'static str { "sample" }
        fn subject_id(&self) -> Uuid { Uuid::nil() }
        fn severity(&self) -> Severity { Severity::Noise }
    }

    #[test]
    fn destructive_actions_escalate() {
        assert_eq!(Sample.severity_for_action("deleted"), Severity::Critical);
        assert_eq!(Sample.severity_for_action("removed"), Severity::Critical);
        assert_eq!(Sample.severity_for_action("updated"), Severity::Noise);
        assert_eq!(Sample.severity_for_action("touched"), Severity::Important);
    }
}
