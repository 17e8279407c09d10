use serde::{Deserialize, Serialize};

use crate::models::rbac::Effect;

/// Final allow/deny outcome for one (user, organization, resource, action).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    /// Form stored in the decision cache
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "ALLOW",
            Decision::Deny => "DENY",
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Anything other than "ALLOW" reads as a denial.
    pub fn from_cached(value: &str) -> Self {
        if value == "ALLOW" {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}

/// Collapse the effects contributed by a user's roles.
///
/// Evaluation order:
/// 1. any DENY -> deny
/// 2. any ALLOW -> allow
/// 3. no opinion at all -> deny
pub fn combine<I>(effects: I) -> Decision
where
    I: IntoIterator<Item = Effect>,
{
    let mut allowed = false;
    for effect in effects {
        match effect {
            Effect::Deny => return Decision::Deny,
            Effect::Allow => allowed = true,
        }
    }

    if allowed {
        Decision::Allow
    } else {
        Decision::Deny
    }
}
