use uuid::Uuid;

pub const KEY_NAMESPACE: &str = "permission";

const SYSTEM_SCOPE: &str = "system";

/// `permission:{user}:{org|system}:`, the prefix shared by every decision for the pair.
pub fn scope_prefix(user_id: Uuid, organization_id: Option<Uuid>) -> String {
    let org = organization_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| SYSTEM_SCOPE.to_string());
    format!("{}:{}:{}:", KEY_NAMESPACE, user_id, org)
}

pub fn decision_key(user_id: Uuid, organization_id: Option<Uuid>, resource: &str, action: &str) -> String {
    format!(
        "{}{}:{}",
        scope_prefix(user_id, organization_id),
        escape(resource),
        escape(action)
    )
}

// Resource and action are caller-supplied; keep ':' from shifting segment boundaries.
fn escape(segment: &str) -> String {
    segment.replace('%', "%25").replace(':', "%3A")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_key_sits_under_scope_prefix() {
        let user = Uuid::new_v4();
        let org = Uuid::new_v4();
        let key = decision_key(user, Some(org), "farms", "create");
        assert_eq!(key, format!("permission:{}:{}:farms:create", user, org));
        assert!(key.starts_with(&scope_prefix(user, Some(org))));
    }

    #[test]
    fn system_scope_is_distinct_key_space() {
        let user = Uuid::new_v4();
        let key = decision_key(user, None, "farms", "create");
        assert_eq!(key, format!("permission:{}:system:farms:create", user));
        assert!(!key.starts_with(&scope_prefix(user, Some(Uuid::new_v4()))));
    }

    #[test]
    fn separators_in_segments_do_not_collide() {
        let user = Uuid::new_v4();
        let a = decision_key(user, None, "a:b", "c");
        let b = decision_key(user, None, "a", "b:c");
        assert_ne!(a, b);
    }
}
