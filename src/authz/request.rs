use uuid::Uuid;

use crate::cache::{decision_key, scope_prefix};

/// One question for the resolver: may `user_id` do `action` on `resource` in the organization?
///
/// `organization_id = None` asks about the system scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub user_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub resource: String,
    pub action: String,
}

impl AccessRequest {
    pub fn new(user_id: Uuid, organization_id: Uuid, resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            user_id,
            organization_id: Some(organization_id),
            resource: resource.into(),
            action: action.into(),
        }
    }

    pub fn system(user_id: Uuid, resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            user_id,
            organization_id: None,
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// Parse `resource.action`, splitting on the last dot.
    pub fn from_qualified(user_id: Uuid, organization_id: Option<Uuid>, qualified: &str) -> Option<Self> {
        let (resource, action) = qualified.rsplit_once('.')?;
        if resource.is_empty() || action.is_empty() {
            return None;
        }
        Some(Self {
            user_id,
            organization_id,
            resource: resource.to_string(),
            action: action.to_string(),
        })
    }

    pub fn cache_key(&self) -> String {
        decision_key(self.user_id, self.organization_id, &self.resource, &self.action)
    }

    pub fn scope_prefix(&self) -> String {
        scope_prefix(self.user_id, self.organization_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_names_split_on_last_dot() {
        let user = Uuid::new_v4();
        let req = AccessRequest::from_qualified(user, None, "audit.finalize").unwrap();
        assert_eq!(req.resource, "audit");
        assert_eq!(req.action, "finalize");

        let nested = AccessRequest::from_qualified(user, None, "service.listing.publish").unwrap();
        assert_eq!(nested.resource, "service.listing");
        assert_eq!(nested.action, "publish");

        assert!(AccessRequest::from_qualified(user, None, "farms").is_none());
        assert!(AccessRequest::from_qualified(user, None, "farms.").is_none());
    }

    #[test]
    fn cache_key_is_scoped() {
        let user = Uuid::new_v4();
        let org = Uuid::new_v4();
        let req = AccessRequest::new(user, org, "farms", "create");
        assert!(req.cache_key().starts_with(&req.scope_prefix()));
        assert_ne!(req.cache_key(), AccessRequest::system(user, "farms", "create").cache_key());
    }
}
