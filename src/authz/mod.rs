//! Authorization core - multi-role, multi-tenant permission resolution
//!
//! This module implements:
//! - Union of every role a user holds in an organization
//! - Per-organization overrides replacing a role's base effect
//! - DENY precedence and default-deny
//! - Memoized decisions with invalidate-after-commit on every mutation

mod admin;
mod evaluator;
mod invalidation;
mod request;
mod resolver;

pub use evaluator::{combine, Decision};
pub use invalidation::CacheInvalidator;
pub use request::AccessRequest;
pub use resolver::{PermissionResolver, UserPermissions};

/// Well-known role codes
pub mod roles {
    pub const SUPER_ADMIN: &str = "SUPER_ADMIN";
    pub const OWNER: &str = "OWNER";
    pub const ADMIN: &str = "ADMIN";
    pub const FSP_ADMIN: &str = "FSP_ADMIN";
    pub const AUDITOR: &str = "AUDITOR";
    pub const SUPERVISOR: &str = "SUPERVISOR";
    pub const MEMBER: &str = "MEMBER";
    pub const FREELANCER: &str = "FREELANCER";
}

/// Permission catalog as (resource, action) pairs
pub mod permissions {
    // Farms
    pub const FARMS_CREATE: (&str, &str) = ("farms", "create");
    pub const FARMS_READ: (&str, &str) = ("farms", "read");
    pub const FARMS_UPDATE: (&str, &str) = ("farms", "update");
    pub const FARMS_DELETE: (&str, &str) = ("farms", "delete");

    // Audit workflows
    pub const AUDIT_CREATE: (&str, &str) = ("audit", "create");
    pub const AUDIT_READ: (&str, &str) = ("audit", "read");
    pub const AUDIT_SUBMIT: (&str, &str) = ("audit", "submit");
    pub const AUDIT_REVIEW: (&str, &str) = ("audit", "review");
    pub const AUDIT_FINALIZE: (&str, &str) = ("audit", "finalize");

    // Templates
    pub const TEMPLATES_CREATE: (&str, &str) = ("templates", "create");
    pub const TEMPLATES_READ: (&str, &str) = ("templates", "read");
    pub const TEMPLATES_UPDATE: (&str, &str) = ("templates", "update");
    pub const TEMPLATES_DELETE: (&str, &str) = ("templates", "delete");

    // Service listings
    pub const SERVICES_CREATE: (&str, &str) = ("services", "create");
    pub const SERVICES_READ: (&str, &str) = ("services", "read");
    pub const SERVICES_UPDATE: (&str, &str) = ("services", "update");
    pub const SERVICES_DELETE: (&str, &str) = ("services", "delete");

    // Members
    pub const MEMBERS_INVITE: (&str, &str) = ("members", "invite");
    pub const MEMBERS_READ: (&str, &str) = ("members", "read");
    pub const MEMBERS_UPDATE: (&str, &str) = ("members", "update");
    pub const MEMBERS_REMOVE: (&str, &str) = ("members", "remove");

    // Permission administration
    pub const PERMISSIONS_MANAGE: (&str, &str) = ("permissions", "manage");

    pub const ALL: &[(&str, &str)] = &[
        FARMS_CREATE,
        FARMS_READ,
        FARMS_UPDATE,
        FARMS_DELETE,
        AUDIT_CREATE,
        AUDIT_READ,
        AUDIT_SUBMIT,
        AUDIT_REVIEW,
        AUDIT_FINALIZE,
        TEMPLATES_CREATE,
        TEMPLATES_READ,
        TEMPLATES_UPDATE,
        TEMPLATES_DELETE,
        SERVICES_CREATE,
        SERVICES_READ,
        SERVICES_UPDATE,
        SERVICES_DELETE,
        MEMBERS_INVITE,
        MEMBERS_READ,
        MEMBERS_UPDATE,
        MEMBERS_REMOVE,
        PERMISSIONS_MANAGE,
    ];
}
