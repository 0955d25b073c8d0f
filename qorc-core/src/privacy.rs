//! PrivacyPolicy: role→tier mapping, access-filter builder, external-egress
//! rule, and write validation (§4.4). Single authoritative source for every
//! RBAC decision in the pipeline.

use crate::{PrivacyLevel, Role, TenantId};
use serde::{Deserialize, Serialize};

/// Filter produced by [`PrivacyPolicy::build_access_filter`]. Downstream
/// retrieval backends translate this into their own query dialect; it is
/// never executed directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessFilter {
    pub privacy_tiers: Vec<PrivacyLevel>,
    pub user_id: String,
    pub tenant_id: TenantId,
    /// When true, `INTERNAL` rows are additionally constrained to
    /// `user_id == self` (the `member`-for-`INTERNAL` constraint).
    pub require_own_user: bool,
}

/// One row rejected by the defense-in-depth post-filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterLeak {
    pub record_id: String,
    pub privacy_level: PrivacyLevel,
}

/// Audit record emitted for every retrieval (§4.4 Audit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessAudit {
    pub trace_id: String,
    pub user_id: String,
    pub role: Role,
    pub tenant_id: TenantId,
    pub tiers_searched: Vec<PrivacyLevel>,
    pub results_per_tier: std::collections::HashMap<String, usize>,
    pub action: String,
}

#[derive(Debug, Clone, Default)]
pub struct PrivacyPolicy;

impl PrivacyPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Role → allowed tiers. `LOCAL_ONLY` is never returned here; it is
    /// reachable only by ownership, checked separately in
    /// [`PrivacyPolicy::record_is_accessible`].
    pub fn allowed_tiers(&self, role: Role) -> Vec<PrivacyLevel> {
        match role {
            Role::Public => vec![PrivacyLevel::Public],
            Role::Viewer | Role::Member => vec![PrivacyLevel::Public, PrivacyLevel::Internal],
            Role::Lead | Role::Manager | Role::Admin => {
                vec![PrivacyLevel::Public, PrivacyLevel::Internal, PrivacyLevel::Confidential]
            }
        }
    }

    /// `member`-tier roles may only see their own `INTERNAL` rows.
    fn requires_own_user_for_internal(&self, role: Role) -> bool {
        matches!(role, Role::Viewer | Role::Member)
    }

    pub fn build_access_filter(&self, role: Role, user_id: &str, tenant_id: TenantId) -> AccessFilter {
        AccessFilter {
            privacy_tiers: self.allowed_tiers(role),
            user_id: user_id.to_string(),
            tenant_id,
            require_own_user: self.requires_own_user_for_internal(role),
        }
    }

    /// Whether a single record is accessible under `filter` (P3).
    pub fn record_is_accessible(
        &self,
        filter: &AccessFilter,
        record_privacy: PrivacyLevel,
        record_owner_id: &str,
        record_tenant_id: TenantId,
    ) -> bool {
        if record_tenant_id != filter.tenant_id {
            return false;
        }
        if record_privacy == PrivacyLevel::LocalOnly {
            return record_owner_id == filter.user_id;
        }
        if !filter.privacy_tiers.contains(&record_privacy) {
            return false;
        }
        if filter.require_own_user && record_privacy == PrivacyLevel::Internal {
            return record_owner_id == filter.user_id;
        }
        true
    }

    /// Defense-in-depth post-filter: re-check every row against the access
    /// filter after the storage layer returns it. Never rely solely on
    /// database-side filtering. Idempotent (§8 round-trip property).
    pub fn filter_results_by_access<T>(
        &self,
        filter: &AccessFilter,
        rows: Vec<T>,
        privacy_of: impl Fn(&T) -> (PrivacyLevel, &str, TenantId),
    ) -> (Vec<T>, Vec<FilterLeak>) {
        let mut kept = Vec::with_capacity(rows.len());
        let mut leaks = Vec::new();
        for row in rows {
            let (level, owner, tenant) = privacy_of(&row);
            if self.record_is_accessible(filter, level, owner, tenant) {
                kept.push(row);
            } else {
                leaks.push(FilterLeak {
                    record_id: owner.to_string(),
                    privacy_level: level,
                });
            }
        }
        (kept, leaks)
    }

    /// `should_send_to_external_api`: everything except `LOCAL_ONLY` and
    /// `CONFIDENTIAL` may flow into a non-local LLM prompt.
    pub fn should_send_to_external_api(&self, level: PrivacyLevel) -> bool {
        !matches!(level, PrivacyLevel::LocalOnly | PrivacyLevel::Confidential)
    }

    /// Write validation: admins may write anywhere; members may write
    /// `{PUBLIC, INTERNAL}` but only for themselves; `public` may not write.
    pub fn can_write(
        &self,
        role: Role,
        target_tier: PrivacyLevel,
        target_user: &str,
        requesting_user: &str,
    ) -> bool {
        match role {
            Role::Admin => true,
            Role::Public => false,
            Role::Viewer | Role::Member | Role::Lead | Role::Manager => {
                matches!(target_tier, PrivacyLevel::Public | PrivacyLevel::Internal)
                    && target_user == requesting_user
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn tenant() -> TenantId {
        TenantId::new(Uuid::nil())
    }

    #[test]
    fn test_member_allowed_tiers() {
        let policy = PrivacyPolicy::new();
        assert_eq!(
            policy.allowed_tiers(Role::Member),
            vec![PrivacyLevel::Public, PrivacyLevel::Internal]
        );
    }

    #[test]
    fn test_admin_cannot_read_others_local_only() {
        let policy = PrivacyPolicy::new();
        let filter = policy.build_access_filter(Role::Admin, "admin-1", tenant());
        assert!(!policy.record_is_accessible(&filter, PrivacyLevel::LocalOnly, "someone-else", tenant()));
        assert!(policy.record_is_accessible(&filter, PrivacyLevel::LocalOnly, "admin-1", tenant()));
    }

    #[test]
    fn test_member_internal_requires_own_user() {
        let policy = PrivacyPolicy::new();
        let filter = policy.build_access_filter(Role::Member, "u1", tenant());
        assert!(policy.record_is_accessible(&filter, PrivacyLevel::Internal, "u1", tenant()));
        assert!(!policy.record_is_accessible(&filter, PrivacyLevel::Internal, "u2", tenant()));
    }

    #[test]
    fn test_confidential_never_sent_externally() {
        let policy = PrivacyPolicy::new();
        assert!(!policy.should_send_to_external_api(PrivacyLevel::Confidential));
        assert!(!policy.should_send_to_external_api(PrivacyLevel::LocalOnly));
        assert!(policy.should_send_to_external_api(PrivacyLevel::Public));
    }

    #[test]
    fn test_public_role_cannot_write() {
        let policy = PrivacyPolicy::new();
        assert!(!policy.can_write(Role::Public, PrivacyLevel::Public, "u1", "u1"));
    }

    #[test]
    fn test_member_cannot_write_for_others() {
        let policy = PrivacyPolicy::new();
        assert!(!policy.can_write(Role::Member, PrivacyLevel::Public, "u2", "u1"));
        assert!(policy.can_write(Role::Member, PrivacyLevel::Internal, "u1", "u1"));
    }

    #[test]
    fn test_filter_idempotent() {
        let policy = PrivacyPolicy::new();
        let filter = policy.build_access_filter(Role::Member, "u1", tenant());
        let rows = vec![("a", PrivacyLevel::Public), ("b", PrivacyLevel::Confidential)];
        let (once, _) = policy.filter_results_by_access(&filter, rows.clone(), |(_, lvl)| {
            (*lvl, "u1", tenant())
        });
        let (twice, _) = policy.filter_results_by_access(&filter, once.clone(), |(_, lvl)| {
            (*lvl, "u1", tenant())
        });
        assert_eq!(once, twice);
    }
}
