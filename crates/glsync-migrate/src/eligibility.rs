//! Decides which source groups may be transferred to a destination.
//!
//! Two destinations are recognised: a staging instance that receives only the
//! allow-listed root groups, and the final instance that only accepts content
//! already staged under the migration namespace. A group tagged with the
//! `private` badge never reaches the final instance, whatever its path.

use crate::config::MigrationSettings;
use crate::types::Group;

/// Badge name that keeps a group out of the final destination.
pub const PRIVATE_BADGE: &str = "private";

/// Which of the known instances the run writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationRole {
    /// The intermediate quarantine instance.
    Staging,
    /// The true final destination.
    Final,
    /// Neither configured instance; staging rules apply.
    Unlisted,
}

impl DestinationRole {
    /// Resolve the role of `destination_url` against the configured instances.
    pub fn resolve(destination_url: &str, settings: &MigrationSettings) -> Self {
        let destination = destination_url.trim_end_matches('/');
        if destination == settings.final_instance_url.trim_end_matches('/') {
            Self::Final
        } else if destination == settings.staging_instance_url.trim_end_matches('/') {
            Self::Staging
        } else {
            Self::Unlisted
        }
    }

    pub fn is_final(self) -> bool {
        self == Self::Final
    }
}

/// Eligibility rules for one run.
#[derive(Debug, Clone)]
pub struct Classifier {
    role: DestinationRole,
    namespace: String,
    allowed_root_groups: Vec<String>,
}

impl Classifier {
    pub fn new(role: DestinationRole, settings: &MigrationSettings) -> Self {
        Self {
            role,
            namespace: settings.migration_namespace.clone(),
            allowed_root_groups: settings.allowed_root_groups.clone(),
        }
    }

    pub fn role(&self) -> DestinationRole {
        self.role
    }

    /// Whether `group`, carrying `badge` on the source, may be transferred.
    ///
    /// Path rules only look at root groups; a subgroup is reached only when its
    /// root was admitted. The badge rule applies at every level.
    pub fn is_eligible(&self, group: &Group, badge: Option<&str>) -> bool {
        if self.role.is_final() && badge == Some(PRIVATE_BADGE) {
            return false;
        }

        if !group.is_root() {
            return true;
        }

        match self.role {
            DestinationRole::Final => group.full_path.starts_with(&self.namespace),
            DestinationRole::Staging | DestinationRole::Unlisted => self
                .allowed_root_groups
                .iter()
                .any(|allowed| allowed == &group.full_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MigrationSettings {
        MigrationSettings::default()
            .with_namespace("mock-sync")
            .with_instances("https://stage.local", "https://final.local")
            .with_allowed_root_groups(["mock", "mock-dep"])
    }

    fn group(full_path: &str, parent_id: Option<u64>) -> Group {
        Group {
            id: 1,
            name: full_path.to_string(),
            path: full_path.rsplit('/').next().unwrap_or(full_path).to_string(),
            full_path: full_path.to_string(),
            parent_id,
        }
    }

    #[test]
    fn test_role_resolution() {
        let settings = settings();
        assert_eq!(
            DestinationRole::resolve("https://final.local/", &settings),
            DestinationRole::Final
        );
        assert_eq!(
            DestinationRole::resolve("https://stage.local", &settings),
            DestinationRole::Staging
        );
        assert_eq!(
            DestinationRole::resolve("https://elsewhere.local", &settings),
            DestinationRole::Unlisted
        );
    }

    #[test]
    fn test_staging_admits_only_allow_listed_roots() {
        let classifier = Classifier::new(DestinationRole::Staging, &settings());

        assert!(classifier.is_eligible(&group("mock", None), None));
        assert!(classifier.is_eligible(&group("mock-dep", None), Some("team-a")));
        assert!(!classifier.is_eligible(&group("mockery", None), None));
        assert!(!classifier.is_eligible(&group("ops", None), None));
    }

    #[test]
    fn test_staging_keeps_private_groups() {
        let classifier = Classifier::new(DestinationRole::Staging, &settings());
        assert!(classifier.is_eligible(&group("mock", None), Some(PRIVATE_BADGE)));
    }

    #[test]
    fn test_final_requires_namespace_prefix() {
        let classifier = Classifier::new(DestinationRole::Final, &settings());

        assert!(classifier.is_eligible(&group("mock-sync", None), None));
        assert!(!classifier.is_eligible(&group("mock", None), None));
    }

    #[test]
    fn test_private_badge_overrides_path_on_final() {
        let classifier = Classifier::new(DestinationRole::Final, &settings());

        assert!(!classifier.is_eligible(&group("mock-sync", None), Some(PRIVATE_BADGE)));
        assert!(!classifier.is_eligible(
            &group("mock-sync/mock/secret", Some(4)),
            Some(PRIVATE_BADGE)
        ));
    }

    #[test]
    fn test_subgroups_skip_path_rules() {
        let staging = Classifier::new(DestinationRole::Staging, &settings());
        assert!(staging.is_eligible(&group("mock/backend", Some(3)), None));

        let unlisted = Classifier::new(DestinationRole::Unlisted, &settings());
        assert!(unlisted.is_eligible(&group("mock/backend/db", Some(9)), Some(PRIVATE_BADGE)));
        assert!(!unlisted.is_eligible(&group("other", None), None));
    }
}
