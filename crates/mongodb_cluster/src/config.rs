pub const DEFAULT_AGENT_IMAGE: &str = "quay.io/mongodb/mongodb-agent-ubi:108.0.2.8729-1";
pub const DEFAULT_MONGODB_IMAGE: &str = "quay.io/mongodb/mongodb-community-server:6.0.5-ubi8";
pub const DEFAULT_VERSION_UPGRADE_HOOK_IMAGE: &str =
    "quay.io/mongodb/mongodb-kubernetes-operator-version-upgrade-post-start-hook:1.0.9";

/// Process-wide settings of the operator, shared by every reconciliation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    pub agent_image: String,
    pub mongodb_image: String,
    pub version_upgrade_hook_image: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            agent_image: DEFAULT_AGENT_IMAGE.to_string(),
            mongodb_image: DEFAULT_MONGODB_IMAGE.to_string(),
            version_upgrade_hook_image: DEFAULT_VERSION_UPGRADE_HOOK_IMAGE.to_string(),
        }
    }
}
