//! Operator settings (process-wide, from the environment) and the immutable
//! per-reconciliation config handed to every builder.

use droplet_core::labels::LabelSet;

pub const DEFAULT_MANAGED_BY: &str = "drupal-operator.sylus.ca";
pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Watch one namespace only.
    pub namespace: Option<String>,
    /// Periodic resync after a successful pass.
    pub requeue_secs: u64,
    /// Delay before re-running after a retryable failure.
    pub retry_secs: u64,
    pub managed_by: String,
    /// Also run the per-tag database upgrade job.
    pub upgrade_jobs: bool,
    pub nginx_resolver: String,
    pub media_proxy_base: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            namespace: None,
            requeue_secs: 300,
            retry_secs: 5,
            managed_by: DEFAULT_MANAGED_BY.to_string(),
            upgrade_jobs: false,
            nginx_resolver: "10.0.0.10".to_string(),
            media_proxy_base: "stcdrupal.blob.core.windows.net/drupal-public".to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            namespace: std::env::var("DROPLET_WATCH_NAMESPACE").ok().filter(|s| !s.is_empty()),
            requeue_secs: env_or("DROPLET_REQUEUE_SECS", d.requeue_secs),
            retry_secs: env_or("DROPLET_RETRY_SECS", d.retry_secs),
            managed_by: env_or("DROPLET_MANAGED_BY", d.managed_by),
            upgrade_jobs: env_or("DROPLET_UPGRADE_JOBS", d.upgrade_jobs),
            nginx_resolver: env_or("DROPLET_NGINX_RESOLVER", d.nginx_resolver),
            media_proxy_base: env_or("DROPLET_MEDIA_PROXY_BASE", d.media_proxy_base),
        }
    }

    /// Snapshot for one reconciliation pass.
    pub fn reconcile_config(&self) -> ReconcileConfig {
        let mut controller_labels = LabelSet::new();
        controller_labels.insert(MANAGED_BY.to_string(), self.managed_by.clone());
        ReconcileConfig {
            controller_labels,
            upgrade_jobs: self.upgrade_jobs,
            nginx_resolver: self.nginx_resolver.clone(),
            media_proxy_base: self.media_proxy_base.clone(),
        }
    }
}

/// Builder-wide inputs that are not part of the droplet spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Stamped on every managed object, on top of its component labels.
    pub controller_labels: LabelSet,
    pub upgrade_jobs: bool,
    pub nginx_resolver: String,
    pub media_proxy_base: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Settings::default().reconcile_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_stamps_managed_by() {
        let cfg = ReconcileConfig::default();
        assert_eq!(cfg.controller_labels.get(MANAGED_BY).map(String::as_str), Some(DEFAULT_MANAGED_BY));
        assert!(!cfg.upgrade_jobs);
    }
}
