use droplet_core::SyncError;

use crate::types::Droplet;

pub const DRUPAL_IMAGE: &str = "drupalwxt/site-canada";
pub const DRUPAL_TAG: &str = "0.0.1";
pub const NGINX_IMAGE: &str = "nginx";
pub const NGINX_TAG: &str = "stable";
pub const CODE_MOUNT_PATH: &str = "/var/www/html/modules/custom";
pub const GIT_REFERENCE: &str = "master";

fn fill(field: &mut Option<String>, default: &str) {
    if field.as_deref().map_or(true, str::is_empty) {
        *field = Some(default.to_string());
    }
}

/// Fill unset spec fields. Idempotent.
pub fn apply(d: &mut Droplet) {
    fill(&mut d.spec.drupal.image, DRUPAL_IMAGE);
    fill(&mut d.spec.drupal.tag, DRUPAL_TAG);
    fill(&mut d.spec.nginx.image, NGINX_IMAGE);
    fill(&mut d.spec.nginx.tag, NGINX_TAG);
    if let Some(code) = d.spec.drupal.code.as_mut() {
        fill(&mut code.mount_path, CODE_MOUNT_PATH);
        if let Some(git) = code.git.as_mut() {
            fill(&mut git.reference, GIT_REFERENCE);
        }
    }
}

/// Checks the builders rely on.
pub fn validate(d: &Droplet) -> Result<(), SyncError> {
    if d.metadata.name.as_deref().map_or(true, str::is_empty) {
        return Err(SyncError::mutation("droplet has no name"));
    }
    if d.spec.domains.iter().all(|s| s.is_empty()) {
        return Err(SyncError::mutation(".spec.domains must contain at least one domain"));
    }
    Ok(())
}
