//! Object names and labels for every child object of a droplet.

use droplet_core::labels::LabelSet;

use crate::types::Droplet;

const PART_OF: &str = "app.kubernetes.io/part-of";
pub const UPGRADE_FOR: &str = "drupal.sylus.ca/upgrade-for";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    DrupalSecret,
    DrupalConfigMap,
    DrupalDeployment,
    DrupalService,
    DrupalCron,
    DrupalDbUpgrade,
    DrupalCodePvc,
    DrupalMediaPvc,
    NginxConfigMap,
    NginxDeployment,
    NginxService,
    Ingress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum App {
    Drupal,
    Nginx,
}

impl App {
    fn as_str(self) -> &'static str {
        match self {
            App::Drupal => "drupal",
            App::Nginx => "nginx",
        }
    }
}

impl Component {
    fn app(self) -> App {
        match self {
            Component::NginxConfigMap | Component::NginxDeployment | Component::NginxService | Component::Ingress => {
                App::Nginx
            }
            _ => App::Drupal,
        }
    }

    /// `app.kubernetes.io/component` value.
    pub fn role(self) -> &'static str {
        match self {
            Component::DrupalCron => "cron",
            Component::DrupalDbUpgrade => "upgrade",
            Component::DrupalCodePvc => "code",
            Component::DrupalMediaPvc => "media",
            _ => "web",
        }
    }

    /// Label used for events, logs and metrics.
    pub fn kind_name(self) -> &'static str {
        match self {
            Component::DrupalSecret => "DrupalSecret",
            Component::DrupalConfigMap => "DrupalConfigMap",
            Component::DrupalDeployment => "DrupalDeployment",
            Component::DrupalService => "DrupalService",
            Component::DrupalCron => "DrupalCron",
            Component::DrupalDbUpgrade => "DBUpgradeJob",
            Component::DrupalCodePvc => "CodePVC",
            Component::DrupalMediaPvc => "MediaPVC",
            Component::NginxConfigMap => "NginxConfigMap",
            Component::NginxDeployment => "NginxDeployment",
            Component::NginxService => "NginxService",
            Component::Ingress => "Ingress",
        }
    }

    pub fn object_name(self, d: &Droplet) -> String {
        let n = d.name();
        match self {
            Component::DrupalSecret => format!("{}-drupal", n),
            Component::DrupalConfigMap | Component::DrupalDeployment | Component::DrupalService | Component::Ingress => {
                n.to_string()
            }
            Component::DrupalCron => format!("{}-drupal-cron", n),
            Component::DrupalDbUpgrade => format!("{}-upgrade-for-{}", n, tag_slug(d)),
            Component::DrupalCodePvc => format!("{}-code", n),
            Component::DrupalMediaPvc => format!("{}-media", n),
            Component::NginxConfigMap | Component::NginxDeployment | Component::NginxService => format!("{}-nginx", n),
        }
    }

    /// Labels set on the component object itself.
    pub fn labels(self, d: &Droplet) -> LabelSet {
        let mut l = app_labels(d, self.app());
        l.insert("app.kubernetes.io/component".into(), self.role().into());
        if self == Component::DrupalDbUpgrade {
            l.insert(UPGRADE_FOR.into(), tag_slug(d));
        }
        l
    }
}

fn app_labels(d: &Droplet, app: App) -> LabelSet {
    let part_of = d
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(PART_OF))
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| "drupal".to_string());
    let version = match app {
        App::Drupal => d.spec.drupal.tag.clone(),
        App::Nginx => d.spec.nginx.tag.clone(),
    }
    .unwrap_or_default();

    let mut l = LabelSet::new();
    l.insert("app.kubernetes.io/name".into(), app.as_str().into());
    l.insert("app.kubernetes.io/instance".into(), d.name().into());
    l.insert("app.kubernetes.io/version".into(), version);
    l.insert(PART_OF.into(), part_of);
    l
}

/// Labels of drupal web pods.
pub fn drupal_pod_labels(d: &Droplet) -> LabelSet {
    let mut l = app_labels(d, App::Drupal);
    l.insert("app.kubernetes.io/component".into(), "drupal".into());
    l
}

/// Labels of drupal cron and upgrade job pods.
pub fn drupal_job_pod_labels(d: &Droplet) -> LabelSet {
    let mut l = app_labels(d, App::Drupal);
    l.insert("app.kubernetes.io/component".into(), "drupal-cli".into());
    l
}

pub fn nginx_pod_labels(d: &Droplet) -> LabelSet {
    let mut l = app_labels(d, App::Nginx);
    l.insert("app.kubernetes.io/component".into(), "nginx".into());
    l
}

/// Deployment and service selector: pod labels minus the version, so a tag
/// bump rolls pods without touching the immutable selector.
pub fn selector_labels(pod_labels: &LabelSet) -> LabelSet {
    let mut l = pod_labels.clone();
    l.remove("app.kubernetes.io/version");
    l
}

pub fn tag_slug(d: &Droplet) -> String {
    slugify(d.spec.drupal.tag.as_deref().unwrap_or_default())
}

/// Lowercase, runs of anything but `[a-z0-9]` collapse into one `-`, no
/// leading or trailing `-`.
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut dash = false;
    for c in s.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if dash && !out.is_empty() {
                out.push('-');
            }
            dash = false;
            out.push(c);
        } else {
            dash = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DropletSpec;

    fn droplet() -> Droplet {
        let mut d = Droplet::new("example", DropletSpec { domains: vec!["example.com".into()], ..Default::default() });
        d.spec.drupal.tag = Some("8.6.1-RC".into());
        d.spec.nginx.tag = Some("stable".into());
        d
    }

    #[test]
    fn slugify_tags() {
        assert_eq!(slugify("0.0.1"), "0-0-1");
        assert_eq!(slugify("8.6.1-RC"), "8-6-1-rc");
        assert_eq!(slugify("--Latest__"), "latest");
        assert_eq!(slugify(""), "");
    }

    #[test]
    fn object_names() {
        let d = droplet();
        assert_eq!(Component::DrupalSecret.object_name(&d), "example-drupal");
        assert_eq!(Component::DrupalDeployment.object_name(&d), "example");
        assert_eq!(Component::DrupalCron.object_name(&d), "example-drupal-cron");
        assert_eq!(Component::DrupalDbUpgrade.object_name(&d), "example-upgrade-for-8-6-1-rc");
        assert_eq!(Component::DrupalCodePvc.object_name(&d), "example-code");
        assert_eq!(Component::NginxDeployment.object_name(&d), "example-nginx");
        assert_eq!(Component::Ingress.object_name(&d), "example");
    }

    #[test]
    fn labels_follow_app_and_part_of() {
        let mut d = droplet();
        let l = Component::NginxService.labels(&d);
        assert_eq!(l["app.kubernetes.io/name"], "nginx");
        assert_eq!(l["app.kubernetes.io/version"], "stable");
        assert_eq!(l["app.kubernetes.io/part-of"], "drupal");
        assert_eq!(l["app.kubernetes.io/component"], "web");

        d.metadata.labels = Some([(PART_OF.to_string(), "portal".to_string())].into_iter().collect());
        let l = Component::DrupalDbUpgrade.labels(&d);
        assert_eq!(l["app.kubernetes.io/part-of"], "portal");
        assert_eq!(l[UPGRADE_FOR], "8-6-1-rc");
        assert_eq!(l["app.kubernetes.io/component"], "upgrade");
    }

    #[test]
    fn pod_selectors_differ_between_tiers() {
        let d = droplet();
        assert_ne!(drupal_pod_labels(&d), nginx_pod_labels(&d));
        assert_eq!(drupal_job_pod_labels(&d)["app.kubernetes.io/component"], "drupal-cli");
        let sel = selector_labels(&drupal_pod_labels(&d));
        assert!(!sel.contains_key("app.kubernetes.io/version"));
        assert_eq!(sel["app.kubernetes.io/component"], "drupal");
    }
}
