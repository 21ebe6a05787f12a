//! Pod templates for the drupal web tier, drupal jobs and nginx.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvFromSource, EnvVar,
    LocalObjectReference, PersistentVolumeClaimVolumeSource, PodSecurityContext, PodSpec, PodTemplateSpec,
    ResourceRequirements, SecretEnvSource, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::component::{drupal_job_pod_labels, drupal_pod_labels, nginx_pod_labels, Component};
use crate::types::{Droplet, ObjectStorageSource};

pub const DRUPAL_PORT: i32 = 9000;
pub const NGINX_HTTP_PORT: i32 = 80;
pub const NGINX_HTTPS_PORT: i32 = 443;

const GIT_CLONE_IMAGE: &str = "docker.io/library/buildpack-deps:stretch-scm";
const CODE_SRC_MOUNT_PATH: &str = "/var/run/sylus.ca/code/src";
const MEDIA_MOUNT_PATH: &str = "/var/www/html/sites/default/files";
const CODE_VOLUME: &str = "code";
const MEDIA_VOLUME: &str = "media";
const WWW_DATA: i64 = 33;

const GIT_CLONE_SCRIPT: &str = r#"#!/bin/bash
set -e
set -o pipefail

export HOME="$(mktemp -d)"
export GIT_SSH_COMMAND="ssh -o UserKnownHostsFile=$HOME/.ssh/known_hosts -o StrictHostKeyChecking=no"

test -d "$HOME/.ssh" || mkdir "$HOME/.ssh"

if [ ! -z "$SSH_RSA_PRIVATE_KEY" ] ; then
    echo "$SSH_RSA_PRIVATE_KEY" > "$HOME/.ssh/id_rsa"
    chmod 0400 "$HOME/.ssh/id_rsa"
    export GIT_SSH_COMMAND="$GIT_SSH_COMMAND -o IdentityFile=$HOME/.ssh/id_rsa"
fi

if [ -z "$GIT_CLONE_URL" ] ; then
    echo "No \$GIT_CLONE_URL specified" >&2
    exit 1
fi

find "$SRC_DIR" -maxdepth 1 -mindepth 1 -print0 | xargs -0 /bin/rm -rf

set -x
git clone "$GIT_CLONE_URL" "$SRC_DIR"
cd "$SRC_DIR"
git checkout -B "$GIT_CLONE_REF" "$GIT_CLONE_REF"
"#;

// Object storage env names accepted on the droplet, and what the image expects.
const S3_ENV: &[(&str, &str)] = &[
    ("AWS_ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID"),
    ("AWS_SECRET_ACCESS_KEY", "AWS_SECRET_ACCESS_KEY"),
    ("AWS_CONFIG_FILE", "AWS_CONFIG_FILE"),
    ("ENDPOINT", "S3_ENDPOINT"),
];
const GCS_ENV: &[(&str, &str)] = &[
    ("GOOGLE_CREDENTIALS", "GOOGLE_CREDENTIALS"),
    ("GOOGLE_APPLICATION_CREDENTIALS", "GOOGLE_APPLICATION_CREDENTIALS"),
];

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar { name: name.to_string(), value: Some(value.into()), value_from: None }
}

fn secret_env(name: String, optional: bool) -> EnvFromSource {
    EnvFromSource {
        secret_ref: Some(SecretEnvSource { name: Some(name), optional: optional.then_some(true) }),
        ..Default::default()
    }
}

fn non_empty<T: Clone>(v: &[T]) -> Option<Vec<T>> {
    (!v.is_empty()).then(|| v.to_vec())
}

fn renamed(src: &ObjectStorageSource, names: &[(&str, &str)]) -> Vec<EnvVar> {
    src.env
        .iter()
        .filter_map(|e| {
            let (_, to) = names.iter().find(|(from, _)| *from == e.name)?;
            Some(EnvVar { name: to.to_string(), ..e.clone() })
        })
        .collect()
}

fn is_object_storage(d: &Droplet) -> bool {
    d.spec.drupal.media.as_ref().map_or(false, |m| m.s3.is_some() || m.gcs.is_some())
}

fn drupal_image(d: &Droplet) -> String {
    format!(
        "{}:{}",
        d.spec.drupal.image.as_deref().unwrap_or_default(),
        d.spec.drupal.tag.as_deref().unwrap_or_default()
    )
}

fn drupal_env(d: &Droplet) -> Vec<EnvVar> {
    let domain = d.main_domain();
    let mut out = vec![
        env("DRUPAL_HOME", format!("http://{}", domain)),
        env("DRUPAL_SITEURL", format!("http://{}/droplet", domain)),
    ];
    out.extend(d.spec.drupal.env.iter().cloned());

    if let Some(media) = d.spec.drupal.media.as_ref() {
        if let Some(s3) = media.s3.as_ref() {
            out.extend(renamed(s3, S3_ENV));
        }
        if let Some(gcs) = media.gcs.as_ref() {
            out.push(env("MEDIA_BUCKET", format!("gs://{}", gcs.bucket)));
            out.push(EnvVar {
                name: "MEDIA_BUCKET_PREFIX".into(),
                value: gcs.prefix.clone().filter(|p| !p.is_empty()),
                value_from: None,
            });
            out.extend(renamed(gcs, GCS_ENV));
        }
    }
    out
}

fn drupal_env_from(d: &Droplet) -> Vec<EnvFromSource> {
    let secret = Component::DrupalSecret.object_name(d);
    let mut out = vec![secret_env(secret.clone(), false), secret_env(format!("{}-mysql-root-password", secret), true)];
    out.extend(d.spec.drupal.env_from.iter().cloned());
    out
}

fn drupal_volume_mounts(d: &Droplet) -> Vec<VolumeMount> {
    let mut out = d.spec.drupal.volume_mounts.clone();
    out.push(VolumeMount {
        name: "cm-drupal".into(),
        mount_path: "/var/www/html/sites/default/settings.php".into(),
        sub_path: Some(crate::templates::SETTINGS_KEY.into()),
        ..Default::default()
    });
    if let Some(code) = d.spec.drupal.code.as_ref() {
        let read_only = code.read_only.then_some(true);
        out.push(VolumeMount {
            name: CODE_VOLUME.into(),
            mount_path: CODE_SRC_MOUNT_PATH.into(),
            read_only,
            ..Default::default()
        });
        out.push(VolumeMount {
            name: CODE_VOLUME.into(),
            mount_path: code.mount_path.clone().unwrap_or_default(),
            read_only,
            sub_path: code.content_sub_path.clone().filter(|s| !s.is_empty()),
            ..Default::default()
        });
    }
    if let Some(media) = d.spec.drupal.media.as_ref().filter(|_| !is_object_storage(d)) {
        out.push(VolumeMount {
            name: MEDIA_VOLUME.into(),
            mount_path: MEDIA_MOUNT_PATH.into(),
            read_only: media.read_only.then_some(true),
            ..Default::default()
        });
    }
    out
}

fn empty_dir(src: Option<&EmptyDirVolumeSource>) -> Volume {
    Volume { empty_dir: Some(src.cloned().unwrap_or_default()), ..Default::default() }
}

fn claim(name: String) -> Volume {
    Volume {
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource { claim_name: name, read_only: None }),
        ..Default::default()
    }
}

/// Git clone target, then claim, then host path, then empty dir.
fn code_volume(d: &Droplet) -> Volume {
    let mut v = match d.spec.drupal.code.as_ref() {
        Some(code) => match (&code.git, &code.persistent_volume_claim, &code.host_path) {
            (Some(git), _, _) => empty_dir(git.empty_dir.as_ref()),
            (None, Some(_), _) => claim(Component::DrupalCodePvc.object_name(d)),
            (None, None, Some(hp)) => Volume { host_path: Some(hp.clone()), ..Default::default() },
            (None, None, None) => empty_dir(code.empty_dir.as_ref()),
        },
        None => empty_dir(None),
    };
    v.name = CODE_VOLUME.into();
    v
}

/// Claim, then host path, then empty dir. Object storage needs no volume
/// content, so it gets a plain empty dir.
fn media_volume(d: &Droplet) -> Volume {
    let mut v = match d.spec.drupal.media.as_ref() {
        Some(m) if m.s3.is_some() || m.gcs.is_some() => empty_dir(None),
        Some(m) => match (&m.persistent_volume_claim, &m.host_path) {
            (Some(_), _) => claim(Component::DrupalMediaPvc.object_name(d)),
            (None, Some(hp)) => Volume { host_path: Some(hp.clone()), ..Default::default() },
            (None, None) => empty_dir(m.empty_dir.as_ref()),
        },
        None => empty_dir(None),
    };
    v.name = MEDIA_VOLUME.into();
    v
}

fn config_map_volume(volume: &str, config_map: String) -> Volume {
    Volume {
        name: volume.into(),
        config_map: Some(ConfigMapVolumeSource { name: Some(config_map), default_mode: Some(0o644), ..Default::default() }),
        ..Default::default()
    }
}

fn drupal_volumes(d: &Droplet) -> Vec<Volume> {
    let mut out = d.spec.drupal.volumes.clone();
    out.push(config_map_volume("cm-drupal", Component::DrupalConfigMap.object_name(d)));
    out.push(code_volume(d));
    out.push(media_volume(d));
    out
}

fn git_clone_container(d: &Droplet) -> Option<Container> {
    let git = d.spec.drupal.code.as_ref()?.git.as_ref()?;
    let mut env_vars = vec![env("GIT_CLONE_URL", git.repository.clone()), env("SRC_DIR", CODE_SRC_MOUNT_PATH)];
    if let Some(r) = git.reference.as_deref().filter(|r| !r.is_empty()) {
        env_vars.push(env("GIT_CLONE_REF", r));
    }
    env_vars.extend(git.env.iter().cloned());
    Some(Container {
        name: "git".into(),
        image: Some(GIT_CLONE_IMAGE.into()),
        args: Some(vec!["/bin/bash".into(), "-c".into(), GIT_CLONE_SCRIPT.into()]),
        env: Some(env_vars),
        env_from: non_empty(&git.env_from),
        volume_mounts: Some(vec![VolumeMount {
            name: CODE_VOLUME.into(),
            mount_path: CODE_SRC_MOUNT_PATH.into(),
            ..Default::default()
        }]),
        security_context: Some(SecurityContext { run_as_user: Some(WWW_DATA), ..Default::default() }),
        ..Default::default()
    })
}

fn drupal_container(d: &Droplet, name: &str) -> Container {
    Container {
        name: name.into(),
        image: Some(drupal_image(d)),
        image_pull_policy: d.spec.drupal.image_pull_policy.clone().filter(|p| !p.is_empty()),
        volume_mounts: Some(drupal_volume_mounts(d)),
        env: Some(drupal_env(d)),
        env_from: Some(drupal_env_from(d)),
        ..Default::default()
    }
}

fn base_spec(d: &Droplet, pull_secrets: &[LocalObjectReference]) -> PodSpec {
    PodSpec {
        image_pull_secrets: non_empty(pull_secrets),
        service_account_name: d.spec.service_account_name.clone().filter(|s| !s.is_empty()),
        security_context: Some(PodSecurityContext { fs_group: Some(WWW_DATA), ..Default::default() }),
        ..Default::default()
    }
}

fn template(labels: BTreeMap<String, String>, spec: PodSpec) -> PodTemplateSpec {
    PodTemplateSpec { metadata: Some(ObjectMeta { labels: Some(labels), ..Default::default() }), spec: Some(spec) }
}

/// Pod template of the drupal web tier.
pub fn drupal(d: &Droplet) -> PodTemplateSpec {
    let mut container = drupal_container(d, "drupal");
    container.ports = Some(vec![ContainerPort {
        name: Some("http".into()),
        container_port: DRUPAL_PORT,
        protocol: Some("TCP".into()),
        ..Default::default()
    }]);

    let mut spec = base_spec(d, &d.spec.drupal.image_pull_secrets);
    spec.init_containers = git_clone_container(d).map(|c| vec![c]);
    spec.containers = vec![container];
    spec.volumes = Some(drupal_volumes(d));
    template(drupal_pod_labels(d), spec)
}

/// Pod template for one-shot drupal commands (cron, upgrades).
pub fn drupal_job(d: &Droplet, cmd: &[&str]) -> PodTemplateSpec {
    let mut container = drupal_container(d, "droplet-cli");
    container.args = Some(cmd.iter().map(|s| s.to_string()).collect());

    let mut spec = base_spec(d, &d.spec.drupal.image_pull_secrets);
    spec.restart_policy = Some("Never".into());
    spec.init_containers = git_clone_container(d).map(|c| vec![c]);
    spec.containers = vec![container];
    spec.volumes = Some(drupal_volumes(d));
    template(drupal_job_pod_labels(d), spec)
}

fn quantities(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([("cpu".to_string(), Quantity(cpu.into())), ("memory".to_string(), Quantity(memory.into()))])
}

/// Pod template of the nginx front.
pub fn nginx(d: &Droplet) -> PodTemplateSpec {
    let n = &d.spec.nginx;
    let mut mounts = n.volume_mounts.clone();
    mounts.push(VolumeMount {
        name: "cm-nginx".into(),
        mount_path: "/etc/nginx/nginx.conf".into(),
        sub_path: Some(crate::templates::NGINX_KEY.into()),
        ..Default::default()
    });
    let mut env_vars = vec![env("NGINX_HOST", format!("http://{}", d.main_domain()))];
    env_vars.extend(n.env.iter().cloned());
    let mut env_from = vec![secret_env(Component::NginxConfigMap.object_name(d), true)];
    env_from.extend(n.env_from.iter().cloned());

    let container = Container {
        name: "nginx".into(),
        image: Some(format!(
            "{}:{}",
            n.image.as_deref().unwrap_or_default(),
            n.tag.as_deref().unwrap_or_default()
        )),
        image_pull_policy: n.image_pull_policy.clone().filter(|p| !p.is_empty()),
        volume_mounts: Some(mounts),
        env: Some(env_vars),
        env_from: Some(env_from),
        ports: Some(vec![
            ContainerPort { name: Some("http".into()), container_port: NGINX_HTTP_PORT, protocol: Some("TCP".into()), ..Default::default() },
            ContainerPort { name: Some("https".into()), container_port: NGINX_HTTPS_PORT, protocol: Some("TCP".into()), ..Default::default() },
        ]),
        resources: Some(ResourceRequirements {
            requests: Some(quantities("250m", "200Mi")),
            limits: Some(quantities("400m", "500Mi")),
            ..Default::default()
        }),
        ..Default::default()
    };

    let mut volumes = n.volumes.clone();
    volumes.push(config_map_volume("cm-nginx", Component::NginxConfigMap.object_name(d)));

    let mut spec = base_spec(d, &n.image_pull_secrets);
    spec.containers = vec![container];
    spec.volumes = Some(volumes);
    template(nginx_pod_labels(d), spec)
}
