//! Mutation functions for the nginx front and the ingress.

use std::collections::BTreeMap;

use droplet_core::{is_new, SyncResult};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend, IngressTLS,
    ServiceBackendPort,
};

use crate::build::{merge_template, set_labels, set_selector};
use crate::component::{nginx_pod_labels, selector_labels, Component};
use crate::config::ReconcileConfig;
use crate::drupal::{set_service_selector, set_single_port};
use crate::pod::{self, NGINX_HTTP_PORT};
use crate::templates;
use crate::types::Droplet;

pub fn config_map(out: &mut ConfigMap, d: &Droplet, cfg: &ReconcileConfig) -> SyncResult<()> {
    set_labels(&mut out.metadata, Component::NginxConfigMap, d, cfg);
    out.data
        .get_or_insert_with(BTreeMap::new)
        .insert(templates::NGINX_KEY.to_string(), templates::nginx_conf(d, cfg));
    Ok(())
}

pub fn deployment(out: &mut Deployment, d: &Droplet, cfg: &ReconcileConfig) -> SyncResult<()> {
    set_labels(&mut out.metadata, Component::NginxDeployment, d, cfg);
    let spec = out.spec.get_or_insert_with(Default::default);
    set_selector(&out.metadata, &mut spec.selector, &selector_labels(&nginx_pod_labels(d)), "deployment selector")?;
    merge_template(&mut spec.template, pod::nginx(d))?;
    if let Some(replicas) = d.spec.nginx.replicas {
        spec.replicas = Some(replicas);
    }
    Ok(())
}

pub fn service(out: &mut Service, d: &Droplet, cfg: &ReconcileConfig) -> SyncResult<()> {
    set_labels(&mut out.metadata, Component::NginxService, d, cfg);
    let selector = selector_labels(&nginx_pod_labels(d));
    let fresh = is_new(&out.metadata);
    let spec = out.spec.get_or_insert_with(Default::default);
    set_service_selector(fresh, &mut spec.selector, selector)?;
    set_single_port(&mut spec.ports, NGINX_HTTP_PORT, NGINX_HTTP_PORT);
    Ok(())
}

/// One rule per domain, all routed to the nginx service. Foreign annotations
/// are kept; rules and TLS are owned outright.
pub fn ingress(out: &mut Ingress, d: &Droplet, cfg: &ReconcileConfig) -> SyncResult<()> {
    set_labels(&mut out.metadata, Component::Ingress, d, cfg);
    if !d.spec.ingress_annotations.is_empty() {
        let annotations = out.metadata.annotations.get_or_insert_with(BTreeMap::new);
        for (k, v) in d.spec.ingress_annotations.iter() {
            annotations.insert(k.clone(), v.clone());
        }
    }

    let backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: Component::NginxService.object_name(d),
            port: Some(ServiceBackendPort { name: Some("http".into()), number: None }),
        }),
        resource: None,
    };
    let rules = d
        .spec
        .domains
        .iter()
        .map(|host| IngressRule {
            host: Some(host.clone()),
            http: Some(HTTPIngressRuleValue {
                paths: vec![HTTPIngressPath {
                    path: Some("/".into()),
                    path_type: "Prefix".into(),
                    backend: backend.clone(),
                }],
            }),
        })
        .collect();

    let spec = out.spec.get_or_insert_with(Default::default);
    spec.rules = Some(rules);
    spec.tls = d.spec.tls_secret_ref.as_ref().filter(|s| !s.is_empty()).map(|secret| {
        vec![IngressTLS { secret_name: Some(secret.clone()), hosts: Some(d.spec.domains.clone()) }]
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::stub;
    use crate::defaults;
    use crate::types::DropletSpec;

    fn droplet() -> Droplet {
        let mut d = Droplet::new(
            "example",
            DropletSpec { domains: vec!["example.com".into(), "www.example.com".into()], ..Default::default() },
        );
        d.metadata.namespace = Some("default".into());
        defaults::apply(&mut d);
        d
    }

    #[test]
    fn ingress_routes_every_domain_to_nginx() {
        let d = droplet();
        let mut ing: Ingress = stub(&d, Component::Ingress);
        ingress(&mut ing, &d, &ReconcileConfig::default()).unwrap();

        let spec = ing.spec.as_ref().unwrap();
        let rules = spec.rules.as_ref().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].host.as_deref(), Some("www.example.com"));
        let svc = rules[0].http.as_ref().unwrap().paths[0].backend.service.as_ref().unwrap();
        assert_eq!(svc.name, "example-nginx");
        assert_eq!(svc.port.as_ref().unwrap().name.as_deref(), Some("http"));
        assert!(spec.tls.is_none());
    }

    #[test]
    fn ingress_tls_follows_secret_ref() {
        let mut d = droplet();
        d.spec.tls_secret_ref = Some("example-tls".into());
        d.spec.ingress_annotations = BTreeMap::from([("kubernetes.io/ingress.class".to_string(), "nginx".to_string())]);
        let mut ing: Ingress = stub(&d, Component::Ingress);
        ing.metadata.annotations = Some(BTreeMap::from([("team".to_string(), "web".to_string())]));
        ingress(&mut ing, &d, &ReconcileConfig::default()).unwrap();

        let tls = ing.spec.as_ref().unwrap().tls.clone().unwrap();
        assert_eq!(tls[0].secret_name.as_deref(), Some("example-tls"));
        assert_eq!(tls[0].hosts.as_ref().map(Vec::len), Some(2));
        assert_eq!(ing.metadata.annotations.as_ref().map(BTreeMap::len), Some(2));

        d.spec.tls_secret_ref = None;
        ingress(&mut ing, &d, &ReconcileConfig::default()).unwrap();
        assert!(ing.spec.as_ref().unwrap().tls.is_none());
    }

    #[test]
    fn nginx_config_map_renders_conf() {
        let d = droplet();
        let mut cm: ConfigMap = stub(&d, Component::NginxConfigMap);
        config_map(&mut cm, &d, &ReconcileConfig::default()).unwrap();
        assert_eq!(cm.metadata.name.as_deref(), Some("example-nginx"));
        assert!(cm.data.unwrap()[templates::NGINX_KEY].contains("fastcgi_pass example:9000;"));
    }
}
