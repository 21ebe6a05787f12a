//! Rendered configuration files shipped in the drupal and nginx config maps.

use crate::config::ReconcileConfig;
use crate::types::Droplet;

const SETTINGS_PHP: &str = include_str!("../templates/settings.php");
const NGINX_CONF: &str = include_str!("../templates/nginx.conf");

pub const SETTINGS_KEY: &str = "d8.settings.php";
pub const NGINX_KEY: &str = "nginx.conf";

/// Replace every `{{name}}` placeholder. Unknown placeholders are left as is.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        out = out.replace(&format!("{{{{{}}}}}", k), v);
    }
    out
}

fn trusted_host_pattern(domain: &str) -> String {
    format!("  '^{}$',", domain.replace('.', "\\."))
}

pub fn drupal_settings(d: &Droplet) -> String {
    let host = format!("{}-mysql", d.name());
    let trusted = d.spec.domains.iter().map(|s| trusted_host_pattern(s)).collect::<Vec<_>>().join("\n");
    render(
        SETTINGS_PHP,
        &[
            ("db_name", "drupal"),
            ("db_user", "root"),
            ("db_host", host.as_str()),
            ("db_port", "3306"),
            ("db_namespace", "Drupal\\\\Core\\\\Database\\\\Driver\\\\mysql"),
            ("db_driver", "mysql"),
            ("trusted_hosts", trusted.as_str()),
        ],
    )
}

pub fn nginx_conf(d: &Droplet, cfg: &ReconcileConfig) -> String {
    let server_names = d.spec.domains.join(" ");
    render(
        NGINX_CONF,
        &[
            ("server_names", server_names.as_str()),
            ("fastcgi_host", d.name()),
            ("media_proxy_base", cfg.media_proxy_base.as_str()),
            ("resolver", cfg.nginx_resolver.as_str()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DropletSpec;

    fn droplet() -> Droplet {
        let mut d = Droplet::new(
            "example",
            DropletSpec { domains: vec!["example.com".into(), "www.example.com".into()], ..Default::default() },
        );
        d.metadata.namespace = Some("default".into());
        d
    }

    #[test]
    fn render_replaces_known_placeholders() {
        assert_eq!(render("{{a}}-{{b}}-{{c}}", &[("a", "1"), ("b", "2")]), "1-2-{{c}}");
    }

    #[test]
    fn settings_point_at_the_droplet_database() {
        let s = drupal_settings(&droplet());
        assert!(s.contains("'host' => 'example-mysql'"));
        assert!(s.contains("getenv('MYSQL_ROOT_PASSWORD')"));
        assert!(s.contains("'namespace' => 'Drupal\\\\Core\\\\Database\\\\Driver\\\\mysql'"));
        assert!(s.contains("'^www\\.example\\.com$',"));
        assert!(!s.contains("{{"));
    }

    #[test]
    fn nginx_conf_serves_all_domains() {
        let c = nginx_conf(&droplet(), &ReconcileConfig::default());
        assert!(c.contains("server_name example.com www.example.com;"));
        assert!(c.contains("fastcgi_pass example:9000;"));
        assert!(c.contains("resolver 10.0.0.10 valid=5s"));
        assert!(!c.contains("{{"));
    }
}
