//! nginx virtual host rendering.

use crate::model::ProxyRoute;
use std::path::{Path, PathBuf};

/// Everything that goes into one route's configuration file.
#[derive(Debug, Clone)]
pub struct Site<'a> {
    pub proxy: &'a ProxyRoute,
    /// Certificate and key paths when TLS is to be served.
    pub tls: Option<(PathBuf, PathBuf)>,
    /// Normalized CIDRs; empty means unrestricted.
    pub allowed_ranges: Vec<String>,
    /// Upstream for the `/api/` location.
    pub backend_url: Option<String>,
    /// Directory served at `/.well-known/acme-challenge/`.
    pub acme_webroot: &'a Path,
}

/// The file name a route's configuration is written under.
#[must_use]
pub fn file_name(proxy_id: u64) -> String {
    format!("proxy-{proxy_id}.conf")
}

fn access_rules(allowed: &[String], indent: &str) -> String {
    if allowed.is_empty() {
        return String::new();
    }
    let mut rules: String = allowed
        .iter()
        .map(|cidr| format!("{indent}allow {cidr};\n"))
        .collect();
    rules.push_str(&format!("{indent}deny all;\n"));
    rules
}

fn proxy_location(path: &str, upstream: &str, site: &Site<'_>) -> String {
    let indent = "        ";
    let mut block = format!("    location {path} {{\n");
    block.push_str(&access_rules(&site.allowed_ranges, indent));
    block.push_str(&format!("{indent}proxy_pass {upstream};\n"));
    block.push_str(&format!("{indent}proxy_set_header Host $host;\n"));
    block.push_str(&format!("{indent}proxy_set_header X-Real-IP $remote_addr;\n"));
    block.push_str(&format!(
        "{indent}proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n"
    ));
    block.push_str(&format!("{indent}proxy_set_header X-Forwarded-Proto $scheme;\n"));
    if site.proxy.ws_enabled {
        block.push_str(&format!("{indent}proxy_http_version 1.1;\n"));
        block.push_str(&format!("{indent}proxy_set_header Upgrade $http_upgrade;\n"));
        block.push_str(&format!("{indent}proxy_set_header Connection \"upgrade\";\n"));
    }
    block.push_str("    }\n");
    block
}

fn routed_locations(site: &Site<'_>) -> String {
    let mut locations = String::new();
    if let Some(backend) = &site.backend_url {
        locations.push_str(&proxy_location("/api/", backend, site));
        locations.push('\n');
    }
    locations.push_str(&proxy_location("/", &site.proxy.target_url, site));
    locations
}

/// Render the configuration for `site`. A plain HTTP server always exists so HTTP-01
/// challenges can be answered; with TLS it redirects everything else to HTTPS.
#[must_use]
pub fn render(site: &Site<'_>) -> String {
    let domain = &site.proxy.domain;
    let mut conf = format!(
        "# {} (route {})\nserver {{\n    listen 80;\n    listen [::]:80;\n    server_name {domain};\n\n",
        site.proxy.name, site.proxy.id
    );
    conf.push_str(&format!(
        "    location /.well-known/acme-challenge/ {{\n        root {};\n    }}\n\n",
        site.acme_webroot.display()
    ));

    match &site.tls {
        None => {
            conf.push_str(&routed_locations(site));
            conf.push_str("}\n");
        }
        Some((cert, key)) => {
            conf.push_str("    location / {\n        return 301 https://$host$request_uri;\n    }\n}\n\n");
            conf.push_str(&format!(
                "server {{\n    listen 443 ssl http2;\n    listen [::]:443 ssl http2;\n    server_name {domain};\n\n"
            ));
            conf.push_str(&format!("    ssl_certificate {};\n", cert.display()));
            conf.push_str(&format!("    ssl_certificate_key {};\n", key.display()));
            conf.push_str("    ssl_protocols TLSv1.2 TLSv1.3;\n");
            conf.push_str("    ssl_prefer_server_ciphers on;\n\n");
            conf.push_str(&routed_locations(site));
            conf.push_str("}\n");
        }
    }
    conf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::fixtures::proxy;

    fn site<'a>(proxy: &'a ProxyRoute, webroot: &'a Path) -> Site<'a> {
        Site {
            proxy,
            tls: None,
            allowed_ranges: Vec::new(),
            backend_url: None,
            acme_webroot: webroot,
        }
    }

    #[test]
    fn plain_http_site() {
        let mut route = proxy("app.example.com");
        route.id = 3;
        let webroot = Path::new("/var/www/html");
        let conf = render(&site(&route, webroot));
        assert!(conf.contains("server_name app.example.com;"));
        assert!(conf.contains("proxy_pass http://127.0.0.1:3000;"));
        assert!(conf.contains("root /var/www/html;"));
        assert!(!conf.contains("ssl_certificate"));
        assert!(!conf.contains("listen 443"));
        assert!(!conf.contains("Upgrade"));
        assert_eq!(file_name(route.id), "proxy-3.conf");
    }

    #[test]
    fn tls_site_redirects_plain_http() {
        let route = proxy("app.example.com");
        let webroot = Path::new("/var/www/html");
        let mut s = site(&route, webroot);
        s.tls = Some((
            PathBuf::from("/certs/app.example.com.crt"),
            PathBuf::from("/certs/app.example.com.key"),
        ));
        let conf = render(&s);
        assert!(conf.contains("return 301 https://$host$request_uri;"));
        assert!(conf.contains("listen 443 ssl http2;"));
        assert!(conf.contains("ssl_certificate /certs/app.example.com.crt;"));
        assert!(conf.contains("ssl_certificate_key /certs/app.example.com.key;"));
        // The challenge location stays reachable over plain HTTP.
        let http_block = conf.split("listen 443").next().unwrap();
        assert!(http_block.contains("/.well-known/acme-challenge/"));
    }

    #[test]
    fn allow_list_backend_and_websockets() {
        let mut route = proxy("app.example.com");
        route.ws_enabled = true;
        let webroot = Path::new("/var/www/html");
        let mut s = site(&route, webroot);
        s.allowed_ranges = vec!["10.0.0.0/24".to_string(), "192.168.1.5/32".to_string()];
        s.backend_url = Some("http://127.0.0.1:8080".to_string());
        let conf = render(&s);
        assert!(conf.contains("location /api/ {"));
        assert!(conf.contains("proxy_pass http://127.0.0.1:8080;"));
        assert_eq!(conf.matches("allow 10.0.0.0/24;").count(), 2);
        assert_eq!(conf.matches("deny all;").count(), 2);
        assert!(conf.contains("proxy_set_header Upgrade $http_upgrade;"));
    }
}
