use crate::error::Error;
use crate::secret::SecretCodec;
use crate::store::{shared, DynStore, FileStore, InMemoryStore};
use ipnetwork::IpNetwork;
use lazy_static::lazy_static;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub type SharedConfig = Arc<Config>;

/// Whether the deployment is a production one. Placeholder certificates are only ever produced
/// outside of production.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: SocketAddr,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_api_timeout")]
    pub api_timeout: Duration,
    pub state_path: Option<String>,
    pub encryption_key: Option<String>,
    #[serde(default)]
    pub acme: AcmeConfig,
    #[serde(default)]
    pub nginx: NginxConfig,
    #[serde(default)]
    pub dns: DynDnsConfig,
}

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AcmeConfig {
    pub email: Option<String>,
    pub directory_url: String,
    pub webroot: PathBuf,
    pub cert_root: PathBuf,
    pub staging_dir: PathBuf,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        AcmeConfig {
            email: None,
            directory_url: LETS_ENCRYPT_PRODUCTION.to_string(),
            webroot: PathBuf::from("/var/www/html"),
            cert_root: PathBuf::from("/etc/letsencrypt"),
            staging_dir: std::env::temp_dir(),
            timeout: Duration::from_secs(300),
        }
    }
}

impl AcmeConfig {
    /// The configured contact email, if it is non-empty.
    #[must_use]
    pub fn contact_email(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct NginxConfig {
    pub config_dir: PathBuf,
    pub sites_enabled_dir: PathBuf,
    pub ssl_cert_dir: PathBuf,
    pub test_command: String,
    pub reload_command: String,
}

impl Default for NginxConfig {
    fn default() -> Self {
        NginxConfig {
            config_dir: PathBuf::from("/etc/nginx/conf.d"),
            sites_enabled_dir: PathBuf::from("/etc/nginx/sites-enabled"),
            ssl_cert_dir: PathBuf::from("/etc/ssl/certs"),
            test_command: "nginx -t".to_string(),
            reload_command: "nginx -s reload".to_string(),
        }
    }
}

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DynDnsConfig {
    pub public_ip_service: Option<String>,
    pub fallback_ip_services: Vec<String>,
    pub namecheap_endpoint: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub sweep_interval: Duration,
}

impl Default for DynDnsConfig {
    fn default() -> Self {
        DynDnsConfig {
            public_ip_service: Some("https://api.ipify.org".to_string()),
            fallback_ip_services: [
                "https://api.ipify.org",
                "https://ipv4.icanhazip.com",
                "https://api.ip.sb/ip",
                "https://checkip.amazonaws.com",
                "https://ifconfig.me/ip",
                "https://ipecho.net/plain",
            ]
            .map(String::from)
            .to_vec(),
            namecheap_endpoint: "https://dynamicdns.park-your-domain.com/update".to_string(),
            request_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

fn default_api_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6080))
}

fn default_api_timeout() -> Duration {
    Duration::from_secs(60)
}

lazy_static! {
    // NOTE(XXX): Once the "ip" feature has stabilized we can use Ipv6Addr.is_unique_local[0].
    //            Presently this feature is unstable so we home-roll. See also RFC 4193[1].
    // [0]: https://doc.rust-lang.org/std/net/struct.Ipv6Addr.html#method.is_unique_local
    // [1]: https://www.rfc-editor.org/rfc/rfc4193.html
    static ref IPV6_UNIQUE_LOCAL_NETWORK: IpNetwork = IpNetwork::from_str("fc00::/7").unwrap();
}

impl Config {
    /// Load a [`Config`] from the JSON file at `p`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IO`] if the file can't be read and [`Error::InvalidJSON`] if it doesn't
    /// hold a valid configuration.
    ///
    /// Returns [`Error::InsecureAPIBind`] for a public `api_bind_addr` and
    /// [`Error::Configuration`] when `state_path` is set without an `encryption_key`.
    pub fn try_from_file(p: impl AsRef<Path>) -> Result<Self, Error> {
        let f = File::open(p)?;
        let reader = BufReader::new(f);
        let conf: Config = serde_json::from_reader(reader)?;
        conf.bind_addr_is_secure()?;
        if conf.state_path.is_some() && conf.encryption_key.is_none() {
            return Err(Error::Configuration(
                "encryption_key is required when state_path is set".to_string(),
            ));
        }
        Ok(conf)
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Build the store described by this configuration: a [`FileStore`] at `state_path` with
    /// DNS passwords sealed under `encryption_key`, or an [`InMemoryStore`] when no path is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for a missing or malformed `encryption_key`, and any
    /// error from [`FileStore::try_from_file`].
    pub async fn store(&self) -> Result<DynStore, Error> {
        let Some(path) = &self.state_path else {
            return Ok(shared(InMemoryStore::default()));
        };
        let key = self.encryption_key.as_deref().ok_or_else(|| {
            Error::Configuration("encryption_key is required when state_path is set".to_string())
        })?;
        let codec = SecretCodec::new(key.as_bytes())?;
        Ok(shared(FileStore::try_from_file(path, codec).await?))
    }

    fn bind_addr_is_secure(&self) -> Result<(), Error> {
        match self.api_bind_addr {
            SocketAddr::V4(v4_addr) => {
                let ip = v4_addr.ip();
                if !ip.is_loopback() && !ip.is_private() {
                    return Err(Error::InsecureAPIBind(IpAddr::V4(*ip)));
                }
                Ok(())
            }
            SocketAddr::V6(v6_addr) => {
                let ip = v6_addr.ip();
                if !ip.is_loopback() && !IPV6_UNIQUE_LOCAL_NETWORK.contains(IpAddr::V6(*ip)) {
                    return Err(Error::InsecureAPIBind(IpAddr::V6(*ip)));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Config {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let conf = parse("{}");
        assert_eq!(conf.environment, Environment::Development);
        assert_eq!(conf.api_bind_addr, default_api_bind_addr());
        assert_eq!(conf.nginx.test_command, "nginx -t");
        assert_eq!(conf.dns.request_timeout, Duration::from_secs(30));
        assert_eq!(conf.dns.sweep_interval, Duration::from_secs(300));
        assert_eq!(conf.acme.directory_url, LETS_ENCRYPT_PRODUCTION);
        assert!(conf.acme.contact_email().is_none());
    }

    #[test]
    fn durations_are_seconds() {
        let conf = parse(r#"{"api_timeout": 5, "dns": {"sweep_interval": 0}}"#);
        assert_eq!(conf.api_timeout, Duration::from_secs(5));
        assert_eq!(conf.dns.sweep_interval, Duration::ZERO);
        // Partially specified sections keep their other defaults.
        assert_eq!(conf.dns.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn blank_email_is_not_configured() {
        let conf = parse(r#"{"acme": {"email": "  "}}"#);
        assert!(conf.acme.contact_email().is_none());
        let conf = parse(r#"{"acme": {"email": "ops@example.com"}, "environment": "production"}"#);
        assert_eq!(conf.acme.contact_email(), Some("ops@example.com"));
        assert!(conf.is_production());
    }

    #[test]
    fn public_bind_addr_is_rejected() {
        let conf = parse(r#"{"api_bind_addr": "8.8.8.8:80"}"#);
        assert!(matches!(
            conf.bind_addr_is_secure(),
            Err(Error::InsecureAPIBind(_))
        ));
        let conf = parse(r#"{"api_bind_addr": "[fd00::1]:80"}"#);
        assert!(conf.bind_addr_is_secure().is_ok());
        let conf = parse(r#"{"api_bind_addr": "10.0.0.2:80"}"#);
        assert!(conf.bind_addr_is_secure().is_ok());
    }

    #[tokio::test]
    async fn store_requires_a_full_length_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut conf = parse("{}");
        conf.state_path = Some(dir.path().join("state.json").display().to_string());
        conf.encryption_key = Some("too short".to_string());
        assert!(matches!(conf.store().await, Err(Error::Configuration(_))));
        conf.encryption_key = Some("0123456789abcdef0123456789abcdef".to_string());
        assert!(conf.store().await.is_ok());
        assert!(parse("{}").store().await.is_ok());
    }

    #[test]
    fn loading_checks_bind_addr_and_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        std::fs::write(&path, r#"{"state_path": "/var/lib/proxycrab/state.json"}"#).unwrap();
        assert!(matches!(
            Config::try_from_file(&path),
            Err(Error::Configuration(_))
        ));

        std::fs::write(&path, r#"{"api_bind_addr": "8.8.8.8:6080"}"#).unwrap();
        assert!(matches!(
            Config::try_from_file(&path),
            Err(Error::InsecureAPIBind(_))
        ));

        std::fs::write(&path, "{").unwrap();
        assert!(matches!(
            Config::try_from_file(&path),
            Err(Error::InvalidJSON(_))
        ));

        std::fs::write(&path, r#"{"environment": "production"}"#).unwrap();
        assert!(Config::try_from_file(&path).unwrap().is_production());
    }
}
