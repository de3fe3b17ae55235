//! ACME issuance over HTTP-01.
//!
//! [`AcmeIssuer`] registers (or reloads) an account, answers HTTP-01 challenges by writing
//! key authorizations under a webroot that the proxy server exposes at
//! `/.well-known/acme-challenge/`, and finalizes a single-domain order with a fresh key.

use crate::error::Error;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A freshly issued certificate chain and its private key, both PEM encoded.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub certificate_pem: String,
    pub private_key_pem: String,
}

/// Anything able to obtain a certificate for a single domain.
#[async_trait::async_trait]
pub trait CertificateIssuer {
    async fn issue(&self, domain: &str, email: &str) -> Result<IssuedCertificate, Error>;
}

pub type DynIssuer = Arc<dyn CertificateIssuer + Send + Sync>;

/// Serves HTTP-01 key authorizations as files below a webroot.
#[derive(Debug, Clone)]
pub struct Http01Webroot {
    root: PathBuf,
}

impl Http01Webroot {
    #[must_use]
    pub fn new(webroot: impl AsRef<Path>) -> Self {
        Http01Webroot {
            root: webroot.as_ref().join(".well-known").join("acme-challenge"),
        }
    }

    #[must_use]
    pub fn token_path(&self, token: &str) -> PathBuf {
        self.root.join(token)
    }

    /// Write the key authorization for `token`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a token that isn't a plain file name and
    /// [`Error::IO`] if the file can't be written.
    pub async fn provision(&self, token: &str, key_authorization: &str) -> Result<(), Error> {
        if token.is_empty() || token.contains(['/', '\\']) || token.starts_with('.') {
            return Err(Error::Validation(format!("unusable challenge token {token:?}")));
        }
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.token_path(token), key_authorization).await?;
        Ok(())
    }

    pub async fn cleanup(&self, token: &str) {
        if let Err(err) = tokio::fs::remove_file(self.token_path(token)).await {
            debug!("challenge cleanup for {token}: {err}");
        }
    }
}

/// Account state persisted between restarts.
#[derive(Serialize, Deserialize)]
struct StoredAccount {
    email: String,
    directory_url: String,
    credentials: AccountCredentials,
}

pub struct AcmeIssuer {
    directory_url: String,
    account_path: PathBuf,
    webroot: Http01Webroot,
    timeout: Duration,
    account: Mutex<Option<(String, Account)>>,
}

const POLL_INTERVAL: Duration = Duration::from_secs(2);

impl AcmeIssuer {
    /// Account credentials are kept at `<cert_root>/accounts/account.json`.
    #[must_use]
    pub fn new(
        directory_url: impl Into<String>,
        cert_root: impl AsRef<Path>,
        webroot: Http01Webroot,
        timeout: Duration,
    ) -> Self {
        AcmeIssuer {
            directory_url: directory_url.into(),
            account_path: cert_root.as_ref().join("accounts").join("account.json"),
            webroot,
            timeout,
            account: Mutex::new(None),
        }
    }

    /// The account registered for `email`, registering one if needed.
    async fn account(&self, email: &str) -> Result<Account, Error> {
        let mut cached = self.account.lock().await;
        if let Some((cached_email, account)) = cached.as_ref() {
            if cached_email == email {
                return Ok(account.clone());
            }
        }

        if let Some(stored) = self.load_account().await? {
            if stored.email == email && stored.directory_url == self.directory_url {
                let account = Account::builder()
                    .map_err(acme_error)?
                    .from_credentials(stored.credentials)
                    .await
                    .map_err(acme_error)?;
                debug!("reusing ACME account for {email}");
                *cached = Some((email.to_string(), account.clone()));
                return Ok(account);
            }
            info!("ACME contact or directory changed, registering a new account");
        }

        let contact = format!("mailto:{email}");
        let (account, credentials) = Account::builder()
            .map_err(acme_error)?
            .create(
                &NewAccount {
                    contact: &[&contact],
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                self.directory_url.clone(),
                None,
            )
            .await
            .map_err(acme_error)?;
        self.save_account(&StoredAccount {
            email: email.to_string(),
            directory_url: self.directory_url.clone(),
            credentials,
        })
        .await?;
        info!("registered ACME account for {email}");

        *cached = Some((email.to_string(), account.clone()));
        Ok(account)
    }

    async fn load_account(&self) -> Result<Option<StoredAccount>, Error> {
        match tokio::fs::read(&self.account_path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_account(&self, account: &StoredAccount) -> Result<(), Error> {
        if let Some(dir) = self.account_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let data = serde_json::to_vec_pretty(account)?;
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        let mut file = options.open(&self.account_path).await?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &data).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn authorize(&self, order: &mut Order, tokens: &mut Vec<String>) -> Result<(), Error> {
        let mut authorizations = order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result.map_err(acme_error)?;
            if authz.status == AuthorizationStatus::Valid {
                continue;
            }
            let domain = match &authz.identifier().identifier {
                Identifier::Dns(domain) => domain.clone(),
                other => {
                    warn!("skipping unsupported ACME identifier {other:?}");
                    continue;
                }
            };
            let mut challenge = authz
                .challenge(ChallengeType::Http01)
                .ok_or_else(|| Error::external("ACME", format!("no HTTP-01 challenge for {domain}")))?;

            let key_authorization = challenge.key_authorization();
            self.webroot
                .provision(&challenge.token, key_authorization.as_str())
                .await?;
            tokens.push(challenge.token.clone());
            challenge.set_ready().await.map_err(acme_error)?;
            debug!("HTTP-01 challenge ready for {domain}");
        }
        Ok(())
    }

    async fn wait_for(order: &mut Order, wanted: OrderStatus) -> Result<(), Error> {
        loop {
            let state = order.refresh().await.map_err(acme_error)?;
            match state.status {
                status if status == wanted => return Ok(()),
                OrderStatus::Invalid => {
                    let detail = state
                        .error
                        .as_ref()
                        .map_or_else(|| "order became invalid".to_string(), |p| format!("{p:?}"));
                    return Err(Error::external("ACME", describe_acme_error(&detail)));
                }
                OrderStatus::Valid => return Ok(()),
                _ => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
    }

    async fn issue_inner(&self, domain: &str, email: &str) -> Result<IssuedCertificate, Error> {
        let account = self.account(email).await?;
        let identifiers = [Identifier::Dns(domain.to_string())];
        let mut order = account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .map_err(acme_error)?;

        let mut tokens = Vec::new();
        let authorized = self.authorize(&mut order, &mut tokens).await;
        let ready = match authorized {
            Ok(()) => Self::wait_for(&mut order, OrderStatus::Ready).await,
            Err(err) => Err(err),
        };
        for token in &tokens {
            self.webroot.cleanup(token).await;
        }
        ready?;

        let key_pair = rcgen::KeyPair::generate()
            .map_err(|e| Error::external("ACME", format!("failed to generate key: {e}")))?;
        let csr = rcgen::CertificateParams::new(vec![domain.to_string()])
            .and_then(|params| params.serialize_request(&key_pair))
            .map_err(|e| Error::external("ACME", format!("failed to build CSR: {e}")))?
            .der()
            .to_vec();
        order.finalize_csr(&csr).await.map_err(acme_error)?;
        Self::wait_for(&mut order, OrderStatus::Valid).await?;

        let chain = order
            .certificate()
            .await
            .map_err(acme_error)?
            .ok_or_else(|| Error::external("ACME", "no certificate in response"))?;
        Ok(IssuedCertificate {
            certificate_pem: chain,
            private_key_pem: key_pair.serialize_pem(),
        })
    }
}

#[async_trait::async_trait]
impl CertificateIssuer for AcmeIssuer {
    async fn issue(&self, domain: &str, email: &str) -> Result<IssuedCertificate, Error> {
        info!("requesting certificate for {domain}");
        match tokio::time::timeout(self.timeout, self.issue_inner(domain, email)).await {
            Ok(result) => result,
            Err(_) => Err(Error::external(
                "ACME",
                describe_acme_error("connection timeout waiting for the ACME server"),
            )),
        }
    }
}

fn acme_error(err: instant_acme::Error) -> Error {
    Error::external("ACME", describe_acme_error(&err.to_string()))
}

const RATE_LIMIT_DOCS: &str = "https://letsencrypt.org/docs/rate-limits/";

/// Turn a raw ACME failure into operator guidance. Rate limits are summarised with the issued
/// count and retry time when the server supplied them; well known problem types map to a
/// short explanation; anything else is returned without wrapper prefixes.
#[must_use]
pub fn describe_acme_error(raw: &str) -> String {
    if raw.contains("rateLimited") || raw.contains("rate limit") {
        let mut msg = String::from("Let's Encrypt rate limit reached");
        match issued_count(raw) {
            Some(count) => msg.push_str(&format!(
                ": {count} certificates already issued for this domain in the last 168 hours"
            )),
            None => msg.push_str(
                ": Too many certificates already issued for this domain in the last 168 hours",
            ),
        }
        match retry_after(raw) {
            Some(when) => msg.push_str(&format!(". You can retry after {when}")),
            None => msg.push_str(
                ". Please wait 168 hours before requesting another certificate for this domain",
            ),
        }
        msg.push_str(&format!(". See {RATE_LIMIT_DOCS} for more information."));
        return msg;
    }

    if raw.contains("urn:ietf:params:acme:error") || raw.contains("connection timeout") {
        if raw.contains("invalidEmail") {
            return "Invalid email address for ACME registration. Check the configured contact \
                    email."
                .to_string();
        }
        if raw.contains("connection") || raw.contains("timeout") {
            return "Connection error while communicating with the ACME server. Check internet \
                    connectivity and try again."
                .to_string();
        }
        if raw.contains("unauthorized") {
            return "Authorization failed. The domain may not point to this server, or the \
                    HTTP-01 challenge could not be served."
                .to_string();
        }
        if raw.contains("dns") {
            return "DNS validation failed. Ensure the domain's DNS records are correctly \
                    configured."
                .to_string();
        }
    }

    let mut cleaned = raw.trim();
    for prefix in [
        "failed to generate certificate:",
        "failed to obtain certificate:",
        "API error:",
    ] {
        if let Some(rest) = cleaned.strip_prefix(prefix) {
            cleaned = rest.trim_start();
        }
    }
    cleaned.to_string()
}

/// The number preceding "already issued", allowing for a parenthesised count.
fn issued_count(raw: &str) -> Option<u32> {
    let head = &raw[..raw.find("already issued")?];
    let head = head.trim_end().trim_end_matches(')');
    let digits: String = head
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

/// The timestamp following "retry after", up to the next ": " clause separator.
fn retry_after(raw: &str) -> Option<&str> {
    let (_, tail) = raw.split_once("retry after")?;
    let when = tail.split(": ").next()?.trim().trim_end_matches(['.', ',']);
    (!when.is_empty()).then_some(when)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_with_count_and_retry() {
        let raw = "urn:ietf:params:acme:error:rateLimited: too many certificates (5) already \
                   issued for this exact set of domains in the last 168h0m0s, retry after \
                   2025-01-20 04:52:27 UTC: see https://letsencrypt.org/docs/rate-limits/";
        let msg = describe_acme_error(raw);
        assert!(msg.starts_with("Let's Encrypt rate limit reached: 5 certificates"));
        assert!(msg.contains("retry after 2025-01-20 04:52:27 UTC."));
        assert!(msg.contains(RATE_LIMIT_DOCS));
    }

    #[test]
    fn rate_limit_without_details() {
        let msg = describe_acme_error("rate limit exceeded");
        assert!(msg.contains("Too many certificates"));
        assert!(msg.contains("Please wait 168 hours"));
    }

    #[test]
    fn known_problem_types() {
        assert!(describe_acme_error("urn:ietf:params:acme:error:invalidEmail: bad contact")
            .starts_with("Invalid email"));
        assert!(describe_acme_error("urn:ietf:params:acme:error:unauthorized: 404")
            .starts_with("Authorization failed"));
        assert!(describe_acme_error("urn:ietf:params:acme:error:dns: NXDOMAIN")
            .starts_with("DNS validation failed"));
        assert!(describe_acme_error("connection timeout waiting for the ACME server")
            .starts_with("Connection error"));
    }

    #[test]
    fn other_errors_lose_prefixes() {
        assert_eq!(
            describe_acme_error("failed to obtain certificate: order expired"),
            "order expired"
        );
    }

    #[tokio::test]
    async fn webroot_provisions_and_cleans_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let webroot = Http01Webroot::new(dir.path());
        webroot.provision("tok3n", "tok3n.thumbprint").await.unwrap();
        let path = dir.path().join(".well-known/acme-challenge/tok3n");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "tok3n.thumbprint");
        webroot.cleanup("tok3n").await;
        assert!(!path.exists());
        assert!(webroot.provision("../escape", "x").await.is_err());
    }
}
