//! Registry authentication: static docker credentials and short-lived ECR
//! tokens with midpoint refresh.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use oci_client::secrets::RegistryAuth;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::aws::{to_utc, AwsClients};
use crate::error::{Result, SyncError};

/// Supplies push credentials for one registry.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authorization(&self) -> Result<RegistryAuth>;
}

/// Fixed credentials, or anonymous when none are configured.
pub struct StaticAuthenticator {
    credentials: Option<(String, String)>,
}

impl StaticAuthenticator {
    pub fn new(credentials: Option<(String, String)>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authorization(&self) -> Result<RegistryAuth> {
        Ok(match &self.credentials {
            Some((username, password)) => {
                RegistryAuth::Basic(username.clone(), password.clone())
            }
            None => RegistryAuth::Anonymous,
        })
    }
}

/// The slice of the ECR API the short-lived authenticator needs.
#[async_trait]
pub trait TokenApi: Send + Sync {
    /// Fetch a fresh token: base64 `user:password` plus its expiry.
    async fn authorization_token(&self, account: &str) -> Result<(String, DateTime<Utc>)>;
}

pub struct EcrTokenApi {
    client: aws_sdk_ecr::Client,
}

impl EcrTokenApi {
    pub fn new(client: aws_sdk_ecr::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenApi for EcrTokenApi {
    async fn authorization_token(&self, account: &str) -> Result<(String, DateTime<Utc>)> {
        let output = self
            .client
            .get_authorization_token()
            .registry_ids(account)
            .send()
            .await
            .map_err(|e| SyncError::Auth(format!("token fetch for account {account}: {e}")))?;

        let data = output.authorization_data();
        let [entry] = data else {
            return Err(SyncError::Auth(format!(
                "expected one authorization token for account {account}, got {}",
                data.len()
            )));
        };
        let token = entry
            .authorization_token()
            .ok_or_else(|| SyncError::Auth("authorization token missing".to_string()))?;
        let expires_at = entry
            .expires_at()
            .map(to_utc)
            .ok_or_else(|| SyncError::Auth("authorization token expiry missing".to_string()))?;
        Ok((token.to_string(), expires_at))
    }
}

#[derive(Clone)]
struct CachedCredential {
    username: String,
    password: String,
    valid_before: DateTime<Utc>,
}

/// Short-lived ECR credentials, refreshed once the midpoint of their
/// remaining lifetime passes.
///
/// The cache lock serializes concurrent callers, so an expired credential
/// triggers exactly one fetch; the cache is only replaced on success.
pub struct EcrAuthenticator {
    api: Arc<dyn TokenApi>,
    account: String,
    cached: Mutex<Option<CachedCredential>>,
}

impl EcrAuthenticator {
    pub fn new(api: Arc<dyn TokenApi>, account: impl Into<String>) -> Self {
        Self {
            api,
            account: account.into(),
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Authenticator for EcrAuthenticator {
    async fn authorization(&self) -> Result<RegistryAuth> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(credential) = cached.as_ref() {
            if now < credential.valid_before {
                return Ok(RegistryAuth::Basic(
                    credential.username.clone(),
                    credential.password.clone(),
                ));
            }
        }

        let (token, expires_at) = self.api.authorization_token(&self.account).await?;
        let decoded = BASE64
            .decode(token.as_bytes())
            .map_err(|e| SyncError::Auth(format!("invalid authorization token: {e}")))?;
        let text = String::from_utf8(decoded)
            .map_err(|e| SyncError::Auth(format!("invalid authorization token: {e}")))?;
        let Some((username, password)) = text.split_once(':') else {
            return Err(SyncError::Auth(
                "invalid authorization token: missing ':' separator".to_string(),
            ));
        };

        // renew at the midpoint of the remaining lifetime
        let valid_before = expires_at - (expires_at - now) / 2;
        let credential = CachedCredential {
            username: username.to_string(),
            password: password.to_string(),
            valid_before,
        };
        *cached = Some(credential.clone());
        debug!(
            "refreshed registry credentials for account {}, valid before {valid_before}",
            self.account
        );
        Ok(RegistryAuth::Basic(credential.username, credential.password))
    }
}

/// Registry hostnames of the managed container registry:
/// `<account>.dkr.ecr.<region>.amazonaws.com[.cn]`.
fn ecr_host_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+)\.dkr\.ecr\.([0-9a-z-]+)\.amazonaws\.com(\.cn)?$")
            .expect("hard-coded pattern")
    })
}

#[derive(Debug, PartialEq, Eq)]
struct EcrHost {
    account: String,
    region: String,
}

fn parse_ecr_host(registry: &str) -> Option<EcrHost> {
    let captures = ecr_host_pattern().captures(registry)?;
    Some(EcrHost {
        account: captures[1].to_string(),
        region: captures[2].to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, DockerAuth>,
}

#[derive(Debug, Deserialize)]
struct DockerAuth {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

fn docker_config_path() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("DOCKER_CONFIG") {
        return Some(PathBuf::from(dir).join("config.json"));
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".docker/config.json"))
}

/// Look up fixed credentials for `registry` in the local docker config.
fn static_credentials(registry: &str) -> Result<Option<(String, String)>> {
    let Some(path) = docker_config_path() else {
        return Ok(None);
    };
    let Ok(data) = std::fs::read(&path) else {
        return Ok(None);
    };
    let config: DockerConfig = serde_json::from_slice(&data)
        .map_err(|e| SyncError::Auth(format!("malformed {}: {e}", path.display())))?;
    let Some(entry) = config.auths.get(registry) else {
        return Ok(None);
    };

    if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
        return Ok(Some((username.clone(), password.clone())));
    }
    if let Some(token) = &entry.auth {
        let decoded = BASE64
            .decode(token.as_bytes())
            .map_err(|e| SyncError::Auth(format!("invalid auth entry for {registry}: {e}")))?;
        let text = String::from_utf8(decoded)
            .map_err(|e| SyncError::Auth(format!("invalid auth entry for {registry}: {e}")))?;
        let Some((username, password)) = text.split_once(':') else {
            return Err(SyncError::Auth(format!(
                "invalid auth entry for {registry}: missing ':' separator"
            )));
        };
        return Ok(Some((username.to_string(), password.to_string())));
    }
    Ok(None)
}

/// Resolves registries to authenticators, memoized per builder.
pub struct Keychain {
    aws: AwsClients,
    resolved: Mutex<HashMap<String, Arc<dyn Authenticator>>>,
}

impl Keychain {
    pub fn new(aws: AwsClients) -> Self {
        Self {
            aws,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, registry: &str) -> Result<Arc<dyn Authenticator>> {
        let mut resolved = self.resolved.lock().await;
        if let Some(authenticator) = resolved.get(registry) {
            return Ok(Arc::clone(authenticator));
        }
        let authenticator = self.make(registry)?;
        resolved.insert(registry.to_string(), Arc::clone(&authenticator));
        Ok(authenticator)
    }

    fn make(&self, registry: &str) -> Result<Arc<dyn Authenticator>> {
        if let Some(credentials) = static_credentials(registry)? {
            return Ok(Arc::new(StaticAuthenticator::new(Some(credentials))));
        }
        if let Some(host) = parse_ecr_host(registry) {
            let api = EcrTokenApi::new(self.aws.ecr(&host.region));
            return Ok(Arc::new(EcrAuthenticator::new(
                Arc::new(api),
                host.account,
            )));
        }
        Ok(Arc::new(StaticAuthenticator::new(None)))
    }
}
