//! Session credentials and the providers that issue them.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{Result, TransportError};

/// Short-lived credential and connection target for one connection attempt.
#[derive(Debug)]
pub struct SessionCredential {
    secret: SecretString,
    resource: Option<String>,
    deployment: Option<String>,
    realtime_url: Option<String>,
}

impl SessionCredential {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: SecretString::from(secret.to_string()),
            resource: None,
            deployment: None,
            realtime_url: None,
        }
    }

    pub fn with_resource(mut self, resource: &str) -> Self {
        self.resource = Some(resource.to_string());
        self
    }

    pub fn with_deployment(mut self, deployment: &str) -> Self {
        self.deployment = Some(deployment.to_string());
        self
    }

    pub fn with_realtime_url(mut self, realtime_url: &str) -> Self {
        self.realtime_url = Some(realtime_url.to_string());
        self
    }

    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn deployment(&self) -> Option<&str> {
        self.deployment.as_deref()
    }

    pub fn realtime_url(&self) -> Option<&str> {
        self.realtime_url.as_deref()
    }
}

/// Body returned by the token endpoint.
#[derive(Debug, Default, serde::Deserialize)]
struct TokenResponse {
    #[serde(default)]
    client_secret: Option<ClientSecret>,
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    resource_name: Option<String>,
    #[serde(default)]
    deployment_name: Option<String>,
    #[serde(default, alias = "realtime_url")]
    webrtc_url: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ClientSecret {
    #[serde(default)]
    value: Option<String>,
}

/// Placeholder left behind by unconfigured deployments.
const UNCONFIGURED_RESOURCE: &str = "YOUR_RESOURCE_NAME";

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl TryFrom<TokenResponse> for SessionCredential {
    type Error = TransportError;

    fn try_from(response: TokenResponse) -> Result<Self> {
        let secret = non_empty(response.client_secret.and_then(|s| s.value))
            .or_else(|| non_empty(response.secret))
            .ok_or_else(|| TransportError::config("session response is missing client_secret.value"))?;

        let resource = non_empty(response.resource_name).filter(|r| r != UNCONFIGURED_RESOURCE);
        let realtime_url = non_empty(response.webrtc_url);
        if resource.is_none() && realtime_url.is_none() {
            return Err(TransportError::config(
                "session response names neither a resource_name nor a webrtc_url",
            ));
        }

        Ok(Self {
            secret: SecretString::from(secret),
            resource,
            deployment: non_empty(response.deployment_name),
            realtime_url,
        })
    }
}

/// Source of session credentials.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_credential(&self) -> Result<SessionCredential>;
}

/// Fetches credentials from an HTTP token endpoint with `GET`.
pub struct HttpTokenProvider {
    client: reqwest::Client,
    url: String,
}

impl HttpTokenProvider {
    pub fn new(url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn fetch_credential(&self) -> Result<SessionCredential> {
        tracing::debug!(url = %self.url, "requesting session token");

        let response = self
            .client
            .get(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| TransportError::session(format!("request failed: {e}")))?;

        let status = response.status();
        tracing::debug!(%status, "session endpoint responded");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::session(format!("{status} - {body}")));
        }

        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|e| TransportError::session(format!("unreadable session response: {e}")))?;

        tracing::debug!(
            has_secret = payload.client_secret.is_some() || payload.secret.is_some(),
            resource = ?payload.resource_name,
            has_webrtc_url = payload.webrtc_url.is_some(),
            "session data received"
        );
        SessionCredential::try_from(payload)
    }
}

/// Issues credentials straight from service configuration, with no HTTP hop.
///
/// Reads the same settings a session endpoint would:
/// `AZURE_OPENAI_API_KEY`, `AZURE_OPENAI_ENDPOINT` and optionally
/// `AZURE_OPENAI_RESOURCE_NAME`, `AZURE_OPENAI_DEPLOYMENT`,
/// `AZURE_OPENAI_WEBRTC_URL`.
pub struct SessionIssuer {
    api_key: SecretString,
    endpoint: String,
    resource_name: Option<String>,
    deployment: Option<String>,
    webrtc_url: Option<String>,
}

impl SessionIssuer {
    pub fn new(api_key: &str, endpoint: &str) -> Self {
        Self {
            api_key: SecretString::from(api_key.to_string()),
            endpoint: endpoint.to_string(),
            resource_name: None,
            deployment: None,
            webrtc_url: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        let api_key = env_var("AZURE_OPENAI_API_KEY")
            .ok_or_else(|| TransportError::config("missing AZURE_OPENAI_API_KEY environment variable"))?;
        let endpoint = env_var("AZURE_OPENAI_ENDPOINT")
            .ok_or_else(|| TransportError::config("missing AZURE_OPENAI_ENDPOINT environment variable"))?;

        let mut issuer = Self::new(&api_key, &endpoint);
        issuer.resource_name = env_var("AZURE_OPENAI_RESOURCE_NAME");
        issuer.deployment = env_var("AZURE_OPENAI_DEPLOYMENT");
        issuer.webrtc_url = env_var("AZURE_OPENAI_WEBRTC_URL");
        Ok(issuer)
    }

    pub fn with_resource_name(mut self, resource_name: &str) -> Self {
        self.resource_name = Some(resource_name.to_string());
        self
    }

    pub fn with_deployment(mut self, deployment: &str) -> Self {
        self.deployment = Some(deployment.to_string());
        self
    }

    pub fn with_webrtc_url(mut self, webrtc_url: &str) -> Self {
        self.webrtc_url = Some(webrtc_url.to_string());
        self
    }

    pub fn issue(&self) -> Result<SessionCredential> {
        let resource = self
            .resource_name
            .clone()
            .or_else(|| resource_from_endpoint(&self.endpoint))
            .ok_or_else(|| {
                TransportError::config(format!(
                    "could not determine the resource name from endpoint {:?}; set AZURE_OPENAI_RESOURCE_NAME",
                    self.endpoint
                ))
            })?;

        let mut credential = SessionCredential::new(self.api_key.expose_secret()).with_resource(&resource);
        if let Some(deployment) = &self.deployment {
            credential = credential.with_deployment(deployment);
        }
        if let Some(url) = &self.webrtc_url {
            credential = credential.with_realtime_url(url);
        }
        tracing::debug!(resource, "session issued");
        Ok(credential)
    }
}

#[async_trait]
impl TokenProvider for SessionIssuer {
    async fn fetch_credential(&self) -> Result<SessionCredential> {
        self.issue()
    }
}

fn env_var(name: &str) -> Option<String> {
    non_empty(std::env::var(name).ok())
}

/// Extract `<name>` from `https://<name>.cognitiveservices.azure.com` or
/// `https://<name>.openai.azure.com`.
fn resource_from_endpoint(endpoint: &str) -> Option<String> {
    let url = reqwest::Url::parse(endpoint).ok()?;
    let host = url.host_str()?;
    [".cognitiveservices.azure.com", ".openai.azure.com"]
        .iter()
        .find_map(|suffix| host.strip_suffix(suffix))
        .filter(|name| !name.is_empty() && !name.contains('.'))
        .map(str::to_string)
}
