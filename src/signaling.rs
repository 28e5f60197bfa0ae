//! SDP offer/answer exchange with the realtime endpoint.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::header::CONTENT_TYPE;
use secrecy::ExposeSecret;

use crate::error::{Result, TransportError};
use crate::session::SessionCredential;
use crate::transport::consts::SDP_CONTENT_TYPE;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Signaling: Send + Sync {
    /// Send the local offer and return the remote answer SDP.
    async fn exchange_sdp(&self, endpoint: &str, credential: &SessionCredential, offer: String) -> Result<String>;
}

/// Posts the raw offer with bearer auth and reads the raw answer back.
#[derive(Default)]
pub struct HttpSignaling {
    client: reqwest::Client,
}

impl HttpSignaling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Signaling for HttpSignaling {
    async fn exchange_sdp(&self, endpoint: &str, credential: &SessionCredential, offer: String) -> Result<String> {
        tracing::debug!(endpoint, offer_len = offer.len(), "posting sdp offer");

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(credential.secret().expose_secret())
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(offer)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::error!(%status, body = %body, "realtime endpoint rejected the offer");
            return Err(TransportError::Negotiation {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Err(TransportError::peer("realtime endpoint returned an empty answer"));
        }

        tracing::debug!(answer_len = body.len(), "received sdp answer");
        Ok(body)
    }
}
