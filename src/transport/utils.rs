use reqwest::Url;

use crate::error::{Result, TransportError};
use crate::session::SessionCredential;
use crate::transport::config::Config;

/// Resolve the SDP endpoint for a credential.
///
/// An explicit URL in the credential wins. Otherwise the configured template
/// is filled from the resource and the deployment (or configured model).
pub fn resolve_endpoint(config: &Config, credential: &SessionCredential) -> Result<Url> {
    let raw = match credential.realtime_url() {
        Some(url) => url.to_string(),
        None => {
            let resource = credential.resource().ok_or_else(|| {
                TransportError::config("session credential names neither a realtime url nor a resource")
            })?;
            let model = credential.deployment().unwrap_or(config.model());
            config
                .realtime_url_template()
                .replace("{resource}", resource)
                .replace("{deployment}", model)
                .replace("{model}", model)
        }
    };

    let url = Url::parse(&raw)
        .map_err(|e| TransportError::config(format!("invalid realtime endpoint {raw:?}: {e}")))?;
    match url.scheme() {
        "https" | "http" => Ok(url),
        scheme => Err(TransportError::config(format!(
            "unsupported realtime endpoint scheme {scheme:?}"
        ))),
    }
}
