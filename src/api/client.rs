//! Authenticated HTTP client for the Raven (Frappe) API
//!
//! Every backend call is a whitelisted method under `/api/method/<method>`
//! whose JSON result is wrapped as `{"message": ...}`.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::auth::{ApiCredentials, CredentialStore};
use crate::config::Config;

/// Frappe response envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    message: T,
}

/// Client bound to one site and one API key pair.
#[derive(Clone)]
pub struct RavenClient {
    http: reqwest::Client,
    site: String,
    credentials: ApiCredentials,
}

impl RavenClient {
    /// Load config and build client.
    pub fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(&config)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let site = config
            .site()
            .context("No site configured. Run 'raven-cli login' first.")?;
        let credentials = config
            .get_credentials()
            .context("No API credentials. Run 'raven-cli login' first.")?;
        Ok(Self::with_credentials(site, credentials))
    }

    pub fn with_credentials(site: &str, credentials: ApiCredentials) -> Self {
        Self {
            http: reqwest::Client::new(),
            site: site.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn credentials(&self) -> &ApiCredentials {
        &self.credentials
    }

    pub fn method_url(&self, method: &str) -> String {
        format!("{}/api/method/{}", self.site, method)
    }

    /// GET a whitelisted method with query parameters.
    pub async fn call_get<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = self.method_url(method);
        tracing::debug!("GET {} {:?}", url, params);

        let resp = self
            .http
            .get(&url)
            .header("Authorization", self.credentials.header_value())
            .header("Accept", "application/json")
            .query(params)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        let resp = check_response(resp, &url).await?;
        unwrap_message(resp, &url).await
    }

    /// POST a whitelisted method with a JSON body.
    pub async fn call_post<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let url = self.method_url(method);
        tracing::debug!("POST {}", url);

        let resp = self
            .http
            .post(&url)
            .header("Authorization", self.credentials.header_value())
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        let resp = check_response(resp, &url).await?;
        unwrap_message(resp, &url).await
    }
}

async fn unwrap_message<T: DeserializeOwned>(resp: reqwest::Response, url: &str) -> Result<T> {
    let body = resp
        .text()
        .await
        .with_context(|| format!("Failed to read response from {}", url))?;
    parse_envelope(&body).with_context(|| format!("Unexpected response from {}", url))
}

fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<T> {
    let envelope: Envelope<T> = serde_json::from_str(body)?;
    Ok(envelope.message)
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        bail!(
            "{} for {}. API key may be invalid -- run 'raven-cli login'.",
            status,
            url
        );
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!(
            "HTTP {} for {}: {}",
            status.as_u16(),
            url,
            server_message(&body)
        );
    }
    Ok(resp)
}

/// Frappe puts the readable error in `exception` or `_server_messages`.
fn server_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.chars().take(200).collect();
    };
    if let Some(exc) = value.get("exception").and_then(|v| v.as_str()) {
        return exc.to_string();
    }
    if let Some(raw) = value.get("_server_messages").and_then(|v| v.as_str()) {
        // A JSON list of JSON-encoded objects with a `message` field.
        let messages: Vec<String> = serde_json::from_str(raw).unwrap_or_default();
        let text: Vec<String> = messages
            .iter()
            .filter_map(|m| serde_json::from_str::<serde_json::Value>(m).ok())
            .filter_map(|m| m.get("message").and_then(|s| s.as_str()).map(String::from))
            .collect();
        if !text.is_empty() {
            return text.join("; ");
        }
    }
    body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_url_trims_slash() {
        let client =
            RavenClient::with_credentials("https://chat.example.com/", ApiCredentials::new("k", "s"));
        assert_eq!(
            client.method_url("frappe.auth.get_logged_user"),
            "https://chat.example.com/api/method/frappe.auth.get_logged_user"
        );
    }

    #[test]
    fn test_parse_envelope() {
        let user: String = parse_envelope(r#"{"message": "jane@example.com"}"#).unwrap();
        assert_eq!(user, "jane@example.com");
        assert!(parse_envelope::<String>(r#"{"exc": "boom"}"#).is_err());
    }

    #[test]
    fn test_server_message_prefers_exception() {
        let body = r#"{"exception": "frappe.exceptions.PermissionError: Not allowed"}"#;
        assert_eq!(
            server_message(body),
            "frappe.exceptions.PermissionError: Not allowed"
        );
    }

    #[test]
    fn test_server_message_decodes_server_messages() {
        let body = r#"{"_server_messages": "[\"{\\\"message\\\": \\\"Channel not found\\\"}\"]"}"#;
        assert_eq!(server_message(body), "Channel not found");
    }

    #[test]
    fn test_server_message_falls_back_to_body() {
        assert_eq!(server_message("Bad Gateway"), "Bad Gateway");
    }
}
