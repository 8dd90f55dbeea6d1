//! Authentication against a Raven site
//!
//! Uses Frappe API key pairs (generated from the user's settings page on the
//! site). Login verifies the pair by asking the site who it belongs to.

mod credentials;

pub use credentials::{ApiCredentials, CredentialStore};

use anyhow::{bail, Context, Result};

use crate::api::client::RavenClient;
use crate::config::Config;

const LOGGED_USER_METHOD: &str = "frappe.auth.get_logged_user";

/// Frappe's anonymous user.
pub const GUEST_USER: &str = "Guest";

/// Ask the site which user the client authenticates as.
pub async fn logged_user(client: &RavenClient) -> Result<String> {
    let user: String = client
        .call_get(LOGGED_USER_METHOD, &[])
        .await
        .context("Failed to verify credentials")?;
    if user == GUEST_USER {
        bail!("Site accepted the request as Guest -- API key is not valid for any user.");
    }
    Ok(user)
}

/// Verify and store API credentials for a site.
pub async fn login(site: &str, api_key: &str, api_secret: &str) -> Result<()> {
    let site = normalize_site(site)?;
    let credentials = ApiCredentials::new(api_key.trim(), api_secret.trim());
    let client = RavenClient::with_credentials(&site, credentials.clone());

    tracing::info!("Verifying credentials against {}...", site);
    let user = logged_user(&client).await?;

    let mut config = Config::load()?;
    config.site_url = Some(site);
    config.set_credentials(credentials);
    config.current_user = Some(user.clone());
    config.save()?;

    println!("Logged in as {}.", user);
    Ok(())
}

/// Forget stored credentials
pub async fn logout() -> Result<()> {
    let mut config = Config::load()?;
    config.clear_credentials();
    config.save()?;
    println!("Logged out.");
    Ok(())
}

/// Display current auth status
pub async fn status() -> Result<()> {
    let config = Config::load()?;

    match config.site() {
        Some(site) => println!("Site:        {}", site),
        None => println!("Site:        none"),
    }

    let Some(credentials) = config.get_credentials() else {
        println!("Credentials: none");
        println!("\nNot logged in. Run 'raven-cli login'.");
        return Ok(());
    };
    println!("Credentials: api key {}", credentials.api_key);

    match config.current_user.as_deref() {
        Some(user) if user != GUEST_USER => println!("User:        {}", user),
        _ => println!("User:        unknown"),
    }

    let client = RavenClient::from_config(&config)?;
    match logged_user(&client).await {
        Ok(user) => println!("\nLogged in as {}.", user),
        Err(e) => {
            tracing::debug!("Credential check failed: {:#}", e);
            println!("\nStored credentials were rejected: {:#}", e);
        }
    }
    Ok(())
}

/// Accept `chat.example.com` as well as full URLs.
fn normalize_site(site: &str) -> Result<String> {
    let site = site.trim().trim_end_matches('/');
    let with_scheme = if site.starts_with("http://") || site.starts_with("https://") {
        site.to_string()
    } else {
        format!("https://{}", site)
    };
    let parsed = url::Url::parse(&with_scheme).context("Invalid site URL")?;
    if parsed.host_str().is_none() {
        bail!("Site URL has no host: {}", site);
    }
    Ok(with_scheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_site_adds_scheme() {
        assert_eq!(
            normalize_site("chat.example.com/").unwrap(),
            "https://chat.example.com"
        );
        assert_eq!(
            normalize_site("http://localhost:8000").unwrap(),
            "http://localhost:8000"
        );
    }

    #[test]
    fn test_normalize_site_rejects_garbage() {
        assert!(normalize_site("  ").is_err());
    }

    #[test]
    fn test_logged_user_against_unreachable_site() {
        let client =
            RavenClient::with_credentials("http://127.0.0.1:9", ApiCredentials::new("k", "s"));
        let err = tokio_test::block_on(logged_user(&client)).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to verify credentials"));
    }
}
