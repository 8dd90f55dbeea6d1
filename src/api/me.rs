//! Current user profile

use anyhow::Result;
use serde::Deserialize;
use serde_json::json;

use super::client::RavenClient;
use crate::auth;

#[derive(Debug, Deserialize)]
struct UserProfile {
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_image: Option<String>,
}

/// Fetch and display the user the stored credentials belong to.
pub async fn whoami() -> Result<()> {
    let client = RavenClient::new()?;
    let user = auth::logged_user(&client).await?;

    let fields = json!(["full_name", "email", "user_image"]).to_string();
    let profile: Option<UserProfile> = match client
        .call_get(
            "frappe.client.get_value",
            &[
                ("doctype", "User".to_string()),
                ("filters", user.clone()),
                ("fieldname", fields),
            ],
        )
        .await
    {
        Ok(profile) => profile,
        Err(e) => {
            tracing::debug!("Profile lookup failed: {:#}", e);
            None
        }
    };

    println!();
    println!("Site:         {}", client.site());
    println!("User:         {}", user);
    if let Some(profile) = profile {
        println!(
            "Full Name:    {}",
            profile.full_name.as_deref().unwrap_or("(none)")
        );
        println!("Email:        {}", profile.email.as_deref().unwrap_or("(none)"));
        if let Some(image) = profile.user_image {
            println!("Image:        {}", image);
        }
    }

    Ok(())
}
