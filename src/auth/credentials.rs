//! API key credentials and their storage

use serde::{Deserialize, Serialize};

/// API key pair issued by the site for one user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl ApiCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Value for the `Authorization` header.
    pub fn header_value(&self) -> String {
        format!("token {}:{}", self.api_key, self.api_secret)
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Credential store trait for different storage backends
pub trait CredentialStore {
    fn get_credentials(&self) -> Option<ApiCredentials>;
    fn set_credentials(&mut self, credentials: ApiCredentials);
    fn clear_credentials(&mut self);
}
