//! Client identity.
//!
//! The engine never logs anyone in. It asks a [`SessionProvider`] for the
//! current client's e-mail and treats its absence as a precondition failure.

use async_trait::async_trait;
use secrecy::SecretString;
use tidecart_core::{Email, EmailError};

use crate::config::SyncConfig;

/// Supplies the logged-in client.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// E-mail of the current client, or `None` when nobody is logged in.
    async fn client_email(&self) -> Option<Email>;

    /// Bearer token for the cart server, when the session carries one.
    async fn bearer_token(&self) -> Option<SecretString> {
        None
    }
}

/// A session fixed at construction time.
#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    email: Option<Email>,
    token: Option<SecretString>,
}

impl StaticSession {
    #[must_use]
    pub const fn new(email: Option<Email>, token: Option<SecretString>) -> Self {
        Self { email, token }
    }

    /// Nobody logged in.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self {
            email: None,
            token: None,
        }
    }

    /// Session from a stored e-mail string. Surrounding whitespace is
    /// dropped; a blank value means nobody is logged in.
    ///
    /// # Errors
    ///
    /// Returns `EmailError` if a non-blank value is not a valid e-mail.
    pub fn from_stored(raw: Option<&str>, token: Option<SecretString>) -> Result<Self, EmailError> {
        let email = match raw.map(str::trim).filter(|s| !s.is_empty()) {
            Some(value) => Some(Email::parse(value)?),
            None => None,
        };
        Ok(Self { email, token })
    }

    /// Session from the configured client e-mail and API token.
    ///
    /// # Errors
    ///
    /// Returns `EmailError` if the configured e-mail is invalid.
    pub fn from_config(config: &SyncConfig) -> Result<Self, EmailError> {
        Self::from_stored(config.client_email.as_deref(), config.api_token.clone())
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    async fn client_email(&self) -> Option<Email> {
        self.email.clone()
    }

    async fn bearer_token(&self) -> Option<SecretString> {
        self.token.clone()
    }
}
