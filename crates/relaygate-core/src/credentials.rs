//! Credential lookup.
//!
//! The executor asks a [`CredentialProvider`] for a backend's credential
//! immediately before each call and passes it through opaquely. Storage
//! and refresh are the provider's business.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use relaygate_types::Credential;

use crate::error::BackendError;

/// Errors raised while fetching a credential.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Nothing is configured for this backend.
    #[error("no credential configured for backend {0}")]
    Missing(String),

    /// The provider failed (vault unreachable, token refresh failed, ...).
    #[error("credential provider failed for {backend}: {message}")]
    Provider { backend: String, message: String },
}

impl From<CredentialError> for BackendError {
    /// Credential failures count against the backend so routing moves away
    /// from it; they are retryable because another backend may be fine.
    fn from(err: CredentialError) -> Self {
        BackendError::retryable("credential_unavailable", format!("auth: {err}"))
    }
}

/// Source of per-backend credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetch the credential for `backend_id`.
    async fn get_credential(&self, backend_id: &str) -> Result<Credential, CredentialError>;
}

/// A fixed map of backend id to credential.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    credentials: HashMap<String, Credential>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a credential (builder pattern).
    pub fn with(mut self, backend_id: impl Into<String>, credential: impl Into<Credential>) -> Self {
        self.credentials.insert(backend_id.into(), credential.into());
        self
    }

    /// Load credentials from environment variables.
    ///
    /// Each `(backend_id, env_var)` pair whose variable is set and non-empty
    /// is added; the rest are skipped.
    pub fn from_env<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut credentials = HashMap::new();
        for (backend_id, var) in pairs {
            if let Ok(value) = std::env::var(var)
                && !value.is_empty()
            {
                credentials.insert(backend_id.to_string(), Credential::new(value));
            }
        }
        Self { credentials }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn get_credential(&self, backend_id: &str) -> Result<Credential, CredentialError> {
        self.credentials
            .get(backend_id)
            .cloned()
            .ok_or_else(|| CredentialError::Missing(backend_id.to_string()))
    }
}
