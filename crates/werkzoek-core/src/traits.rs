use std::future::Future;
use std::sync::{Arc, RwLock};

use crate::error::{ApiError, CredentialError};
use crate::models::{VacancySearchParams, VacancySearchResponse};
use crate::request::{PreparedRequest, RawResponse};

/// Executes one prepared HTTP request.
///
/// Implementations map their own failures to [`ApiError::Transport`] and
/// return non-2xx responses as-is; the gateway does status and body
/// classification.
pub trait Transport: Send + Sync + Clone + 'static {
    fn execute(
        &self,
        request: &PreparedRequest,
    ) -> impl Future<Output = Result<RawResponse, ApiError>> + Send;
}

/// Secure, at-rest storage for the API bearer token.
///
/// The gateway only ever calls [`get`](Self::get); `set` and `delete` are for
/// sign-in and sign-out flows.
pub trait CredentialStore: Send + Sync + Clone + 'static {
    fn get(&self) -> impl Future<Output = Result<Option<String>, CredentialError>> + Send;

    fn set(&self, value: &str) -> impl Future<Output = Result<(), CredentialError>> + Send;

    fn delete(&self) -> impl Future<Output = Result<(), CredentialError>> + Send;
}

/// Source of vacancy search pages, consumed by the infinite-scroll controller.
pub trait VacancySearch: Send + Sync + Clone + 'static {
    fn search(
        &self,
        params: &VacancySearchParams,
    ) -> impl Future<Output = Result<VacancySearchResponse, ApiError>> + Send;

    /// Drop any cached response for `params` so the next search hits the server.
    fn evict(&self, params: &VacancySearchParams) -> impl Future<Output = ()> + Send {
        let _ = params;
        async {}
    }
}

/// In-process credential store.
///
/// Used by the CLI, which is handed its key through the environment, and by
/// tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    token: Arc<RwLock<Option<String>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(Some(token.into()))),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    async fn get(&self) -> Result<Option<String>, CredentialError> {
        self.token
            .read()
            .map(|t| t.clone())
            .map_err(|_| CredentialError("credential lock poisoned".into()))
    }

    async fn set(&self, value: &str) -> Result<(), CredentialError> {
        let mut token = self
            .token
            .write()
            .map_err(|_| CredentialError("credential lock poisoned".into()))?;
        *token = Some(value.to_string());
        Ok(())
    }

    async fn delete(&self) -> Result<(), CredentialError> {
        let mut token = self
            .token
            .write()
            .map_err(|_| CredentialError("credential lock poisoned".into()))?;
        *token = None;
        Ok(())
    }
}
