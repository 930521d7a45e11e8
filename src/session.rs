//! Auth token access and the login/logout lifecycle.

use crate::api::client::ApiClient;
use crate::error::{ClientError, Result};
use crate::storage::DeviceStore;
use std::future::Future;
use std::sync::Arc;

/// Where the bearer token comes from. Implementations are queried before every request.
pub trait TokenSource: Send + Sync {
    fn access_token(&self) -> Result<Option<String>>;
}

impl TokenSource for DeviceStore {
    fn access_token(&self) -> Result<Option<String>> {
        Ok(self.tokens()?.map(|t| t.access))
    }
}

/// A fixed token, for scripting and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens(pub Option<String>);

impl TokenSource for StaticTokens {
    fn access_token(&self) -> Result<Option<String>> {
        Ok(self.0.clone())
    }
}

pub struct Session {
    store: Arc<DeviceStore>,
    api: Arc<ApiClient>,
}

impl Session {
    pub fn new(store: Arc<DeviceStore>, api: Arc<ApiClient>) -> Self {
        Self { store, api }
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    pub fn store(&self) -> &Arc<DeviceStore> {
        &self.store
    }

    /// No stored token means guest mode, not an error.
    pub fn is_guest(&self) -> Result<bool> {
        Ok(self.store.tokens()?.is_none())
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        let pair = self.api.login(email.trim(), password).await?;
        self.store.save_tokens(&pair)?;
        log::info!("Logged in as {}", email.trim());
        Ok(())
    }

    pub fn logout(&self) -> Result<()> {
        self.store.clear_tokens()?;
        log::info!("Logged out");
        Ok(())
    }

    /// Runs `op`; on an auth failure refreshes the token pair once and retries.
    /// If the refresh is rejected the stored tokens are cleared and the auth error is returned.
    pub async fn with_auth_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match op().await {
            Err(e) if e.is_auth() => {
                let Some(pair) = self.store.tokens()? else {
                    return Err(e);
                };
                match self.api.refresh(&pair.refresh).await {
                    Ok(fresh) => {
                        self.store.save_tokens(&fresh)?;
                        log::debug!("Access token refreshed");
                        let res = op().await;
                        if matches!(&res, Err(err) if err.is_auth()) {
                            self.store.clear_tokens()?;
                        }
                        res
                    }
                    Err(refresh_err) if refresh_err.is_auth() => {
                        log::warn!("Refresh rejected, clearing stored tokens");
                        self.store.clear_tokens()?;
                        Err(ClientError::Auth("session expired".into()))
                    }
                    Err(refresh_err) => Err(refresh_err),
                }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TokenPair;
    use url::Url;

    fn session() -> Session {
        let store = Arc::new(DeviceStore::open_in_memory().unwrap());
        let api = ApiClient::new(
            Url::parse("http://127.0.0.1:9").unwrap(),
            store.clone(),
            None,
        )
        .unwrap();
        Session::new(store, Arc::new(api))
    }

    #[test]
    fn test_guest_and_logout() {
        let s = session();
        assert!(s.is_guest().unwrap());
        s.store().save_tokens(&TokenPair { access: "a".into(), refresh: "r".into() }).unwrap();
        assert!(!s.is_guest().unwrap());
        assert_eq!(s.store().access_token().unwrap().as_deref(), Some("a"));
        s.logout().unwrap();
        assert!(s.is_guest().unwrap());
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let s = session();
        let v = s.with_auth_retry(|| async { Ok::<_, ClientError>(7) }).await.unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn test_auth_error_without_tokens_is_returned() {
        let s = session();
        let err = s
            .with_auth_retry(|| async { Err::<(), _>(ClientError::Auth("expired".into())) })
            .await
            .unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn test_refresh_transport_failure_keeps_tokens() {
        let s = session();
        s.store().save_tokens(&TokenPair { access: "a".into(), refresh: "r".into() }).unwrap();
        let err = s
            .with_auth_retry(|| async { Err::<(), _>(ClientError::Auth("expired".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Network(_)));
        assert!(!s.is_guest().unwrap());
    }
}
