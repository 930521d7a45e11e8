use crate::api::models::{
    FavoriteRecord, Id, Message, Notification, Property, PropertyDraft, PropertyImage,
    Subscription, SubscriptionPlan, TokenResponse, UserId, UserProfile,
};
use crate::config::AppConfig;
use crate::error::{ClientError, Result};
use crate::realtime::reconciler::SnapshotSource;
use crate::session::TokenSource;
use crate::storage::TokenPair;
use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub struct ApiClient {
    http: HttpClient,
    base: Url,
    tokens: Arc<dyn TokenSource>,
}

impl ApiClient {
    pub fn new(base: Url, tokens: Arc<dyn TokenSource>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = HttpClient::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        Ok(Self {
            http: builder.build()?,
            base: Self::base_api(base)?,
            tokens,
        })
    }

    pub fn from_config(cfg: &AppConfig, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        Self::new(cfg.api_base()?, tokens, cfg.request_timeout())
    }

    fn base_api(base: Url) -> Result<Url> {
        let trimmed = base.as_str().trim_end_matches('/');
        let with_api = if trimmed.ends_with("/api") {
            format!("{}/", trimmed)
        } else {
            format!("{}/api/", trimmed)
        };
        Ok(Url::parse(&with_api)?)
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    /// The token is re-read from storage on every request.
    fn with_auth(&self, req: RequestBuilder) -> Result<RequestBuilder> {
        match self.tokens.access_token()? {
            Some(t) => Ok(req.bearer_auth(t)),
            None => Err(ClientError::Auth("not logged in".into())),
        }
    }

    async fn check(resp: Response) -> Result<Response> {
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ClientError::Auth(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Http { status: status.as_u16(), body });
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T> {
        let resp = Self::check(req.send().await?).await?;
        Ok(resp.json::<T>().await?)
    }

    async fn send_empty(req: RequestBuilder) -> Result<()> {
        Self::check(req.send().await?).await?;
        Ok(())
    }

    async fn get_list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let req = self.with_auth(self.http.get(self.endpoint(path)?))?;
        let json: Value = Self::send_json(req).await?;
        list_payload(json)
    }

    // ---- auth ----

    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair> {
        let req = self
            .http
            .post(self.endpoint("token/")?)
            .json(&json!({ "email": email, "password": password }));
        let resp: TokenResponse = Self::send_json(req).await?;
        let refresh = resp
            .refresh
            .ok_or_else(|| ClientError::Decode("refresh token missing from login response".into()))?;
        Ok(TokenPair { access: resp.access, refresh })
    }

    /// The backend may or may not rotate the refresh token.
    pub async fn refresh(&self, refresh: &str) -> Result<TokenPair> {
        let req = self
            .http
            .post(self.endpoint("token/refresh/")?)
            .json(&json!({ "refresh": refresh }));
        let resp: TokenResponse = Self::send_json(req).await?;
        Ok(TokenPair {
            access: resp.access,
            refresh: resp.refresh.unwrap_or_else(|| refresh.to_string()),
        })
    }

    // ---- properties ----

    pub async fn list_properties(&self, query: Option<&str>) -> Result<Vec<Property>> {
        let mut url = self.endpoint("properties/")?;
        if let Some(q) = query.map(str::trim).filter(|q| !q.is_empty()) {
            url.query_pairs_mut().append_pair("search", q);
        }
        // Listings are public; browse works in guest mode.
        let req = match self.tokens.access_token()? {
            Some(t) => self.http.get(url).bearer_auth(t),
            None => self.http.get(url),
        };
        list_payload(Self::send_json(req).await?)
    }

    pub async fn property(&self, id: &Id) -> Result<Property> {
        let url = self.endpoint(&format!("properties/{}/", id))?;
        let req = match self.tokens.access_token()? {
            Some(t) => self.http.get(url).bearer_auth(t),
            None => self.http.get(url),
        };
        Self::send_json(req).await
    }

    pub async fn create_property(&self, draft: &PropertyDraft) -> Result<Property> {
        if draft.title.trim().is_empty() {
            return Err(ClientError::Validation("Title is required".into()));
        }
        let req = self.with_auth(self.http.post(self.endpoint("properties/")?).json(draft))?;
        Self::send_json(req).await
    }

    pub async fn update_property(&self, id: &Id, patch: &Value) -> Result<Property> {
        let url = self.endpoint(&format!("properties/{}/", id))?;
        let req = self.with_auth(self.http.patch(url).json(patch))?;
        Self::send_json(req).await
    }

    pub async fn delete_property(&self, id: &Id) -> Result<()> {
        let url = self.endpoint(&format!("properties/{}/", id))?;
        Self::send_empty(self.with_auth(self.http.delete(url))?).await
    }

    pub async fn upload_image(&self, property: &Id, bytes: Vec<u8>, filename: &str) -> Result<PropertyImage> {
        if bytes.is_empty() {
            return Err(ClientError::Validation("Image is empty".into()));
        }
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("image", part);
        let url = self.endpoint(&format!("properties/{}/images/", property))?;
        Self::send_json(self.with_auth(self.http.post(url).multipart(form))?).await
    }

    pub async fn delete_image(&self, id: &Id) -> Result<()> {
        let url = self.endpoint(&format!("images/{}/", id))?;
        Self::send_empty(self.with_auth(self.http.delete(url))?).await
    }

    // ---- favorites ----

    pub async fn list_favorites(&self) -> Result<Vec<FavoriteRecord>> {
        self.get_list("favorites/").await
    }

    pub async fn add_favorite(&self, property: &Id) -> Result<FavoriteRecord> {
        let req = self.with_auth(
            self.http
                .post(self.endpoint("favorites/")?)
                .json(&json!({ "property": property })),
        )?;
        Self::send_json(req).await
    }

    pub async fn remove_favorite(&self, record: &Id) -> Result<()> {
        let url = self.endpoint(&format!("favorites/{}/", record))?;
        Self::send_empty(self.with_auth(self.http.delete(url))?).await
    }

    // ---- messages ----

    pub async fn list_messages(&self) -> Result<Vec<Message>> {
        self.get_list("messages/").await
    }

    pub async fn send_message(&self, recipient: &UserId, content: &str, property: Option<&Id>) -> Result<Message> {
        if recipient.as_str().trim().is_empty() {
            return Err(ClientError::Validation("Recipient is required".into()));
        }
        if content.trim().is_empty() {
            return Err(ClientError::Validation("Message cannot be empty".into()));
        }
        let body = json!({ "recipient": recipient, "content": content.trim(), "property": property });
        let req = self.with_auth(self.http.post(self.endpoint("messages/")?).json(&body))?;
        Self::send_json(req).await
    }

    pub async fn mark_message_read(&self, id: &Id) -> Result<()> {
        let url = self.endpoint(&format!("messages/{}/", id))?;
        let req = self.with_auth(self.http.patch(url).json(&json!({ "is_read": true })))?;
        Self::send_empty(req).await
    }

    /// One PATCH per message, run concurrently. Returns how many failed.
    pub async fn mark_messages_read(&self, ids: &[Id]) -> usize {
        let results = join_all(ids.iter().map(|id| self.mark_message_read(id))).await;
        count_failures("message", ids, results)
    }

    // ---- notifications ----

    pub async fn list_notifications(&self) -> Result<Vec<Notification>> {
        self.get_list("notifications/").await
    }

    pub async fn mark_notification_read(&self, id: &Id) -> Result<()> {
        let url = self.endpoint(&format!("notifications/{}/", id))?;
        let req = self.with_auth(self.http.patch(url).json(&json!({ "is_read": true })))?;
        Self::send_empty(req).await
    }

    /// One PATCH per id, issued concurrently. Results line up with `ids`.
    pub async fn mark_all_notifications_read(&self, ids: &[Id]) -> Vec<Result<()>> {
        join_all(ids.iter().map(|id| self.mark_notification_read(id))).await
    }

    // ---- subscriptions ----

    pub async fn plans(&self) -> Result<Vec<SubscriptionPlan>> {
        self.get_list("subscriptions/plans/").await
    }

    pub async fn my_subscription(&self) -> Result<Subscription> {
        let req = self.with_auth(self.http.get(self.endpoint("subscriptions/me/")?))?;
        Self::send_json(req).await
    }

    pub async fn verify_payment(&self, reference: &str, plan: &Id) -> Result<Subscription> {
        let body = json!({ "reference": reference, "plan": plan });
        let req = self.with_auth(self.http.post(self.endpoint("payments/verify/")?).json(&body))?;
        let resp = req.send().await?;
        match Self::check(resp).await {
            Ok(resp) => Ok(resp.json::<Subscription>().await?),
            Err(ClientError::Http { status, body }) => Err(ClientError::Payment {
                message: format!("Payment verification failed (HTTP {}): {}", status, body),
                reference: Some(reference.to_string()),
            }),
            Err(other) => Err(other),
        }
    }

    // ---- profile ----

    pub async fn profile(&self) -> Result<UserProfile> {
        let req = self.with_auth(self.http.get(self.endpoint("users/me/")?))?;
        Self::send_json(req).await
    }

    pub async fn update_profile(&self, patch: &Value) -> Result<UserProfile> {
        let req = self.with_auth(self.http.patch(self.endpoint("users/me/")?).json(patch))?;
        Self::send_json(req).await
    }
}

fn count_failures(kind: &str, ids: &[Id], results: Vec<Result<()>>) -> usize {
    let mut failed = 0;
    for (id, res) in ids.iter().zip(results) {
        if let Err(e) = res {
            log::warn!("Failed to mark {} {} as read: {}", kind, id, e);
            failed += 1;
        }
    }
    failed
}

/// List endpoints return either a bare array or a paginated object.
pub(crate) fn list_payload<T: DeserializeOwned>(json: Value) -> Result<Vec<T>> {
    let items = match json {
        Value::Array(arr) => arr,
        Value::Object(mut obj) => match obj.remove("results").or_else(|| obj.remove("data")) {
            Some(Value::Array(arr)) => arr,
            _ => return Err(ClientError::Decode("expected a list response".into())),
        },
        _ => return Err(ClientError::Decode("expected a list response".into())),
    };
    items
        .into_iter()
        .map(|v| serde_json::from_value(v).map_err(ClientError::from))
        .collect()
}

#[async_trait]
impl SnapshotSource<Message> for ApiClient {
    async fn fetch(&self) -> Result<Vec<Message>> {
        self.list_messages().await
    }
}

#[async_trait]
impl SnapshotSource<Notification> for ApiClient {
    async fn fetch(&self) -> Result<Vec<Notification>> {
        self.list_notifications().await
    }
}

#[async_trait]
impl SnapshotSource<FavoriteRecord> for ApiClient {
    async fn fetch(&self) -> Result<Vec<FavoriteRecord>> {
        self.list_favorites().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StaticTokens;

    fn client(token: Option<&str>) -> ApiClient {
        ApiClient::new(
            Url::parse("http://127.0.0.1:9").unwrap(),
            Arc::new(StaticTokens(token.map(str::to_string))),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_base_api_appends_once() {
        let a = ApiClient::base_api(Url::parse("https://x.test").unwrap()).unwrap();
        let b = ApiClient::base_api(Url::parse("https://x.test/api/").unwrap()).unwrap();
        assert_eq!(a.as_str(), "https://x.test/api/");
        assert_eq!(b.as_str(), "https://x.test/api/");
        assert_eq!(a.join("messages/").unwrap().as_str(), "https://x.test/api/messages/");
    }

    #[test]
    fn test_list_payload_shapes() {
        let bare: Vec<Id> = list_payload(json!([1, 2])).unwrap();
        assert_eq!(bare.len(), 2);
        let paged: Vec<Id> = list_payload(json!({"count": 1, "results": ["a"]})).unwrap();
        assert_eq!(paged, vec![Id::from("a")]);
        assert!(list_payload::<Id>(json!({"detail": "nope"})).is_err());
    }

    #[tokio::test]
    async fn test_guest_requests_fail_before_network() {
        let api = client(None);
        let err = api.list_messages().await.unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn test_validation_before_network() {
        let api = client(Some("t"));
        let err = api.send_message(&Id::from("5"), "   ", None).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        let err = api.create_property(&PropertyDraft::default()).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
    }

    #[tokio::test]
    async fn test_mark_read_counts_failures() {
        // Nothing listens on the discard port, so every PATCH fails.
        let api = client(Some("t"));
        let failed = api.mark_messages_read(&[Id::from("1"), Id::from("2")]).await;
        assert_eq!(failed, 2);
        assert!(api.mark_all_notifications_read(&[]).await.is_empty());
        let results = api.mark_all_notifications_read(&[Id::from("3"), Id::from("4")]).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_err()));
    }
}
