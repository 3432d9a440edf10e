//! HTTP API client for the realm service.

use realmsync_shared::{ApiError, JoinRealmRequest, JoinRealmResponse, HEADER_CLIENT_ID};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::log_debug;

/// JSON client for one-shot calls against the realm API
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    client_id: Option<String>,
}

impl ApiClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            client_id: None,
        }
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Send `X-Client-Id` with every request
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let mut rb = self.client.get(self.url(path));
        if let Some(client_id) = &self.client_id {
            rb = rb.header(HEADER_CLIENT_ID, client_id);
        }
        Self::finish(rb).await
    }

    /// POST a JSON body and decode the JSON reply
    pub async fn post_json<TReq: Serialize + ?Sized, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let mut rb = self.client.post(self.url(path)).json(body);
        if let Some(client_id) = &self.client_id {
            rb = rb.header(HEADER_CLIENT_ID, client_id);
        }
        Self::finish(rb).await
    }

    async fn finish<TRes: DeserializeOwned>(rb: reqwest::RequestBuilder) -> Result<TRes, ApiError> {
        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();

        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }

    /// Join a realm and receive a hub credential for it
    pub async fn join_realm(
        &self,
        session_code: &str,
        request: &JoinRealmRequest,
    ) -> Result<JoinRealmResponse, ApiError> {
        log_debug!("requesting credential for realm {}", session_code);
        self.post_json(&join_path(session_code), request).await
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

fn join_path(session_code: &str) -> String {
    format!("/api/realms/{}/join", urlencoding::encode(session_code))
}
