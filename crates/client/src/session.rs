//! Session factory: turns a session code into connection parameters and
//! re-issues credentials when the hub rejects them.

use async_trait::async_trait;
use realmsync_shared::JoinRealmRequest;

use crate::api_client::ApiClient;
use crate::error::ClientError;
use crate::manager::{RefreshRequest, Session, TokenRefresher};
use crate::storage::{CredentialStore, ProfileStore};
use crate::{log_info, log_warn};

pub const DEFAULT_DISPLAY_NAME: &str = "Adventurer";

#[derive(Debug, Clone)]
pub struct SessionFactory {
    api: ApiClient,
    profiles: ProfileStore,
    credentials: CredentialStore,
}

impl SessionFactory {
    pub fn new(api: ApiClient, profiles: ProfileStore, credentials: CredentialStore) -> Self {
        Self {
            api,
            profiles,
            credentials,
        }
    }

    /// Build a session for `session_code`, reusing a stored credential when
    /// there is one and joining the realm otherwise.
    pub async fn create_session(&self, session_code: &str) -> Result<Session, ClientError> {
        let client_id = self.profiles.client_id()?;
        self.create_session_as(session_code, client_id).await
    }

    /// Like [`create_session`](Self::create_session), but attributes the
    /// credential and the session to `client_id` instead of the stored one.
    pub async fn create_session_as(
        &self,
        session_code: &str,
        client_id: impl Into<String>,
    ) -> Result<Session, ClientError> {
        let client_id = client_id.into();
        let credential = match self.credentials.get(session_code)? {
            Some(credential) => credential,
            None => self.issue(session_code, &client_id).await?,
        };
        Ok(Session::new(session_code, credential, client_id))
    }

    async fn issue(&self, session_code: &str, client_id: &str) -> Result<String, ClientError> {
        let profile = self.profiles.load()?;
        let request = JoinRealmRequest {
            display_name: profile
                .display_name
                .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string()),
            role: profile.role,
            client_id: client_id.to_string(),
        };

        let response = self.api.join_realm(session_code, &request).await?;
        self.credentials.set(session_code, &response.token)?;
        log_info!("issued credential for realm {}", session_code);
        Ok(response.token)
    }
}

#[async_trait]
impl TokenRefresher for SessionFactory {
    /// Drop the rejected credential and join again.
    ///
    /// A refusal from the API (401/403/404) or an identical credential means
    /// nothing new can be issued.
    async fn refresh(&self, request: RefreshRequest) -> Result<Option<String>, ClientError> {
        self.credentials.remove(&request.session_code)?;

        match self.issue(&request.session_code, &request.client_id).await {
            Ok(token) if token == request.current_credential => {
                log_warn!("realm {} re-issued the rejected credential", request.session_code);
                Ok(None)
            }
            Ok(token) => Ok(Some(token)),
            Err(ClientError::Api(err)) if matches!(err.status(), Some(401 | 403 | 404)) => {
                log_warn!(
                    "realm {} refused a new credential: {}",
                    request.session_code,
                    err.user_message()
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
