// Caller identity: who is using the client, for ownership checks and display alignment

use log::info;
use reqwest::Client;
use std::sync::RwLock;

use super::api::{read_envelope, with_bearer};
use crate::config::ChatConfig;
use crate::error::{ChatError, ChatResult};
use crate::models::User;

pub trait IdentityProvider: Send + Sync {
    /// Identifier of the signed-in user, if any.
    fn current_user_id(&self) -> Option<String>;
}

/// Identity fixed at construction, replaceable on login/logout.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    user_id: RwLock<Option<String>>,
}

impl StaticIdentity {
    pub fn new(user_id: Option<String>) -> Self {
        Self { user_id: RwLock::new(user_id) }
    }

    pub fn signed_in(user_id: &str) -> Self {
        Self::new(Some(user_id.to_string()))
    }

    pub fn anonymous() -> Self {
        Self::new(None)
    }

    pub fn set(&self, user_id: Option<String>) {
        match self.user_id.write() {
            Ok(mut guard) => *guard = user_id,
            Err(poisoned) => *poisoned.into_inner() = user_id,
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<String> {
        match self.user_id.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl From<&User> for StaticIdentity {
    fn from(user: &User) -> Self {
        Self::new(user.user_id.clone())
    }
}

/// Resolve the signed-in user with `GET /api/v1/user/me` on the auth service.
pub async fn fetch_current_user(config: &ChatConfig) -> ChatResult<User> {
    let token = config
        .access_token
        .as_deref()
        .ok_or_else(|| ChatError::Auth("no access token configured".to_string()))?;

    let client = Client::builder().timeout(config.request_timeout()).build()?;
    let url = format!("{}/api/v1/user/me", config.auth_base());
    let response = with_bearer(client.get(&url), Some(token)).send().await?;
    let user: User = read_envelope(response).await?;

    if user.user_id.is_none() {
        return Err(ChatError::Auth(format!("account {} has no user id", user.email)));
    }
    info!("Signed in as {} ({:?})", user.email, user.role);
    Ok(user)
}
