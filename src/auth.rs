//! Bearer-credential authentication against an external identity provider.
//!
//! The server never mints or validates credentials itself. A request's
//! `Authorization: Bearer <token>` header is exchanged with the configured
//! identity provider for an [AuthenticatedUser], which is then attached to the
//! request as an extension for route handlers to consume.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    extract::{FromRef, Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::{AppState, Error};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// The identity returned by the identity provider for a valid credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    /// The provider-assigned user ID. Transactions are owned by this value.
    pub id: String,
    /// The user's email address.
    pub email: String,
    /// The user's display name.
    pub name: String,
    /// A URL to the user's avatar image.
    #[serde(alias = "picture")]
    pub picture_url: Option<String>,
}

/// A collaborator that exchanges a bearer credential for a user identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify `token` and return the identity it belongs to.
    ///
    /// # Errors
    /// Returns [Error::AuthenticationInvalid] when the provider rejects the
    /// credential, or [Error::IdentityProviderError] when the provider cannot
    /// be reached or answers with something unexpected.
    async fn verify(&self, token: &str) -> Result<AuthenticatedUser, Error>;
}

/// An [IdentityProvider] backed by an OAuth userinfo-style HTTP endpoint.
///
/// The endpoint is expected to answer a `GET` with the bearer token attached
/// by returning the identity JSON on success and 401/403 for a bad token.
#[derive(Debug, Clone)]
pub struct HttpIdentityProvider {
    http: reqwest::Client,
    userinfo_url: String,
}

impl HttpIdentityProvider {
    /// Create a provider that queries `userinfo_url` for each credential.
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(userinfo_url: &str) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|error| Error::IdentityProviderError(error.to_string()))?;

        Ok(Self {
            http,
            userinfo_url: userinfo_url.to_owned(),
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn verify(&self, token: &str) -> Result<AuthenticatedUser, Error> {
        let response = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|error| Error::IdentityProviderError(error.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::AuthenticationInvalid);
        }

        if !status.is_success() {
            return Err(Error::IdentityProviderError(format!(
                "unexpected status {status} from {}",
                self.userinfo_url
            )));
        }

        response
            .json::<AuthenticatedUser>()
            .await
            .map_err(|error| Error::IdentityProviderError(error.to_string()))
    }
}

/// The state needed for the auth middleware.
#[derive(Clone)]
pub struct AuthState {
    /// The collaborator that verifies bearer credentials.
    pub identity_provider: Arc<dyn IdentityProvider>,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            identity_provider: state.identity_provider.clone(),
        }
    }
}

/// Middleware function that checks for a valid bearer credential.
///
/// A missing header rejects the request with 401 before any collaborator is
/// contacted. An invalid scheme or a credential the identity provider rejects
/// produces 403. On success the resolved [AuthenticatedUser] is placed into
/// the request.
///
/// **Note**: Route handlers can use the function argument
/// `Extension(user): Extension<AuthenticatedUser>` to receive the identity.
pub async fn auth_guard(State(state): State<AuthState>, request: Request, next: Next) -> Response {
    let token = match bearer_token(&request) {
        Ok(token) => token,
        Err(error) => return error.into_response(),
    };

    let user = match state.identity_provider.verify(token).await {
        Ok(user) => user,
        Err(error) => return error.into_response(),
    };

    let (mut parts, body) = request.into_parts();
    parts.extensions.insert(user);

    next.run(Request::from_parts(parts, body)).await
}

/// Extract the bearer token from the `Authorization` header of `request`.
fn bearer_token(request: &Request) -> Result<&str, Error> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or(Error::AuthenticationMissing)?;

    let value = header.to_str().map_err(|_| Error::AuthenticationInvalid)?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or(Error::AuthenticationInvalid)?
        .trim();

    if token.is_empty() {
        return Err(Error::AuthenticationMissing);
    }

    Ok(token)
}

/// An [IdentityProvider] with a fixed token-to-identity table, for tests.
#[cfg(test)]
pub(crate) struct StubIdentityProvider {
    users: Vec<(String, AuthenticatedUser)>,
}

#[cfg(test)]
impl StubIdentityProvider {
    pub(crate) fn new(users: &[(&str, &str)]) -> Self {
        let users = users
            .iter()
            .map(|(token, user_id)| {
                (
                    token.to_string(),
                    AuthenticatedUser {
                        id: user_id.to_string(),
                        email: format!("{user_id}@example.com"),
                        name: user_id.to_string(),
                        picture_url: None,
                    },
                )
            })
            .collect();

        Self { users }
    }
}

#[cfg(test)]
#[async_trait]
impl IdentityProvider for StubIdentityProvider {
    async fn verify(&self, token: &str) -> Result<AuthenticatedUser, Error> {
        self.users
            .iter()
            .find(|(valid_token, _)| valid_token == token)
            .map(|(_, user)| user.clone())
            .ok_or(Error::AuthenticationInvalid)
    }
}
