//! Account auth against the pet-care API.
//!
//! The server issues a bearer token on register and login. There is no
//! refresh endpoint: an expired token surfaces as a 401 during sync and the
//! user signs in again.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::normalize_api_base_url;
use crate::sync::parse_api_error;

/// Minimum password length accepted by the server.
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user: AuthUser,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("token", &"[REDACTED]")
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid auth configuration: {0}")]
    InvalidConfiguration(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Auth API error: {0}")]
    Api(String),
    #[error("Secure storage error: {0}")]
    SecureStorage(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

pub trait SessionPersistence: Clone + Send + Sync + 'static {
    fn load_session(&self) -> AuthResult<Option<AuthSession>>;
    fn save_session(&self, session: &AuthSession) -> AuthResult<()>;
    fn clear_session(&self) -> AuthResult<()>;
}

#[derive(Clone)]
pub struct AuthClient<S: SessionPersistence> {
    base_url: String,
    client: Client,
    store: S,
}

impl<S: SessionPersistence> AuthClient<S> {
    pub fn new(base_url: impl AsRef<str>, store: S) -> AuthResult<Self> {
        let base_url =
            normalize_api_base_url(base_url.as_ref()).map_err(AuthError::InvalidConfiguration)?;
        Ok(Self {
            base_url,
            client: Client::builder().build()?,
            store,
        })
    }

    /// The persisted session, if any.
    ///
    /// Tokens are opaque to the client, so a stored session is returned as is;
    /// the server decides whether it is still valid.
    pub fn restore_session(&self) -> AuthResult<Option<AuthSession>> {
        self.store.load_session()
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> AuthResult<AuthSession> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AuthError::InvalidInput("Name is required".to_string()));
        }
        let email = validate_email(email)?;
        validate_password(password)?;

        let payload = serde_json::json!({
            "name": name,
            "email": email,
            "password": password,
        });
        let request = self
            .client
            .post(format!("{}/api/auth/register", self.base_url))
            .json(&payload);
        let session = self.send_auth_request(request).await?;

        self.store.save_session(&session)?;
        Ok(session)
    }

    pub async fn login(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        let email = validate_email(email)?;
        if password.is_empty() {
            return Err(AuthError::InvalidInput("Password is required".to_string()));
        }

        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });
        let request = self
            .client
            .post(format!("{}/api/auth/login", self.base_url))
            .json(&payload);
        let session = self.send_auth_request(request).await?;

        self.store.save_session(&session)?;
        Ok(session)
    }

    /// Forget the local session. The server keeps no session state to revoke.
    pub fn logout(&self) -> AuthResult<()> {
        self.store.clear_session()
    }

    async fn send_auth_request(&self, request: RequestBuilder) -> AuthResult<AuthSession> {
        let response = request.header("Accept", "application/json").send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(parse_api_error(status, &body)));
        }
        response.json::<AuthResponse>().await?.try_into()
    }
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[\w.+-]+@([\w-]+\.)+[\w-]{2,}$").expect("email pattern is valid")
    })
}

/// Trim and check the basic `local@domain.tld` shape.
pub fn validate_email(email: &str) -> AuthResult<String> {
    let email = email.trim();
    if email.is_empty() {
        return Err(AuthError::InvalidInput("Email is required".to_string()));
    }
    if !email_pattern().is_match(email) {
        return Err(AuthError::InvalidInput(format!(
            "'{email}' is not a valid email address"
        )));
    }
    Ok(email.to_ascii_lowercase())
}

pub fn validate_password(password: &str) -> AuthResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::InvalidInput(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: Option<String>,
    user: Option<AuthResponseUser>,
}

#[derive(Debug, Deserialize)]
struct AuthResponseUser {
    #[serde(alias = "_id")]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
}

impl TryFrom<AuthResponse> for AuthSession {
    type Error = AuthError;

    fn try_from(value: AuthResponse) -> AuthResult<Self> {
        let token = value
            .token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AuthError::Api("Auth response did not include a token".to_string()))?;
        let user = value
            .user
            .ok_or_else(|| AuthError::Api("Auth response did not include a user".to_string()))?;

        Ok(Self {
            token,
            user: AuthUser {
                id: user.id,
                name: user.name,
                email: user.email,
            },
        })
    }
}
