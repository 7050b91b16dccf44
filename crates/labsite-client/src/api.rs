//! Labsite API client

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::generation::RequestGenerations;
use crate::session::SessionStore;
use crate::storage::TokenStorage;
use crate::types::{
    AuthPayload, ErrorPayload, MessagePayload, ProfileChanges, SessionUser, UsersExistPayload,
};

/// HTTP client for the account API
///
/// Calls that start a session store the returned token in the wrapped
/// `SessionStore`; authenticated calls attach it as a bearer token. A 401
/// on an authenticated call ends the local session.
pub struct ApiClient<S: TokenStorage> {
    client: Client,
    base_url: String,
    session: Mutex<SessionStore<S>>,
    generations: RequestGenerations,
}

impl<S: TokenStorage> ApiClient<S> {
    /// Create a new client for the server at `base_url`
    pub fn new(base_url: &str, session: SessionStore<S>) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        info!("Created labsite client for {}", base_url);

        Ok(Self {
            client,
            base_url,
            session: Mutex::new(session),
            generations: RequestGenerations::new(),
        })
    }

    /// Current session state
    pub fn session(&self) -> MutexGuard<'_, SessionStore<S>> {
        self.session.lock()
    }

    /// Tear the client down and return its session store
    pub fn into_session(self) -> SessionStore<S> {
        self.session.into_inner()
    }

    /// End the local session
    pub fn logout(&self) {
        self.session.lock().logout();
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `path` with `segment` appended as one percent-encoded path segment
    fn url_with_segment(&self, path: &str, segment: &str) -> Result<Url, ClientError> {
        let mut url =
            Url::parse(&self.url(path)).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.clone()))?
            .push(segment);
        Ok(url)
    }

    /// Send a request that needs no session
    async fn public<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = request.send().await?;
        Self::decode(response).await
    }

    /// Send a request carrying the session token
    async fn authenticated<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let token = {
            let mut session = self.session.lock();
            if session.session_time_remaining_ms(Utc::now()) == Some(0) {
                session.logout();
                return Err(ClientError::SessionExpired);
            }
            session
                .token()
                .map(str::to_string)
                .ok_or(ClientError::NotAuthenticated)?
        };

        let mut request = self.client.request(method, self.url(path)).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("Server rejected the session token for {}", path);
            self.session.lock().logout();
            return Err(ClientError::SessionExpired);
        }
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let (code, message) = match response.json::<ErrorPayload>().await {
            Ok(body) => (body.code, body.message),
            Err(_) => (
                "UNKNOWN".to_string(),
                status.canonical_reason().unwrap_or("Request failed").to_string(),
            ),
        };
        debug!("Request failed with {}: {}", status, code);
        Err(ClientError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }

    /// Store the session a server call handed out
    fn start_session(&self, payload: AuthPayload) -> Result<SessionUser, ClientError> {
        if let Some(message) = &payload.message {
            debug!("{}", message);
        }
        self.session
            .lock()
            .login(payload.token, payload.user.clone())?;
        Ok(payload.user)
    }

    // ==================== Session Calls ====================

    /// POST /api/auth/login
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionUser, ClientError> {
        let request = self
            .client
            .post(self.url("/api/auth/login"))
            .json(&json!({ "email": email, "password": password }));
        let payload = self
            .generations
            .run("session", self.public::<AuthPayload>(request))
            .await?;
        self.start_session(payload)
    }

    /// POST /api/auth/register
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<SessionUser, ClientError> {
        let request = self
            .client
            .post(self.url("/api/auth/register"))
            .json(&json!({ "email": email, "password": password, "name": name }));
        let payload = self
            .generations
            .run("session", self.public::<AuthPayload>(request))
            .await?;
        self.start_session(payload)
    }

    /// POST /api/auth/initial-signup
    pub async fn initial_signup(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<SessionUser, ClientError> {
        let request = self
            .client
            .post(self.url("/api/auth/initial-signup"))
            .json(&json!({ "email": email, "password": password, "name": name }));
        let payload = self
            .generations
            .run("session", self.public::<AuthPayload>(request))
            .await?;
        self.start_session(payload)
    }

    /// GET /api/auth/check-users-exist
    pub async fn check_users_exist(&self) -> Result<bool, ClientError> {
        let request = self.client.get(self.url("/api/auth/check-users-exist"));
        let payload: UsersExistPayload = self.public(request).await?;
        Ok(payload.users_exist)
    }

    /// POST /api/auth/forgot-password
    ///
    /// Returns the server's message, which is the same whether or not the
    /// account exists.
    pub async fn forgot_password(&self, email: &str) -> Result<String, ClientError> {
        let request = self
            .client
            .post(self.url("/api/auth/forgot-password"))
            .json(&json!({ "email": email }));
        let payload: MessagePayload = self.public(request).await?;
        Ok(payload.message)
    }

    /// POST /api/auth/reset-password/{token}; signs in on success
    pub async fn reset_password(
        &self,
        token: &str,
        password: &str,
    ) -> Result<SessionUser, ClientError> {
        let url = self.url_with_segment("/api/auth/reset-password", token.trim())?;
        let request = self.client.post(url).json(&json!({ "password": password }));
        let payload = self
            .generations
            .run("session", self.public::<AuthPayload>(request))
            .await?;
        self.start_session(payload)
    }

    // ==================== Authenticated Calls ====================

    /// GET /api/auth/me; refreshes the cached user
    pub async fn me(&self) -> Result<SessionUser, ClientError> {
        let user: SessionUser = self
            .generations
            .run(
                "me",
                self.authenticated(Method::GET, "/api/auth/me", None::<&()>),
            )
            .await?;
        self.session.lock().update_user(user.clone());
        Ok(user)
    }

    /// PUT /api/auth/change-password
    pub async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> Result<SessionUser, ClientError> {
        let body = json!({ "currentPassword": current_password, "newPassword": new_password });
        let payload: AuthPayload = self
            .authenticated(Method::PUT, "/api/auth/change-password", Some(&body))
            .await?;
        self.start_session(payload)
    }

    /// PUT /api/auth/initial-password-setup
    ///
    /// `None` keeps the current password.
    pub async fn initial_password_setup(
        &self,
        new_password: Option<&str>,
    ) -> Result<SessionUser, ClientError> {
        let body = match new_password {
            Some(password) => json!({ "newPassword": password }),
            None => json!({ "keepCurrent": true }),
        };
        let payload: AuthPayload = self
            .authenticated(Method::PUT, "/api/auth/initial-password-setup", Some(&body))
            .await?;
        self.start_session(payload)
    }

    /// PUT /api/users/me/profile
    pub async fn update_profile(
        &self,
        changes: &ProfileChanges,
    ) -> Result<SessionUser, ClientError> {
        let user: SessionUser = self
            .authenticated(Method::PUT, "/api/users/me/profile", Some(changes))
            .await?;
        self.session.lock().update_user(user.clone());
        Ok(user)
    }
}
