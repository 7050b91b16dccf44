//! Client-side session store
//!
//! Holds the token and user of the current session and mirrors the token
//! into a `TokenStorage` so a restarted client picks the session back up.
//! Claims are read without checking the signature; the server stays the
//! authority and answers 401 to anything it does not accept.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::storage::TokenStorage;
use crate::types::{SessionUser, UserRole};

/// Storage key the session token is persisted under
pub const TOKEN_STORAGE_KEY: &str = "labsite.session.token";

/// Claims carried by a session token
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub id: i64,
    pub email: String,
    pub role: UserRole,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub must_change_password: bool,
    #[serde(default)]
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.exp.saturating_mul(1000) <= now.timestamp_millis()
    }
}

impl From<&SessionClaims> for SessionUser {
    fn from(claims: &SessionClaims) -> Self {
        Self {
            id: claims.id,
            email: claims.email.clone(),
            role: claims.role,
            name: claims.name.clone().unwrap_or_default(),
            must_change_password: claims.must_change_password,
            position: None,
            phone: None,
            image: None,
            orcid: None,
            biography: None,
            expertise: Vec::new(),
            research_interests: Vec::new(),
            education: Vec::new(),
            expiration_date: None,
        }
    }
}

/// Read the claims of `token` without verifying its signature
pub fn decode_claims(token: &str) -> Result<SessionClaims, ClientError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<SessionClaims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}

struct Session {
    token: String,
    claims: SessionClaims,
    user: SessionUser,
}

/// Session state of one client
///
/// Created with [`SessionStore::mount`] and torn down with
/// [`SessionStore::unmount`], which hands the storage back.
pub struct SessionStore<S: TokenStorage> {
    storage: S,
    session: Option<Session>,
}

impl<S: TokenStorage> SessionStore<S> {
    /// Restore the persisted session, if it is still usable
    pub fn mount(storage: S) -> Self {
        Self::mount_at(storage, Utc::now())
    }

    /// Like [`SessionStore::mount`], with an explicit clock reading
    pub fn mount_at(storage: S, now: DateTime<Utc>) -> Self {
        let mut store = Self {
            storage,
            session: None,
        };

        let Some(token) = store.storage.get(TOKEN_STORAGE_KEY) else {
            return store;
        };

        match decode_claims(&token) {
            Ok(claims) if claims.is_expired(now) => {
                info!("Stored session for {} has expired", claims.email);
                store.forget_token();
            }
            Ok(claims) => {
                debug!("Restored session for {}", claims.email);
                let user = SessionUser::from(&claims);
                store.session = Some(Session {
                    token,
                    claims,
                    user,
                });
            }
            Err(e) => {
                warn!("Discarding unreadable stored token: {}", e);
                store.forget_token();
            }
        }

        store
    }

    /// Tear the store down and return its storage
    pub fn unmount(self) -> S {
        self.storage
    }

    /// Start a session from a server-issued token and user
    ///
    /// Identity and expiry come from the token; the password flag and
    /// profile come from `user`, which reflects the server's current record.
    pub fn login(&mut self, token: String, user: SessionUser) -> Result<(), ClientError> {
        let claims = decode_claims(&token)?;
        self.storage.set(TOKEN_STORAGE_KEY, &token)?;
        info!("Signed in as {} ({})", claims.email, claims.role);
        self.session = Some(Session {
            token,
            claims,
            user,
        });
        Ok(())
    }

    /// End the session and forget the persisted token
    pub fn logout(&mut self) {
        if let Some(session) = self.session.take() {
            info!("Signed out {}", session.claims.email);
        }
        self.forget_token();
    }

    /// Replace the cached user after a profile refresh
    pub fn update_user(&mut self, user: SessionUser) {
        if let Some(session) = self.session.as_mut() {
            session.user = user;
        }
    }

    /// Milliseconds until the token expires, never negative
    pub fn session_time_remaining_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        self.session.as_ref().map(|s| {
            s.claims
                .exp
                .saturating_mul(1000)
                .saturating_sub(now.timestamp_millis())
                .max(0)
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn user_role(&self) -> Option<UserRole> {
        self.session.as_ref().map(|s| s.claims.role)
    }

    pub fn user_id(&self) -> Option<i64> {
        self.session.as_ref().map(|s| s.claims.id)
    }

    pub fn user_name(&self) -> Option<&str> {
        self.session
            .as_ref()
            .map(|s| s.user.name.as_str())
            .filter(|n| !n.is_empty())
    }

    pub fn must_change_password(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.user.must_change_password)
    }

    pub fn user(&self) -> Option<&SessionUser> {
        self.session.as_ref().map(|s| &s.user)
    }

    pub fn token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.token.as_str())
    }

    fn forget_token(&mut self) {
        if let Err(e) = self.storage.remove(TOKEN_STORAGE_KEY) {
            warn!("Could not remove stored token: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn token(role: &str, must_change: bool, exp: DateTime<Utc>) -> String {
        let claims = serde_json::json!({
            "id": 7,
            "email": "a@x.com",
            "role": role,
            "name": "Ada",
            "mustChangePassword": must_change,
            "iat": Utc::now().timestamp(),
            "exp": exp.timestamp(),
        });
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"server-side-secret"),
        )
        .unwrap()
    }

    fn user(must_change: bool) -> SessionUser {
        SessionUser {
            id: 7,
            email: "a@x.com".into(),
            role: UserRole::Member,
            name: "Ada Lovelace".into(),
            must_change_password: must_change,
            position: Some("Postdoc".into()),
            phone: None,
            image: None,
            orcid: None,
            biography: None,
            expertise: vec![],
            research_interests: vec![],
            education: vec![],
            expiration_date: None,
        }
    }

    #[test]
    fn test_mount_without_token() {
        let store = SessionStore::mount(MemoryStorage::new());
        assert!(!store.is_authenticated());
        assert_eq!(store.user_role(), None);
        assert_eq!(store.session_time_remaining_ms(Utc::now()), None);
    }

    #[test]
    fn test_mount_restores_live_session() {
        let mut storage = MemoryStorage::new();
        let t = token("admin", true, Utc::now() + Duration::hours(1));
        storage.set(TOKEN_STORAGE_KEY, &t).unwrap();

        let store = SessionStore::mount(storage);
        assert!(store.is_authenticated());
        assert_eq!(store.user_role(), Some(UserRole::Admin));
        assert_eq!(store.user_id(), Some(7));
        assert_eq!(store.user_name(), Some("Ada"));
        assert!(store.must_change_password());
        assert_eq!(store.token(), Some(t.as_str()));
    }

    #[test]
    fn test_mount_clears_expired_token() {
        let mut storage = MemoryStorage::new();
        let t = token("member", false, Utc::now() - Duration::seconds(1));
        storage.set(TOKEN_STORAGE_KEY, &t).unwrap();

        let store = SessionStore::mount(storage);
        assert!(!store.is_authenticated());
        assert_eq!(store.unmount().get(TOKEN_STORAGE_KEY), None);
    }

    #[test]
    fn test_mount_clears_garbage_token() {
        let mut storage = MemoryStorage::new();
        storage.set(TOKEN_STORAGE_KEY, "not-a-jwt").unwrap();

        let store = SessionStore::mount(storage);
        assert!(!store.is_authenticated());
        assert_eq!(store.unmount().get(TOKEN_STORAGE_KEY), None);
    }

    #[test]
    fn test_login_takes_flag_from_user_and_role_from_token() {
        let mut store = SessionStore::mount(MemoryStorage::new());
        // Token still says the password must change; the server record says otherwise
        let t = token("admin", true, Utc::now() + Duration::hours(1));
        store.login(t.clone(), user(false)).unwrap();

        assert!(store.is_authenticated());
        assert!(!store.must_change_password());
        assert_eq!(store.user_role(), Some(UserRole::Admin));
        assert_eq!(store.user_name(), Some("Ada Lovelace"));
        assert_eq!(store.user().unwrap().position.as_deref(), Some("Postdoc"));
        assert_eq!(store.unmount().get(TOKEN_STORAGE_KEY), Some(t));
    }

    #[test]
    fn test_login_rejects_malformed_token() {
        let mut store = SessionStore::mount(MemoryStorage::new());
        assert!(matches!(
            store.login("garbage".into(), user(false)),
            Err(ClientError::InvalidToken(_))
        ));
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_logout_clears_everything() {
        let mut store = SessionStore::mount(MemoryStorage::new());
        store
            .login(token("member", false, Utc::now() + Duration::hours(1)), user(false))
            .unwrap();
        store.logout();

        assert!(!store.is_authenticated());
        assert_eq!(store.user(), None);
        assert_eq!(store.token(), None);
        assert_eq!(store.unmount().get(TOKEN_STORAGE_KEY), None);
    }

    #[test]
    fn test_session_time_remaining() {
        let now = Utc::now();
        let exp = now + Duration::minutes(10);
        let mut store = SessionStore::mount(MemoryStorage::new());
        store.login(token("member", false, exp), user(false)).unwrap();

        let remaining = store.session_time_remaining_ms(now).unwrap();
        let expected = exp.timestamp() * 1000 - now.timestamp_millis();
        assert_eq!(remaining, expected);
        assert_eq!(store.session_time_remaining_ms(now + Duration::hours(1)), Some(0));
    }
}
