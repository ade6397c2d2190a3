//! Firebase Authentication over REST (email + password).
//!
//! Sign-out is local: the tokens are dropped and listeners are told the user
//! is gone. Id tokens are short-lived; `refresh` trades the refresh token for
//! a new one, and the document store asks for that through `renew` when a
//! request comes back 401.

use async_trait::async_trait;
use log::info;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use tokio::sync::watch;

use super::{IdentityProvider, TokenSource};
use crate::error::IdentityError;

const IDENTITY_BASE: &str = "https://identitytoolkit.googleapis.com/v1";
const TOKEN_BASE: &str = "https://securetoken.googleapis.com/v1";

/// Signed-in user and the credentials that go with it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
    pub id_token: String,
    pub refresh_token: String,
}

pub struct FirebaseAuth {
    http: Client,
    api_key: String,
    identity_base: String,
    token_base: String,
    user: RwLock<Option<AuthUser>>,
    changes: watch::Sender<Option<String>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordResponse {
    local_id: String,
    email: String,
    id_token: String,
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl FirebaseAuth {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            identity_base: IDENTITY_BASE.to_string(),
            token_base: TOKEN_BASE.to_string(),
            user: RwLock::new(None),
            changes: watch::Sender::new(None),
        }
    }

    /// Point both endpoints somewhere else (Auth emulator)
    pub fn with_endpoints(mut self, identity_base: impl Into<String>, token_base: impl Into<String>) -> Self {
        self.identity_base = identity_base.into();
        self.token_base = token_base.into();
        self
    }

    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Adopt a previously saved session without contacting the server
    pub fn restore(&self, user: AuthUser) {
        self.set_user(Some(user));
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthUser, IdentityError> {
        self.password_call("accounts:signInWithPassword", email, password)
            .await
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, IdentityError> {
        self.password_call("accounts:signUp", email, password).await
    }

    /// Exchange the refresh token for a fresh id token
    pub async fn refresh(&self) -> Result<AuthUser, IdentityError> {
        let current = self
            .current_user()
            .ok_or_else(|| IdentityError::Rejected("no session to refresh".into()))?;

        let resp = self
            .http
            .post(format!("{}/token", self.token_base))
            .query(&[("key", &self.api_key)])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", current.refresh_token.as_str()),
            ])
            .send()
            .await?;
        let out: RefreshResponse = check(resp).await?.json().await?;

        let user = AuthUser {
            user_id: out.user_id,
            email: current.email,
            id_token: out.id_token,
            refresh_token: out.refresh_token,
        };
        self.set_user(Some(user.clone()));
        Ok(user)
    }

    async fn password_call(&self, method: &str, email: &str, password: &str) -> Result<AuthUser, IdentityError> {
        let body = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };
        let resp = self
            .http
            .post(format!("{}/{method}", self.identity_base))
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await?;
        let out: PasswordResponse = check(resp).await?.json().await?;

        let user = AuthUser {
            user_id: out.local_id,
            email: out.email,
            id_token: out.id_token,
            refresh_token: out.refresh_token,
        };
        info!("{method} succeeded for {}", user.email);
        self.set_user(Some(user.clone()));
        Ok(user)
    }

    fn set_user(&self, user: Option<AuthUser>) {
        let id = user.as_ref().map(|u| u.user_id.clone());
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = user;
        // only wake listeners when the identity actually changed
        self.changes.send_if_modified(|current| {
            if *current != id {
                *current = id;
                true
            } else {
                false
            }
        });
    }
}

async fn check(resp: Response) -> Result<Response, IdentityError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    Err(IdentityError::Rejected(error_message(status.as_u16(), &text)))
}

/// Firebase puts a code like `EMAIL_NOT_FOUND` in `error.message`
fn error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| format!("HTTP {status}"))
}

#[async_trait]
impl IdentityProvider for FirebaseAuth {
    fn current_user_id(&self) -> Option<String> {
        self.current_user().map(|u| u.user_id)
    }

    fn on_auth_change(&self) -> watch::Receiver<Option<String>> {
        self.changes.subscribe()
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        info!("signing out");
        self.set_user(None);
        Ok(())
    }
}

#[async_trait]
impl TokenSource for FirebaseAuth {
    fn id_token(&self) -> Option<String> {
        self.current_user().map(|u| u.id_token)
    }

    async fn renew(&self) -> Result<String, IdentityError> {
        let user = self.refresh().await?;
        info!("renewed id token for {}", user.user_id);
        Ok(user.id_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_http::{self, Reply};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn user(id: &str, token: &str) -> AuthUser {
        AuthUser {
            user_id: id.to_string(),
            email: format!("{id}@example.com"),
            id_token: token.to_string(),
            refresh_token: "r".to_string(),
        }
    }

    #[test]
    fn test_error_message_extracts_firebase_code() {
        let body = r#"{"error":{"code":400,"message":"INVALID_PASSWORD","errors":[]}}"#;
        assert_eq!(error_message(400, body), "INVALID_PASSWORD");
        assert_eq!(error_message(502, "<html>"), "HTTP 502");
    }

    #[test]
    fn test_password_response_shape() {
        let body = r#"{
            "kind": "identitytoolkit#VerifyPasswordResponse",
            "localId": "uid-1",
            "email": "a@b.com",
            "displayName": "",
            "idToken": "tok",
            "registered": true,
            "refreshToken": "ref",
            "expiresIn": "3600"
        }"#;
        let r: PasswordResponse = serde_json::from_str(body).unwrap();
        assert_eq!(r.local_id, "uid-1");
        assert_eq!(r.refresh_token, "ref");
    }

    #[tokio::test]
    async fn test_renew_swaps_token_without_auth_change() {
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&bodies);
        let base = fake_http::serve(move |req| {
            seen.lock().unwrap().push(format!("{} {}", req.target, req.body));
            Reply::json(
                200,
                json!({
                    "expires_in": "3600",
                    "token_type": "Bearer",
                    "refresh_token": "r2",
                    "id_token": "t2",
                    "user_id": "u1",
                    "project_id": "123"
                }),
            )
        })
        .await;

        let auth = FirebaseAuth::new("key")
            .with_endpoints(format!("{base}/v1"), format!("{base}/v1"))
            .with_http_client(fake_http::client());
        auth.restore(user("u1", "t1"));
        let mut rx = auth.on_auth_change();
        let _ = rx.borrow_and_update();

        assert_eq!(auth.renew().await.unwrap(), "t2");
        assert_eq!(auth.id_token().as_deref(), Some("t2"));
        assert_eq!(auth.current_user().unwrap().refresh_token, "r2");
        assert!(!rx.has_changed().unwrap());

        let sent = bodies.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("/v1/token?key=key "));
        assert!(sent[0].contains("grant_type=refresh_token"));
        assert!(sent[0].contains("refresh_token=r"));
    }

    #[tokio::test]
    async fn test_renew_without_session_is_rejected() {
        let auth = FirebaseAuth::new("key");
        assert!(matches!(auth.renew().await, Err(IdentityError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_restore_and_sign_out_notify_listeners() {
        let auth = FirebaseAuth::new("key");
        let mut rx = auth.on_auth_change();

        auth.restore(user("u1", "t1"));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_deref(), Some("u1"));
        assert_eq!(auth.id_token().as_deref(), Some("t1"));

        // same user, new token: no auth change
        auth.restore(user("u1", "t2"));
        assert!(!rx.has_changed().unwrap());
        assert_eq!(auth.id_token().as_deref(), Some("t2"));

        auth.sign_out().await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), None);
        assert_eq!(auth.id_token(), None);
    }
}
