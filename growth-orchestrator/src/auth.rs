//! Accounts and login sessions over the store

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::database::{Database, SessionRecord, UserRecord};
use crate::error::ActionError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("an account with this e-mail already exists")]
    EmailTaken,

    #[error("invalid e-mail or password")]
    InvalidCredentials,

    #[error("session is invalid or expired")]
    InvalidSession,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<AuthError> for ActionError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Store(source) => ActionError::Internal(source),
            other => ActionError::Input(other.to_string()),
        }
    }
}

/// A user plus the token of a fresh session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginGrant {
    pub user: UserRecord,
    pub session_token: String,
    pub expires_at: chrono::DateTime<Utc>,
}

pub struct Auth<'a> {
    db: &'a Database,
    session_ttl: Duration,
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl<'a> Auth<'a> {
    pub fn new(db: &'a Database, session_ttl_days: i64) -> Self {
        Self {
            db,
            session_ttl: Duration::days(session_ttl_days.max(1)),
        }
    }

    pub fn register(&self, email: &str, password: &str, name: &str) -> Result<LoginGrant, AuthError> {
        let email = normalize_email(email);
        if !email.contains('@') {
            return Err(AuthError::InvalidInput("e-mail is not valid".to_string()));
        }
        if password.chars().count() < 6 {
            return Err(AuthError::InvalidInput(
                "password must have at least 6 characters".to_string(),
            ));
        }
        if self.db.find_credentials(&email)?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let user = UserRecord {
            id: Uuid::new_v4().to_string(),
            email,
            name: name.trim().to_string(),
            created_at: Utc::now(),
        };
        let salt = Uuid::new_v4().to_string();
        self.db
            .insert_user(&user, &salt, &hash_password(&salt, password))?;
        tracing::info!("registered user {}", user.id);

        self.open_session(user)
    }

    pub fn login(&self, email: &str, password: &str) -> Result<LoginGrant, AuthError> {
        let credentials = self
            .db
            .find_credentials(&normalize_email(email))?
            .ok_or(AuthError::InvalidCredentials)?;
        if hash_password(&credentials.salt, password) != credentials.password_hash {
            return Err(AuthError::InvalidCredentials);
        }
        self.open_session(credentials.user)
    }

    /// Revoke `token`; logging out twice is not an error
    pub fn logout(&self, token: &str) -> Result<(), AuthError> {
        if !self.db.revoke_session(token)? {
            tracing::debug!("logout for an unknown or revoked session");
        }
        Ok(())
    }

    /// The user behind a live session
    pub fn validate_session(&self, token: &str) -> Result<UserRecord, AuthError> {
        let session = self
            .db
            .get_session(token)?
            .ok_or(AuthError::InvalidSession)?;
        if session.revoked || session.expires_at <= Utc::now() {
            return Err(AuthError::InvalidSession);
        }
        self.db
            .get_user(&session.user_id)?
            .ok_or(AuthError::InvalidSession)
    }

    fn open_session(&self, user: UserRecord) -> Result<LoginGrant, AuthError> {
        let session = SessionRecord {
            token: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            expires_at: Utc::now() + self.session_ttl,
            revoked: false,
        };
        self.db.insert_session(&session)?;
        Ok(LoginGrant {
            user,
            session_token: session.token,
            expires_at: session.expires_at,
        })
    }
}
