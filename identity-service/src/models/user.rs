//! Local users and their links to identity-provider accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Internal identity. Created lazily on first successful login, never deleted here.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub email_verified: bool,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub display_name: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl User {
    pub fn new(
        user_id: Uuid,
        email: Option<String>,
        email_verified: bool,
        given_name: Option<String>,
        family_name: Option<String>,
        display_name: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            email,
            email_verified,
            given_name,
            family_name,
            display_name,
            created_utc: now,
            updated_utc: now,
        }
    }
}

/// Link between a local user and an account in one provider realm.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserIdentity {
    pub realm: String,
    pub external_subject_id: String,
    pub user_id: Uuid,
    pub created_utc: DateTime<Utc>,
}

impl UserIdentity {
    pub fn new(realm: String, external_subject_id: String, user_id: Uuid) -> Self {
        Self {
            realm,
            external_subject_id,
            user_id,
            created_utc: Utc::now(),
        }
    }
}

/// The authenticated caller as seen by the join flows.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub realm: String,
    pub external_subject_id: String,
    pub email: Option<String>,
    pub email_verified: bool,
}

impl Principal {
    /// The email, but only when the provider vouched for it.
    pub fn verified_email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|e| self.email_verified && !e.is_empty())
    }
}
