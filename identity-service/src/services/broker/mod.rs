//! Identity provider contract.
//!
//! The broker is trusted as given: responses are not cross-checked against
//! local state. Every call is a single round trip and is never retried here.

mod keycloak;
mod mock;

pub use keycloak::KeycloakBroker;
pub use mock::{BrokerCall, BrokerOp, MockIdentityBroker};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};

use super::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerTokens {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Provider-side account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerUser {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBrokerUser {
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email_verified: bool,
    pub enabled: bool,
}

impl NewBrokerUser {
    /// Account for an invitee who will set their own password.
    pub fn invitee(email: &str) -> Self {
        let email = email.trim().to_lowercase();
        Self {
            username: email.clone(),
            email,
            first_name: None,
            last_name: None,
            email_verified: false,
            enabled: true,
        }
    }
}

/// Actions the provider asks the user to complete from an emailed link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequiredAction {
    UpdatePassword,
    VerifyEmail,
}

#[async_trait]
pub trait IdentityBroker: Send + Sync {
    /// `Ok(None)` when the provider rejected the code.
    async fn exchange_code_for_tokens(
        &self,
        code: &str,
        redirect_uri: &str,
        realm: &str,
    ) -> Result<Option<BrokerTokens>, ServiceError>;

    async fn get_user_by_id(
        &self,
        realm: &str,
        user_id: &str,
    ) -> Result<Option<BrokerUser>, ServiceError>;

    async fn get_user_id_by_email(
        &self,
        realm: &str,
        email: &str,
    ) -> Result<Option<String>, ServiceError>;

    /// Returns the provider id of the new account.
    async fn create_user(&self, realm: &str, user: &NewBrokerUser) -> Result<String, ServiceError>;

    async fn assign_role(
        &self,
        realm: &str,
        user_id: &str,
        role_name: &str,
    ) -> Result<(), ServiceError>;

    async fn send_notification_email(
        &self,
        realm: &str,
        user_id: &str,
        actions: &[RequiredAction],
    ) -> Result<(), ServiceError>;

    /// Not idempotent: a second call for the same realm fails.
    async fn create_realm(&self, realm: &str, display_name: &str) -> Result<(), ServiceError>;

    async fn delete_realm(&self, realm: &str) -> Result<(), ServiceError>;

    async fn disable_realm_registration(&self, realm: &str) -> Result<(), ServiceError>;
}

/// Profile and role claims read from the provider's token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityClaims {
    pub sub: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub name: Option<String>,
    pub preferred_username: Option<String>,
    pub roles: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RealmAccess {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    #[serde(default)]
    given_name: Option<String>,
    #[serde(default)]
    family_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    realm_access: Option<RealmAccess>,
    #[serde(default)]
    roles: Option<Vec<String>>,
}

impl IdentityClaims {
    /// Reads the payload without verifying the signature. The token comes
    /// straight from the provider's token endpoint over TLS.
    pub fn from_jwt(token: &str) -> Result<Self, ServiceError> {
        let payload = token
            .split('.')
            .nth(1)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ServiceError::Authentication("Malformed provider token".to_string()))?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| {
                ServiceError::Authentication(format!("Provider token payload is not base64: {}", e))
            })?;

        let raw: RawClaims = serde_json::from_slice(&bytes).map_err(|e| {
            ServiceError::Authentication(format!("Provider token claims are unreadable: {}", e))
        })?;

        let sub = raw
            .sub
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ServiceError::Authentication("Provider token has no subject claim".to_string())
            })?;

        let mut roles = raw.realm_access.map(|r| r.roles).unwrap_or_default();
        for role in raw.roles.unwrap_or_default() {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }

        Ok(Self {
            sub,
            email: raw.email,
            email_verified: raw.email_verified.unwrap_or(false),
            given_name: raw.given_name,
            family_name: raw.family_name,
            name: raw.name,
            preferred_username: raw.preferred_username,
            roles,
        })
    }

    /// Identity comes from the ID token when there is one. Role claims are
    /// the union of both tokens, since the provider puts realm roles in the
    /// access token.
    pub fn from_tokens(tokens: &BrokerTokens) -> Result<Self, ServiceError> {
        let Some(id_token) = tokens.id_token.as_deref().filter(|t| !t.is_empty()) else {
            return Self::from_jwt(&tokens.access_token);
        };

        let mut claims = Self::from_jwt(id_token)?;
        match Self::from_jwt(&tokens.access_token) {
            Ok(access) if access.sub == claims.sub => {
                for role in access.roles {
                    if !claims.roles.contains(&role) {
                        claims.roles.push(role);
                    }
                }
            }
            Ok(_) => tracing::warn!("Access token subject differs from ID token, ignoring its roles"),
            Err(e) => tracing::debug!(error = %e, "Access token carries no readable claims"),
        }
        Ok(claims)
    }

    pub fn display_name(&self) -> Option<String> {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return Some(name.trim().to_string());
        }
        let joined = [self.given_name.as_deref(), self.family_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if joined.is_empty() {
            None
        } else {
            Some(joined)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt(payload: serde_json::Value) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#),
            URL_SAFE_NO_PAD.encode(payload.to_string())
        )
    }

    #[test]
    fn test_claims_from_keycloak_token() {
        let token = jwt(serde_json::json!({
            "sub": "kc-123",
            "email": "bob@groundup.io",
            "email_verified": true,
            "given_name": "Bob",
            "family_name": "Builder",
            "realm_access": { "roles": ["Member", "offline_access"] }
        }));

        let claims = IdentityClaims::from_jwt(&token).unwrap();

        assert_eq!(claims.sub, "kc-123");
        assert!(claims.email_verified);
        assert_eq!(claims.roles, vec!["Member", "offline_access"]);
        assert_eq!(claims.display_name().as_deref(), Some("Bob Builder"));
    }

    #[test]
    fn test_missing_subject_is_authentication_error() {
        let token = jwt(serde_json::json!({ "email": "x@y.z" }));

        let result = IdentityClaims::from_jwt(&token);

        assert!(matches!(result, Err(ServiceError::Authentication(_))));
    }

    #[test]
    fn test_garbage_token_is_authentication_error() {
        assert!(matches!(
            IdentityClaims::from_jwt("not-a-jwt"),
            Err(ServiceError::Authentication(_))
        ));
    }

    #[test]
    fn test_id_token_preferred_over_access_token() {
        let tokens = BrokerTokens {
            access_token: jwt(serde_json::json!({ "sub": "from-access" })),
            id_token: Some(jwt(serde_json::json!({ "sub": "from-id" }))),
            refresh_token: None,
            expires_in: Some(300),
        };

        assert_eq!(IdentityClaims::from_tokens(&tokens).unwrap().sub, "from-id");
    }

    #[test]
    fn test_access_token_roles_survive_id_token() {
        let tokens = BrokerTokens {
            access_token: jwt(serde_json::json!({
                "sub": "kc-1",
                "realm_access": { "roles": ["Admin", "Member"] }
            })),
            id_token: Some(jwt(serde_json::json!({
                "sub": "kc-1",
                "email": "ann@acme.com",
                "roles": ["Member"]
            }))),
            refresh_token: None,
            expires_in: Some(300),
        };

        let claims = IdentityClaims::from_tokens(&tokens).unwrap();

        assert_eq!(claims.email.as_deref(), Some("ann@acme.com"));
        assert_eq!(claims.roles, vec!["Member", "Admin"]);
    }

    #[test]
    fn test_opaque_access_token_keeps_id_token_claims() {
        let tokens = BrokerTokens {
            access_token: "opaque-access-token".to_string(),
            id_token: Some(jwt(serde_json::json!({ "sub": "kc-1", "roles": ["Member"] }))),
            refresh_token: None,
            expires_in: None,
        };

        let claims = IdentityClaims::from_tokens(&tokens).unwrap();

        assert_eq!(claims.sub, "kc-1");
        assert_eq!(claims.roles, vec!["Member"]);
    }

    #[test]
    fn test_required_actions_use_provider_names() {
        let json = serde_json::to_string(&[RequiredAction::UpdatePassword, RequiredAction::VerifyEmail])
            .unwrap();
        assert_eq!(json, r#"["UPDATE_PASSWORD","VERIFY_EMAIL"]"#);
    }
}
