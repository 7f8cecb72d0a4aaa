use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fs;
use uuid::Uuid;

use super::broker::IdentityClaims;
use super::ServiceError;
use crate::config::JwtConfig;
use crate::store::TenantContext;

/// Session tokens have a fixed lifetime.
pub const SESSION_TTL_MINUTES: i64 = 60;
/// Selection tokens only live long enough to pick a tenant.
pub const SELECTION_TTL_MINUTES: i64 = 5;

const SESSION_TYP: &str = "session";
const SELECTION_TYP: &str = "tenant_selection";

/// Claims of the internal session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Internal user id
    pub sub: String,
    pub tenant_id: Uuid,
    /// Subject at the identity provider
    pub idp_sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    pub iss: String,
    pub typ: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

impl SessionClaims {
    pub fn user_id(&self) -> Result<Uuid, ServiceError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| ServiceError::Authentication("Session subject is not a user id".to_string()))
    }
}

/// Claims of the ticket that lets a multi-tenant user pick a tenant.
/// Carries the provider identity so the session can be minted later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionClaims {
    pub sub: String,
    pub idp_sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    pub iss: String,
    pub typ: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

impl SelectionClaims {
    pub fn user_id(&self) -> Result<Uuid, ServiceError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| ServiceError::Authentication("Selection subject is not a user id".to_string()))
    }

    pub fn identity(&self) -> IdentityClaims {
        IdentityClaims {
            sub: self.idp_sub.clone(),
            email: self.email.clone(),
            email_verified: self.email_verified,
            given_name: self.given_name.clone(),
            family_name: self.family_name.clone(),
            name: self.name.clone(),
            preferred_username: self.preferred_username.clone(),
            roles: self.roles.clone(),
        }
    }
}

impl TenantContext {
    /// The tenant a validated session acts for.
    pub fn from_claims(claims: &SessionClaims) -> Self {
        TenantContext::new(claims.tenant_id)
    }
}

/// Signs and validates session and selection tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    issuer: String,
}

impl TokenIssuer {
    /// RS256 issuer from PEM key files.
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let private_key_pem = fs::read_to_string(&config.private_key_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read private key from {}: {}",
                config.private_key_path,
                e
            )
        })?;
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?;

        let public_key_pem = fs::read_to_string(&config.public_key_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read public key from {}: {}",
                config.public_key_path,
                e
            )
        })?;
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;

        tracing::info!(issuer = %config.issuer, "Token issuer initialized with RS256 keys");

        Ok(Self {
            encoding_key,
            decoding_key,
            algorithm: Algorithm::RS256,
            issuer: config.issuer.clone(),
        })
    }

    /// HS256 issuer from a shared secret, for tests and local runs.
    pub fn from_secret(secret: &[u8], issuer: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            algorithm: Algorithm::HS256,
            issuer: issuer.to_string(),
        }
    }

    pub fn issue(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        identity: &IdentityClaims,
    ) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: user_id.to_string(),
            tenant_id,
            idp_sub: identity.sub.clone(),
            email: identity.email.clone(),
            email_verified: identity.email_verified,
            given_name: identity.given_name.clone(),
            family_name: identity.family_name.clone(),
            name: identity.name.clone(),
            preferred_username: identity.preferred_username.clone(),
            roles: identity.roles.clone(),
            iss: self.issuer.clone(),
            typ: SESSION_TYP.to_string(),
            exp: (now + Duration::minutes(SESSION_TTL_MINUTES)).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode session token: {}", e)))
    }

    pub fn issue_selection(
        &self,
        user_id: Uuid,
        identity: &IdentityClaims,
    ) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = SelectionClaims {
            sub: user_id.to_string(),
            idp_sub: identity.sub.clone(),
            email: identity.email.clone(),
            email_verified: identity.email_verified,
            given_name: identity.given_name.clone(),
            family_name: identity.family_name.clone(),
            name: identity.name.clone(),
            preferred_username: identity.preferred_username.clone(),
            roles: identity.roles.clone(),
            iss: self.issuer.clone(),
            typ: SELECTION_TYP.to_string(),
            exp: (now + Duration::minutes(SELECTION_TTL_MINUTES)).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode selection token: {}", e)))
    }

    pub fn validate(&self, token: &str) -> Result<SessionClaims, ServiceError> {
        let claims = decode::<SessionClaims>(token, &self.decoding_key, &self.validation())
            .map_err(|e| ServiceError::Authentication(format!("Invalid session token: {}", e)))?
            .claims;

        if claims.typ != SESSION_TYP {
            return Err(ServiceError::Authentication(
                "Token is not a session token".to_string(),
            ));
        }
        Ok(claims)
    }

    pub fn validate_selection(&self, token: &str) -> Result<SelectionClaims, ServiceError> {
        let claims = decode::<SelectionClaims>(token, &self.decoding_key, &self.validation())
            .map_err(|e| ServiceError::Authentication(format!("Invalid selection token: {}", e)))?
            .claims;

        if claims.typ != SELECTION_TYP {
            return Err(ServiceError::Authentication(
                "Token is not a tenant selection token".to_string(),
            ));
        }
        Ok(claims)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation
    }

    pub fn session_ttl_seconds(&self) -> i64 {
        SESSION_TTL_MINUTES * 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn identity() -> IdentityClaims {
        IdentityClaims {
            sub: "kc-42".to_string(),
            email: Some("carol@x.com".to_string()),
            email_verified: true,
            given_name: Some("Carol".to_string()),
            roles: vec!["Admin".to_string()],
            ..Default::default()
        }
    }

    fn issuer() -> TokenIssuer {
        TokenIssuer::from_secret(b"unit-test-secret", "identity-service")
    }

    #[test]
    fn test_session_token_carries_tenant_and_passthrough_claims() {
        let issuer = issuer();
        let user_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();

        let token = issuer.issue(user_id, tenant_id, &identity()).unwrap();
        let claims = issuer.validate(&token).unwrap();

        assert_eq!(claims.user_id().unwrap(), user_id);
        assert_eq!(claims.tenant_id, tenant_id);
        assert_eq!(claims.idp_sub, "kc-42");
        assert_eq!(claims.roles, vec!["Admin"]);
        assert_eq!(claims.exp - claims.iat, SESSION_TTL_MINUTES * 60);
        assert_eq!(TenantContext::from_claims(&claims).tenant_id(), tenant_id);
    }

    #[test]
    fn test_selection_token_is_not_a_session() {
        let issuer = issuer();
        let selection = issuer.issue_selection(Uuid::new_v4(), &identity()).unwrap();

        assert!(issuer.validate(&selection).is_err());
        let claims = issuer.validate_selection(&selection).unwrap();
        assert_eq!(claims.identity(), identity());
    }

    #[test]
    fn test_session_token_is_not_a_selection_ticket() {
        let issuer = issuer();
        let session = issuer
            .issue(Uuid::new_v4(), Uuid::new_v4(), &identity())
            .unwrap();

        assert!(matches!(
            issuer.validate_selection(&session),
            Err(ServiceError::Authentication(_))
        ));
    }

    #[test]
    fn test_foreign_issuer_rejected() {
        let ours = issuer();
        let theirs = TokenIssuer::from_secret(b"unit-test-secret", "someone-else");
        let token = theirs
            .issue(Uuid::new_v4(), Uuid::new_v4(), &identity())
            .unwrap();

        assert!(ours.validate(&token).is_err());
    }

    #[test]
    fn test_rs256_issuer_from_key_files() -> Result<(), anyhow::Error> {
        let mut private_file = NamedTempFile::new()?;
        private_file.write_all(include_bytes!("../../tests/fixtures/jwt_private.pem"))?;
        let mut public_file = NamedTempFile::new()?;
        public_file.write_all(include_bytes!("../../tests/fixtures/jwt_public.pem"))?;

        let config = JwtConfig {
            private_key_path: private_file.path().to_string_lossy().to_string(),
            public_key_path: public_file.path().to_string_lossy().to_string(),
            issuer: "identity-service".to_string(),
        };
        let issuer = TokenIssuer::new(&config)?;
        let tenant_id = Uuid::new_v4();

        let token = issuer.issue(Uuid::new_v4(), tenant_id, &identity())?;

        assert_eq!(issuer.validate(&token)?.tenant_id, tenant_id);
        Ok(())
    }

    #[test]
    fn test_missing_key_file_fails() {
        let config = JwtConfig {
            private_key_path: "/nonexistent/private.pem".to_string(),
            public_key_path: "/nonexistent/public.pem".to_string(),
            issuer: "identity-service".to_string(),
        };
        assert!(TokenIssuer::new(&config).is_err());
    }
}
