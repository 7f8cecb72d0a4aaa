//! Callback state and the uniform result of a login callback.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Flow tag returned when an enterprise realm refuses an unknown principal.
pub const UNAUTHORIZED_SSO_ACCESS: &str = "unauthorized_sso_access";

/// The five ways a callback can join or provision a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthFlow {
    Invitation,
    JoinLink,
    EnterpriseFirstAdmin,
    NewOrg,
    #[default]
    Default,
}

impl AuthFlow {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFlow::Invitation => "invitation",
            AuthFlow::JoinLink => "join_link",
            AuthFlow::EnterpriseFirstAdmin => "enterprise_first_admin",
            AuthFlow::NewOrg => "new_org",
            AuthFlow::Default => "default",
        }
    }
}

impl std::str::FromStr for AuthFlow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "invitation" => Ok(AuthFlow::Invitation),
            "join_link" => Ok(AuthFlow::JoinLink),
            "enterprise_first_admin" => Ok(AuthFlow::EnterpriseFirstAdmin),
            "new_org" => Ok(AuthFlow::NewOrg),
            "default" | "" => Ok(AuthFlow::Default),
            other => Err(format!("Unknown auth flow: {}", other)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCallbackState {
    #[serde(default)]
    flow: Option<String>,
    #[serde(default)]
    realm: Option<String>,
    #[serde(default, rename = "invitationToken", alias = "invitation_token")]
    invitation_token: Option<String>,
    #[serde(default, rename = "joinToken", alias = "join_token")]
    join_token: Option<String>,
}

/// Decoded `state` parameter: base64 of `{flow, realm, invitationToken?, joinToken?}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackState {
    pub flow: AuthFlow,
    pub realm: String,
    pub invitation_token: Option<String>,
    pub join_token: Option<String>,
}

impl CallbackState {
    /// State used when the callback carries none, or one that can't be read.
    pub fn fallback(default_realm: &str) -> Self {
        Self {
            flow: AuthFlow::Default,
            realm: default_realm.to_string(),
            invitation_token: None,
            join_token: None,
        }
    }

    /// Accepts URL-safe or standard base64, padded or not. A missing realm
    /// resolves to `default_realm`; an unknown flow tag degrades to the
    /// default flow without discarding the realm.
    pub fn decode(raw: &str, default_realm: &str) -> Result<Self, anyhow::Error> {
        let trimmed = raw.trim();
        let bytes = URL_SAFE_NO_PAD
            .decode(trimmed.trim_end_matches('='))
            .or_else(|_| STANDARD.decode(trimmed))
            .map_err(|e| anyhow::anyhow!("state is not base64: {}", e))?;

        let raw: RawCallbackState = serde_json::from_slice(&bytes)
            .map_err(|e| anyhow::anyhow!("state is not valid JSON: {}", e))?;

        let flow = match raw.flow.as_deref() {
            None => AuthFlow::Default,
            Some(tag) => tag.parse().unwrap_or_else(|e: String| {
                tracing::warn!(error = %e, "Unknown flow in callback state, using default flow");
                AuthFlow::Default
            }),
        };

        let realm = raw
            .realm
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| default_realm.to_string());

        Ok(Self {
            flow,
            realm,
            invitation_token: raw.invitation_token.filter(|t| !t.is_empty()),
            join_token: raw.join_token.filter(|t| !t.is_empty()),
        })
    }

    pub fn encode(&self) -> String {
        let json = serde_json::json!({
            "flow": self.flow.as_str(),
            "realm": self.realm,
            "invitationToken": self.invitation_token,
            "joinToken": self.join_token,
        });
        URL_SAFE_NO_PAD.encode(json.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantOption {
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub is_admin: bool,
}

/// What every callback returns: an issued session, a tenant picker, or a denial.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthFlowResult {
    pub success: bool,
    pub flow: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_name: Option<String>,
    pub requires_tenant_selection: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_tenants: Option<Vec<TenantOption>>,
    /// Short-lived ticket for the tenant selection step. Not a session token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_new_organization: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl AuthFlowResult {
    pub fn issued(
        flow: AuthFlow,
        token: String,
        tenant_id: Uuid,
        tenant_name: String,
        is_new_organization: bool,
    ) -> Self {
        Self {
            success: true,
            flow: flow.as_str().to_string(),
            token: Some(token),
            tenant_id: Some(tenant_id),
            tenant_name: Some(tenant_name),
            requires_tenant_selection: false,
            available_tenants: None,
            selection_token: None,
            is_new_organization: Some(is_new_organization),
            error_message: None,
            error_code: None,
        }
    }

    pub fn select_tenant(
        flow: AuthFlow,
        tenants: Vec<TenantOption>,
        selection_token: String,
    ) -> Self {
        Self {
            success: true,
            flow: flow.as_str().to_string(),
            token: None,
            tenant_id: None,
            tenant_name: None,
            requires_tenant_selection: true,
            available_tenants: Some(tenants),
            selection_token: Some(selection_token),
            is_new_organization: None,
            error_message: None,
            error_code: None,
        }
    }

    pub fn failure(flow: &str, error_code: &str, error_message: String) -> Self {
        Self {
            success: false,
            flow: flow.to_string(),
            token: None,
            tenant_id: None,
            tenant_name: None,
            requires_tenant_selection: false,
            available_tenants: None,
            selection_token: None,
            is_new_organization: None,
            error_message: Some(error_message),
            error_code: Some(error_code.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_url_safe_state() {
        let encoded = URL_SAFE_NO_PAD.encode(
            r#"{"flow":"join_link","realm":"acme","joinToken":"tok"}"#,
        );

        let state = CallbackState::decode(&encoded, "groundup").unwrap();

        assert_eq!(state.flow, AuthFlow::JoinLink);
        assert_eq!(state.realm, "acme");
        assert_eq!(state.join_token.as_deref(), Some("tok"));
        assert!(state.invitation_token.is_none());
    }

    #[test]
    fn test_decode_standard_padded_state() {
        let encoded = STANDARD.encode(r#"{"flow":"invitation","invitationToken":"abc123"}"#);

        let state = CallbackState::decode(&encoded, "groundup").unwrap();

        assert_eq!(state.flow, AuthFlow::Invitation);
        assert_eq!(state.realm, "groundup");
        assert_eq!(state.invitation_token.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(CallbackState::decode("%%%not-base64", "groundup").is_err());
        let not_json = URL_SAFE_NO_PAD.encode("hello");
        assert!(CallbackState::decode(&not_json, "groundup").is_err());
    }

    #[test]
    fn test_unknown_flow_keeps_realm() {
        let encoded = URL_SAFE_NO_PAD.encode(r#"{"flow":"teleport","realm":"acme"}"#);

        let state = CallbackState::decode(&encoded, "groundup").unwrap();

        assert_eq!(state.flow, AuthFlow::Default);
        assert_eq!(state.realm, "acme");
    }

    #[test]
    fn test_encode_decode_preserves_state() {
        let state = CallbackState {
            flow: AuthFlow::EnterpriseFirstAdmin,
            realm: "acme".to_string(),
            invitation_token: None,
            join_token: None,
        };
        assert_eq!(CallbackState::decode(&state.encode(), "x").unwrap(), state);
    }

    #[test]
    fn test_failure_result_serializes_camel_case() {
        let result = AuthFlowResult::failure(
            UNAUTHORIZED_SSO_ACCESS,
            "authorization_denied",
            "Access denied".to_string(),
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["flow"], "unauthorized_sso_access");
        assert_eq!(json["requiresTenantSelection"], false);
        assert_eq!(json["errorMessage"], "Access denied");
        assert!(json.get("token").is_none());
    }
}
