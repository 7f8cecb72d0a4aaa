use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    BrokerTokens, BrokerUser, IdentityBroker, IdentityClaims, NewBrokerUser, RequiredAction,
};
use crate::services::ServiceError;

/// Operations that can be made to fail with [`MockIdentityBroker::fail_on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerOp {
    ExchangeCode,
    GetUser,
    FindUserByEmail,
    CreateUser,
    AssignRole,
    SendNotification,
    CreateRealm,
    DeleteRealm,
    DisableRegistration,
}

/// Mutating calls the mock has seen, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    CreateUser { realm: String, email: String },
    AssignRole { realm: String, user_id: String, role_name: String },
    SendNotification { realm: String, user_id: String, actions: Vec<RequiredAction> },
    CreateRealm { realm: String },
    DeleteRealm { realm: String },
    DisableRegistration { realm: String },
}

#[derive(Default)]
struct MockState {
    logins: HashMap<String, BrokerTokens>,
    users: Vec<(String, BrokerUser)>,
    realms: HashSet<String>,
    calls: Vec<BrokerCall>,
    failing: HashSet<BrokerOp>,
}

/// In-process provider for tests and local runs.
#[derive(Default)]
pub struct MockIdentityBroker {
    state: Mutex<MockState>,
}

impl MockIdentityBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MockState>, ServiceError> {
        self.state
            .lock()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Mock broker mutex poisoned: {}", e)))
    }

    fn check(&self, op: BrokerOp) -> Result<MutexGuard<'_, MockState>, ServiceError> {
        let state = self.state()?;
        if state.failing.contains(&op) {
            return Err(ServiceError::Broker(format!("{:?} failed (injected)", op)));
        }
        Ok(state)
    }

    /// Make `code` exchangeable for a token carrying `claims`.
    pub fn register_login(&self, code: &str, claims: &IdentityClaims) {
        let token = unsigned_jwt(claims);
        let tokens = BrokerTokens {
            access_token: token.clone(),
            id_token: Some(token),
            refresh_token: None,
            expires_in: Some(300),
        };
        if let Ok(mut state) = self.state() {
            state.logins.insert(code.to_string(), tokens);
        }
    }

    pub fn add_realm(&self, realm: &str) {
        if let Ok(mut state) = self.state() {
            state.realms.insert(realm.to_string());
        }
    }

    pub fn has_realm(&self, realm: &str) -> bool {
        self.state()
            .map(|s| s.realms.contains(realm))
            .unwrap_or(false)
    }

    pub fn add_user(&self, realm: &str, user: BrokerUser) {
        if let Ok(mut state) = self.state() {
            state.users.push((realm.to_string(), user));
        }
    }

    pub fn fail_on(&self, op: BrokerOp) {
        if let Ok(mut state) = self.state() {
            state.failing.insert(op);
        }
    }

    pub fn calls(&self) -> Vec<BrokerCall> {
        self.state().map(|s| s.calls.clone()).unwrap_or_default()
    }
}

/// A JWT-shaped token with `alg: none`. Only ever decoded, never verified.
pub fn unsigned_jwt(claims: &IdentityClaims) -> String {
    let payload = serde_json::json!({
        "sub": claims.sub,
        "email": claims.email,
        "email_verified": claims.email_verified,
        "given_name": claims.given_name,
        "family_name": claims.family_name,
        "name": claims.name,
        "preferred_username": claims.preferred_username,
        "realm_access": { "roles": claims.roles },
    });
    format!(
        "{}.{}.",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(payload.to_string())
    )
}

#[async_trait]
impl IdentityBroker for MockIdentityBroker {
    async fn exchange_code_for_tokens(
        &self,
        code: &str,
        _redirect_uri: &str,
        _realm: &str,
    ) -> Result<Option<BrokerTokens>, ServiceError> {
        let state = self.check(BrokerOp::ExchangeCode)?;
        Ok(state.logins.get(code).cloned())
    }

    async fn get_user_by_id(
        &self,
        realm: &str,
        user_id: &str,
    ) -> Result<Option<BrokerUser>, ServiceError> {
        let state = self.check(BrokerOp::GetUser)?;
        Ok(state
            .users
            .iter()
            .find(|(r, u)| r == realm && u.id == user_id)
            .map(|(_, u)| u.clone()))
    }

    async fn get_user_id_by_email(
        &self,
        realm: &str,
        email: &str,
    ) -> Result<Option<String>, ServiceError> {
        let state = self.check(BrokerOp::FindUserByEmail)?;
        let email = email.trim();
        Ok(state
            .users
            .iter()
            .find(|(r, u)| {
                r == realm
                    && u.email
                        .as_deref()
                        .is_some_and(|e| e.eq_ignore_ascii_case(email))
            })
            .map(|(_, u)| u.id.clone()))
    }

    async fn create_user(&self, realm: &str, user: &NewBrokerUser) -> Result<String, ServiceError> {
        let mut state = self.check(BrokerOp::CreateUser)?;
        let id = Uuid::new_v4().to_string();
        state.users.push((
            realm.to_string(),
            BrokerUser {
                id: id.clone(),
                username: Some(user.username.clone()),
                email: Some(user.email.clone()),
                email_verified: user.email_verified,
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
                enabled: user.enabled,
            },
        ));
        state.calls.push(BrokerCall::CreateUser {
            realm: realm.to_string(),
            email: user.email.clone(),
        });
        Ok(id)
    }

    async fn assign_role(
        &self,
        realm: &str,
        user_id: &str,
        role_name: &str,
    ) -> Result<(), ServiceError> {
        let mut state = self.check(BrokerOp::AssignRole)?;
        state.calls.push(BrokerCall::AssignRole {
            realm: realm.to_string(),
            user_id: user_id.to_string(),
            role_name: role_name.to_string(),
        });
        Ok(())
    }

    async fn send_notification_email(
        &self,
        realm: &str,
        user_id: &str,
        actions: &[RequiredAction],
    ) -> Result<(), ServiceError> {
        let mut state = self.check(BrokerOp::SendNotification)?;
        state.calls.push(BrokerCall::SendNotification {
            realm: realm.to_string(),
            user_id: user_id.to_string(),
            actions: actions.to_vec(),
        });
        Ok(())
    }

    async fn create_realm(&self, realm: &str, _display_name: &str) -> Result<(), ServiceError> {
        let mut state = self.check(BrokerOp::CreateRealm)?;
        if !state.realms.insert(realm.to_string()) {
            return Err(ServiceError::Broker(format!("Realm {} already exists", realm)));
        }
        state.calls.push(BrokerCall::CreateRealm {
            realm: realm.to_string(),
        });
        Ok(())
    }

    async fn delete_realm(&self, realm: &str) -> Result<(), ServiceError> {
        let mut state = self.check(BrokerOp::DeleteRealm)?;
        state.realms.remove(realm);
        state.calls.push(BrokerCall::DeleteRealm {
            realm: realm.to_string(),
        });
        Ok(())
    }

    async fn disable_realm_registration(&self, realm: &str) -> Result<(), ServiceError> {
        let mut state = self.check(BrokerOp::DisableRegistration)?;
        state.calls.push(BrokerCall::DisableRegistration {
            realm: realm.to_string(),
        });
        Ok(())
    }
}
