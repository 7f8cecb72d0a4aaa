//! Login callback state machine.
//!
//! A callback decodes its state, exchanges the code, resolves the local user
//! and runs exactly one flow inside one unit of work. Provider-side effects
//! that must not undo the login (role assignment, closing registration) run
//! after commit and only log on failure.

use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::broker::{IdentityBroker, IdentityClaims};
use super::invitation::InvitationLedger;
use super::join_link::JoinLinkLedger;
use super::jwt::TokenIssuer;
use super::metrics::record_auth_flow;
use super::sso::{SsoAutoJoinMatcher, SsoDecision};
use super::ServiceError;
use crate::models::{
    AuthFlow, AuthFlowResult, CallbackState, Membership, Principal, Tenant, TenantOption, User,
    UNAUTHORIZED_SSO_ACCESS,
};
use crate::store::{IdentityStore, UnitOfWork};

/// Organization name used when the profile has no first name.
pub const FALLBACK_ORGANIZATION_NAME: &str = "My Organization";

#[derive(Debug, Clone)]
pub struct CallbackRequest {
    pub code: String,
    pub state: Option<String>,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SideEffect {
    DisableRegistration {
        realm: String,
    },
    AssignRole {
        realm: String,
        external_user_id: String,
        role_name: String,
    },
}

#[derive(Debug)]
enum Resolution {
    Issue {
        tenant_id: Uuid,
        tenant_name: String,
        is_new_organization: bool,
    },
    Select {
        tenants: Vec<TenantOption>,
    },
}

#[derive(Debug)]
struct FlowOutcome {
    resolution: Resolution,
    side_effects: Vec<SideEffect>,
}

impl FlowOutcome {
    fn issue(tenant: &Tenant, is_new_organization: bool) -> Self {
        Self {
            resolution: Resolution::Issue {
                tenant_id: tenant.tenant_id,
                tenant_name: tenant.tenant_name.clone(),
                is_new_organization,
            },
            side_effects: Vec::new(),
        }
    }

    fn with(mut self, effect: Option<SideEffect>) -> Self {
        self.side_effects.extend(effect);
        self
    }
}

/// `"{given_name}'s Organization"`, or the fallback name.
pub fn default_organization_name(given_name: Option<&str>) -> String {
    match given_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("{}'s Organization", name),
        None => FALLBACK_ORGANIZATION_NAME.to_string(),
    }
}

pub struct AuthFlowOrchestrator {
    store: Arc<dyn IdentityStore>,
    broker: Arc<dyn IdentityBroker>,
    issuer: Arc<TokenIssuer>,
    invitations: Arc<InvitationLedger>,
    join_links: Arc<JoinLinkLedger>,
    sso: SsoAutoJoinMatcher,
    default_realm: String,
}

impl AuthFlowOrchestrator {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        broker: Arc<dyn IdentityBroker>,
        issuer: Arc<TokenIssuer>,
        invitations: Arc<InvitationLedger>,
        join_links: Arc<JoinLinkLedger>,
        default_realm: String,
    ) -> Self {
        Self {
            sso: SsoAutoJoinMatcher::new(invitations.clone()),
            store,
            broker,
            issuer,
            invitations,
            join_links,
            default_realm,
        }
    }

    /// Never fails: every error becomes a failure result with a stable code.
    #[instrument(skip(self, request), fields(flow = tracing::field::Empty, realm = tracing::field::Empty))]
    pub async fn handle_callback(&self, request: CallbackRequest) -> AuthFlowResult {
        let state = self.decode_state(request.state.as_deref());
        let span = tracing::Span::current();
        span.record("flow", state.flow.as_str());
        span.record("realm", state.realm.as_str());

        match self.run(&request, &state).await {
            Ok(result) => {
                let outcome = if result.requires_tenant_selection {
                    "tenant_selection"
                } else {
                    "issued"
                };
                record_auth_flow(state.flow.as_str(), outcome);
                result
            }
            Err(err) => failure(state.flow, err),
        }
    }

    /// Second step of the multi-membership branch: a session for the chosen tenant.
    #[instrument(skip(self, identity))]
    pub async fn select_tenant(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        identity: &IdentityClaims,
    ) -> Result<AuthFlowResult, ServiceError> {
        if self
            .store
            .find_membership(user_id, tenant_id)
            .await?
            .is_none()
        {
            return Err(ServiceError::NotFound("Membership".to_string()));
        }

        let tenant = self
            .store
            .find_tenant(tenant_id)
            .await?
            .filter(Tenant::is_active)
            .ok_or_else(|| ServiceError::NotFound("Organization".to_string()))?;

        let token = self.issuer.issue(user_id, tenant.tenant_id, identity)?;
        record_auth_flow(AuthFlow::Default.as_str(), "issued");
        Ok(AuthFlowResult::issued(
            AuthFlow::Default,
            token,
            tenant.tenant_id,
            tenant.tenant_name,
            false,
        ))
    }

    fn decode_state(&self, raw: Option<&str>) -> CallbackState {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            None => CallbackState::fallback(&self.default_realm),
            Some(raw) => CallbackState::decode(raw, &self.default_realm).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Undecodable callback state, using default realm");
                CallbackState::fallback(&self.default_realm)
            }),
        }
    }

    async fn run(
        &self,
        request: &CallbackRequest,
        state: &CallbackState,
    ) -> Result<AuthFlowResult, ServiceError> {
        if request.code.trim().is_empty() {
            return Err(ServiceError::Validation(
                "Authorization code is missing".to_string(),
            ));
        }

        let tokens = match self
            .broker
            .exchange_code_for_tokens(&request.code, &request.redirect_uri, &state.realm)
            .await
        {
            Ok(Some(tokens)) => tokens,
            Ok(None) => {
                return Err(ServiceError::Authentication(
                    "Authorization code was rejected".to_string(),
                ))
            }
            Err(e) => {
                tracing::error!(error = %e, "Code exchange failed");
                return Err(ServiceError::Authentication(
                    "Could not complete sign-in with the identity provider".to_string(),
                ));
            }
        };
        let identity = IdentityClaims::from_tokens(&tokens)?;

        let candidate_id = self
            .store
            .find_user_id_by_subject(&state.realm, &identity.sub)
            .await?
            .unwrap_or_else(Uuid::new_v4);
        let user = User::new(
            candidate_id,
            identity.email.clone(),
            identity.email_verified,
            identity.given_name.clone(),
            identity.family_name.clone(),
            identity.display_name(),
        );

        let mut uow = self.store.begin().await?;
        let (user_id, outcome) = match self.dispatch(uow.as_mut(), state, &identity, &user).await {
            Ok(done) => done,
            Err(e) => {
                if let Err(rollback) = uow.rollback().await {
                    tracing::error!(error = %rollback, "Rollback failed");
                }
                return Err(e);
            }
        };
        uow.commit().await?;

        self.apply_side_effects(&outcome.side_effects).await;

        match outcome.resolution {
            Resolution::Issue {
                tenant_id,
                tenant_name,
                is_new_organization,
            } => {
                let token = self.issuer.issue(user_id, tenant_id, &identity)?;
                tracing::info!(%user_id, %tenant_id, is_new_organization, "Session issued");
                Ok(AuthFlowResult::issued(
                    state.flow,
                    token,
                    tenant_id,
                    tenant_name,
                    is_new_organization,
                ))
            }
            Resolution::Select { tenants } => {
                let selection_token = self.issuer.issue_selection(user_id, &identity)?;
                tracing::info!(%user_id, tenants = tenants.len(), "Tenant selection required");
                Ok(AuthFlowResult::select_tenant(
                    state.flow,
                    tenants,
                    selection_token,
                ))
            }
        }
    }

    async fn dispatch(
        &self,
        uow: &mut dyn UnitOfWork,
        state: &CallbackState,
        identity: &IdentityClaims,
        user: &User,
    ) -> Result<(Uuid, FlowOutcome), ServiceError> {
        let user_id = uow.upsert_user(user, &state.realm, &identity.sub).await?;
        let principal = Principal {
            user_id,
            realm: state.realm.clone(),
            external_subject_id: identity.sub.clone(),
            email: identity.email.clone(),
            email_verified: identity.email_verified,
        };

        let outcome = match state.flow {
            AuthFlow::Invitation => self.invitation_flow(uow, state, &principal).await?,
            AuthFlow::JoinLink => self.join_link_flow(uow, state, &principal).await?,
            AuthFlow::EnterpriseFirstAdmin => self.first_admin_flow(uow, &principal).await?,
            AuthFlow::NewOrg => self.new_org_flow(uow, identity, &principal).await?,
            AuthFlow::Default => self.default_flow(uow, identity, &principal).await?,
        };
        Ok((user_id, outcome))
    }

    async fn invitation_flow(
        &self,
        uow: &mut dyn UnitOfWork,
        state: &CallbackState,
        principal: &Principal,
    ) -> Result<FlowOutcome, ServiceError> {
        let token = state.invitation_token.as_deref().ok_or_else(|| {
            ServiceError::Validation("Invitation token is missing from the sign-in request".to_string())
        })?;

        let accepted = self.invitations.accept(uow, token, principal).await?;
        let tenant = active_tenant(uow, accepted.membership.tenant_id).await?;
        Ok(FlowOutcome::issue(&tenant, false))
    }

    async fn join_link_flow(
        &self,
        uow: &mut dyn UnitOfWork,
        state: &CallbackState,
        principal: &Principal,
    ) -> Result<FlowOutcome, ServiceError> {
        let token = state.join_token.as_deref().ok_or_else(|| {
            ServiceError::Validation("Join token is missing from the sign-in request".to_string())
        })?;

        let joined = self.join_links.use_link(uow, token, principal).await?;
        let tenant = active_tenant(uow, joined.membership.tenant_id).await?;
        let assign = joined.role.map(|role| SideEffect::AssignRole {
            realm: principal.realm.clone(),
            external_user_id: principal.external_subject_id.clone(),
            role_name: role.role_name,
        });
        Ok(FlowOutcome::issue(&tenant, false).with(assign))
    }

    async fn first_admin_flow(
        &self,
        uow: &mut dyn UnitOfWork,
        principal: &Principal,
    ) -> Result<FlowOutcome, ServiceError> {
        let tenant = uow
            .find_tenant_by_realm(&principal.realm)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Organization for this realm".to_string()))?;
        if !tenant.is_enterprise() {
            return Err(ServiceError::Validation(
                "Realm does not belong to an enterprise organization".to_string(),
            ));
        }

        let tenant = uow
            .lock_tenant(tenant.tenant_id)
            .await?
            .filter(Tenant::is_active)
            .ok_or_else(|| ServiceError::NotFound("Organization".to_string()))?;

        if uow.count_memberships(tenant.tenant_id).await? > 0 {
            return Err(ServiceError::AlreadyHasAdministrator);
        }

        let membership = Membership::new(
            principal.user_id,
            tenant.tenant_id,
            true,
            Some(principal.external_subject_id.clone()),
        );
        uow.insert_membership(&membership).await.map_err(|e| {
            if e.is_conflict() {
                ServiceError::AlreadyHasAdministrator
            } else {
                ServiceError::Store(e)
            }
        })?;

        tracing::info!(tenant_id = %tenant.tenant_id, user_id = %principal.user_id, "First administrator assigned");
        Ok(FlowOutcome::issue(&tenant, false).with(Some(SideEffect::DisableRegistration {
            realm: principal.realm.clone(),
        })))
    }

    async fn new_org_flow(
        &self,
        uow: &mut dyn UnitOfWork,
        identity: &IdentityClaims,
        principal: &Principal,
    ) -> Result<FlowOutcome, ServiceError> {
        if let Some(tenant) = uow.find_tenant_by_realm(&principal.realm).await? {
            if tenant.is_enterprise() {
                return Err(ServiceError::Validation(
                    "Organizations cannot be created from an enterprise realm".to_string(),
                ));
            }
        }
        self.create_organization(uow, identity, principal).await
    }

    async fn default_flow(
        &self,
        uow: &mut dyn UnitOfWork,
        identity: &IdentityClaims,
        principal: &Principal,
    ) -> Result<FlowOutcome, ServiceError> {
        let memberships = uow.list_memberships_for_user(principal.user_id).await?;

        match memberships.as_slice() {
            [] => {
                let enterprise = uow
                    .find_tenant_by_realm(&principal.realm)
                    .await?
                    .filter(Tenant::is_enterprise);
                match enterprise {
                    Some(tenant) => self.sso_flow(uow, tenant, principal).await,
                    None => self.create_organization(uow, identity, principal).await,
                }
            }
            [only] => Ok(FlowOutcome {
                resolution: Resolution::Issue {
                    tenant_id: only.tenant_id,
                    tenant_name: only.tenant_name.clone(),
                    is_new_organization: false,
                },
                side_effects: Vec::new(),
            }),
            many => Ok(FlowOutcome {
                resolution: Resolution::Select {
                    tenants: many
                        .iter()
                        .map(|m| TenantOption {
                            tenant_id: m.tenant_id,
                            tenant_name: m.tenant_name.clone(),
                            is_admin: m.is_admin,
                        })
                        .collect(),
                },
                side_effects: Vec::new(),
            }),
        }
    }

    async fn sso_flow(
        &self,
        uow: &mut dyn UnitOfWork,
        tenant: Tenant,
        principal: &Principal,
    ) -> Result<FlowOutcome, ServiceError> {
        if !tenant.is_active() {
            return Err(ServiceError::NotFound("Organization".to_string()));
        }

        let assign = match self.sso.try_join(uow, &tenant, principal).await? {
            SsoDecision::DomainMatch { role, .. } => role.map(|role| SideEffect::AssignRole {
                realm: principal.realm.clone(),
                external_user_id: principal.external_subject_id.clone(),
                role_name: role.role_name,
            }),
            SsoDecision::Invitation { .. } => None,
        };
        Ok(FlowOutcome::issue(&tenant, false).with(assign))
    }

    async fn create_organization(
        &self,
        uow: &mut dyn UnitOfWork,
        identity: &IdentityClaims,
        principal: &Principal,
    ) -> Result<FlowOutcome, ServiceError> {
        let tenant = Tenant::new_standard(default_organization_name(identity.given_name.as_deref()));
        uow.insert_tenant(&tenant).await?;

        let membership = Membership::new(
            principal.user_id,
            tenant.tenant_id,
            true,
            Some(principal.external_subject_id.clone()),
        );
        uow.insert_membership(&membership).await?;

        tracing::info!(tenant_id = %tenant.tenant_id, user_id = %principal.user_id, "Organization created");
        Ok(FlowOutcome::issue(&tenant, true))
    }

    async fn apply_side_effects(&self, effects: &[SideEffect]) {
        for effect in effects {
            let result = match effect {
                SideEffect::DisableRegistration { realm } => {
                    self.broker.disable_realm_registration(realm).await
                }
                SideEffect::AssignRole {
                    realm,
                    external_user_id,
                    role_name,
                } => {
                    self.broker
                        .assign_role(realm, external_user_id, role_name)
                        .await
                }
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, effect = ?effect, "Post-login provider update failed");
            }
        }
    }
}

async fn active_tenant(uow: &mut dyn UnitOfWork, tenant_id: Uuid) -> Result<Tenant, ServiceError> {
    uow.find_tenant(tenant_id)
        .await?
        .filter(Tenant::is_active)
        .ok_or_else(|| ServiceError::NotFound("Organization".to_string()))
}

fn failure(flow: AuthFlow, err: ServiceError) -> AuthFlowResult {
    let tag = if matches!(err, ServiceError::Denied(_)) {
        UNAUTHORIZED_SSO_ACCESS
    } else {
        flow.as_str()
    };

    match &err {
        ServiceError::Store(_)
        | ServiceError::Internal(_)
        | ServiceError::Broker(_)
        | ServiceError::Configuration(_) => {
            tracing::error!(flow = tag, error = %err, "Sign-in failed")
        }
        _ => tracing::warn!(flow = tag, error = %err, "Sign-in refused"),
    }

    record_auth_flow(tag, err.error_code());
    AuthFlowResult::failure(tag, err.error_code(), err.user_message())
}
