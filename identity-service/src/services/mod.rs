//! Services layer for identity-service.
//!
//! Login resolution, the invitation and join-link ledgers, SSO auto-join,
//! permission expansion and token issuing.

mod auth_flow;
pub mod broker;
pub mod error;
mod invitation;
mod join_link;
mod jwt;
pub mod metrics;
mod permission;
pub mod redis;
mod sso;
mod tenant;

pub use auth_flow::{default_organization_name, AuthFlowOrchestrator, CallbackRequest};
pub use broker::{
    BrokerCall, BrokerOp, BrokerTokens, BrokerUser, IdentityBroker, IdentityClaims,
    KeycloakBroker, MockIdentityBroker,
};
pub use error::ServiceError;
pub use invitation::{
    AcceptedInvitation, CreateInvitationRequest, CreatedInvitation, InvitationLedger,
};
pub use join_link::{CreateJoinLinkRequest, CreatedJoinLink, JoinLinkLedger, JoinedViaLink};
pub use jwt::{SelectionClaims, SessionClaims, TokenIssuer, SESSION_TTL_MINUTES};
pub use permission::{
    is_platform_permission, PermissionResolver, PERMISSION_MANAGE_PERMISSION,
    PLATFORM_PERMISSIONS, TENANT_CREATE_PERMISSION,
};
pub use redis::{CacheStore, MockCache, RedisService};
pub use sso::{domain_allowed, SsoAutoJoinMatcher, SsoDecision, FALLBACK_ROLE_NAME};
pub use tenant::{
    normalize_domains, CreateEnterpriseTenantRequest, CreateRoleRequest, TenantService,
};
