pub mod auth_flow;
pub mod invitation;
pub mod join_link;
pub mod membership;
pub mod role;
pub mod tenant;
pub mod user;

pub use auth_flow::{AuthFlow, AuthFlowResult, CallbackState, TenantOption, UNAUTHORIZED_SSO_ACCESS};
pub use invitation::{InvitationResponse, InvitationStatus, TenantInvitation};
pub use join_link::{JoinLinkResponse, TenantJoinLink};
pub use membership::{Membership, MembershipSummary};
pub use role::{Permission, Policy, Role};
pub use tenant::{InvitationMode, Tenant, TenantType};
pub use user::{Principal, User, UserIdentity};
