//! HTTP handlers for identity-service. Thin: parsing, access checks and
//! status mapping only.

pub mod callback;
pub mod context;
pub mod invitation;
pub mod join_link;
pub mod metrics;
pub mod permission;
pub mod tenant;

pub use callback::*;
pub use invitation::*;
pub use join_link::*;
pub use permission::*;
pub use tenant::*;
