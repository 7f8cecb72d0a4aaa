pub mod auth;

pub use auth::{bearer_token, session_auth_middleware};
