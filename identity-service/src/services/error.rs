use service_core::error::AppError;
use thiserror::Error;

/// Domain failures of the identity flows. Every variant has a stable
/// `error_code` carried to clients next to a user-facing message.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} is expired or revoked")]
    InvalidOrExpired(String),

    #[error("Signed-in email does not match the invitation")]
    EmailMismatch,

    #[error("User is already a member of this organization")]
    AlreadyMember,

    #[error("Organization already has an administrator")]
    AlreadyHasAdministrator,

    #[error("Access denied: {0}")]
    Denied(String),

    #[error("Identity provider error: {0}")]
    Broker(String),

    #[error("Store error: {0}")]
    Store(#[from] AppError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::Configuration(_) => "configuration_error",
            ServiceError::Validation(_) => "validation_error",
            ServiceError::Authentication(_) => "authentication_error",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::InvalidOrExpired(_) => "expired_or_revoked",
            ServiceError::EmailMismatch => "email_mismatch",
            ServiceError::AlreadyMember => "already_member",
            ServiceError::AlreadyHasAdministrator => "already_has_administrator",
            ServiceError::Denied(_) => "authorization_denied",
            ServiceError::Broker(_) => "upstream_error",
            ServiceError::Store(_) | ServiceError::Internal(_) => "internal_error",
        }
    }

    /// Message safe to show an end user. Infrastructure detail stays in logs.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::Store(_) | ServiceError::Internal(_) => {
                "An unexpected error occurred. Please try again.".to_string()
            }
            ServiceError::Broker(_) => {
                "The identity provider is unavailable. Please try again.".to_string()
            }
            ServiceError::Configuration(_) => "Sign-in is not configured.".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Configuration(e) => AppError::ConfigError(anyhow::anyhow!(e)),
            ServiceError::Validation(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            ServiceError::Authentication(e) => AppError::AuthError(anyhow::anyhow!(e)),
            ServiceError::NotFound(what) => {
                AppError::NotFound(anyhow::anyhow!("{} not found", what))
            }
            ServiceError::InvalidOrExpired(what) => {
                AppError::Gone(anyhow::anyhow!("{} is expired or revoked", what))
            }
            ServiceError::EmailMismatch => AppError::Forbidden(anyhow::anyhow!(
                "Signed-in email does not match the invitation"
            )),
            ServiceError::AlreadyMember => AppError::Conflict(anyhow::anyhow!(
                "User is already a member of this organization"
            )),
            ServiceError::AlreadyHasAdministrator => AppError::Conflict(anyhow::anyhow!(
                "Organization already has an administrator"
            )),
            ServiceError::Denied(e) => AppError::Forbidden(anyhow::anyhow!(e)),
            ServiceError::Broker(e) => AppError::BadGateway(e),
            ServiceError::Store(e) => e,
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_and_expired_have_distinct_codes() {
        let missing = ServiceError::NotFound("Invitation".to_string());
        let expired = ServiceError::InvalidOrExpired("Invitation".to_string());

        assert_ne!(missing.error_code(), expired.error_code());
        assert_eq!(missing.user_message(), "Invitation not found");
        assert_eq!(expired.user_message(), "Invitation is expired or revoked");
    }

    #[test]
    fn test_internal_detail_is_hidden_from_users() {
        let err = ServiceError::Store(AppError::DatabaseError(anyhow::anyhow!(
            "relation \"memberships\" does not exist"
        )));

        assert_eq!(err.error_code(), "internal_error");
        assert!(!err.user_message().contains("memberships"));
    }

    #[test]
    fn test_conflicts_map_to_app_conflict() {
        assert!(AppError::from(ServiceError::AlreadyMember).is_conflict());
        assert!(AppError::from(ServiceError::AlreadyHasAdministrator).is_conflict());
        assert!(matches!(
            AppError::from(ServiceError::InvalidOrExpired("Join link".to_string())),
            AppError::Gone(_)
        ));
    }
}
