use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub idp: IdpConfig,
    pub tenancy: TenancyConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub private_key_path: String,
    pub public_key_path: String,
    pub issuer: String,
}

/// Identity provider (Keycloak-compatible) connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IdpConfig {
    pub base_url: String,
    /// Realm the admin client authenticates against.
    pub admin_realm: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    /// Shared realm used by standard tenants and as the fallback when the
    /// callback state cannot be decoded.
    pub default_realm: String,
    /// Redirect URI sent with the code exchange when the callback carries none.
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenancyConfig {
    pub invitation_expiry_days: i64,
    pub join_link_expiry_days: i64,
    pub permission_cache_ttl_seconds: i64,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            invitation_expiry_days: 7,
            join_link_expiry_days: 30,
            permission_cache_ttl_seconds: 900,
        }
    }
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = IdentityConfig {
            otlp_endpoint: env::var("OTLP_ENDPOINT")
                .ok()
                .or_else(|| Some(common_config.otlp_endpoint.clone()))
                .filter(|e| !e.is_empty()),
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", Some("redis://127.0.0.1:6379"), is_prod)?,
            },
            jwt: JwtConfig {
                private_key_path: get_env("JWT_PRIVATE_KEY_PATH", None, is_prod)?,
                public_key_path: get_env("JWT_PUBLIC_KEY_PATH", None, is_prod)?,
                issuer: get_env("JWT_ISSUER", Some("identity-service"), is_prod)?,
            },
            idp: IdpConfig {
                base_url: get_env("IDP_BASE_URL", None, is_prod)?,
                admin_realm: get_env("IDP_ADMIN_REALM", Some("master"), is_prod)?,
                client_id: get_env("IDP_CLIENT_ID", None, is_prod)?,
                client_secret: Secret::new(get_env("IDP_CLIENT_SECRET", None, is_prod)?),
                default_realm: get_env("IDP_DEFAULT_REALM", None, is_prod)?,
                redirect_uri: get_env(
                    "IDP_REDIRECT_URI",
                    Some("http://localhost:8080/auth/callback"),
                    is_prod,
                )?,
            },
            tenancy: TenancyConfig {
                invitation_expiry_days: parse_env("INVITATION_EXPIRY_DAYS", "7", is_prod)?,
                join_link_expiry_days: parse_env("JOIN_LINK_EXPIRY_DAYS", "30", is_prod)?,
                permission_cache_ttl_seconds: parse_env(
                    "PERMISSION_CACHE_TTL_SECONDS",
                    "900",
                    is_prod,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.tenancy.invitation_expiry_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "INVITATION_EXPIRY_DAYS must be positive"
            )));
        }

        if self.tenancy.join_link_expiry_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JOIN_LINK_EXPIRY_DAYS must be positive"
            )));
        }

        if self.tenancy.permission_cache_ttl_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PERMISSION_CACHE_TTL_SECONDS must be positive"
            )));
        }

        if self.idp.default_realm.trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "IDP_DEFAULT_REALM must not be empty"
            )));
        }

        if self.environment == Environment::Prod && !self.idp.base_url.starts_with("https://") {
            tracing::warn!("IDP_BASE_URL is not https in production");
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod && default.is_none() {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> IdentityConfig {
        IdentityConfig {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "identity-service".to_string(),
            service_version: "0.1.0".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: "postgres://localhost/identity_test".to_string(),
                max_connections: 5,
                min_connections: 1,
            },
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
            },
            jwt: JwtConfig {
                private_key_path: "private.pem".to_string(),
                public_key_path: "public.pem".to_string(),
                issuer: "identity-service".to_string(),
            },
            idp: IdpConfig {
                base_url: "http://localhost:8081".to_string(),
                admin_realm: "master".to_string(),
                client_id: "identity".to_string(),
                client_secret: Secret::new("secret".to_string()),
                default_realm: "groundup".to_string(),
                redirect_uri: "http://localhost:8080/auth/callback".to_string(),
            },
            tenancy: TenancyConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_non_positive_expiry_rejected() {
        let mut config = test_config();
        config.tenancy.invitation_expiry_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_default_realm_rejected() {
        let mut config = test_config();
        config.idp.default_realm = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Prod));
        assert!("staging".parse::<Environment>().is_err());
    }
}
