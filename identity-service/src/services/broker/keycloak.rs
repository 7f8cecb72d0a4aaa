//! Keycloak-compatible broker over the OpenID Connect token endpoint and the
//! admin REST API.

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::observability::TracedClientExt;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::instrument;

use super::{BrokerTokens, BrokerUser, IdentityBroker, NewBrokerUser, RequiredAction};
use crate::config::IdpConfig;
use crate::services::ServiceError;

// Refresh the admin token this long before the provider says it expires.
const ADMIN_TOKEN_SKEW: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct AdminTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedAdminToken {
    access_token: String,
    refresh_at: Instant,
}

pub struct KeycloakBroker {
    client: reqwest::Client,
    base_url: String,
    admin_realm: String,
    client_id: String,
    client_secret: Secret<String>,
    admin_token: Mutex<Option<CachedAdminToken>>,
}

impl KeycloakBroker {
    pub fn new(config: &IdpConfig) -> Result<Self, ServiceError> {
        if config.base_url.trim().is_empty() || config.client_id.trim().is_empty() {
            return Err(ServiceError::Configuration(
                "IDP_BASE_URL and IDP_CLIENT_ID must be set".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ServiceError::Configuration(format!("HTTP client: {}", e)))?;

        tracing::info!(
            base_url = %config.base_url,
            admin_realm = %config.admin_realm,
            "Identity provider client configured"
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            admin_realm: config.admin_realm.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            admin_token: Mutex::new(None),
        })
    }

    fn token_url(&self, realm: &str) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/token",
            self.base_url, realm
        )
    }

    fn admin_url(&self, realm: &str, path: &str) -> String {
        if path.is_empty() {
            format!("{}/admin/realms/{}", self.base_url, realm)
        } else {
            format!("{}/admin/realms/{}/{}", self.base_url, realm, path)
        }
    }

    async fn admin_token(&self) -> Result<String, ServiceError> {
        let mut cached = self.admin_token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.access_token.clone());
            }
        }

        let response = self
            .client
            .traced_post(&self.token_url(&self.admin_realm))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret().as_str()),
            ])
            .send()
            .await
            .map_err(|e| ServiceError::Broker(format!("Admin token request failed: {}", e)))?;

        let response = ensure_success(response, "admin token").await?;
        let token: AdminTokenResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Broker(format!("Admin token response unreadable: {}", e)))?;

        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(60));
        let refresh_at = Instant::now() + lifetime.saturating_sub(ADMIN_TOKEN_SKEW);
        *cached = Some(CachedAdminToken {
            access_token: token.access_token.clone(),
            refresh_at,
        });

        Ok(token.access_token)
    }
}

async fn ensure_success(
    response: reqwest::Response,
    operation: &str,
) -> Result<reqwest::Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::error!(%status, body = %body, operation, "Identity provider request failed");
    Err(ServiceError::Broker(format!(
        "{} failed with status {}",
        operation, status
    )))
}

fn transport(operation: &'static str) -> impl Fn(reqwest::Error) -> ServiceError {
    move |e| ServiceError::Broker(format!("{} request failed: {}", operation, e))
}

#[async_trait]
impl IdentityBroker for KeycloakBroker {
    #[instrument(skip(self, code), fields(realm = %realm))]
    async fn exchange_code_for_tokens(
        &self,
        code: &str,
        redirect_uri: &str,
        realm: &str,
    ) -> Result<Option<BrokerTokens>, ServiceError> {
        let response = self
            .client
            .traced_post(&self.token_url(realm))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret().as_str()),
            ])
            .send()
            .await
            .map_err(transport("code exchange"))?;

        if response.status().is_client_error() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %body, "Provider rejected authorization code");
            return Ok(None);
        }

        let response = ensure_success(response, "code exchange").await?;
        let tokens = response
            .json::<BrokerTokens>()
            .await
            .map_err(|e| ServiceError::Broker(format!("Token response unreadable: {}", e)))?;

        Ok(Some(tokens))
    }

    #[instrument(skip(self))]
    async fn get_user_by_id(
        &self,
        realm: &str,
        user_id: &str,
    ) -> Result<Option<BrokerUser>, ServiceError> {
        let token = self.admin_token().await?;
        let response = self
            .client
            .traced_get(&self.admin_url(realm, &format!("users/{}", user_id)))
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport("get user"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = ensure_success(response, "get user").await?;
        let user = response
            .json::<BrokerUser>()
            .await
            .map_err(|e| ServiceError::Broker(format!("User response unreadable: {}", e)))?;
        Ok(Some(user))
    }

    #[instrument(skip(self, email))]
    async fn get_user_id_by_email(
        &self,
        realm: &str,
        email: &str,
    ) -> Result<Option<String>, ServiceError> {
        let token = self.admin_token().await?;
        let response = self
            .client
            .traced_get(&self.admin_url(realm, "users"))
            .query(&[("email", email.trim()), ("exact", "true")])
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport("find user by email"))?;

        let response = ensure_success(response, "find user by email").await?;
        let users = response
            .json::<Vec<BrokerUser>>()
            .await
            .map_err(|e| ServiceError::Broker(format!("User search response unreadable: {}", e)))?;

        Ok(users.into_iter().next().map(|u| u.id))
    }

    #[instrument(skip(self, user))]
    async fn create_user(&self, realm: &str, user: &NewBrokerUser) -> Result<String, ServiceError> {
        let token = self.admin_token().await?;
        let response = self
            .client
            .traced_post(&self.admin_url(realm, "users"))
            .json(user)
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport("create user"))?;

        let response = ensure_success(response, "create user").await?;

        // 201 Created with the new account in the Location header.
        let id = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|location| location.trim_end_matches('/').rsplit('/').next())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ServiceError::Broker("Create user response has no Location header".to_string())
            })?;

        tracing::info!(realm, provider_user_id = %id, "Provider account created");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn assign_role(
        &self,
        realm: &str,
        user_id: &str,
        role_name: &str,
    ) -> Result<(), ServiceError> {
        let token = self.admin_token().await?;

        let response = self
            .client
            .traced_get(&self.admin_url(realm, &format!("roles/{}", role_name)))
            .bearer_auth(token.clone())
            .send()
            .await
            .map_err(transport("get role"))?;
        let response = ensure_success(response, "get role").await?;
        let role = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ServiceError::Broker(format!("Role response unreadable: {}", e)))?;

        let response = self
            .client
            .traced_post(&self.admin_url(
                realm,
                &format!("users/{}/role-mappings/realm", user_id),
            ))
            .json(&[role])
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport("assign role"))?;
        ensure_success(response, "assign role").await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn send_notification_email(
        &self,
        realm: &str,
        user_id: &str,
        actions: &[RequiredAction],
    ) -> Result<(), ServiceError> {
        let token = self.admin_token().await?;
        let response = self
            .client
            .traced_put(&self.admin_url(
                realm,
                &format!("users/{}/execute-actions-email", user_id),
            ))
            .json(actions)
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport("execute actions email"))?;
        ensure_success(response, "execute actions email").await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_realm(&self, realm: &str, display_name: &str) -> Result<(), ServiceError> {
        let token = self.admin_token().await?;
        let response = self
            .client
            .traced_post(&format!("{}/admin/realms", self.base_url))
            .json(&serde_json::json!({
                "realm": realm,
                "displayName": display_name,
                "enabled": true,
                "registrationAllowed": true,
                "verifyEmail": true,
            }))
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport("create realm"))?;
        ensure_success(response, "create realm").await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_realm(&self, realm: &str) -> Result<(), ServiceError> {
        let token = self.admin_token().await?;
        let response = self
            .client
            .traced_delete(&self.admin_url(realm, ""))
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport("delete realm"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response, "delete realm").await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn disable_realm_registration(&self, realm: &str) -> Result<(), ServiceError> {
        let token = self.admin_token().await?;
        let response = self
            .client
            .traced_put(&self.admin_url(realm, ""))
            .json(&serde_json::json!({ "registrationAllowed": false }))
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport("update realm"))?;
        ensure_success(response, "update realm").await?;
        Ok(())
    }
}
