//! Credential manager
//!
//! Resolves the auth config for a (server, configuration) pair, selects the
//! right connected account for an ownership mode, refreshes OAuth2 tokens
//! before expiry and persists the refreshed credentials atomically.

use chrono::Utc;
use oauth2::{AuthUrl, ClientId, CsrfToken, RedirectUrl, Scope, basic::BasicClient};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::constants::TOKEN_REFRESH_LEEWAY_SECS;
use crate::error::AuthError;
use crate::model::*;
use crate::storage::Storage;
use crate::{GatewayError, Result};

/// Pick the entry from `server.auth_configs` matching the configuration's auth type
pub fn resolve_auth_config(
    server: &McpServer,
    configuration: &McpServerConfiguration,
) -> Result<AuthConfig> {
    server
        .auth_configs
        .iter()
        .find(|config| config.auth_type() == configuration.auth_type)
        .cloned()
        .ok_or_else(|| {
            GatewayError::Auth(AuthError::ConfigMismatch {
                server: server.name.clone(),
                auth_type: configuration.auth_type.as_str().to_string(),
            })
        })
}

#[derive(Debug, Deserialize)]
struct TokenRefreshResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
}

/// Manages connected-account credentials and OAuth2 refresh
#[derive(Clone)]
pub struct CredentialManager {
    storage: Arc<dyn Storage>,
    http_client: reqwest::Client,
    /// Seconds before expiry at which a token is refreshed
    leeway_secs: i64,
}

impl CredentialManager {
    pub fn new(storage: Arc<dyn Storage>, http_client: reqwest::Client) -> Self {
        Self {
            storage,
            http_client,
            leeway_secs: TOKEN_REFRESH_LEEWAY_SECS,
        }
    }

    /// Override the refresh leeway (tests)
    pub fn with_leeway(mut self, leeway_secs: i64) -> Self {
        self.leeway_secs = leeway_secs;
        self
    }

    /// Fetch the credentials for a configuration under its ownership mode,
    /// refreshing and persisting OAuth2 tokens that are about to expire.
    ///
    /// `user_id` is required for individual ownership and ignored otherwise.
    pub async fn get_credentials(
        &self,
        server: &McpServer,
        configuration: &McpServerConfiguration,
        user_id: Option<Uuid>,
    ) -> Result<AuthCredentials> {
        let ownership = configuration.connected_account_ownership;
        if ownership == ConnectedAccountOwnership::Individual && user_id.is_none() {
            return Err(GatewayError::validation(
                "user id is required for individual connected accounts",
            ));
        }

        let account = self
            .storage
            .get_connected_account(configuration.id, ownership, user_id)
            .await?
            .ok_or_else(|| GatewayError::Auth(AuthError::NotConnected(configuration.id)))?;

        let credentials = account.auth_credentials.clone();
        if !self.needs_refresh(&credentials) {
            return Ok(credentials);
        }

        tracing::warn!(
            server = %server.name,
            configuration_id = %configuration.id,
            "access token near expiry, refreshing"
        );
        let auth_config = resolve_auth_config(server, configuration)?;
        let refreshed = self.refresh_oauth2(&auth_config, &credentials).await?;

        // Persist before returning so a subsequent lookup sees the new token
        self.storage
            .update_connected_account_credentials(account.id, &refreshed)
            .await?;

        Ok(refreshed)
    }

    /// Whether the credentials expire within the leeway window
    pub fn needs_refresh(&self, credentials: &AuthCredentials) -> bool {
        match credentials {
            AuthCredentials::Oauth2 {
                expires_at: Some(expires_at),
                ..
            } => *expires_at < Utc::now().timestamp() + self.leeway_secs,
            _ => false,
        }
    }

    /// Run the OAuth2 refresh protocol against the configured token endpoint
    async fn refresh_oauth2(
        &self,
        auth_config: &AuthConfig,
        credentials: &AuthCredentials,
    ) -> Result<AuthCredentials> {
        let AuthConfig::Oauth2 {
            client_id,
            client_secret,
            refresh_token_url,
            token_endpoint_auth_method,
            ..
        } = auth_config
        else {
            return Err(GatewayError::Auth(AuthError::OAuth(format!(
                "cannot refresh {} credentials",
                credentials.auth_type().as_str()
            ))));
        };
        let AuthCredentials::Oauth2 {
            refresh_token: existing_refresh_token,
            token_type: existing_token_type,
            ..
        } = credentials
        else {
            return Err(GatewayError::Auth(AuthError::OAuth(
                "credentials are not oauth2".to_string(),
            )));
        };

        let refresh_token = existing_refresh_token.as_ref().ok_or_else(|| {
            GatewayError::Auth(AuthError::ReauthenticationRequired(
                "no refresh token stored".to_string(),
            ))
        })?;

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let auth_method = token_endpoint_auth_method.unwrap_or_default();
        let request = match auth_method {
            TokenEndpointAuthMethod::ClientSecretBasic => self
                .http_client
                .post(refresh_token_url)
                .basic_auth(client_id, client_secret.as_deref()),
            TokenEndpointAuthMethod::ClientSecretPost => {
                form.push(("client_id", client_id));
                if let Some(secret) = client_secret.as_deref() {
                    form.push(("client_secret", secret));
                }
                self.http_client.post(refresh_token_url)
            }
        };

        let response = request.form(&form).send().await.map_err(|e| {
            GatewayError::Auth(AuthError::Transient(format!("token endpoint: {}", e)))
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::Auth(AuthError::Transient(format!(
                "token endpoint returned {}",
                status
            ))));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Auth(AuthError::ProviderRejected(format!(
                "{}: {}",
                status, body
            ))));
        }

        let token_response: TokenRefreshResponse = response.json().await.map_err(|e| {
            GatewayError::Auth(AuthError::ProviderRejected(format!(
                "invalid token response: {}",
                e
            )))
        })?;

        let expires_at = match (token_response.expires_at, token_response.expires_in) {
            (Some(expires_at), _) => Some(expires_at),
            (None, Some(expires_in)) => Some(Utc::now().timestamp() + expires_in),
            (None, None) => None,
        };

        let (Some(access_token), Some(expires_at)) = (token_response.access_token, expires_at)
        else {
            return Err(GatewayError::Auth(AuthError::ProviderRejected(
                "token response missing access_token or expiry".to_string(),
            )));
        };

        // Providers may rotate refresh tokens; keep the old one unless replaced
        let refresh_token = token_response
            .refresh_token
            .or_else(|| existing_refresh_token.clone());

        Ok(AuthCredentials::Oauth2 {
            access_token,
            token_type: token_response
                .token_type
                .or_else(|| existing_token_type.clone()),
            expires_at: Some(expires_at),
            refresh_token,
        })
    }

    /// Build the authorization URL a user is sent to when linking an account.
    ///
    /// The redirect URI is rooted at the frontend base URL from configuration.
    pub fn authorization_url(
        &self,
        auth_config: &AuthConfig,
        redirect_uri: &str,
        state: &str,
    ) -> Result<String> {
        let AuthConfig::Oauth2 {
            client_id,
            scope,
            authorize_url,
            ..
        } = auth_config
        else {
            return Err(GatewayError::Auth(AuthError::OAuth(
                "authorization URL requires an oauth2 config".to_string(),
            )));
        };

        let client = BasicClient::new(ClientId::new(client_id.clone()))
            .set_auth_uri(
                AuthUrl::new(authorize_url.clone())
                    .map_err(|e| GatewayError::Auth(AuthError::OAuth(format!("invalid authorize URL: {}", e))))?,
            )
            .set_redirect_uri(
                RedirectUrl::new(redirect_uri.to_string())
                    .map_err(|e| GatewayError::Auth(AuthError::OAuth(format!("invalid redirect URI: {}", e))))?,
            );

        let state = state.to_string();
        let (url, _) = client
            .authorize_url(move || CsrfToken::new(state))
            .add_scopes(scope.split_whitespace().map(|s| Scope::new(s.to_string())))
            .url();
        Ok(url.to_string())
    }
}
