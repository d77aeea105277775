//! IAM auth token generation for Aurora DSQL

use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_dsql::auth_token::{AuthTokenGenerator, Config as AuthTokenConfig};

use dsqlink_core::{Error, Result};

use crate::config::{Config, ResolvedConfig};

/// The administrative database role. Signed with the admin variant of the
/// token-signing call.
pub const ADMIN_USER: &str = "admin";

/// Boundary for minting IAM auth tokens.
///
/// The token cache holds one signer for its lifetime; the production
/// implementation is [`DsqlTokenSigner`].
#[async_trait]
pub trait TokenSigner: Send + Sync {
    async fn generate_token(
        &self,
        host: &str,
        region: &str,
        user: &str,
        expires_in: Duration,
    ) -> Result<String>;
}

/// Token signer backed by the AWS SDK's DSQL auth-token generator.
///
/// Credentials are resolved once at construction (profile or default chain)
/// and reused for every signing call.
pub struct DsqlTokenSigner {
    sdk_config: SdkConfig,
}

impl DsqlTokenSigner {
    /// Resolve credentials for the given configuration and build a signer.
    pub async fn new(resolved: &ResolvedConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(resolved.region().to_string()));
        if let Some(profile) = resolved.profile() {
            loader = loader.profile_name(profile);
        }
        Ok(Self {
            sdk_config: loader.load().await,
        })
    }

    /// Build a signer over an already-loaded SDK config, e.g. one carrying
    /// custom credentials.
    pub fn from_sdk_config(sdk_config: SdkConfig) -> Self {
        Self { sdk_config }
    }
}

#[async_trait]
impl TokenSigner for DsqlTokenSigner {
    async fn generate_token(
        &self,
        host: &str,
        region: &str,
        user: &str,
        expires_in: Duration,
    ) -> Result<String> {
        let config = AuthTokenConfig::builder()
            .hostname(host)
            .region(Region::new(region.to_string()))
            .expires_in(expires_in.as_secs())
            .build()
            .map_err(|e| Error::Token(e.to_string()))?;
        let generator = AuthTokenGenerator::new(config);

        let token = if user == ADMIN_USER {
            generator.db_connect_admin_auth_token(&self.sdk_config).await
        } else {
            generator.db_connect_auth_token(&self.sdk_config).await
        }
        .map_err(|e| Error::Token(e.to_string()))?;

        let token = token.to_string();
        if token.is_empty() {
            return Err(Error::Token("generated auth token is empty".into()));
        }

        tracing::debug!(host = %host, user = %user, "generated auth token");
        Ok(token)
    }
}

/// Generate one token for a connection URL, without pooling or caching.
///
/// Useful when wiring a third-party driver directly: the returned token is
/// the connection password.
pub async fn generate_token(conn_string: &str) -> Result<String> {
    let resolved = Config::parse(conn_string)?.resolve()?;
    let signer = DsqlTokenSigner::new(&resolved).await?;
    signer
        .generate_token(
            resolved.host(),
            resolved.region(),
            resolved.user(),
            resolved.token_duration(),
        )
        .await
}
