//! Connection configuration: mutable builder, URL parsing, and the
//! immutable resolved form

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use dsqlink_core::{ConnectParams, Error, Result};

use crate::build_application_name;
use crate::endpoint::{build_hostname, is_cluster_id, parse_region, region_from_env};


pub const DEFAULT_USER: &str = "admin";
pub const DEFAULT_DATABASE: &str = "postgres";
pub const DEFAULT_PORT: u16 = 5432;

/// Default token validity, the maximum Aurora DSQL allows.
pub const DEFAULT_TOKEN_DURATION: Duration = Duration::from_secs(15 * 60);

/// Default maximum connection lifetime, aligned with DSQL's one-hour
/// connection bound.
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(55 * 60);

pub const DEFAULT_POOL_SIZE: usize = 5;

/// Configuration for connecting to Aurora DSQL.
///
/// A mutable builder; [`Config::resolve`] validates it and produces the
/// immutable [`ResolvedConfig`] that pools and connections hold on to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cluster endpoint or bare cluster ID. Required.
    host: String,
    /// AWS region. Optional when parseable from the hostname or present in
    /// the environment.
    region: Option<String>,
    user: Option<String>,
    database: Option<String>,
    port: Option<u16>,
    /// AWS profile for credential resolution.
    profile: Option<String>,
    token_duration_secs: Option<u64>,
    max_lifetime_secs: Option<u64>,
    pool_size: Option<usize>,
    /// ORM/framework tag prefixed onto the reported application_name.
    orm_tag: Option<String>,
}

impl Config {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            region: None,
            user: None,
            database: None,
            port: None,
            profile: None,
            token_duration_secs: None,
            max_lifetime_secs: None,
            pool_size: None,
            orm_tag: None,
        }
    }

    /// Parse a `postgres://` or `postgresql://` connection URL.
    ///
    /// DSQL-specific options ride in the query string: `region`, `profile`,
    /// and `tokenDurationSecs`.
    pub fn parse(conn_string: &str) -> Result<Self> {
        let url = Url::parse(conn_string)
            .map_err(|e| Error::Configuration(format!("invalid connection string: {}", e)))?;

        match url.scheme() {
            "postgres" | "postgresql" => {}
            other => {
                return Err(Error::Configuration(format!(
                    "unsupported scheme '{}', expected postgres:// or postgresql://",
                    other
                )));
            }
        }

        let mut config = Self::new(url.host_str().unwrap_or_default());

        if !url.username().is_empty() {
            config.user = Some(url.username().to_string());
        }
        if let Some(database) = url.path().strip_prefix('/') {
            if !database.is_empty() {
                config.database = Some(database.to_string());
            }
        }
        config.port = url.port();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "region" => config.region = Some(value.to_string()),
                "profile" => config.profile = Some(value.to_string()),
                "tokenDurationSecs" => {
                    let secs = value.parse::<u64>().map_err(|_| {
                        Error::Configuration(format!("invalid tokenDurationSecs: '{}'", value))
                    })?;
                    config.token_duration_secs = Some(secs);
                }
                _ => {}
            }
        }

        Ok(config)
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Token validity in seconds. Zero means "use the default".
    pub fn with_token_duration_secs(mut self, secs: u64) -> Self {
        self.token_duration_secs = Some(secs);
        self
    }

    pub fn with_max_lifetime_secs(mut self, secs: u64) -> Self {
        self.max_lifetime_secs = Some(secs);
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    /// Tag the reported application_name as `"<tag>:dsqlink/<version>"`.
    pub fn with_orm_tag(mut self, tag: impl Into<String>) -> Self {
        self.orm_tag = Some(tag.into());
        self
    }

    /// Validate and freeze into a [`ResolvedConfig`].
    ///
    /// Region resolution: a cluster-ID host needs a region (explicit or
    /// environment) and gets its hostname synthesized; a full hostname
    /// yields its region from the DSQL name pattern, falling back to the
    /// environment.
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        if self.host.is_empty() {
            return Err(Error::Configuration("host is required".into()));
        }
        if let Some(port) = self.port {
            if port == 0 {
                return Err(Error::Configuration(
                    "port must be between 1 and 65535, got 0".into(),
                ));
            }
        }
        if let Some(0) = self.pool_size {
            return Err(Error::Configuration(
                "pool_size must be greater than 0".into(),
            ));
        }

        let mut host = self.host.clone();
        let region = if is_cluster_id(&self.host) {
            let region = self
                .region
                .clone()
                .or_else(region_from_env)
                .ok_or_else(|| {
                    Error::Configuration("region is required when host is a cluster ID".into())
                })?;
            host = build_hostname(&self.host, &region);
            region
        } else {
            match self.region.clone() {
                Some(region) => region,
                None => parse_region(&host)
                    .ok()
                    .or_else(region_from_env)
                    .ok_or_else(|| {
                        Error::Configuration(
                            "region is required: could not parse from hostname and not set in environment"
                                .into(),
                        )
                    })?,
            }
        };

        Ok(ResolvedConfig {
            host,
            region,
            user: self.user.clone().unwrap_or_else(|| DEFAULT_USER.into()),
            database: self
                .database
                .clone()
                .unwrap_or_else(|| DEFAULT_DATABASE.into()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            profile: self.profile.clone(),
            token_duration: self
                .token_duration_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TOKEN_DURATION),
            max_lifetime: self
                .max_lifetime_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_MAX_LIFETIME),
            pool_size: self.pool_size.unwrap_or(DEFAULT_POOL_SIZE),
            orm_tag: self.orm_tag.clone(),
        })
    }
}

/// Validated, fully-defaulted connection parameters.
///
/// Built once per pool or connection and never mutated; driver connect
/// options are computed fresh from it via [`ResolvedConfig::connect_params`].
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    host: String,
    region: String,
    user: String,
    database: String,
    port: u16,
    profile: Option<String>,
    token_duration: Duration,
    max_lifetime: Duration,
    pool_size: usize,
    orm_tag: Option<String>,
}

impl ResolvedConfig {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    pub fn token_duration(&self) -> Duration {
        self.token_duration
    }

    pub fn max_lifetime(&self) -> Duration {
        self.max_lifetime
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// The application_name reported to the server.
    pub fn application_name(&self) -> String {
        build_application_name(self.orm_tag.as_deref())
    }

    /// Driver connect options for one connection attempt, with the freshly
    /// minted token as the password.
    pub fn connect_params(&self, token: &str) -> ConnectParams {
        ConnectParams {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            database: self.database.clone(),
            password: token.to_string(),
            application_name: self.application_name(),
        }
    }
}
