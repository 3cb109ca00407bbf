//! Governance configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Environment variable overriding the JWT signing secret
pub const JWT_SECRET_ENV: &str = "LMS_JWT_SECRET";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub auth: AuthConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub audit: AuditConfig,
    pub maintenance: MaintenanceConfig,
}

impl GovernanceConfig {
    /// Load from a JSON file, then apply environment overrides
    pub fn load(path: &str) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        config.apply_env();
        Ok(config)
    }

    /// Save as pretty JSON
    pub fn save(&self, path: &str) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    pub fn apply_env(&mut self) {
        if let Ok(secret) = std::env::var(JWT_SECRET_ENV) {
            if !secret.is_empty() {
                self.auth.jwt_secret = secret;
            }
        }
    }
}

/// Credential verification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    /// Clock skew tolerated on `exp`
    pub leeway_secs: u64,
    /// Lifetime of tokens minted by `TokenIssuer`
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_issuer: "lms-platform".to_string(),
            jwt_audience: "lms-api".to_string(),
            leeway_secs: 0,
            token_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_secs: u64,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { default_ttl_secs: 300 }
    }
}

/// Limit applied to one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPolicy {
    pub limit: u32,
    pub window_secs: u64,
}

impl EndpointPolicy {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub default_limit: u32,
    pub window_secs: u64,
    /// Per-endpoint overrides keyed by endpoint name
    pub endpoints: HashMap<String, EndpointPolicy>,
}

impl RateLimitConfig {
    /// Policy for an endpoint, falling back to the default
    pub fn policy_for(&self, endpoint: &str) -> EndpointPolicy {
        self.endpoints.get(endpoint).copied().unwrap_or(EndpointPolicy {
            limit: self.default_limit,
            window_secs: self.window_secs,
        })
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            window_secs: 60,
            endpoints: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub retention_days: u32,
    pub max_page_size: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: 365,
            max_page_size: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
        }
    }
}
