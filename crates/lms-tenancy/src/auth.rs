//! Credential verification
//!
//! Converts a signed bearer token into a [`Principal`]. Tenant, subject and
//! role come only from verified claims; nothing outside the token (headers,
//! query strings, path segments) can influence them.

use crate::config::AuthConfig;
use crate::error::{AuthenticationError, GovernanceError, GovernanceResult};
use crate::principal::{OrganizationId, Principal, Role};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const BEARER_PREFIX: &str = "Bearer ";

/// JWT claims
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    pub role: Role,
}

/// Verifies credentials and builds principals
pub struct AuthContextResolver {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl AuthContextResolver {
    pub fn new(config: AuthConfig) -> Self {
        if config.jwt_secret.is_empty() {
            warn!("JWT secret is empty; set LMS_JWT_SECRET before serving traffic");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&config.jwt_issuer]);
        validation.set_audience(&[&config.jwt_audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = config.leeway_secs;

        Self {
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
        }
    }

    /// Resolve an `Authorization` header value of the form `Bearer <token>`
    pub fn resolve_bearer(&self, header: Option<&str>) -> Result<Principal, AuthenticationError> {
        let header = header.map(str::trim).unwrap_or_default();
        if header.is_empty() {
            return Err(AuthenticationError::Missing);
        }
        let token = header
            .strip_prefix(BEARER_PREFIX)
            .ok_or(AuthenticationError::Malformed)?;
        self.resolve(token)
    }

    /// Verify signature and expiry, then build the principal
    pub fn resolve(&self, credential: &str) -> Result<Principal, AuthenticationError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AuthenticationError::Missing);
        }

        let claims = decode::<Claims>(credential, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthenticationError::Expired,
                kind => {
                    debug!(error = ?kind, "Credential rejected");
                    AuthenticationError::Malformed
                }
            })?
            .claims;

        let organization_id = match claims.org_id {
            Some(raw) => Some(OrganizationId::parse(raw).map_err(|_| AuthenticationError::Malformed)?),
            None => None,
        };

        if organization_id.is_none() && claims.role != Role::SuperAdmin {
            warn!(subject_id = %claims.sub, role = %claims.role, "Credential has no tenant context");
            return Err(AuthenticationError::MissingTenantContext);
        }

        Ok(Principal {
            subject_id: claims.sub,
            organization_id,
            role: claims.role,
            issued_at: timestamp(claims.iat)?,
            expires_at: timestamp(claims.exp)?,
        })
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, AuthenticationError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or(AuthenticationError::Malformed)
}

/// Mints credentials for tests and operator tooling
pub struct TokenIssuer {
    config: AuthConfig,
    encoding_key: EncodingKey,
}

impl TokenIssuer {
    pub fn new(config: AuthConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        Self { config, encoding_key }
    }

    /// Issue a token valid for the configured lifetime
    pub fn issue(
        &self,
        subject_id: &str,
        organization_id: Option<&OrganizationId>,
        role: Role,
    ) -> GovernanceResult<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.config.token_ttl_secs as i64);
        self.sign(&Claims {
            sub: subject_id.to_string(),
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            org_id: organization_id.map(|o| o.to_string()),
            role,
        })
    }

    /// Sign arbitrary claims
    pub fn sign(&self, claims: &Claims) -> GovernanceResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| GovernanceError::Validation(format!("token encoding failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".into(),
            ..AuthConfig::default()
        }
    }

    fn org(id: &str) -> OrganizationId {
        OrganizationId::parse(id).unwrap()
    }

    fn claims(org_id: Option<&str>, role: Role) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: "user-1".into(),
            iss: "lms-platform".into(),
            aud: "lms-api".into(),
            exp: now + 600,
            iat: now,
            org_id: org_id.map(String::from),
            role,
        }
    }

    #[test]
    fn test_resolve_valid_token() {
        let issuer = TokenIssuer::new(config());
        let resolver = AuthContextResolver::new(config());

        let token = issuer.issue("user-1", Some(&org("acme")), Role::Mentor).unwrap();
        let principal = resolver.resolve(&token).unwrap();

        assert_eq!(principal.subject_id, "user-1");
        assert_eq!(principal.organization_id, Some(org("acme")));
        assert_eq!(principal.role, Role::Mentor);
        assert!(principal.expires_at > principal.issued_at);
    }

    #[test]
    fn test_missing_credential() {
        let resolver = AuthContextResolver::new(config());
        assert_eq!(resolver.resolve(""), Err(AuthenticationError::Missing));
        assert_eq!(resolver.resolve_bearer(None), Err(AuthenticationError::Missing));
        assert_eq!(resolver.resolve_bearer(Some("  ")), Err(AuthenticationError::Missing));
    }

    #[test]
    fn test_malformed_credential() {
        let resolver = AuthContextResolver::new(config());
        assert_eq!(resolver.resolve("not-a-jwt"), Err(AuthenticationError::Malformed));
        assert_eq!(
            resolver.resolve_bearer(Some("Basic dXNlcjpwYXNz")),
            Err(AuthenticationError::Malformed)
        );
    }

    #[test]
    fn test_wrong_signature_is_malformed() {
        let forged = TokenIssuer::new(AuthConfig {
            jwt_secret: "other-secret".into(),
            ..AuthConfig::default()
        })
        .issue("user-1", Some(&org("acme")), Role::OrgAdmin)
        .unwrap();

        let resolver = AuthContextResolver::new(config());
        assert_eq!(resolver.resolve(&forged), Err(AuthenticationError::Malformed));
    }

    #[test]
    fn test_expired_credential() {
        let issuer = TokenIssuer::new(config());
        let mut expired = claims(Some("acme"), Role::Learner);
        expired.iat -= 7200;
        expired.exp = expired.iat + 60;

        let token = issuer.sign(&expired).unwrap();
        let resolver = AuthContextResolver::new(config());
        assert_eq!(resolver.resolve(&token), Err(AuthenticationError::Expired));
    }

    #[test]
    fn test_missing_tenant_context() {
        let issuer = TokenIssuer::new(config());
        let resolver = AuthContextResolver::new(config());

        let token = issuer.sign(&claims(None, Role::OrgAdmin)).unwrap();
        assert_eq!(
            resolver.resolve(&token),
            Err(AuthenticationError::MissingTenantContext)
        );

        let root = issuer.sign(&claims(None, Role::SuperAdmin)).unwrap();
        let principal = resolver.resolve(&root).unwrap();
        assert!(principal.organization_id.is_none());
    }

    #[test]
    fn test_org_with_delimiter_rejected() {
        let issuer = TokenIssuer::new(config());
        let resolver = AuthContextResolver::new(config());

        let token = issuer.sign(&claims(Some("a:b"), Role::Learner)).unwrap();
        assert_eq!(resolver.resolve(&token), Err(AuthenticationError::Malformed));
    }

    #[test]
    fn test_bearer_prefix() {
        let issuer = TokenIssuer::new(config());
        let resolver = AuthContextResolver::new(config());
        let token = issuer.issue("user-1", Some(&org("acme")), Role::Learner).unwrap();

        let principal = resolver.resolve_bearer(Some(&format!("Bearer {token}"))).unwrap();
        assert_eq!(principal.role, Role::Learner);
    }
}
