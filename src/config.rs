use std::collections::HashMap;

use jsonwebtoken::Algorithm;
use serde::Deserialize;
use url::Url;

use crate::Error;

/// Conventional location of the JWK set relative to the issuer, used when no
/// explicit `jwks_uri` is configured. Most providers publish their keys here.
const WELL_KNOWN_JWKS_PATH: &str = ".well-known/jwks.json";

fn default_access_token_param() -> String {
    "access_token".to_string()
}

/// Verification parameters for one deployment environment.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentConfig {
    /// Allow-list of signature algorithms. Tokens whose header declares an
    /// algorithm outside this list are rejected before any signature check.
    #[serde(alias = "alg")]
    pub algorithms: Vec<Algorithm>,
    /// Expected `aud` claim value, typically the client id.
    pub audience: String,
    /// Trust domain, compared verbatim against the `iss` claim. Also used to
    /// derive the JWKS endpoint when `jwks_uri` is absent. May be given with
    /// or without a scheme (`my-tenant.auth0.com` or
    /// `https://my-tenant.auth0.com/`).
    #[serde(alias = "domain")]
    pub issuer: String,
    /// Explicit JWK set endpoint. Derived from `issuer` when absent.
    #[serde(default)]
    pub jwks_uri: Option<Url>,
    /// Name of the query/body parameter carrying the secondary access token.
    #[serde(default = "default_access_token_param", alias = "access_token")]
    pub access_token_param: String,
}

impl EnvironmentConfig {
    /// The endpoint to fetch the JWK set from: the configured `jwks_uri`, or
    /// `<issuer>/.well-known/jwks.json`.
    pub fn jwks_url(&self) -> Result<Url, Error> {
        if let Some(url) = &self.jwks_uri {
            return Ok(url.clone());
        }
        let base = if self.issuer.starts_with("http://") || self.issuer.starts_with("https://") {
            self.issuer.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", self.issuer.trim_end_matches('/'))
        };
        Url::parse(&format!("{base}/{WELL_KNOWN_JWKS_PATH}"))
            .map_err(|e| Error::Configuration(format!("cannot derive jwks_uri from issuer: {e}")))
    }
}

/// Either a single [`EnvironmentConfig`] or a mapping from environment name
/// (`dev`, `test`, `prod`, ...) to one. Which entry is active is decided by
/// the `environment` selector given at construction time; flat configs ignore
/// the selector.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AuthConfig {
    PerEnvironment(HashMap<String, EnvironmentConfig>),
    Flat(EnvironmentConfig),
}

impl AuthConfig {
    /// Picks the active environment. Resolved on every request so hosts may
    /// swap the config between requests; the lookup is a single map probe.
    pub fn resolve(&self, environment: Option<&str>) -> Result<&EnvironmentConfig, Error> {
        match self {
            AuthConfig::Flat(env) => Ok(env),
            AuthConfig::PerEnvironment(map) => match environment {
                Some(name) => map.get(name).ok_or_else(|| {
                    Error::Configuration(format!("no '{name}' environment in auth config"))
                }),
                None => Err(Error::Configuration(
                    "per-environment auth config requires an environment selector".to_string(),
                )),
            },
        }
    }
}

impl From<EnvironmentConfig> for AuthConfig {
    fn from(env: EnvironmentConfig) -> Self {
        AuthConfig::Flat(env)
    }
}

/// Toggles for the individual verification steps, plus the permitted clock
/// skew. Everything defaults to enabled with zero leeway.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerificationOptions {
    pub verify_signature: bool,
    pub verify_aud: bool,
    pub verify_iat: bool,
    pub verify_exp: bool,
    pub verify_nbf: bool,
    pub verify_iss: bool,
    pub verify_sub: bool,
    pub verify_jti: bool,
    pub verify_at_hash: bool,
    /// Clock-skew tolerance in seconds for `exp` and `nbf`.
    pub leeway: u64,
}

impl Default for VerificationOptions {
    fn default() -> Self {
        Self {
            verify_signature: true,
            verify_aud: true,
            verify_iat: true,
            verify_exp: true,
            verify_nbf: true,
            verify_iss: true,
            verify_sub: true,
            verify_jti: true,
            verify_at_hash: true,
            leeway: 0,
        }
    }
}
