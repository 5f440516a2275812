use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::{FromRequestParts, Request};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use http::header::AUTHORIZATION;
use http::request::Parts;
use jsonwebtoken::decode_header;
use serde_json::{Map, Value};
use tower::{Layer, Service};
use tracing::{debug, info};

use crate::claims::ClaimsPolicy;
use crate::config::{AuthConfig, VerificationOptions};
use crate::jwks_cache::JwksCache;
use crate::{access_token, header, verifier, Error};

const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(600);
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of authentication, attached to the request extensions on success.
///
/// `Auth(None)` means no credentials were presented and the request passed
/// through anonymously; `Auth(Some(claims))` carries the verified (and
/// policy-shaped) claim set. Rejected requests never reach a handler, so the
/// extension is absent only when the middleware is not installed at all.
#[derive(Debug, Clone)]
pub struct Auth(pub Option<Map<String, Value>>);

impl<S> FromRequestParts<S> for Auth
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Auth>().cloned().ok_or(Error::Unexpected)
    }
}

struct AuthState {
    config: AuthConfig,
    environment: Option<String>,
    options: VerificationOptions,
    claims_policy: ClaimsPolicy,
    digest_access_token: bool,
    jwks: JwksCache,
}

/// Configures an [`Auth0Layer`].
pub struct Auth0LayerBuilder {
    config: AuthConfig,
    environment: Option<String>,
    options: VerificationOptions,
    claims_policy: ClaimsPolicy,
    digest_access_token: bool,
    jwks_ttl: Duration,
    fetch_timeout: Duration,
}

impl Auth0LayerBuilder {
    fn new(config: AuthConfig) -> Self {
        Self {
            config,
            environment: None,
            options: VerificationOptions::default(),
            claims_policy: ClaimsPolicy::identity(),
            digest_access_token: true,
            jwks_ttl: DEFAULT_JWKS_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Selects which entry of a per-environment config is active.
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn verification(mut self, options: VerificationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn claims_policy(mut self, policy: ClaimsPolicy) -> Self {
        self.claims_policy = policy;
        self
    }

    /// Whether the secondary access token is consumed (removed from the
    /// query string or body) when read. Defaults to `true`.
    pub fn digest_access_token(mut self, digest: bool) -> Self {
        self.digest_access_token = digest;
        self
    }

    /// How long a fetched JWK set is served before being refreshed.
    pub fn jwks_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_ttl = ttl;
        self
    }

    /// Bound on the JWKS fetch; a timeout is treated as fetch failure.
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Auth0Layer, Error> {
        let active = self.config.resolve(self.environment.as_deref())?;
        if self.options.verify_signature && active.algorithms.is_empty() {
            return Err(Error::Configuration(
                "signature verification requires a non-empty algorithm allow-list".to_string(),
            ));
        }
        let jwks_url = active.jwks_url()?;
        info!(jwks_url = %jwks_url, "configuring bearer authentication");
        let jwks = JwksCache::new(jwks_url, self.jwks_ttl, self.fetch_timeout);
        Ok(Auth0Layer {
            state: Arc::new(AuthState {
                config: self.config,
                environment: self.environment,
                options: self.options,
                claims_policy: self.claims_policy,
                digest_access_token: self.digest_access_token,
                jwks,
            }),
        })
    }
}

/// Bearer-token authentication middleware.
///
/// On every request the Authorization header is parsed, the token's signing
/// key is resolved from the (cached) remote JWK set, signature and claims are
/// verified, and the shaped claim set is attached as an [`Auth`] extension.
/// Requests without credentials pass through with `Auth(None)`; any
/// verification failure is answered with a structured `401` before the inner
/// service runs.
#[derive(Clone)]
pub struct Auth0Layer {
    state: Arc<AuthState>,
}

impl Auth0Layer {
    pub fn builder(config: impl Into<AuthConfig>) -> Auth0LayerBuilder {
        Auth0LayerBuilder::new(config.into())
    }
}

impl<S> Layer<S> for Auth0Layer {
    type Service = Auth0Service<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Auth0Service {
            inner,
            state: Arc::clone(&self.state),
        }
    }
}

#[derive(Clone)]
pub struct Auth0Service<S> {
    inner: S,
    state: Arc<AuthState>,
}

impl<S> Service<Request> for Auth0Service<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        // Move the original service into the closure instead of its clone, so
        // the service that had `poll_ready` called on it is the one that runs.
        // See https://docs.rs/tower/latest/tower/trait.Service.html#be-careful-when-cloning-inner-services
        let inner_clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, inner_clone);

        let state = Arc::clone(&self.state);
        Box::pin(async move {
            match authenticate(&state, req).await {
                Ok(req) => inner.call(req).await,
                Err(auth_error) => Ok(auth_error.into_response()),
            }
        })
    }
}

/// One full authentication pass. On success the request comes back with its
/// `Auth` extension set; on failure the request is dropped unmutated and the
/// error is translated into a response by the caller, exactly once.
async fn authenticate(state: &AuthState, mut req: Request) -> Result<Request, Error> {
    let Some((scheme, token)) = header::parse(req.headers().get(AUTHORIZATION))? else {
        debug!("no authorization provided, continuing anonymously");
        req.extensions_mut().insert(Auth(None));
        return Ok(req);
    };

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(Error::InvalidScheme(scheme));
    }

    let env = state.config.resolve(state.environment.as_deref())?;

    let token_header = decode_header(&token).map_err(verifier::map_jwt_error)?;
    let kid = token_header.kid.clone().ok_or(Error::UnknownSigningKey)?;
    let jwk = state.jwks.resolve(&kid).await?;

    let (mut req, secondary_token) =
        access_token::extract(req, &env.access_token_param, state.digest_access_token).await?;

    let claims = verifier::verify(
        &token,
        &token_header,
        &jwk,
        env,
        &state.options,
        secondary_token.as_deref(),
    )?;
    debug!(sub = ?claims.get("sub"), "token verified");

    let claims = state.claims_policy.process(claims);
    req.extensions_mut().insert(Auth(Some(claims)));
    Ok(req)
}
