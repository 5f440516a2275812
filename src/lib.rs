//! Bearer-token authentication [middleware for `axum`](https://docs.rs/axum/latest/axum/middleware/index.html)
//! in the style of Auth0's backend quickstarts.
//!
//! ## Overview
//!
//! Incoming requests carrying an `Authorization: Bearer <jwt>` header are
//! authenticated against the signing keys your OpenID Connect provider or
//! OAuth2 authorization server publishes as a
//! [JSON Web Key Set (JWKS)](https://datatracker.ietf.org/doc/html/rfc7517).
//! On success the decoded claims are exposed to handlers through the [`Auth`]
//! request extension; on failure the request is answered with a structured
//! `401 Unauthorized` before it reaches a handler. Requests without any
//! credentials pass through with [`Auth`]`(None)` so that routes can be
//! "auth optional" — deciding what anonymous requests may do is a concern
//! for a downstream authorization layer, not this crate.
//!
//! ## Features
//!
//! - **JWT validation**: signature verification against the remote JWK set
//!   (resolved by `kid`), an algorithm allow-list, and the standard claim
//!   checks (`exp`, `nbf`, `iat`, `aud`, `iss`, `sub`, `jti`, `at_hash`) with
//!   configurable clock-skew leeway. Each check can be toggled individually
//!   via [`VerificationOptions`].
//! - **JWKS caching**: the key set is fetched lazily, cached with a
//!   configurable time-to-live, and refreshed with at most one request in
//!   flight, so a burst of cold-cache traffic cannot stampede your provider's
//!   JWKS endpoint.
//! - **Per-environment configuration**: a single [`EnvironmentConfig`] or a
//!   map of environment name to config (`dev`/`test`/`prod`), selected at
//!   construction time.
//! - **Claims shaping**: an optional [`ClaimsPolicy`] renames and filters
//!   claims before they are exposed to handlers.
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use axum::{routing::get, Router};
//! use axum_auth0::{Auth, Auth0Layer, AuthConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config: AuthConfig = serde_json::from_value(serde_json::json!({
//!         "algorithms": ["RS256"],
//!         "audience": "my-client-id",
//!         "issuer": "https://my-tenant.auth0.com/",
//!     }))?;
//!
//!     let router = Router::new()
//!         .route(
//!             "/protected",
//!             get(|auth: Auth| async move {
//!                 match auth.0 {
//!                     Some(claims) => format!("hello, {:?}", claims.get("sub")),
//!                     None => "hello, anonymous".to_string(),
//!                 }
//!             }),
//!         )
//!         .layer(Auth0Layer::builder(config).build()?);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod authorization;
pub mod claims;
pub mod config;
pub mod error;
pub mod jwks_cache;

mod access_token;
mod header;
mod verifier;

pub use authorization::{Auth, Auth0Layer, Auth0LayerBuilder, Auth0Service};
pub use claims::ClaimsPolicy;
pub use config::{AuthConfig, EnvironmentConfig, VerificationOptions};
pub use error::Error;
pub use jwks_cache::JwksCache;
