use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{Jwk, JwkSet};
use reqwest::Client;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::Error;

/// Lazily fetched, TTL'd cache of the remote JWK set, shared across all
/// requests handled by one middleware instance.
///
/// Two guarantees hold under concurrency:
///
/// - **Single flight**: at most one network fetch is in progress at a time.
///   Resolvers that find the cache empty wait on the in-flight fetch instead
///   of issuing their own.
/// - **Stale-while-revalidate**: once the TTL has elapsed, the next resolver
///   triggers a refresh while concurrent resolvers keep being served the
///   last-known-good set until the refresh completes or fails.
///
/// Fetch failures are never cached; the next call re-attempts.
pub struct JwksCache {
    http_client: Client,
    jwks_url: Url,
    ttl: Duration,
    fetch_timeout: Duration,
    cached: RwLock<Option<CachedSet>>,
    fetch_guard: Mutex<()>,
}

struct CachedSet {
    set: Arc<JwkSet>,
    fetched_at: Instant,
}

impl JwksCache {
    pub fn new(jwks_url: Url, ttl: Duration, fetch_timeout: Duration) -> Self {
        Self {
            http_client: Client::new(),
            jwks_url,
            ttl,
            fetch_timeout,
            cached: RwLock::new(None),
            fetch_guard: Mutex::new(()),
        }
    }

    /// Looks up a signing key by key id, fetching or refreshing the key set
    /// as needed. A `kid` that is absent from a fresh set triggers one forced
    /// refresh before concluding [`Error::UnknownSigningKey`], so freshly
    /// rotated keys are picked up.
    pub async fn resolve(&self, kid: &str) -> Result<Jwk, Error> {
        let set = self.current_set().await?;
        if let Some(jwk) = set.find(kid) {
            return Ok(jwk.clone());
        }

        debug!(kid = %kid, "key id not in cached JWK set, refreshing");
        let set = self.force_refresh().await?;
        set.find(kid).cloned().ok_or_else(|| {
            warn!(kid = %kid, "no signing key matches the token's key id");
            Error::UnknownSigningKey
        })
    }

    /// Returns a fresh or last-known-good key set, fetching at most once
    /// concurrently.
    async fn current_set(&self) -> Result<Arc<JwkSet>, Error> {
        let stale = {
            let cached = self.cached.read().await;
            match cached.as_ref() {
                Some(c) if c.fetched_at.elapsed() < self.ttl => return Ok(Arc::clone(&c.set)),
                Some(c) => Some(Arc::clone(&c.set)),
                None => None,
            }
        };

        match stale {
            Some(set) => match self.fetch_guard.try_lock() {
                // This resolver refreshes; on failure the last-known-good set
                // keeps serving.
                Ok(_guard) => match self.fetch_and_store().await {
                    Ok(fresh) => Ok(fresh),
                    Err(e) => {
                        warn!(error = %e, "JWKS refresh failed, serving last-known-good set");
                        Ok(set)
                    }
                },
                // A refresh is already in flight elsewhere.
                Err(_) => Ok(set),
            },
            None => {
                let _guard = self.fetch_guard.lock().await;
                // The fetch we waited on may have populated the cache.
                {
                    let cached = self.cached.read().await;
                    if let Some(c) = cached.as_ref() {
                        return Ok(Arc::clone(&c.set));
                    }
                }
                self.fetch_and_store().await
            }
        }
    }

    /// Refreshes unconditionally, coalescing with any in-flight fetch: if
    /// another resolver stored a set while we waited for the guard, that set
    /// is returned without a second network call.
    async fn force_refresh(&self) -> Result<Arc<JwkSet>, Error> {
        let started = Instant::now();
        let _guard = self.fetch_guard.lock().await;
        {
            let cached = self.cached.read().await;
            if let Some(c) = cached.as_ref() {
                if c.fetched_at >= started {
                    return Ok(Arc::clone(&c.set));
                }
            }
        }
        self.fetch_and_store().await
    }

    /// Caller must hold `fetch_guard`.
    async fn fetch_and_store(&self) -> Result<Arc<JwkSet>, Error> {
        let set = Arc::new(self.fetch().await?);
        let mut cached = self.cached.write().await;
        *cached = Some(CachedSet {
            set: Arc::clone(&set),
            fetched_at: Instant::now(),
        });
        Ok(set)
    }

    async fn fetch(&self) -> Result<JwkSet, Error> {
        debug!(url = %self.jwks_url, "fetching JWK set");

        let response = self
            .http_client
            .get(self.jwks_url.clone())
            .timeout(self.fetch_timeout)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %self.jwks_url, error = %e, "failed to fetch JWK set");
                Error::JwksUnavailable
            })?;

        if !response.status().is_success() {
            warn!(
                url = %self.jwks_url,
                status = %response.status(),
                "JWKS endpoint returned an error response"
            );
            return Err(Error::JwksUnavailable);
        }

        let set: JwkSet = response.json().await.map_err(|e| {
            warn!(url = %self.jwks_url, error = %e, "failed to parse JWK set");
            Error::JwksUnavailable
        })?;

        info!(url = %self.jwks_url, key_count = set.keys.len(), "JWK set fetched");
        Ok(set)
    }
}
