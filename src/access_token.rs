use axum::body::{to_bytes, Body};
use axum::extract::Request;
use http::{header, HeaderValue, Method, Uri};
use tracing::{debug, warn};

use crate::Error;

/// Header carrying the secondary access token, checked before query/body.
const X_AUTH_TOKEN: &str = "x-auth-token";

/// Upper bound when buffering a form body to look for the access token.
const FORM_BODY_LIMIT: usize = 1 << 20;

/// Locates the secondary access token used as the `at_hash` comparison input.
///
/// Lookup order follows the request shape: the `X-Auth-Token` header wins;
/// otherwise HEAD/GET requests are probed via the query string and all other
/// methods via an urlencoded form body. With `digest` set, the parameter is
/// removed from the query string or body so it does not leak to downstream
/// handlers; otherwise it is merely peeked. A missing value is not an error,
/// and a body too large to buffer is left uninspected.
///
/// Returns the (possibly rewritten) request together with the token, if any.
pub(crate) async fn extract(
    req: Request,
    param: &str,
    digest: bool,
) -> Result<(Request, Option<String>), Error> {
    if let Some(value) = req.headers().get(X_AUTH_TOKEN) {
        match value.to_str() {
            Ok(token) => {
                debug!("access token found in X-Auth-Token header");
                let token = token.to_string();
                return Ok((req, Some(token)));
            }
            Err(_) => warn!("ignoring non-UTF-8 X-Auth-Token header"),
        }
    }

    match *req.method() {
        Method::HEAD | Method::GET => extract_from_query(req, param, digest),
        _ => extract_from_form_body(req, param, digest).await,
    }
}

fn extract_from_query(
    req: Request,
    param: &str,
    digest: bool,
) -> Result<(Request, Option<String>), Error> {
    let query = req.uri().query().unwrap_or("");
    let mut pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).unwrap_or_default();

    let Some(position) = pairs.iter().position(|(key, _)| key == param) else {
        debug!("access token not found in query string");
        return Ok((req, None));
    };
    debug!("access token found in query string");

    if !digest {
        let value = pairs[position].1.clone();
        return Ok((req, Some(value)));
    }

    let (_, value) = pairs.remove(position);
    let (mut parts, body) = req.into_parts();
    parts.uri = replace_query(&parts.uri, &pairs)?;
    Ok((Request::from_parts(parts, body), Some(value)))
}

async fn extract_from_form_body(
    req: Request,
    param: &str,
    digest: bool,
) -> Result<(Request, Option<String>), Error> {
    if !is_urlencoded_form(&req) {
        return Ok((req, None));
    }
    // The token is an optional input, so only a body whose declared length
    // fits the buffering limit is inspected. Buffering is destructive;
    // anything else passes through untouched, without a token.
    match declared_content_length(&req) {
        Some(length) if length <= FORM_BODY_LIMIT => {}
        Some(length) => {
            debug!(length, "form body exceeds buffering limit, not inspected");
            return Ok((req, None));
        }
        None => {
            debug!("form body without declared length, not inspected");
            return Ok((req, None));
        }
    }

    let (mut parts, body) = req.into_parts();
    let bytes = to_bytes(body, FORM_BODY_LIMIT).await.map_err(|e| {
        warn!(error = %e, "failed to buffer request body");
        Error::Unexpected
    })?;
    let mut pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(&bytes).unwrap_or_default();

    let Some(position) = pairs.iter().position(|(key, _)| key == param) else {
        debug!("access token not found in request body");
        return Ok((Request::from_parts(parts, Body::from(bytes)), None));
    };
    debug!("access token found in request body");

    if !digest {
        let value = pairs[position].1.clone();
        return Ok((Request::from_parts(parts, Body::from(bytes)), Some(value)));
    }

    let (_, value) = pairs.remove(position);
    let encoded = serde_urlencoded::to_string(&pairs).map_err(|e| {
        warn!(error = %e, "failed to re-encode request body");
        Error::Unexpected
    })?;
    parts
        .headers
        .insert(header::CONTENT_LENGTH, HeaderValue::from(encoded.len()));
    Ok((Request::from_parts(parts, Body::from(encoded)), Some(value)))
}

fn declared_content_length(req: &Request) -> Option<usize> {
    req.headers()
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn is_urlencoded_form(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"))
}

fn replace_query(uri: &Uri, pairs: &[(String, String)]) -> Result<Uri, Error> {
    let query = serde_urlencoded::to_string(pairs).map_err(|e| {
        warn!(error = %e, "failed to re-encode query string");
        Error::Unexpected
    })?;
    let path_and_query = if query.is_empty() {
        uri.path().to_string()
    } else {
        format!("{}?{}", uri.path(), query)
    };

    let mut uri_parts = uri.clone().into_parts();
    uri_parts.path_and_query = Some(path_and_query.parse().map_err(|_| Error::Unexpected)?);
    Uri::from_parts(uri_parts).map_err(|_| Error::Unexpected)
}
