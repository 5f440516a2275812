use axum::{
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use serde::Serialize;

/// Everything that can go wrong while authenticating a request.
///
/// Components below the middleware boundary (header parsing, the JWKS cache,
/// the token verifier) return these typed errors; only the [`IntoResponse`]
/// impl turns them into HTTP. Every variant presents to the client as a
/// `401 Unauthorized` with a structured JSON body, so internal failure detail
/// never leaks into a 5xx.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("improperly formatted 'Authorization' header")]
    MalformedHeader,
    #[error("unsupported authorization scheme '{0}'")]
    InvalidScheme(String),
    #[error("failed to retrieve the JWK set")]
    JwksUnavailable,
    #[error("no signing key matches the token's key id")]
    UnknownSigningKey,
    #[error("token signature verification failed")]
    SignatureInvalid,
    #[error("token has expired")]
    ExpiredSignature,
    #[error("verification of the '{0}' claim failed")]
    InvalidClaims(&'static str),
    #[error("invalid middleware configuration: {0}")]
    Configuration(String),
    #[error("authentication failed")]
    Unexpected,
}

/// Structured error body the host pipeline serializes to the client.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub title: &'static str,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u32>,
}

impl Error {
    fn title(&self) -> &'static str {
        match self {
            Error::MalformedHeader => "Improper 'Authorization' Header Formatting",
            Error::InvalidScheme(_) => "Invalid 'Authorization' Header",
            Error::JwksUnavailable => "Signing Keys Unavailable",
            Error::UnknownSigningKey => "Unknown Signing Key",
            Error::SignatureInvalid => "Invalid Token Signature",
            Error::ExpiredSignature => "Expired Token",
            Error::InvalidClaims(_) => "Invalid Claims",
            Error::Configuration(_) | Error::Unexpected => "Authentication Failed",
        }
    }

    fn description(&self) -> String {
        match self {
            Error::MalformedHeader => {
                "The 'Authorization' header was improperly formatted.".to_string()
            }
            Error::InvalidScheme(scheme) => {
                format!("The 'Authorization' header started with '{scheme}'.")
            }
            Error::JwksUnavailable => "The signing key set could not be retrieved.".to_string(),
            Error::UnknownSigningKey => "No signing key matches the provided token.".to_string(),
            Error::SignatureInvalid => "The token's signature could not be verified.".to_string(),
            Error::ExpiredSignature => "The provided token has expired.".to_string(),
            Error::InvalidClaims(claim) => {
                format!("The claims are incorrect. Verification of the '{claim}' claim failed.")
            }
            // Deliberately generic: configuration detail stays out of responses.
            Error::Configuration(_) | Error::Unexpected => {
                "The request could not be authenticated.".to_string()
            }
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            status: "401 Unauthorized",
            title: self.title(),
            description: self.description(),
            href: None,
            code: None,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, Json(self.body())).into_response()
    }
}
