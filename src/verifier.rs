use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Header, Validation};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256, Sha384, Sha512};
use tracing::{debug, warn};

use crate::config::{EnvironmentConfig, VerificationOptions};
use crate::Error;

/// Verifies the token's signature and standard claims against the resolved
/// signing key and the active environment's parameters.
///
/// The header-declared algorithm must appear in the configured allow-list;
/// tokens declaring anything else are rejected before the signature is even
/// looked at. Claim checks run per [`VerificationOptions`]; expiry gets its
/// own error category, every other claim failure is reported as
/// [`Error::InvalidClaims`] naming the offending claim. On success the full
/// decoded claim set is returned, not just the checked subset.
pub(crate) fn verify(
    token: &str,
    header: &Header,
    jwk: &Jwk,
    env: &EnvironmentConfig,
    options: &VerificationOptions,
    access_token: Option<&str>,
) -> Result<Map<String, Value>, Error> {
    if options.verify_signature && !env.algorithms.contains(&header.alg) {
        warn!(alg = ?header.alg, "token algorithm not in the configured allow-list");
        return Err(Error::SignatureInvalid);
    }

    let decoding_key = DecodingKey::from_jwk(jwk).map_err(map_jwt_error)?;
    let validation = build_validation(header.alg, env, options);

    debug!(alg = ?header.alg, kid = ?header.kid, "decoding JWT");
    let decoded =
        decode::<Map<String, Value>>(token, &decoding_key, &validation).map_err(map_jwt_error)?;
    let claims = decoded.claims;

    check_claim_shapes(&claims, options)?;
    if options.verify_at_hash {
        check_at_hash(&claims, header.alg, access_token)?;
    }

    Ok(claims)
}

fn build_validation(
    alg: Algorithm,
    env: &EnvironmentConfig,
    options: &VerificationOptions,
) -> Validation {
    let mut validation = Validation::new(alg);
    validation.leeway = options.leeway;
    validation.validate_exp = options.verify_exp;
    validation.validate_nbf = options.verify_nbf;
    validation.validate_aud = options.verify_aud;
    if options.verify_aud {
        validation.set_audience(&[&env.audience]);
    }
    if options.verify_iss {
        validation.set_issuer(&[&env.issuer]);
    }
    // Absent claims are skipped rather than required; each check only fires
    // when the claim is present.
    validation.required_spec_claims = Default::default();
    if !options.verify_signature {
        validation.insecure_disable_signature_validation();
    }
    validation
}

/// Sanity checks on claims `jsonwebtoken` does not cover: present-but-wrongly
/// typed `iat`, `sub` and `jti`.
fn check_claim_shapes(
    claims: &Map<String, Value>,
    options: &VerificationOptions,
) -> Result<(), Error> {
    if options.verify_iat {
        if let Some(iat) = claims.get("iat") {
            if !iat.is_number() {
                return Err(Error::InvalidClaims("iat"));
            }
        }
    }
    if options.verify_sub {
        if let Some(sub) = claims.get("sub") {
            if !sub.is_string() {
                return Err(Error::InvalidClaims("sub"));
            }
        }
    }
    if options.verify_jti {
        if let Some(jti) = claims.get("jti") {
            if !jti.is_string() {
                return Err(Error::InvalidClaims("jti"));
            }
        }
    }
    Ok(())
}

/// Cross-checks the `at_hash` claim against the secondary access token: the
/// claim must equal the base64url-encoded left half of the token's digest,
/// hashed with the function matching the signature algorithm.
fn check_at_hash(
    claims: &Map<String, Value>,
    alg: Algorithm,
    access_token: Option<&str>,
) -> Result<(), Error> {
    let Some(at_hash) = claims.get("at_hash") else {
        return Ok(());
    };
    let (Some(expected), Some(access_token)) = (at_hash.as_str(), access_token) else {
        // An at_hash claim with nothing to compare against cannot be
        // verified, which is a claim failure, not a pass.
        return Err(Error::InvalidClaims("at_hash"));
    };
    if expected != at_hash_of(alg, access_token) {
        return Err(Error::InvalidClaims("at_hash"));
    }
    Ok(())
}

pub(crate) fn at_hash_of(alg: Algorithm, access_token: &str) -> String {
    let digest = match alg {
        Algorithm::HS256 | Algorithm::RS256 | Algorithm::ES256 | Algorithm::PS256 => {
            Sha256::digest(access_token.as_bytes()).to_vec()
        }
        Algorithm::HS384 | Algorithm::RS384 | Algorithm::ES384 | Algorithm::PS384 => {
            Sha384::digest(access_token.as_bytes()).to_vec()
        }
        Algorithm::HS512 | Algorithm::RS512 | Algorithm::PS512 | Algorithm::EdDSA => {
            Sha512::digest(access_token.as_bytes()).to_vec()
        }
    };
    URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
}

/// Single translation point from `jsonwebtoken` failures into the crate's
/// error taxonomy.
pub(crate) fn map_jwt_error(err: jsonwebtoken::errors::Error) -> Error {
    use jsonwebtoken::errors::ErrorKind;

    match err.kind() {
        ErrorKind::ExpiredSignature => Error::ExpiredSignature,
        ErrorKind::InvalidAudience => Error::InvalidClaims("aud"),
        ErrorKind::InvalidIssuer => Error::InvalidClaims("iss"),
        ErrorKind::ImmatureSignature => Error::InvalidClaims("nbf"),
        ErrorKind::InvalidSubject => Error::InvalidClaims("sub"),
        ErrorKind::MissingRequiredClaim(_) => Error::InvalidClaims("required"),
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::InvalidEcdsaKey
        | ErrorKind::InvalidRsaKey(_)
        | ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => Error::SignatureInvalid,
        other => {
            warn!(kind = ?other, "unexpected JWT verification failure");
            Error::Unexpected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::jwk::{
        AlgorithmParameters, CommonParameters, KeyAlgorithm, RSAKeyParameters, RSAKeyType,
    };
    use jsonwebtoken::{encode, EncodingKey};
    use serde_json::json;
    use std::time::SystemTime;

    const AUDIENCE: &str = "https://my.token.audience";
    const ISSUER: &str = "https://my-tenant.auth0.com/";
    const KID: &str = "42";

    struct TestKey {
        jwk: Jwk,
        encoding_key: EncodingKey,
    }

    fn test_key() -> TestKey {
        let rsa = openssl::rsa::Rsa::generate(2048).unwrap();
        let jwk = Jwk {
            common: CommonParameters {
                key_algorithm: Some(KeyAlgorithm::RS256),
                key_id: Some(KID.to_string()),
                ..CommonParameters::default()
            },
            algorithm: AlgorithmParameters::RSA(RSAKeyParameters {
                n: base64_url::encode(&rsa.n().to_vec()),
                e: base64_url::encode(&rsa.e().to_vec()),
                key_type: RSAKeyType::RSA,
            }),
        };
        let encoding_key = EncodingKey::from_rsa_der(&rsa.private_key_to_der().unwrap());
        TestKey { jwk, encoding_key }
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn base_claims() -> Map<String, Value> {
        json!({
            "sub": "auth0|1234567890",
            "name": "John Doe",
            "aud": AUDIENCE,
            "iss": ISSUER,
            "iat": now(),
            "exp": now() + 3600,
        })
        .as_object()
        .unwrap()
        .clone()
    }

    fn mint(key: &TestKey, claims: &Map<String, Value>) -> (String, Header) {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(KID.to_string());
        let token = encode(&header, claims, &key.encoding_key).unwrap();
        (token, header)
    }

    fn env() -> EnvironmentConfig {
        serde_json::from_value(json!({
            "algorithms": ["RS256"],
            "audience": AUDIENCE,
            "issuer": ISSUER,
        }))
        .unwrap()
    }

    #[test]
    fn valid_token_round_trips_all_claims() {
        let key = test_key();
        let claims = base_claims();
        let (token, header) = mint(&key, &claims);

        let decoded = verify(
            &token,
            &header,
            &key.jwk,
            &env(),
            &VerificationOptions::default(),
            None,
        )
        .unwrap();
        assert_eq!(decoded, claims);
    }

    #[test]
    fn algorithm_outside_the_allow_list_is_rejected() {
        let key = test_key();
        let (token, header) = mint(&key, &base_claims());

        let mut env = env();
        env.algorithms = vec![Algorithm::RS384];
        let err = verify(
            &token,
            &header,
            &key.jwk,
            &env,
            &VerificationOptions::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::SignatureInvalid));
    }

    #[test]
    fn token_signed_by_a_different_key_is_rejected() {
        let signer = test_key();
        let verifier_key = test_key();
        let (token, header) = mint(&signer, &base_claims());

        let err = verify(
            &token,
            &header,
            &verifier_key.jwk,
            &env(),
            &VerificationOptions::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::SignatureInvalid));
    }

    #[test]
    fn expired_token_is_a_distinct_error() {
        let key = test_key();
        let mut claims = base_claims();
        claims.insert("exp".to_string(), json!(now() - 120));
        let (token, header) = mint(&key, &claims);

        let err = verify(
            &token,
            &header,
            &key.jwk,
            &env(),
            &VerificationOptions::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::ExpiredSignature));
    }

    #[test]
    fn leeway_tolerates_a_recently_expired_token() {
        let key = test_key();
        let mut claims = base_claims();
        claims.insert("exp".to_string(), json!(now() - 5));
        let (token, header) = mint(&key, &claims);

        let options = VerificationOptions {
            leeway: 30,
            ..VerificationOptions::default()
        };
        verify(&token, &header, &key.jwk, &env(), &options, None).unwrap();
    }

    #[test]
    fn wrong_audience_is_an_invalid_claim() {
        let key = test_key();
        let mut claims = base_claims();
        claims.insert("aud".to_string(), json!("api-x"));
        let (token, header) = mint(&key, &claims);

        let err = verify(
            &token,
            &header,
            &key.jwk,
            &env(),
            &VerificationOptions::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidClaims("aud")));
    }

    #[test]
    fn audience_array_containing_the_configured_value_passes() {
        let key = test_key();
        let mut claims = base_claims();
        claims.insert("aud".to_string(), json!([AUDIENCE, "api-other"]));
        let (token, header) = mint(&key, &claims);

        verify(
            &token,
            &header,
            &key.jwk,
            &env(),
            &VerificationOptions::default(),
            None,
        )
        .unwrap();
    }

    #[test]
    fn wrong_issuer_is_an_invalid_claim() {
        let key = test_key();
        let mut claims = base_claims();
        claims.insert("iss".to_string(), json!("https://evil.example.com/"));
        let (token, header) = mint(&key, &claims);

        let err = verify(
            &token,
            &header,
            &key.jwk,
            &env(),
            &VerificationOptions::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidClaims("iss")));
    }

    #[test]
    fn future_nbf_is_an_invalid_claim() {
        let key = test_key();
        let mut claims = base_claims();
        claims.insert("nbf".to_string(), json!(now() + 3600));
        let (token, header) = mint(&key, &claims);

        let err = verify(
            &token,
            &header,
            &key.jwk,
            &env(),
            &VerificationOptions::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidClaims("nbf")));
    }

    #[test]
    fn disabled_checks_are_skipped() {
        let key = test_key();
        let mut claims = base_claims();
        claims.insert("aud".to_string(), json!("api-x"));
        let (token, header) = mint(&key, &claims);

        let options = VerificationOptions {
            verify_aud: false,
            ..VerificationOptions::default()
        };
        verify(&token, &header, &key.jwk, &env(), &options, None).unwrap();
    }

    #[test]
    fn non_numeric_iat_is_an_invalid_claim() {
        let key = test_key();
        let mut claims = base_claims();
        claims.insert("iat".to_string(), json!("yesterday"));
        let (token, header) = mint(&key, &claims);

        let err = verify(
            &token,
            &header,
            &key.jwk,
            &env(),
            &VerificationOptions::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidClaims("iat")));
    }

    #[test]
    fn matching_at_hash_passes() {
        let key = test_key();
        let access_token = "SlAV32hkKG";
        let mut claims = base_claims();
        claims.insert(
            "at_hash".to_string(),
            json!(at_hash_of(Algorithm::RS256, access_token)),
        );
        let (token, header) = mint(&key, &claims);

        verify(
            &token,
            &header,
            &key.jwk,
            &env(),
            &VerificationOptions::default(),
            Some(access_token),
        )
        .unwrap();
    }

    #[test]
    fn mismatched_at_hash_is_an_invalid_claim() {
        let key = test_key();
        let mut claims = base_claims();
        claims.insert("at_hash".to_string(), json!("bogus"));
        let (token, header) = mint(&key, &claims);

        let err = verify(
            &token,
            &header,
            &key.jwk,
            &env(),
            &VerificationOptions::default(),
            Some("SlAV32hkKG"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidClaims("at_hash")));
    }

    #[test]
    fn at_hash_without_an_access_token_is_an_invalid_claim() {
        let key = test_key();
        let mut claims = base_claims();
        claims.insert("at_hash".to_string(), json!("anything"));
        let (token, header) = mint(&key, &claims);

        let err = verify(
            &token,
            &header,
            &key.jwk,
            &env(),
            &VerificationOptions::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidClaims("at_hash")));
    }

    #[test]
    fn missing_exp_passes_when_not_required() {
        let key = test_key();
        let mut claims = base_claims();
        claims.remove("exp");
        let (token, header) = mint(&key, &claims);

        verify(
            &token,
            &header,
            &key.jwk,
            &env(),
            &VerificationOptions::default(),
            None,
        )
        .unwrap();
    }

    #[test]
    fn expired_beyond_leeway_still_fails() {
        let key = test_key();
        let mut claims = base_claims();
        let leeway = 30;
        claims.insert("exp".to_string(), json!(now() - leeway - 1));
        let (token, header) = mint(&key, &claims);

        let options = VerificationOptions {
            leeway,
            ..VerificationOptions::default()
        };
        let err = verify(&token, &header, &key.jwk, &env(), &options, None).unwrap_err();
        assert!(matches!(err, Error::ExpiredSignature));
    }

    #[test]
    fn at_hash_left_half_is_stable_across_hash_widths() {
        let token = "dNZX1hEZ9wBCzNL40Upu646bdzQA";
        assert_ne!(
            at_hash_of(Algorithm::RS256, token),
            at_hash_of(Algorithm::RS512, token)
        );
        // RFC: the value is half the digest length, base64url without padding.
        assert_eq!(at_hash_of(Algorithm::RS256, token).len(), 22);
    }

    #[test]
    fn expired_beyond_leeway_boundary() {
        // Seconds granularity makes exact boundaries flaky; a deep margin on
        // both sides is what the leeway contract promises anyway.
        let key = test_key();
        let options = VerificationOptions {
            leeway: 60,
            ..VerificationOptions::default()
        };

        let mut claims = base_claims();
        claims.insert("exp".to_string(), json!(now() + 1));
        let (token, header) = mint(&key, &claims);
        verify(&token, &header, &key.jwk, &env(), &options, None).unwrap();
    }
}
