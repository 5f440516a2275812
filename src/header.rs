use http::HeaderValue;

use crate::Error;

/// Splits an `Authorization` header value into its `(scheme, credentials)`
/// pair.
///
/// Only a missing header yields `None` (the request continues anonymously).
/// A header that is present but does not consist of exactly two
/// whitespace-separated fields is rejected; this includes empty and
/// whitespace-only values. The scheme is returned verbatim; case-insensitive
/// comparison against `bearer` happens in the orchestrator.
pub(crate) fn parse(value: Option<&HeaderValue>) -> Result<Option<(String, String)>, Error> {
    let Some(value) = value else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| Error::MalformedHeader)?;

    let mut fields = value.split_whitespace();
    match (fields.next(), fields.next(), fields.next()) {
        (Some(scheme), Some(token), None) => Ok(Some((scheme.to_string(), token.to_string()))),
        _ => Err(Error::MalformedHeader),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(value: &str) -> HeaderValue {
        HeaderValue::from_str(value).unwrap()
    }

    #[test]
    fn missing_header_is_anonymous() {
        assert!(parse(None).unwrap().is_none());
    }

    #[test]
    fn present_but_empty_header_is_malformed() {
        assert!(matches!(
            parse(Some(&header(""))),
            Err(Error::MalformedHeader)
        ));
        assert!(matches!(
            parse(Some(&header("   "))),
            Err(Error::MalformedHeader)
        ));
    }

    #[test]
    fn well_formed_header_splits_into_scheme_and_token() {
        let (scheme, token) = parse(Some(&header("Bearer abc.def.ghi"))).unwrap().unwrap();
        assert_eq!(scheme, "Bearer");
        assert_eq!(token, "abc.def.ghi");
    }

    #[test]
    fn scheme_case_is_preserved() {
        let (scheme, _) = parse(Some(&header("bEaReR tok"))).unwrap().unwrap();
        assert_eq!(scheme, "bEaReR");
    }

    #[test]
    fn single_field_is_malformed() {
        assert!(matches!(
            parse(Some(&header("Bearer"))),
            Err(Error::MalformedHeader)
        ));
    }

    #[test]
    fn three_fields_are_malformed() {
        assert!(matches!(
            parse(Some(&header("Bearer abc def"))),
            Err(Error::MalformedHeader)
        ));
    }

    #[test]
    fn non_utf8_header_is_malformed() {
        let value = HeaderValue::from_bytes(b"Bearer \xff\xfe").unwrap();
        assert!(matches!(parse(Some(&value)), Err(Error::MalformedHeader)));
    }
}
