use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Response};
use tracing::{debug, warn};

use crate::models::profile::Profile;

/// True for `application/json` and `+json` media types.
pub fn is_structured(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

/// Insert the profile's secure headers into a structured response,
/// overwriting existing values. Returns the number of headers written.
///
/// The body is never touched. Invalid names or values are skipped.
pub fn apply<B>(profile: &Profile, response: &mut Response<B>) -> usize {
    let config = &profile.secure_response_headers;
    if !config.enable || config.headers.is_empty() || !is_structured(response.headers()) {
        return 0;
    }

    let headers = response.headers_mut();
    let mut written = 0;
    for (name, value) in &config.headers {
        let parsed_name = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(n) => n,
            Err(e) => {
                warn!(header = %name, error = %e, "skipping invalid secure header name");
                continue;
            }
        };
        let parsed_value = match HeaderValue::from_str(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(header = %name, error = %e, "skipping invalid secure header value");
                continue;
            }
        };
        headers.insert(parsed_name, parsed_value);
        written += 1;
    }
    debug!(count = written, "secure response headers applied");
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::profile::RunningMode;

    fn profile(enable: bool, headers: &[(&str, &str)]) -> Profile {
        let mut p = Profile::with_mode(RunningMode::Monitor);
        p.secure_response_headers.enable = enable;
        p.secure_response_headers.headers = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        p
    }

    fn response(content_type: Option<&str>) -> Response<&'static str> {
        let mut builder = Response::builder().header("x-frame-options", "SAMEORIGIN");
        if let Some(ct) = content_type {
            builder = builder.header(CONTENT_TYPE, ct);
        }
        builder.body("{}").unwrap()
    }

    #[test]
    fn json_detection() {
        for ct in ["application/json", "application/json; charset=utf-8", "application/problem+json", "Application/JSON"] {
            assert!(is_structured(response(Some(ct)).headers()), "{}", ct);
        }
        for ct in ["text/html", "text/json-ish", "application/jsonp"] {
            assert!(!is_structured(response(Some(ct)).headers()), "{}", ct);
        }
        assert!(!is_structured(response(None).headers()));
    }

    #[test]
    fn headers_are_inserted_and_overwritten() {
        let p = profile(
            true,
            &[("X-Frame-Options", "DENY"), ("Strict-Transport-Security", "max-age=63072000")],
        );
        let mut resp = response(Some("application/json"));

        assert_eq!(apply(&p, &mut resp), 2);
        assert_eq!(resp.headers()["x-frame-options"], "DENY");
        assert_eq!(resp.headers()["strict-transport-security"], "max-age=63072000");
        assert_eq!(*resp.body(), "{}");
    }

    #[test]
    fn non_json_response_untouched() {
        let p = profile(true, &[("X-Frame-Options", "DENY")]);
        let mut resp = response(Some("text/html"));

        assert_eq!(apply(&p, &mut resp), 0);
        assert_eq!(resp.headers()["x-frame-options"], "SAMEORIGIN");
    }

    #[test]
    fn disabled_profile_is_noop() {
        let p = profile(false, &[("X-Frame-Options", "DENY")]);
        let mut resp = response(Some("application/json"));
        assert_eq!(apply(&p, &mut resp), 0);
    }

    #[test]
    fn invalid_entries_are_skipped() {
        let p = profile(true, &[("bad header", "x"), ("X-Ok", "fine"), ("X-Bad-Value", "a\nb")]);
        let mut resp = response(Some("application/json"));

        assert_eq!(apply(&p, &mut resp), 1);
        assert_eq!(resp.headers()["x-ok"], "fine");
        assert!(!resp.headers().contains_key("x-bad-value"));
    }
}
