//! Header sanitizing for upstream calls
//!
//! Identifying headers never reach a provider: `user-agent`, `host`, and any
//! header whose name contains `ip` (which also catches `x-forwarded-ip`,
//! `x-real-ip` and unrelated names such as `x-description`).

/// Ordered header list. Keys compare case-insensitively.
pub type HeaderPairs = Vec<(String, String)>;

/// Returns true if the header must not be forwarded upstream
pub fn is_forbidden(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "user-agent" || lower == "host" || lower.contains("ip")
}

/// Drop forbidden headers, keeping order and original key casing
pub fn sanitize(headers: &[(String, String)]) -> HeaderPairs {
    headers
        .iter()
        .filter(|(name, _)| !is_forbidden(name))
        .cloned()
        .collect()
}

/// Case-insensitive lookup of the first header named `name`
pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Whether the headers declare a multipart form body
pub fn is_multipart(headers: &[(String, String)]) -> bool {
    header_value(headers, "content-type")
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("multipart/form-data"))
}

/// Set `name` to `value`, removing any existing entries with the same name
pub fn set_header(headers: &mut HeaderPairs, name: &str, value: &str) {
    headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value.to_string()));
}

/// Convert an axum/http header map into pairs, skipping non-UTF-8 values
pub fn from_header_map(map: &axum::http::HeaderMap) -> HeaderPairs {
    map.iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> HeaderPairs {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_sanitize_drops_identifying_headers() {
        let headers = pairs(&[
            ("User-Agent", "curl/8.0"),
            ("HOST", "gateway.local"),
            ("X-Forwarded-IP", "10.0.0.1"),
            ("x-real-ip", "10.0.0.2"),
            ("Authorization", "Bearer abc"),
            ("Accept", "application/json"),
        ]);

        let clean = sanitize(&headers);

        assert_eq!(
            clean,
            pairs(&[("Authorization", "Bearer abc"), ("Accept", "application/json")])
        );
    }

    #[test]
    fn test_sanitize_ip_substring_is_broad() {
        let headers = pairs(&[
            ("X-Description", "drop me"),
            ("Zip-Code", "drop me too"),
            ("X-Request-Id", "kept"),
        ]);

        let clean = sanitize(&headers);
        assert_eq!(clean, pairs(&[("X-Request-Id", "kept")]));
    }

    #[test]
    fn test_sanitize_never_leaves_forbidden_keys() {
        let names = [
            "user-agent",
            "User-Agent",
            "USER-AGENT",
            "host",
            "Host",
            "x-forwarded-for",
            "X-Client-IP",
            "ip",
            "IPv6-Hint",
            "content-type",
            "x-api-key",
            "hostname",
            "user-agent-extra",
        ];
        let headers: HeaderPairs = names
            .iter()
            .map(|n| (n.to_string(), "v".to_string()))
            .collect();

        let clean = sanitize(&headers);

        for (name, _) in &clean {
            let lower = name.to_lowercase();
            assert_ne!(lower, "user-agent");
            assert_ne!(lower, "host");
            assert!(!lower.contains("ip"), "{name} should have been dropped");
        }

        // Everything that is not forbidden survives untouched
        let expected: HeaderPairs = headers
            .iter()
            .filter(|(n, _)| {
                let l = n.to_lowercase();
                l != "user-agent" && l != "host" && !l.contains("ip")
            })
            .cloned()
            .collect();
        assert_eq!(clean, expected);
        assert!(clean.iter().any(|(n, _)| n == "hostname"));
        assert!(clean.iter().any(|(n, _)| n == "user-agent-extra"));
    }

    #[test]
    fn test_header_value_is_case_insensitive() {
        let headers = pairs(&[("Content-Type", "multipart/form-data; boundary=x")]);
        assert_eq!(
            header_value(&headers, "content-type"),
            Some("multipart/form-data; boundary=x")
        );
        assert!(is_multipart(&headers));
        assert!(!is_multipart(&pairs(&[("content-type", "application/json")])));
        assert!(!is_multipart(&[]));
    }

    #[test]
    fn test_set_header_replaces_existing() {
        let mut headers = pairs(&[("content-type", "text/plain"), ("Accept", "*/*")]);
        set_header(&mut headers, "Content-Type", "application/json");

        assert_eq!(
            headers,
            pairs(&[("Accept", "*/*"), ("Content-Type", "application/json")])
        );
    }
}
