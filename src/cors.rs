//! Cross-origin headers for the browser extension clients

use crate::config::CorsConfig;
use hyper::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS,
    VARY,
};

const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";

#[derive(Debug, Clone)]
pub struct CorsPolicy {
    exact: Vec<String>,
    prefixes: Vec<String>,
    allow_credentials: bool,
}

impl CorsPolicy {
    pub fn new(config: &CorsConfig) -> Self {
        let mut exact = Vec::new();
        let mut prefixes = Vec::new();

        for origin in &config.allowed_origins {
            match origin.strip_suffix('*') {
                Some(prefix) => prefixes.push(prefix.to_string()),
                None => exact.push(origin.clone()),
            }
        }

        Self {
            exact,
            prefixes,
            allow_credentials: config.allow_credentials,
        }
    }

    pub fn allows(&self, origin: &str) -> bool {
        self.exact.iter().any(|o| o == origin)
            || self.prefixes.iter().any(|p| origin.starts_with(p.as_str()))
    }

    /// Add CORS headers for `origin` if it is allowed. Disallowed or missing
    /// origins get no CORS headers at all.
    pub fn apply(&self, origin: Option<&str>, headers: &mut HeaderMap) {
        let Some(origin) = origin.filter(|o| self.allows(o)) else {
            return;
        };
        let Ok(origin) = HeaderValue::from_str(origin) else {
            return;
        };

        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.append(VARY, HeaderValue::from_static("Origin"));
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
        headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static("*"));
        if self.allow_credentials {
            headers.insert(
                ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CorsPolicy {
        CorsPolicy::new(&CorsConfig::default())
    }

    #[test]
    fn test_default_origins() {
        let policy = policy();
        assert!(policy.allows("http://localhost:8000"));
        assert!(policy.allows("chrome-extension://abcdefghijklmnop"));
        assert!(policy.allows("moz-extension://1234-5678"));

        assert!(!policy.allows("http://localhost:3000"));
        assert!(!policy.allows("https://evil.example"));
    }

    #[test]
    fn test_apply_allowed_origin() {
        let mut headers = HeaderMap::new();
        policy().apply(Some("chrome-extension://abc"), &mut headers);

        assert_eq!(
            headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "chrome-extension://abc"
        );
        assert_eq!(headers.get(ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(), "true");
        assert_eq!(headers.get(VARY).unwrap(), "Origin");
        assert_eq!(headers.get(ACCESS_CONTROL_ALLOW_METHODS).unwrap(), ALLOWED_METHODS);
    }

    #[test]
    fn test_apply_skips_disallowed_or_missing_origin() {
        let mut headers = HeaderMap::new();
        policy().apply(Some("https://evil.example"), &mut headers);
        policy().apply(None, &mut headers);
        assert!(headers.is_empty());
    }

    #[test]
    fn test_credentials_can_be_disabled() {
        let policy = CorsPolicy::new(&CorsConfig {
            allowed_origins: vec!["https://app.example".to_string()],
            allow_credentials: false,
        });

        let mut headers = HeaderMap::new();
        policy.apply(Some("https://app.example"), &mut headers);
        assert!(headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).is_some());
        assert!(headers.get(ACCESS_CONTROL_ALLOW_CREDENTIALS).is_none());
    }
}
