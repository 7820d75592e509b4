//! URL normalization policy for page navigation requests.
//!
//! Bare host-like strings get `https://`, `localhost[:port]` gets
//! `http://`, anything already schemed passes through verbatim. Only
//! `http`/`https` are accepted; everything else is a validation error.

use crate::error::{Error, Result};

pub fn normalize_url(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("url is empty".into()));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(Error::Validation(format!("url contains whitespace: '{}'", trimmed)));
    }

    if let Some((scheme, _rest)) = trimmed.split_once("://") {
        return match scheme {
            "http" | "https" => Ok(trimmed.to_string()),
            other => Err(Error::Validation(format!(
                "unsupported url scheme '{}'",
                other
            ))),
        };
    }

    if is_localhost(trimmed) {
        return Ok(format!("http://{}", trimmed));
    }

    if is_host_like(trimmed) {
        return Ok(format!("https://{}", trimmed));
    }

    Err(Error::Validation(format!("not a navigable url: '{}'", trimmed)))
}

fn is_localhost(s: &str) -> bool {
    let authority = s.split('/').next().unwrap_or(s);
    match authority.split_once(':') {
        Some((host, port)) => {
            host == "localhost" && !port.is_empty() && port.chars().all(|c| c.is_ascii_digit())
        }
        None => authority == "localhost",
    }
}

fn is_host_like(s: &str) -> bool {
    let authority = s.split('/').next().unwrap_or(s);
    let host = match authority.split_once(':') {
        Some((host, port)) => {
            if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
                return false;
            }
            host
        }
        None => authority,
    };
    // A plausible hostname: dotted labels of url-safe characters.
    host.contains('.')
        && !host.starts_with('.')
        && !host.ends_with('.')
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_hosts_get_https() {
        assert_eq!(normalize_url("example.com").unwrap(), "https://example.com");
        assert_eq!(
            normalize_url("app.example.com/dash?x=1").unwrap(),
            "https://app.example.com/dash?x=1"
        );
        assert_eq!(
            normalize_url("example.com:8443").unwrap(),
            "https://example.com:8443"
        );
    }

    #[test]
    fn localhost_gets_http() {
        assert_eq!(normalize_url("localhost").unwrap(), "http://localhost");
        assert_eq!(
            normalize_url("localhost:3000/app").unwrap(),
            "http://localhost:3000/app"
        );
    }

    #[test]
    fn schemed_urls_pass_through_verbatim() {
        assert_eq!(
            normalize_url("http://example.com").unwrap(),
            "http://example.com"
        );
        assert_eq!(
            normalize_url("https://example.com/a?b=c#d").unwrap(),
            "https://example.com/a?b=c#d"
        );
    }

    #[test]
    fn non_http_schemes_are_rejected() {
        assert!(normalize_url("ftp://example.com").is_err());
        assert!(normalize_url("file:///etc/passwd").is_err());
        assert!(normalize_url("chrome://settings").is_err());
    }

    #[test]
    fn junk_is_rejected() {
        assert!(normalize_url("").is_err());
        assert!(normalize_url("   ").is_err());
        assert!(normalize_url("not a url").is_err());
        assert!(normalize_url("javascript:alert(1)").is_err());
        assert!(normalize_url(".example.com").is_err());
    }
}
