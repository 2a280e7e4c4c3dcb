//! Authentication variants
//!
//! The bridge supports anonymous access, basic credentials, and opaque
//! cookie/session material. Cookie auth implies disabled TLS verification:
//! it is the corporate-intranet path where private CAs are the norm.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Failed to read cookie file {path}: {source}")]
    CookieFile {
        path: String,
        source: std::io::Error,
    },

    #[error("No cookies found in {0}")]
    EmptyCookies(String),
}

/// Authentication material applied to every upstream request.
#[derive(Debug, Clone)]
pub enum Auth {
    /// Anonymous access.
    None,
    /// HTTP basic credentials, sent on every request.
    Basic { username: String, password: String },
    /// Opaque cookies loaded from a file or string.
    Cookies(BTreeMap<String, String>),
}

impl Auth {
    /// Load cookies from a Netscape-format cookie file. Lines with seven
    /// tab-separated fields use fields 6/7 as name/value; `key=value` lines
    /// are accepted as a fallback.
    pub fn from_cookie_file(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| AuthError::CookieFile {
            path: path.display().to_string(),
            source,
        })?;

        let mut cookies = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() >= 7 {
                cookies.insert(fields[5].to_string(), fields[6].to_string());
            } else if let Some((key, value)) = line.split_once('=') {
                cookies.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        if cookies.is_empty() {
            return Err(AuthError::EmptyCookies(path.display().to_string()));
        }
        Ok(Auth::Cookies(cookies))
    }

    /// Parse a `key1=val1; key2=val2` cookie string.
    pub fn from_cookie_string(raw: &str) -> Result<Self, AuthError> {
        let mut cookies = BTreeMap::new();
        for part in raw.split(';') {
            if let Some((key, value)) = part.trim().split_once('=') {
                cookies.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        if cookies.is_empty() {
            return Err(AuthError::EmptyCookies("cookie string".to_string()));
        }
        Ok(Auth::Cookies(cookies))
    }

    /// Whether TLS certificate verification should be skipped. True only for
    /// the cookie variant.
    pub fn skip_tls_verify(&self) -> bool {
        matches!(self, Auth::Cookies(_))
    }

    /// Short description for startup logging. Never includes secrets.
    pub fn describe(&self) -> String {
        match self {
            Auth::None => "anonymous".to_string(),
            Auth::Basic { username, .. } => format!("basic (user: {})", username),
            Auth::Cookies(cookies) => format!("cookies ({} values)", cookies.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cookie_string_parsing() {
        let auth = Auth::from_cookie_string("SAP_SESSIONID=abc123; MYSAPSSO2=xyz; ").unwrap();
        match auth {
            Auth::Cookies(cookies) => {
                assert_eq!(cookies.len(), 2);
                assert_eq!(cookies["SAP_SESSIONID"], "abc123");
                assert_eq!(cookies["MYSAPSSO2"], "xyz");
            }
            other => panic!("expected cookies, got {:?}", other),
        }
    }

    #[test]
    fn test_cookie_string_empty_is_error() {
        assert!(Auth::from_cookie_string("no cookies here").is_err());
    }

    #[test]
    fn test_netscape_cookie_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# Netscape HTTP Cookie File").unwrap();
        writeln!(
            file,
            ".example.com\tTRUE\t/\tTRUE\t0\tSAP_SESSIONID\tsecret-value"
        )
        .unwrap();
        writeln!(file, "shortcut=direct").unwrap();

        let auth = Auth::from_cookie_file(file.path()).unwrap();
        match auth {
            Auth::Cookies(cookies) => {
                assert_eq!(cookies["SAP_SESSIONID"], "secret-value");
                assert_eq!(cookies["shortcut"], "direct");
            }
            other => panic!("expected cookies, got {:?}", other),
        }
    }

    #[test]
    fn test_tls_verification_policy() {
        assert!(!Auth::None.skip_tls_verify());
        assert!(!Auth::Basic {
            username: "u".to_string(),
            password: "p".to_string()
        }
        .skip_tls_verify());
        assert!(Auth::Cookies(BTreeMap::new()).skip_tls_verify());
    }

    #[test]
    fn test_describe_never_leaks_password() {
        let auth = Auth::Basic {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!auth.describe().contains("hunter2"));
    }
}
