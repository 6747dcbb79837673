//! Post-login redirect targets.
//!
//! A target is either a path on this host or an absolute `http`/`https` URL.
//! Anything else (`javascript:`, `data:`, scheme-relative `//host`) is refused
//! and the callback falls back to a JSON response.

use axum::http::{HeaderMap, header};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RedirectError {
    #[error("redirect target is empty")]
    Empty,
    #[error("scheme-relative redirect targets are not allowed")]
    SchemeRelative,
    #[error("redirect target is not a valid URL: {0}")]
    Invalid(String),
    #[error("redirect scheme {0:?} is not allowed")]
    Scheme(String),
    #[error("request has no host to resolve a relative redirect against")]
    NoBase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectTarget {
    Relative(String),
    Absolute(Url),
}

impl RedirectTarget {
    pub fn parse(raw: &str) -> Result<Self, RedirectError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RedirectError::Empty);
        }
        if raw.starts_with("//") || raw.starts_with("/\\") {
            return Err(RedirectError::SchemeRelative);
        }
        if raw.starts_with('/') {
            return Ok(RedirectTarget::Relative(raw.to_string()));
        }

        let url = Url::parse(raw).map_err(|e| RedirectError::Invalid(e.to_string()))?;
        check_scheme(&url)?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(RedirectError::Invalid("missing host".to_string()));
        }
        Ok(RedirectTarget::Absolute(url))
    }

    /// Final URL with `sessionCredential` and, when given, `state` set on the
    /// query string. Existing parameters of the same name are replaced.
    pub fn with_credential(
        &self,
        base: Option<&str>,
        credential: &str,
        state: Option<&str>,
    ) -> Result<Url, RedirectError> {
        let mut url = match self {
            RedirectTarget::Absolute(url) => url.clone(),
            RedirectTarget::Relative(path) => {
                let base = Url::parse(base.ok_or(RedirectError::NoBase)?)
                    .map_err(|e| RedirectError::Invalid(e.to_string()))?;
                base.join(path)
                    .map_err(|e| RedirectError::Invalid(e.to_string()))?
            }
        };
        check_scheme(&url)?;

        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "sessionCredential" && !(state.is_some() && k == "state"))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut query = url.query_pairs_mut();
            query.clear();
            query.extend_pairs(kept);
            query.append_pair("sessionCredential", credential);
            if let Some(state) = state {
                query.append_pair("state", state);
            }
        }
        Ok(url)
    }
}

fn check_scheme(url: &Url) -> Result<(), RedirectError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(RedirectError::Scheme(other.to_string())),
    }
}

/// `<proto>://<host>` as seen by the client, honouring reverse-proxy headers.
pub fn request_base_url(headers: &HeaderMap) -> Option<String> {
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("https");
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())?;
    Some(format!("{proto}://{host}"))
}
