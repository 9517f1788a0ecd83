//! Syntactic validation of destination URLs.
//!
//! Accepted shape, case-insensitive:
//!
//! ```text
//! (http|https|ftp|ftps)://HOST[:PORT][/ | /PATH | ?QUERY]
//! HOST = localhost | d.d.d.d | label(.label)*.tld[.]
//! ```
//!
//! No DNS lookups happen here; a URL that validates may still point
//! nowhere.

use std::fmt;

use url::Url;

use crate::error::{InvalidUrlError, InvalidUrlReason};

const SCHEMES: [&str; 4] = ["http", "https", "ftp", "ftps"];

/// A destination that passed [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidUrl(Url);

impl ValidUrl {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }

    pub fn into_url(self) -> Url {
        self.0
    }
}

impl fmt::Display for ValidUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Check `input` against the destination grammar.
pub fn validate(input: &str) -> Result<ValidUrl, InvalidUrlError> {
    let reject = |reason| Err(InvalidUrlError::new(input, reason));

    if input.is_empty() {
        return reject(InvalidUrlReason::Empty);
    }

    let Some((scheme, rest)) = input.split_once("://") else {
        return reject(InvalidUrlReason::MissingScheme);
    };
    if scheme.is_empty() || !scheme.bytes().all(|b| b.is_ascii_alphabetic()) {
        return reject(InvalidUrlReason::MissingScheme);
    }
    if !SCHEMES.iter().any(|s| s.eq_ignore_ascii_case(scheme)) {
        return reject(InvalidUrlReason::UnsupportedScheme);
    }

    let host_end = rest
        .find(|c: char| matches!(c, ':' | '/' | '?'))
        .unwrap_or(rest.len());
    let (host, rest) = rest.split_at(host_end);
    if !is_valid_host(host) {
        return reject(InvalidUrlReason::InvalidHost);
    }

    let Some(tail) = strip_port(rest) else {
        return reject(InvalidUrlReason::InvalidPort);
    };
    if !is_valid_tail(tail) {
        return reject(InvalidUrlReason::InvalidPath);
    }

    match Url::parse(input) {
        Ok(url) => Ok(ValidUrl(url)),
        Err(_) => reject(InvalidUrlReason::Unparseable),
    }
}

fn is_valid_host(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost") || is_dotted_quad(host) || is_domain(host)
}

fn is_dotted_quad(host: &str) -> bool {
    let groups: Vec<&str> = host.split('.').collect();
    groups.len() == 4
        && groups
            .iter()
            .all(|g| (1..=3).contains(&g.len()) && g.bytes().all(|b| b.is_ascii_digit()))
}

fn is_domain(host: &str) -> bool {
    let host = host.strip_suffix('.').unwrap_or(host);
    let mut labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return false;
    }

    let Some(tld) = labels.pop() else {
        return false;
    };
    let tld_ok = tld.len() >= 2 && tld.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-');

    tld_ok && labels.iter().all(|label| is_label(label))
}

fn is_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };

    bytes.len() <= 63
        && first.is_ascii_alphanumeric()
        && last.is_ascii_alphanumeric()
        && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
}

/// Strip an optional `:digits` prefix. `None` when the port is malformed.
fn strip_port(rest: &str) -> Option<&str> {
    let Some(after_colon) = rest.strip_prefix(':') else {
        return Some(rest);
    };
    let digits = after_colon
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(after_colon.len());
    if digits == 0 {
        return None;
    }
    Some(&after_colon[digits..])
}

fn is_valid_tail(tail: &str) -> bool {
    if tail.is_empty() || tail == "/" {
        return true;
    }
    let mut chars = tail.chars();
    matches!(chars.next(), Some('/') | Some('?'))
        && tail.len() > 1
        && chars.all(|c| !c.is_whitespace())
}
