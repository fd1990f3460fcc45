//! Cookie storage shared by every browser attached to the same jar.

use cookie::time::{Duration, OffsetDateTime, PrimitiveDateTime};
use cookie::Cookie;
use url::Url;

/// Latest expiry we store; larger `max-age` values are clamped to it.
const LATEST_EXPIRY: OffsetDateTime = PrimitiveDateTime::MAX.assume_utc();

#[derive(Debug, Clone, PartialEq)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    /// Set when no `domain` attribute was given; only the exact host matches.
    pub host_only: bool,
    pub path: String,
    /// `None` for session cookies.
    pub expires: Option<OffsetDateTime>,
}

impl StoredCookie {
    fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }

    fn matches_host(&self, host: &str) -> bool {
        if self.host_only {
            return host == self.domain;
        }
        domain_matches(host, &self.domain)
    }

    fn matches_path(&self, request_path: &str) -> bool {
        if request_path == self.path {
            return true;
        }
        request_path.starts_with(self.path.as_str())
            && (self.path.ends_with('/') || request_path[self.path.len()..].starts_with('/'))
    }
}

#[derive(Debug, Default, Clone)]
pub struct CookieJar {
    cookies: Vec<StoredCookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a cookie from a `Set-Cookie` style header string.
    ///
    /// Returns `false` when the URL or the header cannot be used. A header
    /// whose expiry is already in the past removes the matching cookie.
    pub fn set(&mut self, url: &str, header: &str) -> bool {
        self.set_at(url, header, OffsetDateTime::now_utc())
    }

    pub fn get(&self, url: &str, name: &str) -> Option<String> {
        self.get_at(url, name, OffsetDateTime::now_utc())
    }

    /// Drop every cookie without an expiry.
    pub fn clear_sessions(&mut self) {
        self.cookies.retain(|cookie| cookie.expires.is_some());
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoredCookie> {
        self.cookies.iter()
    }

    pub(crate) fn set_at(&mut self, url: &str, header: &str, now: OffsetDateTime) -> bool {
        let Ok(url) = Url::parse(url) else {
            return false;
        };
        let Some(host) = url.host_str().map(|host| host.to_ascii_lowercase()) else {
            return false;
        };
        let Some(cookie) = store_cookie(header, &host, url.path(), now) else {
            return false;
        };

        self.cookies.retain(|existing| {
            !(existing.name == cookie.name
                && existing.domain == cookie.domain
                && existing.path == cookie.path)
        });
        if !cookie.is_expired(now) {
            self.cookies.push(cookie);
        }
        true
    }

    pub(crate) fn get_at(&self, url: &str, name: &str, now: OffsetDateTime) -> Option<String> {
        let url = Url::parse(url).ok()?;
        let host = url.host_str()?.to_ascii_lowercase();
        let path = url.path();

        self.cookies
            .iter()
            .filter(|cookie| cookie.name == name)
            .filter(|cookie| !cookie.is_expired(now))
            .filter(|cookie| cookie.matches_host(&host) && cookie.matches_path(path))
            .max_by_key(|cookie| cookie.path.len())
            .map(|cookie| cookie.value.clone())
    }
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Turn a parsed header into a jar entry scoped to the request URL.
fn store_cookie(
    header: &str,
    host: &str,
    request_path: &str,
    now: OffsetDateTime,
) -> Option<StoredCookie> {
    let parsed = Cookie::parse(header).ok()?;

    let (domain, host_only) = match parsed
        .domain()
        .map(|domain| domain.trim_start_matches('.').to_ascii_lowercase())
        .filter(|domain| !domain.is_empty())
    {
        Some(domain) if domain_matches(host, &domain) => (domain, false),
        Some(_) => return None,
        None => (host.to_string(), true),
    };

    let path = match parsed.path() {
        Some(path) if path.starts_with('/') => path.to_string(),
        _ => default_path(request_path),
    };

    // max-age wins over expires.
    let expires = match parsed.max_age() {
        Some(max_age) if max_age <= Duration::ZERO => Some(OffsetDateTime::UNIX_EPOCH),
        Some(max_age) => Some(now.checked_add(max_age).unwrap_or(LATEST_EXPIRY)),
        None => parsed.expires_datetime(),
    };

    Some(StoredCookie {
        name: parsed.name().to_string(),
        value: parsed.value().to_string(),
        domain,
        host_only,
        path,
        expires,
    })
}

fn default_path(request_path: &str) -> String {
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => request_path[..index].to_string(),
    }
}
