//! Session cookie storage and lookup.
//!
//! [`CookieJar`] plays the role the browser's cookie store plays for a page:
//! it is seeded by the embedder, updated from `Set-Cookie` headers of
//! same-origin responses, and rendered as a `name=value; name2=value2`
//! string that [`get_cookie`] scans.

use http::HeaderMap;
use parking_lot::RwLock;

/// Look up a cookie in a rendered cookie string.
///
/// Entries are split on `;` and trimmed; the first entry starting with
/// `name=` wins and its value is percent-decoded. Returns `None` when no
/// entry matches, the string is empty, the value holds a `%` not followed
/// by two hex digits, or the decoded value is not UTF-8.
#[must_use]
pub fn get_cookie(cookies: &str, name: &str) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }

    cookies
        .split(';')
        .map(str::trim)
        .find_map(|cookie| cookie.strip_prefix(name)?.strip_prefix('='))
        .filter(|raw| has_valid_escapes(raw))
        .and_then(|raw| urlencoding::decode(raw).ok())
        .map(std::borrow::Cow::into_owned)
}

fn has_valid_escapes(raw: &str) -> bool {
    raw.split('%')
        .skip(1)
        .all(|escape| escape.bytes().take(2).filter(u8::is_ascii_hexdigit).count() == 2)
}

/// Insertion-ordered cookie store shared by every call of a session.
///
/// Values are stored exactly as they appear on the wire (still
/// percent-encoded); decoding happens on lookup.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: RwLock<Vec<(String, String)>>,
}

impl CookieJar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a jar from a rendered cookie string such as `a=1; b=2`.
    ///
    /// Entries without `=` are ignored.
    #[must_use]
    pub fn from_cookie_string(cookies: &str) -> Self {
        let jar = Self::new();
        for entry in cookies.split(';').map(str::trim) {
            if let Some((name, value)) = entry.split_once('=')
                && !name.trim().is_empty()
            {
                jar.set(name.trim(), value.trim());
            }
        }
        jar
    }

    /// Insert or replace a cookie, keeping its original position on replace.
    pub fn set(&self, name: &str, value: &str) {
        let mut cookies = self.cookies.write();
        if let Some(slot) = cookies.iter_mut().find(|(n, _)| n == name) {
            value.clone_into(&mut slot.1);
        } else {
            cookies.push((name.to_owned(), value.to_owned()));
        }
    }

    /// Remove a cookie; returns whether it was present.
    pub fn remove(&self, name: &str) -> bool {
        let mut cookies = self.cookies.write();
        let before = cookies.len();
        cookies.retain(|(n, _)| n != name);
        cookies.len() != before
    }

    /// Decoded value of a cookie, see [`get_cookie`].
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        get_cookie(&self.cookie_string(), name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.read().is_empty()
    }

    /// Render as the value of a `Cookie` request header.
    #[must_use]
    pub fn cookie_string(&self) -> String {
        self.cookies
            .read()
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Apply every `Set-Cookie` header of a response.
    ///
    /// Only the leading `name=value` pair and `Max-Age` are honored; a
    /// non-positive `Max-Age` deletes the cookie. Returns the number of
    /// headers applied.
    pub fn absorb_set_cookie(&self, headers: &HeaderMap) -> usize {
        let mut applied = 0;
        for value in headers.get_all(http::header::SET_COOKIE) {
            let Ok(value) = value.to_str() else {
                tracing::debug!("skipping non-ASCII Set-Cookie header");
                continue;
            };
            let mut parts = value.split(';').map(str::trim);
            let Some((name, cookie_value)) = parts.next().and_then(|p| p.split_once('=')) else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }

            let expired = parts.any(|attr| {
                attr.split_once('=').is_some_and(|(k, v)| {
                    k.trim().eq_ignore_ascii_case("max-age")
                        && v.trim().parse::<i64>().is_ok_and(|secs| secs <= 0)
                })
            });

            if expired {
                self.remove(name);
            } else {
                self.set(name, cookie_value.trim());
            }
            applied += 1;
        }
        applied
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_get_cookie_decodes_value() {
        let cookies = "a=1; omnidb_csrftoken=XYZ%3D; b=2";
        assert_eq!(
            get_cookie(cookies, "omnidb_csrftoken"),
            Some("XYZ=".to_owned())
        );
        assert_eq!(get_cookie(cookies, "a"), Some("1".to_owned()));
    }

    #[test]
    fn test_get_cookie_missing() {
        assert_eq!(get_cookie("a=1; b=2", "omnidb_csrftoken"), None);
        assert_eq!(get_cookie("", "omnidb_csrftoken"), None);
    }

    #[test]
    fn test_get_cookie_requires_exact_name() {
        // "token_old" must not match a lookup for "token"
        assert_eq!(get_cookie("token_old=1; token=2", "token"), Some("2".to_owned()));
        assert_eq!(get_cookie("tokens=1", "token"), None);
    }

    #[test]
    fn test_get_cookie_first_match_wins() {
        assert_eq!(get_cookie("a=first; a=second", "a"), Some("first".to_owned()));
    }

    #[test]
    fn test_get_cookie_empty_value() {
        assert_eq!(get_cookie("a=; b=2", "a"), Some(String::new()));
    }

    #[test]
    fn test_get_cookie_rejects_undecodable_values() {
        // 0xFF alone is not UTF-8
        assert_eq!(get_cookie("a=%FF", "a"), None);
        assert_eq!(get_cookie("a=%ZZ; b=2", "a"), None);
        assert_eq!(get_cookie("a=50%", "a"), None);
        assert_eq!(get_cookie("a=%4", "a"), None);
        assert_eq!(get_cookie("a=%ZZ; b=2", "b"), Some("2".to_owned()));
        assert_eq!(get_cookie("a=100%25", "a"), Some("100%".to_owned()));
    }

    #[test]
    fn test_jar_round_trip() {
        let jar = CookieJar::from_cookie_string("sessionid=abc; omnidb_csrftoken=t%2Fk");
        assert_eq!(jar.cookie_string(), "sessionid=abc; omnidb_csrftoken=t%2Fk");
        assert_eq!(jar.get("omnidb_csrftoken"), Some("t/k".to_owned()));

        jar.set("sessionid", "def");
        assert_eq!(jar.cookie_string(), "sessionid=def; omnidb_csrftoken=t%2Fk");

        assert!(jar.remove("sessionid"));
        assert!(!jar.remove("sessionid"));
        assert_eq!(jar.cookie_string(), "omnidb_csrftoken=t%2Fk");
    }

    #[test]
    fn test_absorb_set_cookie() {
        let jar = CookieJar::from_cookie_string("stale=1");
        let mut headers = HeaderMap::new();
        headers.append(
            http::header::SET_COOKIE,
            HeaderValue::from_static("omnidb_csrftoken=new; Path=/; SameSite=Lax"),
        );
        headers.append(
            http::header::SET_COOKIE,
            HeaderValue::from_static("stale=; Max-Age=0; Path=/"),
        );

        assert_eq!(jar.absorb_set_cookie(&headers), 2);
        assert_eq!(jar.get("omnidb_csrftoken"), Some("new".to_owned()));
        assert_eq!(jar.get("stale"), None);
    }

    #[test]
    fn test_absorb_negative_max_age_removes() {
        let jar = CookieJar::from_cookie_string("sessionid=abc; omnidb_csrftoken=t");
        let mut headers = HeaderMap::new();
        headers.append(
            http::header::SET_COOKIE,
            HeaderValue::from_static("sessionid=gone; Path=/; max-age=-1"),
        );

        assert_eq!(jar.absorb_set_cookie(&headers), 1);
        assert_eq!(jar.get("sessionid"), None);
        assert_eq!(jar.cookie_string(), "omnidb_csrftoken=t");
    }

    #[test]
    fn test_absorb_ignores_malformed() {
        let jar = CookieJar::new();
        let mut headers = HeaderMap::new();
        headers.append(http::header::SET_COOKIE, HeaderValue::from_static("novalue"));
        headers.append(http::header::SET_COOKIE, HeaderValue::from_static("=orphan"));

        assert_eq!(jar.absorb_set_cookie(&headers), 0);
        assert!(jar.is_empty());
    }
}
