//! HTTP authentication for WebDAV servers.
//!
//! Nextcloud, ownCloud and most NAS shares accept Basic over TLS (RFC 7617).
//! Some Apache `mod_dav` setups only answer with a Digest challenge
//! (RFC 7616); only the MD5 algorithm with `qop=auth` or no qop is handled.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;

/// `Authorization: Basic ...` value for a username/password pair.
pub fn basic_auth(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

/// Digest state kept between requests to the same server.
///
/// Built from the server's challenge; every [`DigestAuth::authorize`] call
/// consumes one nonce count.
#[derive(Debug, Clone)]
pub struct DigestAuth {
    realm: String,
    nonce: String,
    opaque: Option<String>,
    algorithm: String,
    qop_auth: bool,
    nonce_count: u32,
}

impl DigestAuth {
    /// Reads a `WWW-Authenticate` value. Anything that is not a Digest
    /// challenge with a realm and a nonce yields `None`.
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, rest) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("digest") {
            return None;
        }

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut algorithm = None;
        let mut qop_auth = false;
        for (key, value) in challenge_params(rest) {
            match key.as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => algorithm = Some(value),
                "qop" => qop_auth = value.split(',').any(|q| q.trim() == "auth"),
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            nonce: nonce?,
            opaque,
            algorithm: algorithm.unwrap_or_else(|| "MD5".to_string()),
            qop_auth,
            nonce_count: 0,
        })
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Signs one request and returns the `Authorization` header value.
    pub fn authorize(&mut self, method: &str, uri: &str, username: &str, password: &str) -> String {
        self.nonce_count += 1;
        let cnonce = client_nonce();
        let nc = format!("{:08x}", self.nonce_count);
        let response = self.response(method, uri, username, password, &nc, &cnonce);

        let mut header = format!(
            "Digest username=\"{username}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", \
             response=\"{response}\", algorithm={}",
            self.realm, self.nonce, self.algorithm
        );
        if self.qop_auth {
            header.push_str(&format!(", qop=auth, nc={nc}, cnonce=\"{cnonce}\""));
        }
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(", opaque=\"{opaque}\""));
        }
        header
    }

    fn response(
        &self,
        method: &str,
        uri: &str,
        username: &str,
        password: &str,
        nc: &str,
        cnonce: &str,
    ) -> String {
        let ha1 = md5_hex(&format!("{username}:{}:{password}", self.realm));
        let ha2 = md5_hex(&format!("{method}:{uri}"));
        if self.qop_auth {
            md5_hex(&format!("{ha1}:{}:{nc}:{cnonce}:auth:{ha2}", self.nonce))
        } else {
            md5_hex(&format!("{ha1}:{}:{ha2}", self.nonce))
        }
    }
}

/// Splits `key=value, key="quoted, value"` pairs. Keys are lowercased.
fn challenge_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = input.trim_start_matches([' ', ',']);

    while let Some(eq) = rest.find('=') {
        let key = rest[..eq].trim().to_ascii_lowercase();
        let after = &rest[eq + 1..];

        let (value, remaining) = match after.strip_prefix('"') {
            Some(quoted) => read_quoted(quoted),
            None => {
                let end = after.find(',').unwrap_or(after.len());
                (after[..end].trim().to_string(), &after[end..])
            }
        };
        if !key.is_empty() {
            params.push((key, value));
        }
        rest = remaining.trim_start_matches([' ', ',']);
    }
    params
}

/// Reads up to the closing quote, honouring backslash escapes.
fn read_quoted(input: &str) -> (String, &str) {
    let mut value = String::new();
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        match c {
            _ if escaped => {
                value.push(c);
                escaped = false;
            }
            '\\' => escaped = true,
            '"' => return (value, &input[i + 1..]),
            _ => value.push(c),
        }
    }
    (value, "")
}

fn client_nonce() -> String {
    let bytes: [u8; 8] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field<'a>(header: &'a str, name: &str) -> Option<&'a str> {
        header
            .trim_start_matches("Digest ")
            .split(", ")
            .find_map(|part| part.strip_prefix(name)?.strip_prefix('='))
            .map(|v| v.trim_matches('"'))
    }

    #[test]
    fn basic_header_is_base64_of_pair() {
        assert_eq!(basic_auth("user", "password"), "Basic dXNlcjpwYXNzd29yZA==");
    }

    #[test]
    fn reads_nas_challenge() {
        let auth = DigestAuth::parse(
            r#"Digest realm="files@nas.local", nonce="abc123", qop="auth", algorithm=MD5"#,
        )
        .unwrap();
        assert_eq!(auth.realm(), "files@nas.local");
        assert_eq!(auth.nonce, "abc123");
        assert!(auth.qop_auth);
        assert_eq!(auth.algorithm, "MD5");
    }

    #[test]
    fn quoted_values_may_contain_commas() {
        let auth =
            DigestAuth::parse(r#"Digest realm="a, \"b\"", nonce=n1, qop="auth-int,auth""#).unwrap();
        assert_eq!(auth.realm(), r#"a, "b""#);
        assert_eq!(auth.nonce, "n1");
        assert!(auth.qop_auth);
    }

    #[test]
    fn rejects_other_schemes_and_incomplete_challenges() {
        assert!(DigestAuth::parse(r#"Basic realm="nas""#).is_none());
        assert!(DigestAuth::parse(r#"Digest realm="nas""#).is_none());
        assert!(DigestAuth::parse(r#"Digest realm="r", nonce="n", qop="auth-int""#)
            .is_some_and(|a| !a.qop_auth));
    }

    #[test]
    fn signs_with_qop_and_counts_nonces() {
        let mut auth = DigestAuth::parse(r#"Digest realm="test", nonce="abc123", qop="auth""#)
            .unwrap();
        let uri = "/remote.php/dav/files/me/backup.json";

        let first = auth.authorize("PUT", uri, "user", "pass");
        assert_eq!(field(&first, "username"), Some("user"));
        assert_eq!(field(&first, "uri"), Some(uri));
        assert_eq!(field(&first, "nc"), Some("00000001"));

        let cnonce = field(&first, "cnonce").unwrap();
        let ha1 = md5_hex("user:test:pass");
        let ha2 = md5_hex(&format!("PUT:{uri}"));
        let expected = md5_hex(&format!("{ha1}:abc123:00000001:{cnonce}:auth:{ha2}"));
        assert_eq!(field(&first, "response"), Some(expected.as_str()));

        let second = auth.authorize("GET", uri, "user", "pass");
        assert_eq!(field(&second, "nc"), Some("00000002"));
    }

    #[test]
    fn signs_without_qop() {
        let mut auth = DigestAuth::parse(r#"Digest realm="r", nonce="n", opaque="o""#).unwrap();
        let header = auth.authorize("GET", "/f", "u", "p");

        let expected = md5_hex(&format!("{}:n:{}", md5_hex("u:r:p"), md5_hex("GET:/f")));
        assert_eq!(field(&header, "response"), Some(expected.as_str()));
        assert_eq!(field(&header, "opaque"), Some("o"));
        assert!(field(&header, "qop").is_none());
    }
}
