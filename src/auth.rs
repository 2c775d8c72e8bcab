//! RFC 2617 Basic and Digest authentication.
//!
//! Policy is one of [`AuthMode::None`], [`AuthMode::Basic`], or
//! [`AuthMode::Digest`]. When enabled, every method except `OPTIONS` and
//! `TEARDOWN` on a connection with no prior successful authorization
//! requires a fresh challenge.
//!
//! The reference camera firmware this protocol was ported from compares
//! the pre-MD5 `HA1:nonce:HA2` string literally instead of hashing it —
//! that bug is not reproduced here; digests are computed and compared as
//! RFC 2617 specifies.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::config::{AuthConfig, AuthMode, User};

/// Number of consecutive authentication failures on one connection before
/// the server closes it.
pub const MAX_AUTH_FAILURES: u32 = 3;

/// Outcome of checking an incoming request's credentials.
#[derive(Debug)]
pub enum AuthOutcome {
    /// Authenticated as this principal (or auth is disabled).
    Authorized(String),
    /// Not authenticated; `challenge` is the `WWW-Authenticate` header value
    /// to send back with a `401`.
    Unauthorized { challenge: String },
}

/// Generate a fresh Digest nonce: 16 bytes of OS entropy, hex-encoded
/// (128 bits, per design note §9 — never timestamp- or `srand`-seeded,
/// and never reused across challenges).
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Build the `WWW-Authenticate` challenge header value for the configured mode.
fn challenge_header(auth: &AuthConfig, nonce: &str) -> String {
    match auth.mode {
        AuthMode::Basic => format!("Basic realm=\"{}\"", auth.realm),
        AuthMode::Digest => format!(
            "Digest realm=\"{}\", nonce=\"{}\", algorithm=MD5",
            auth.realm, nonce
        ),
        AuthMode::None => String::new(),
    }
}

/// Check an `Authorization` header against the configured policy.
///
/// `nonce` is the challenge most recently issued on this connection (for
/// Digest); a fresh one is generated and returned in the challenge if
/// authentication fails or none was issued yet.
pub fn check_authorization(
    auth: &AuthConfig,
    method: &str,
    uri: &str,
    header: Option<&str>,
    current_nonce: &str,
) -> AuthOutcome {
    match auth.mode {
        AuthMode::None => AuthOutcome::Authorized(String::new()),
        AuthMode::Basic => check_basic(auth, header),
        AuthMode::Digest => check_digest(auth, method, uri, header, current_nonce),
    }
}

fn find_user<'a>(users: &'a [User], username: &str) -> Option<&'a User> {
    users.iter().find(|u| u.username == username)
}

/// Constant-time string comparison (wraps `subtle::ConstantTimeEq` over bytes).
fn ct_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn check_basic(auth: &AuthConfig, header: Option<&str>) -> AuthOutcome {
    let unauthorized = || AuthOutcome::Unauthorized {
        challenge: challenge_header(auth, ""),
    };

    let Some(header) = header else {
        return unauthorized();
    };
    let Some(b64) = header.strip_prefix("Basic ") else {
        return unauthorized();
    };
    let Ok(decoded) = BASE64.decode(b64.trim()) else {
        return unauthorized();
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return unauthorized();
    };
    let Some((username, password)) = decoded.split_once(':') else {
        return unauthorized();
    };

    match find_user(&auth.users, username) {
        Some(user) if ct_eq(&user.password, password) => {
            tracing::debug!(username, "basic auth succeeded");
            AuthOutcome::Authorized(username.to_string())
        }
        _ => {
            tracing::warn!(username, "basic auth failed");
            unauthorized()
        }
    }
}

fn check_digest(
    auth: &AuthConfig,
    method: &str,
    uri: &str,
    header: Option<&str>,
    current_nonce: &str,
) -> AuthOutcome {
    let fresh_nonce = if current_nonce.is_empty() {
        generate_nonce()
    } else {
        current_nonce.to_string()
    };
    let unauthorized = || AuthOutcome::Unauthorized {
        challenge: challenge_header(auth, &fresh_nonce),
    };

    let Some(header) = header else {
        return unauthorized();
    };
    let Some(params) = header.strip_prefix("Digest ") else {
        return unauthorized();
    };
    let fields = parse_digest_params(params);

    let (Some(username), Some(nonce), Some(response)) = (
        fields.get("username"),
        fields.get("nonce"),
        fields.get("response"),
    ) else {
        return unauthorized();
    };

    if nonce != current_nonce {
        tracing::warn!(username, "digest auth presented stale nonce");
        return unauthorized();
    }

    let Some(user) = find_user(&auth.users, username) else {
        tracing::warn!(username, "digest auth unknown user");
        return unauthorized();
    };

    let ha1 = md5_hex(&format!("{}:{}:{}", username, auth.realm, user.password));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));
    let expected = md5_hex(&format!("{}:{}:{}", ha1, nonce, ha2));

    if ct_eq(&expected, response) {
        tracing::debug!(username, "digest auth succeeded");
        AuthOutcome::Authorized(username.clone())
    } else {
        tracing::warn!(username, "digest auth failed");
        unauthorized()
    }
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Parse comma-separated `key="value"` or `key=value` pairs from a Digest
/// `Authorization` header's parameter list. Produces owned tokens rather
/// than mutating the input in place (design note §9).
fn parse_digest_params(params: &str) -> std::collections::HashMap<String, String> {
    let mut out = std::collections::HashMap::new();
    for part in params.split(',') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            out.insert(key.to_string(), value.to_string());
        }
    }
    out
}

/// Returns the `WWW-Authenticate` value to use for an initial (unchallenged)
/// request, generating a nonce for Digest mode.
pub fn initial_challenge(auth: &AuthConfig) -> (String, String) {
    let nonce = match auth.mode {
        AuthMode::Digest => generate_nonce(),
        _ => String::new(),
    };
    (challenge_header(auth, &nonce), nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::User;

    fn users() -> Vec<User> {
        vec![User {
            username: "admin".to_string(),
            password: "secret".to_string(),
        }]
    }

    #[test]
    fn auth_none_always_authorized() {
        let auth = AuthConfig {
            mode: AuthMode::None,
            ..AuthConfig::default()
        };
        match check_authorization(&auth, "DESCRIBE", "rtsp://h/s", None, "") {
            AuthOutcome::Authorized(_) => {}
            _ => panic!("expected authorized"),
        }
    }

    #[test]
    fn basic_auth_succeeds_with_valid_credentials() {
        let auth = AuthConfig {
            mode: AuthMode::Basic,
            realm: "test".to_string(),
            users: users(),
        };
        let creds = BASE64.encode("admin:secret");
        let header = format!("Basic {}", creds);
        match check_authorization(&auth, "DESCRIBE", "rtsp://h/s", Some(&header), "") {
            AuthOutcome::Authorized(user) => assert_eq!(user, "admin"),
            _ => panic!("expected authorized"),
        }
    }

    #[test]
    fn basic_auth_rejects_wrong_password() {
        let auth = AuthConfig {
            mode: AuthMode::Basic,
            realm: "test".to_string(),
            users: users(),
        };
        let creds = BASE64.encode("admin:wrong");
        let header = format!("Basic {}", creds);
        match check_authorization(&auth, "DESCRIBE", "rtsp://h/s", Some(&header), "") {
            AuthOutcome::Unauthorized { .. } => {}
            _ => panic!("expected unauthorized"),
        }
    }

    #[test]
    fn basic_auth_missing_header_unauthorized() {
        let auth = AuthConfig {
            mode: AuthMode::Basic,
            realm: "test".to_string(),
            users: users(),
        };
        match check_authorization(&auth, "DESCRIBE", "rtsp://h/s", None, "") {
            AuthOutcome::Unauthorized { challenge } => {
                assert!(challenge.starts_with("Basic realm="));
            }
            _ => panic!("expected unauthorized"),
        }
    }

    #[test]
    fn digest_auth_matches_rfc2617_computation() {
        let auth = AuthConfig {
            mode: AuthMode::Digest,
            realm: "RTSP Server".to_string(),
            users: users(),
        };
        let nonce = "abc123";
        let method = "DESCRIBE";
        let uri = "rtsp://h/s";

        let ha1 = md5_hex(&format!("admin:RTSP Server:secret"));
        let ha2 = md5_hex(&format!("{}:{}", method, uri));
        let response = md5_hex(&format!("{}:{}:{}", ha1, nonce, ha2));

        let header = format!(
            "Digest username=\"admin\", realm=\"RTSP Server\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
            nonce, uri, response
        );

        match check_authorization(&auth, method, uri, Some(&header), nonce) {
            AuthOutcome::Authorized(user) => assert_eq!(user, "admin"),
            AuthOutcome::Unauthorized { .. } => panic!("expected authorized"),
        }
    }

    #[test]
    fn digest_auth_rejects_stale_nonce() {
        let auth = AuthConfig {
            mode: AuthMode::Digest,
            realm: "RTSP Server".to_string(),
            users: users(),
        };
        let header = "Digest username=\"admin\", realm=\"RTSP Server\", nonce=\"old\", uri=\"rtsp://h/s\", response=\"deadbeef\"";
        match check_authorization(&auth, "DESCRIBE", "rtsp://h/s", Some(header), "new") {
            AuthOutcome::Unauthorized { .. } => {}
            _ => panic!("expected unauthorized"),
        }
    }

    #[test]
    fn nonce_is_128_bits_hex() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn nonces_are_not_repeated() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_ne!(a, b);
    }
}
