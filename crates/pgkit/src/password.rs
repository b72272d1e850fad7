//! Password digests as stored in `pg_authid.rolpassword`.

use md5::{Digest, Md5};

/// Whether a value is already a server-side verifier.
///
/// Accepts `md5` followed by 32 hex digits and `SCRAM-SHA-256$` verifiers.
pub fn is_prehashed(value: &str) -> bool {
    if let Some(hex) = value.strip_prefix("md5") {
        return hex.len() == 32 && hex.bytes().all(|b| b.is_ascii_hexdigit());
    }
    value.starts_with("SCRAM-SHA-256$")
}

/// The `md5` verifier of a password: `"md5" + hex(md5(password + role))`.
pub fn md5_digest(role: &str, password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(role.as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(35);
    out.push_str("md5");
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// The value that should end up in the catalog for a declared password.
pub fn stored_form(role: &str, password: &str) -> String {
    if is_prehashed(password) {
        password.to_string()
    } else {
        md5_digest(role, password)
    }
}
