use std::collections::HashMap;

use base64::Engine;
use serde::Serialize;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use tracing::{error, info};

/// The triple the filebrowser frontend shim packs into the authorization
/// header. Serialized as JSON, this is the handshake the child expects from
/// a trusted caller.
#[derive(Debug, PartialEq, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub recaptcha: String,
}

/// Decode one comma-separated field: hex back to the original UTF-8 string.
fn decode_field(part: &str) -> Option<String> {
    let bytes = hex::decode(part.trim()).ok()?;
    String::from_utf8(bytes).ok()
}

/// Unpack the authorization header: a base64-encoded ASCII string holding
/// exactly three hex-encoded fields (username, SHA-512 signature,
/// reCAPTCHA token).
fn extract_credentials(authorization: &str) -> Option<[String; 3]> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(authorization.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let parts: Vec<&str> = decoded.split(',').collect();
    let [username, signature, recaptcha] = parts.as_slice() else {
        return None;
    };
    Some([
        decode_field(username)?,
        decode_field(signature)?,
        decode_field(recaptcha)?,
    ])
}

/// Verify a client-side-hashed login attempt against the credential map.
///
/// The received signature is a SHA-512 over `username || password`,
/// compared in constant time and case-insensitively against the locally
/// computed hex digest. Failures are silent by design: the request is
/// forwarded unmodified and the child's own 403 drives the failure state
/// machine.
pub fn authenticate(
    authorization: &str,
    auth_map: &HashMap<String, String>,
) -> Option<Credentials> {
    let Some([username, signature, recaptcha]) = extract_credentials(authorization) else {
        error!("Authorization header is malformed");
        return None;
    };
    let password = auth_map.get(&username)?;

    let expected = hex::encode(Sha512::digest(format!("{username}{password}").as_bytes()));
    let received = signature.to_ascii_lowercase();
    if !bool::from(expected.as_bytes().ct_eq(received.as_bytes())) {
        return None;
    }

    info!("Authentication was successful, rewriting auth header for the upstream");
    Some(Credentials {
        username,
        password: password.clone(),
        recaptcha,
    })
}
