//! Session token encoding.
//!
//! A token binds a session id to the shared key used for payload encryption:
//!
//! ```text
//! [id len (1 byte)] [id bytes] [key (32 bytes)] [checksum (4 bytes)]
//! ```
//!
//! The whole packet is standard base64. The checksum is the first four bytes
//! of `SHA-256(id bytes || key)`; it lets the runner catch typos but is not
//! checked by [`decode`].

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::SessionId;

/// Length of the shared key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the token checksum in bytes.
pub const CHECKSUM_LEN: usize = 4;

/// Longest session id (in bytes) a token can carry.
pub const MAX_SESSION_ID_LEN: usize = u8::MAX as usize;

/// Symmetric key shared between this side and the runner.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey([u8; KEY_LEN]);

impl SharedKey {
    /// Draw a fresh key from the OS random source.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap existing key material.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

/// Token error.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Session ID is empty")]
    EmptySessionId,
    #[error("Session ID is {0} bytes, maximum is 255")]
    SessionIdTooLong(usize),
    #[error("Token is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Token is too short ({0} bytes)")]
    TooShort(usize),
    #[error("Token length {actual} does not match declared layout ({expected} bytes)")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("Session ID in token is not UTF-8")]
    InvalidSessionId,
}

/// Token generated for a new session.
#[derive(Debug, Clone)]
pub struct GeneratedToken {
    /// Base64 token handed to the runner.
    pub token: String,
    /// Key embedded in the token.
    pub key: SharedKey,
}

/// Fields recovered from a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedToken {
    pub session_id: SessionId,
    pub key: SharedKey,
    pub checksum: [u8; CHECKSUM_LEN],
}

impl DecodedToken {
    /// Whether the embedded checksum matches the session id and key.
    #[must_use]
    pub fn checksum_matches(&self) -> bool {
        checksum(self.session_id.as_str().as_bytes(), &self.key) == self.checksum
    }
}

/// Generate a fresh key and the token carrying it.
///
/// # Errors
/// Returns error if the session id is empty or longer than 255 bytes.
pub fn generate(session_id: &SessionId) -> Result<GeneratedToken, TokenError> {
    let key = SharedKey::generate();
    let token = encode(session_id, &key)?;
    Ok(GeneratedToken { token, key })
}

/// Encode a token for an existing key.
///
/// # Errors
/// Returns error if the session id is empty or longer than 255 bytes.
pub fn encode(session_id: &SessionId, key: &SharedKey) -> Result<String, TokenError> {
    let id = session_id.as_str().as_bytes();
    let id_len = u8::try_from(id.len()).map_err(|_| TokenError::SessionIdTooLong(id.len()))?;
    if id_len == 0 {
        return Err(TokenError::EmptySessionId);
    }

    let mut packet = Vec::with_capacity(1 + id.len() + KEY_LEN + CHECKSUM_LEN);
    packet.push(id_len);
    packet.extend_from_slice(id);
    packet.extend_from_slice(key.as_bytes());
    packet.extend_from_slice(&checksum(id, key));

    Ok(BASE64.encode(packet))
}

/// Decode a token back into its session id and key.
///
/// The checksum is returned but not verified; see
/// [`DecodedToken::checksum_matches`].
///
/// # Errors
/// Returns error if the token is not base64 or its layout is inconsistent.
pub fn decode(token: &str) -> Result<DecodedToken, TokenError> {
    let packet = BASE64.decode(token.trim())?;
    if packet.len() < 1 + 1 + KEY_LEN + CHECKSUM_LEN {
        return Err(TokenError::TooShort(packet.len()));
    }

    let id_len = usize::from(packet[0]);
    let expected = 1 + id_len + KEY_LEN + CHECKSUM_LEN;
    if id_len == 0 || expected != packet.len() {
        return Err(TokenError::LengthMismatch {
            expected,
            actual: packet.len(),
        });
    }

    let (id, rest) = packet[1..].split_at(id_len);
    let (key, sum) = rest.split_at(KEY_LEN);

    let session_id = std::str::from_utf8(id).map_err(|_| TokenError::InvalidSessionId)?;
    let mut key_bytes = [0u8; KEY_LEN];
    key_bytes.copy_from_slice(key);
    let mut checksum = [0u8; CHECKSUM_LEN];
    checksum.copy_from_slice(sum);

    Ok(DecodedToken {
        session_id: SessionId::from(session_id),
        key: SharedKey::from_bytes(key_bytes),
        checksum,
    })
}

fn checksum(id: &[u8], key: &SharedKey) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::new()
        .chain_update(id)
        .chain_update(key.as_bytes())
        .finalize();
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}
