//! Envelope codec for Ferry messages.
//!
//! An envelope is a message serialized to JSON, sealed with
//! ChaCha20-Poly1305 under a per-deployment key, and base64 encoded:
//!
//! ```text
//! base64( nonce (12 bytes) || ciphertext || tag (16 bytes) )
//! ```
//!
//! A fresh random nonce is drawn for every envelope.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use std::fmt;
use thiserror::Error;

use crate::message::Message;

/// Maximum wire size of an envelope (10 MiB).
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Key size in bytes.
pub const KEY_SIZE: usize = 32;

/// Nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Errors raised while building an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The message could not be serialized.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The cipher refused to seal the plaintext.
    #[error("Encryption failed")]
    Encrypt,

    /// The sealed envelope exceeds the frame limit.
    #[error("Envelope size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    TooLarge(usize),
}

/// Errors raised while opening an envelope.
///
/// Both variants are a protocol violation from the peer's point of view.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not base64, truncated, tampered with, or sealed under another key.
    #[error("Decryption failed")]
    Decrypt,

    /// The plaintext is not valid JSON.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl DecodeError {
    /// Short label used for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::Decrypt => "decrypt",
            DecodeError::Json(_) => "json",
        }
    }
}

/// Errors raised while loading key material.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// The key is not valid base64.
    #[error("Key is not valid base64")]
    Encoding,

    /// The decoded key has the wrong length.
    #[error("Key must be {KEY_SIZE} bytes, got {0}")]
    Length(usize),
}

/// A 256-bit envelope key.
#[derive(Clone, PartialEq, Eq)]
pub struct EnvelopeKey([u8; KEY_SIZE]);

impl EnvelopeKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generate a random key.
    #[must_use]
    pub fn generate() -> Self {
        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&key);
        Self(bytes)
    }

    /// Parse a base64-encoded key.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not base64 or not 32 bytes long.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| KeyError::Encoding)?;
        let bytes: [u8; KEY_SIZE] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::Length(decoded.len()))?;
        Ok(Self(bytes))
    }

    /// Encode the key as base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl fmt::Debug for EnvelopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EnvelopeKey(..)")
    }
}

/// Seals and opens envelopes under one key.
#[derive(Clone)]
pub struct EnvelopeCodec {
    cipher: ChaCha20Poly1305,
}

impl EnvelopeCodec {
    /// Create a codec for the given key.
    #[must_use]
    pub fn new(key: &EnvelopeKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key.0)),
        }
    }

    /// Encode a message into an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or encryption fails, or the
    /// envelope would exceed [`MAX_FRAME_SIZE`].
    pub fn encode(&self, message: &Message) -> Result<Bytes, EnvelopeError> {
        let plaintext = serde_json::to_vec(message)?;
        self.seal(&plaintext)
    }

    /// Decode an envelope into a message.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Decrypt`] if the envelope cannot be opened and
    /// [`DecodeError::Json`] if the plaintext is not JSON.
    pub fn decode(&self, wire: &[u8]) -> Result<Message, DecodeError> {
        let plaintext = self.open(wire)?;
        let value: serde_json::Value = serde_json::from_slice(&plaintext)?;
        Ok(Message::from_value(value))
    }

    /// Seal raw plaintext.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails or the result is too large.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Bytes, EnvelopeError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| EnvelopeError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        let wire = STANDARD.encode(sealed);
        if wire.len() > MAX_FRAME_SIZE {
            return Err(EnvelopeError::TooLarge(wire.len()));
        }

        Ok(Bytes::from(wire))
    }

    /// Open a sealed envelope, returning the plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Decrypt`] for anything that does not
    /// authenticate under this key.
    pub fn open(&self, wire: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let sealed = STANDARD.decode(wire).map_err(|_| DecodeError::Decrypt)?;
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(DecodeError::Decrypt);
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| DecodeError::Decrypt)
    }
}

impl fmt::Debug for EnvelopeCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeCodec").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Status;
    use serde_json::{json, Value};

    fn codec() -> EnvelopeCodec {
        EnvelopeCodec::new(&EnvelopeKey::from_bytes([7u8; KEY_SIZE]))
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let codec = codec();
        let request = Message::request("echo")
            .with_request_id("req-1")
            .with_data(json!({"text": "héllo", "n": [1, 2.5, null]}));

        let messages = vec![
            Message::default(),
            Message::request("ping"),
            request.clone(),
            Message::request("raw").with_data(Value::Null),
            Message::success(&request, json!({"ok": true})),
            Message::error(&request, "Wrong peerId"),
            Message::unsupported(Some("bogus")),
            Message {
                status: Some(Status::Success),
                ..Message::default()
            },
        ];

        for message in messages {
            let wire = codec.encode(&message).unwrap();
            let decoded = codec.decode(&wire).unwrap();
            assert_eq!(message, decoded);
        }
    }

    #[test]
    fn test_fresh_nonce_per_envelope() {
        let codec = codec();
        let message = Message::request("same");

        let a = codec.encode(&message).unwrap();
        let b = codec.encode(&message).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn test_tampered_envelope_fails() {
        let codec = codec();
        let wire = codec.encode(&Message::request("echo")).unwrap();

        let mut sealed = STANDARD.decode(&wire).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        let tampered = STANDARD.encode(sealed);

        assert!(matches!(
            codec.decode(tampered.as_bytes()),
            Err(DecodeError::Decrypt)
        ));
    }

    #[test]
    fn test_garbage_fails_as_decrypt() {
        let codec = codec();

        for wire in [&b"not base64 at all!"[..], b"", b"AAAA"] {
            let err = codec.decode(wire).unwrap_err();
            assert_eq!(err.kind(), "decrypt");
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let other = EnvelopeCodec::new(&EnvelopeKey::from_bytes([8u8; KEY_SIZE]));
        let wire = other.encode(&Message::request("echo")).unwrap();

        assert!(matches!(codec().decode(&wire), Err(DecodeError::Decrypt)));
    }

    #[test]
    fn test_invalid_json_fails_as_json() {
        let codec = codec();
        let wire = codec.seal(b"{not json").unwrap();

        let err = codec.decode(&wire).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
        assert_eq!(err.kind(), "json");
    }

    #[test]
    fn test_envelope_too_large() {
        let codec = codec();
        let plaintext = vec![b'a'; MAX_FRAME_SIZE];

        assert!(matches!(
            codec.seal(&plaintext),
            Err(EnvelopeError::TooLarge(_))
        ));
    }

    #[test]
    fn test_key_base64() {
        let key = EnvelopeKey::generate();
        let parsed = EnvelopeKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(key, parsed);

        assert_eq!(EnvelopeKey::from_base64("***"), Err(KeyError::Encoding));
        assert_eq!(
            EnvelopeKey::from_base64(&STANDARD.encode([1u8; 16])),
            Err(KeyError::Length(16))
        );
        assert_eq!(format!("{:?}", key), "EnvelopeKey(..)");
    }
}
