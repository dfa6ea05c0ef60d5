//! # Messaging Module
//!
//! The message payload carried by the transport and message storage.
//!
//! ## Payload Format
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      MESSAGE PAYLOAD                                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Encrypted                          Plaintext fallback                  │
//! │  {                                  {                                   │
//! │    "text": "",                        "text": "hi",                     │
//! │    "ciphertext": "<base64>",          "isEncrypted": false              │
//! │    "iv": "<base64, 12 bytes>",      }                                   │
//! │    "authTag": "<base64, 16 bytes>",                                     │
//! │    "isEncrypted": true,                                                 │
//! │    "schemeVersion": 1                                                   │
//! │  }                                                                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The transport must carry these fields verbatim. A stored message is
//! decrypted with the key shared with its [`counterparty`], whichever role
//! the local participant had when it was sent.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::crypto::{EncryptedEnvelope, SCHEME_VERSION};
use crate::error::{Error, Result};

/// Text shown in place of a message that could not be decrypted
pub const DECRYPTION_FAILED_PLACEHOLDER: &str = "[Unable to decrypt message]";

/// A direct message as carried over the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    /// Plaintext body; empty when the message is encrypted
    #[serde(default)]
    pub text: String,

    /// Base64 ciphertext without the tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,

    /// Base64 IV
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,

    /// Base64 authentication tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_tag: Option<String>,

    /// Whether the envelope fields are authoritative
    #[serde(default)]
    pub is_encrypted: bool,

    /// Envelope format; absent means 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme_version: Option<u8>,
}

impl MessagePayload {
    /// An unencrypted message
    pub fn plaintext(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ciphertext: None,
            iv: None,
            auth_tag: None,
            is_encrypted: false,
            scheme_version: None,
        }
    }

    /// Encode an envelope for the wire
    pub fn from_envelope(envelope: &EncryptedEnvelope) -> Self {
        Self {
            text: String::new(),
            ciphertext: Some(BASE64.encode(envelope.ciphertext())),
            iv: Some(BASE64.encode(envelope.iv())),
            auth_tag: Some(BASE64.encode(envelope.tag())),
            is_encrypted: true,
            scheme_version: Some(envelope.scheme_version()),
        }
    }

    /// Decode the envelope fields
    ///
    /// ## Errors
    ///
    /// `MalformedEnvelope` if the payload is not encrypted, a field is
    /// missing or not base64, or the IV/tag have the wrong length.
    pub fn to_envelope(&self) -> Result<EncryptedEnvelope> {
        if !self.is_encrypted {
            return Err(Error::MalformedEnvelope("payload is not encrypted".into()));
        }

        let ciphertext = decode_field("ciphertext", self.ciphertext.as_deref())?;
        let iv = decode_field("iv", self.iv.as_deref())?;
        let tag = decode_field("authTag", self.auth_tag.as_deref())?;

        EncryptedEnvelope::from_parts(
            ciphertext,
            &iv,
            &tag,
            self.scheme_version.unwrap_or(SCHEME_VERSION),
        )
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn decode_field(name: &str, value: Option<&str>) -> Result<Vec<u8>> {
    let value = value.ok_or_else(|| Error::MalformedEnvelope(format!("missing {}", name)))?;
    BASE64
        .decode(value)
        .map_err(|_| Error::MalformedEnvelope(format!("{} is not valid base64", name)))
}

/// The participant whose key decrypts a stored message
///
/// Returns the other party of the message regardless of whether the local
/// participant sent or received it, or `None` if the local participant is
/// neither. A note-to-self resolves to the local participant.
pub fn counterparty<'a>(
    local_id: &str,
    sender_id: &'a str,
    receiver_id: &'a str,
) -> Option<&'a str> {
    if sender_id == local_id {
        Some(receiver_id)
    } else if receiver_id == local_id {
        Some(sender_id)
    } else {
        None
    }
}

// ============================================================================
// TESTS
// ============================================================================
