//! Payload obfuscation and identity-token seam.
//!
//! The portal expects outgoing login payloads in an obfuscated wire form and
//! a fresh `LocalName` value on every request. Both are produced by a
//! [`PayloadCodec`]; the protocol core only relies on its contract.

use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};
use serde_json::Value;
use thiserror::Error;

/// Length of identity tokens minted by [`PassthroughCodec`]
const IDENTITY_TOKEN_LENGTH: usize = 32;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to generate identity token: {0}")]
    IdentityToken(String),
}

#[async_trait]
pub trait PayloadCodec: Send + Sync {
    /// Transform an outbound JSON object into a wire-ready body.
    async fn encode(&self, payload: &Value) -> Result<String, CodecError>;

    /// Mint a per-request identity token. Never cached by callers.
    async fn generate_identity_token(&self) -> Result<String, CodecError>;
}

/// Sends payloads as plain JSON and mints random identity tokens.
///
/// Suitable for portals that do not obfuscate request bodies and for local
/// testing; production deployments plug in their own [`PayloadCodec`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCodec;

#[async_trait]
impl PayloadCodec for PassthroughCodec {
    async fn encode(&self, payload: &Value) -> Result<String, CodecError> {
        Ok(serde_json::to_string(payload)?)
    }

    async fn generate_identity_token(&self) -> Result<String, CodecError> {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(IDENTITY_TOKEN_LENGTH)
            .map(char::from)
            .collect();
        Ok(token)
    }
}
