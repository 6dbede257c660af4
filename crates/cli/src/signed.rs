//! Signed declaration envelopes:
//! `{"signature": {"pub": .., "sig": .., "algorithm": "ed25519"}, "program": [..]}`.
//!
//! The signature covers the compact serde_json encoding of `program`. Key and signature
//! are standard base64.

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::Deserialize;
use serde_json::Value;

pub const ALGORITHM: &str = "ed25519";

#[derive(Debug, Deserialize)]
struct SignatureBlock {
    #[serde(rename = "pub")]
    public_key: String,
    sig: String,
    algorithm: String,
}

/// A program whose signature checked out.
#[derive(Debug)]
pub struct Verified {
    pub program: Value,
    /// Base64 signature, recorded as the apply's identifier.
    pub sig_id: String,
}

pub fn is_envelope(doc: &Value) -> bool {
    doc.get("signature").is_some()
}

pub fn verify_envelope(mut doc: Value) -> Result<Verified> {
    let obj = doc.as_object_mut().ok_or_else(|| anyhow!("signed declaration must be an object"))?;
    let block = obj.remove("signature").context("missing 'signature' object")?;
    let block: SignatureBlock = serde_json::from_value(block).context("malformed 'signature' object")?;
    if block.algorithm != ALGORITHM {
        bail!("unsupported signature algorithm: {}", block.algorithm);
    }
    let program = obj.remove("program").context("missing 'program' field")?;

    let key = STANDARD.decode(&block.public_key).context("decoding public key")?;
    let key: [u8; 32] = key.as_slice().try_into().context("public key is not 32 bytes")?;
    let key = VerifyingKey::from_bytes(&key).context("invalid public key")?;
    let sig = STANDARD.decode(&block.sig).context("decoding signature")?;
    let sig: [u8; 64] = sig.as_slice().try_into().context("signature is not 64 bytes")?;
    let signature = Signature::from_bytes(&sig);

    let payload = serde_json::to_vec(&program).context("serializing 'program'")?;
    key.verify(&payload, &signature).context("signature verification failed")?;
    Ok(Verified { program, sig_id: block.sig })
}
