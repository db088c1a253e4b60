//! Node identity and per-message ECDSA signing.
//!
//! Signing runs over a canonical string form of the envelope: sorted-key,
//! whitespace-free JSON (`serde_json`'s `Map` is a `BTreeMap` by default,
//! so `to_string` on an object value already sorts keys) of the envelope
//! with the `signature` field absent. This canonicalization is frozen:
//! callers must never hand-serialize an envelope another way.

use std::fs;
use std::path::Path;

use ecdsa::signature::{Signer, Verifier};
use elliptic_curve::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::{PublicKey, SecretKey};

use crate::envelope::Envelope;
use crate::error::{NodeError, Result};

/// A node's durable identity: a PEM-encoded public key (the wire-visible
/// `id`) and the ECDSA private key used to sign outbound envelopes.
pub struct NodeIdentity {
    id_pem: String,
    signing_key: SigningKey,
}

impl NodeIdentity {
    /// Generate a fresh identity. Used by tests and first-run bootstrap.
    pub fn generate() -> Result<Self> {
        let secret = SecretKey::random(&mut rand::rngs::OsRng);
        let id_pem = secret
            .public_key()
            .to_public_key_pem(Default::default())
            .map_err(|e| NodeError::Key(e.to_string()))?;
        Ok(Self {
            id_pem,
            signing_key: SigningKey::from(secret),
        })
    }

    /// Load an identity from a PKCS#8 PEM private key file. The public key
    /// PEM (our wire `id`) is derived from it, never stored separately.
    pub fn load_from_pem_file(path: &Path) -> Result<Self> {
        let pem = fs::read_to_string(path).map_err(NodeError::Io)?;
        let secret =
            SecretKey::from_pkcs8_pem(&pem).map_err(|e| NodeError::Key(e.to_string()))?;
        let id_pem = secret
            .public_key()
            .to_public_key_pem(Default::default())
            .map_err(|e| NodeError::Key(e.to_string()))?;
        Ok(Self {
            id_pem,
            signing_key: SigningKey::from(secret),
        })
    }

    /// Persist the private key as a PKCS#8 PEM file, creating parent
    /// directories as needed. Useful for first-run bootstrap.
    pub fn save_to_pem_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(NodeError::Io)?;
        }
        let pem = self
            .signing_key
            .to_pkcs8_pem(Default::default())
            .map_err(|e| NodeError::Key(e.to_string()))?;
        fs::write(path, pem.as_str()).map_err(NodeError::Io)
    }

    /// The node's public identity, in PEM form. This is what goes out on
    /// the wire as the handshake bytes and the envelope `id` field.
    pub fn id_pem(&self) -> &str {
        &self.id_pem
    }

    /// Stamp `id` and `signature` on an envelope and return it, consuming
    /// the unsigned one. `id` is set first so it is inside the signed
    /// scope, matching the source's `prepare_message`.
    pub fn sign(&self, mut envelope: Envelope) -> Envelope {
        envelope.set_id(self.id_pem.clone());
        let digest = envelope.canonical_bytes_without_signature();
        let signature: Signature = self.signing_key.sign(&digest);
        envelope.set_signature(base64::encode(signature.to_der().as_bytes()));
        envelope
    }
}

/// Recompute the canonical form of `envelope` with `signature` absent and
/// check it against the ECDSA signature and the sender's own `id` field.
/// Any failure — missing fields, bad base64/DER, bad PEM, mismatch — is
/// `InvalidSignature`; callers must drop the message silently on `Ok(false)`
/// or `Err`, never distinguish the two to a remote peer.
pub fn verify(envelope: &Envelope) -> bool {
    verify_inner(envelope).unwrap_or(false)
}

fn verify_inner(envelope: &Envelope) -> Result<bool> {
    let id_pem = envelope
        .id()
        .ok_or_else(|| NodeError::MalformedEnvelope("missing id".into()))?;
    let sig_b64 = envelope
        .signature()
        .ok_or_else(|| NodeError::MalformedEnvelope("missing signature".into()))?;

    let public_key = PublicKey::from_public_key_pem(id_pem)
        .map_err(|e| NodeError::Key(e.to_string()))?;
    let verifying_key = VerifyingKey::from(public_key);

    let sig_der = base64::decode(sig_b64).map_err(|_| NodeError::InvalidSignature)?;
    let signature =
        Signature::from_der(&sig_der).map_err(|_| NodeError::InvalidSignature)?;

    let digest = envelope.canonical_bytes_without_signature();
    Ok(verifying_key.verify(&digest, &signature).is_ok())
}

mod base64 {
    use ::base64::{engine::general_purpose::STANDARD, Engine as _};

    pub fn encode(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    pub fn decode(s: &str) -> Result<Vec<u8>, ::base64::DecodeError> {
        STANDARD.decode(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;

    #[test]
    fn sign_then_verify_is_identity() {
        let identity = NodeIdentity::generate().unwrap();
        let env = Envelope::new("myblockhash")
            .with_field("hash", "0xabc")
            .with_field("sequance_number", 42);
        let signed = identity.sign(env);
        assert!(verify(&signed));
    }

    #[test]
    fn tampering_breaks_verification() {
        let identity = NodeIdentity::generate().unwrap();
        let env = Envelope::new("myblockhash").with_field("sequance_number", 42);
        let mut signed = identity.sign(env);
        signed.set_field("sequance_number", serde_json::json!(43));
        assert!(!verify(&signed));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let a = NodeIdentity::generate().unwrap();
        let b = NodeIdentity::generate().unwrap();
        let env = Envelope::new("myblock");
        let mut signed = a.sign(env);
        signed.set_id(b.id_pem().to_string());
        assert!(!verify(&signed));
    }

    #[test]
    fn pem_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.pem");
        let identity = NodeIdentity::generate().unwrap();
        identity.save_to_pem_file(&path).unwrap();
        let reloaded = NodeIdentity::load_from_pem_file(&path).unwrap();
        assert_eq!(identity.id_pem(), reloaded.id_pem());
    }
}
