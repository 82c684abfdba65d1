//! Dead Simple Signing Envelope encoding and verification.
//!
//! An envelope is a JSON document carrying a payload type, a base64 payload,
//! and one or more `{keyid, sig}` entries. Signatures cover the DSSE v1
//! pre-authentication encoding of the payload, never the raw payload bytes.
//! Signers and verifiers are pluggable; built-ins cover Ed25519 and ECDSA
//! P-256, and anything implementing the traits here can be supplied instead.

use crate::descriptor::HashType;
use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// The only payload media type accepted in container signature envelopes.
pub const PAYLOAD_TYPE: &str = "application/vnd.sylabs.sif-metadata+json";

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "payloadType")]
    payload_type: String,
    payload: String,
    signatures: Vec<EnvelopeSignature>,
}

#[derive(Serialize, Deserialize)]
struct EnvelopeSignature {
    keyid: String,
    sig: String,
}

/// DSSE v1 pre-authentication encoding.
fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + payload_type.len() + 32);
    out.extend_from_slice(b"DSSEv1 ");
    out.extend_from_slice(payload_type.len().to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload_type.as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload.len().to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload);
    out
}

/// One signing key. Each signer advertises the hash algorithm recorded in
/// the signature descriptor; every signer composing one envelope must agree.
pub trait DsseSigner {
    /// Sign a pre-authentication-encoded message.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
    /// The hash algorithm recorded in the signature descriptor and used for
    /// the object digests in the signed message.
    fn hash_type(&self) -> HashType;
    /// SHA-256 over the public key bytes, used as the envelope key ID.
    fn key_id(&self) -> [u8; 32];
}

/// One verifying key.
pub trait DsseVerifier {
    /// Verify a signature over a pre-authentication-encoded message.
    fn verify(&self, message: &[u8], sig: &[u8]) -> Result<()>;
    /// SHA-256 over the public key bytes, used to match envelope entries.
    fn key_id(&self) -> [u8; 32];
}

/// An Ed25519 signer. Ed25519 hashes internally, so the descriptor records
/// SHA-256 as the object digest algorithm.
pub struct Ed25519Signer {
    key: ed25519_dalek::SigningKey,
}

impl Ed25519Signer {
    pub fn new(key: ed25519_dalek::SigningKey) -> Ed25519Signer {
        Ed25519Signer { key }
    }
}

impl DsseSigner for Ed25519Signer {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        use signature::Signer as _;
        let sig: ed25519_dalek::Signature = self.key.try_sign(message)?;
        Ok(sig.to_bytes().to_vec())
    }

    fn hash_type(&self) -> HashType {
        HashType::Sha256
    }

    fn key_id(&self) -> [u8; 32] {
        Sha256::digest(self.key.verifying_key().to_bytes()).into()
    }
}

/// An Ed25519 verifier.
pub struct Ed25519Verifier {
    key: ed25519_dalek::VerifyingKey,
}

impl Ed25519Verifier {
    pub fn new(key: ed25519_dalek::VerifyingKey) -> Ed25519Verifier {
        Ed25519Verifier { key }
    }
}

impl DsseVerifier for Ed25519Verifier {
    fn verify(&self, message: &[u8], sig: &[u8]) -> Result<()> {
        use signature::Verifier as _;
        let sig = ed25519_dalek::Signature::from_slice(sig)?;
        Ok(self.key.verify(message, &sig)?)
    }

    fn key_id(&self) -> [u8; 32] {
        Sha256::digest(self.key.to_bytes()).into()
    }
}

/// An ECDSA P-256 signer producing ASN.1 DER signatures over SHA-256.
pub struct EcdsaP256Signer {
    key: p256::ecdsa::SigningKey,
}

impl EcdsaP256Signer {
    pub fn new(key: p256::ecdsa::SigningKey) -> EcdsaP256Signer {
        EcdsaP256Signer { key }
    }
}

fn p256_key_id(key: &p256::ecdsa::VerifyingKey) -> [u8; 32] {
    Sha256::digest(key.to_encoded_point(false).as_bytes()).into()
}

impl DsseSigner for EcdsaP256Signer {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        use signature::Signer as _;
        let sig: p256::ecdsa::Signature = self.key.try_sign(message)?;
        Ok(sig.to_der().as_bytes().to_vec())
    }

    fn hash_type(&self) -> HashType {
        HashType::Sha256
    }

    fn key_id(&self) -> [u8; 32] {
        p256_key_id(self.key.verifying_key())
    }
}

/// An ECDSA P-256 verifier.
pub struct EcdsaP256Verifier {
    key: p256::ecdsa::VerifyingKey,
}

impl EcdsaP256Verifier {
    pub fn new(key: p256::ecdsa::VerifyingKey) -> EcdsaP256Verifier {
        EcdsaP256Verifier { key }
    }
}

impl DsseVerifier for EcdsaP256Verifier {
    fn verify(&self, message: &[u8], sig: &[u8]) -> Result<()> {
        use signature::Verifier as _;
        let sig = p256::ecdsa::Signature::from_der(sig)?;
        Ok(self.key.verify(message, &sig)?)
    }

    fn key_id(&self) -> [u8; 32] {
        p256_key_id(&self.key)
    }
}

/// Produces envelopes from one or more signers sharing a hash algorithm.
pub struct DsseEncoder {
    signers: Vec<Box<dyn DsseSigner>>,
    hash: HashType,
}

impl DsseEncoder {
    /// Fails with [`Error::MultipleHashAlgorithms`] when the signers do not
    /// agree on a hash: the signature descriptor carries exactly one hash
    /// identifier.
    pub fn new(signers: Vec<Box<dyn DsseSigner>>) -> Result<DsseEncoder> {
        let hash = signers.first().ok_or(Error::NoKeyMaterial)?.hash_type();
        if signers.iter().any(|s| s.hash_type() != hash) {
            return Err(Error::MultipleHashAlgorithms);
        }
        Ok(DsseEncoder { signers, hash })
    }

    /// The hash algorithm shared by every signer.
    pub fn hash_type(&self) -> HashType {
        self.hash
    }

    /// Key ID of the first signer, recorded in the signature descriptor.
    pub(crate) fn key_id(&self) -> [u8; 32] {
        self.signers[0].key_id()
    }

    /// Wrap `payload` in an envelope signed by every signer.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let message = pae(PAYLOAD_TYPE, payload);
        let signatures = self
            .signers
            .iter()
            .map(|s| {
                Ok(EnvelopeSignature {
                    keyid: hex::encode(s.key_id()),
                    sig: STANDARD.encode(s.sign(&message)?),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let envelope = Envelope {
            payload_type: PAYLOAD_TYPE.to_string(),
            payload: STANDARD.encode(payload),
            signatures,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }
}

/// Verifies envelopes against a set of verifiers, accepting when at least
/// `threshold` signatures check out.
pub struct DsseDecoder {
    verifiers: Vec<Box<dyn DsseVerifier>>,
    threshold: usize,
}

impl DsseDecoder {
    pub fn new(verifiers: Vec<Box<dyn DsseVerifier>>) -> DsseDecoder {
        DsseDecoder {
            verifiers,
            threshold: 1,
        }
    }

    /// Require at least `threshold` valid signatures instead of one.
    pub fn with_threshold(mut self, threshold: usize) -> DsseDecoder {
        self.threshold = threshold;
        self
    }

    /// Verify an envelope, returning the payload and the key IDs whose
    /// signatures verified.
    pub fn decode(&self, data: &[u8]) -> Result<(Vec<u8>, Vec<[u8; 32]>)> {
        let envelope: Envelope =
            serde_json::from_slice(data).map_err(|_| Error::VerifyEnvelopeFailed)?;
        if envelope.payload_type != PAYLOAD_TYPE {
            return Err(Error::UnexpectedPayloadType(envelope.payload_type));
        }
        let payload = STANDARD
            .decode(&envelope.payload)
            .map_err(|_| Error::VerifyEnvelopeFailed)?;
        let message = pae(&envelope.payload_type, &payload);

        let mut accepted = Vec::new();
        for entry in &envelope.signatures {
            let Ok(sig) = STANDARD.decode(&entry.sig) else {
                continue;
            };
            for verifier in &self.verifiers {
                let key_id = verifier.key_id();
                if !entry.keyid.is_empty() && entry.keyid != hex::encode(key_id) {
                    continue;
                }
                if verifier.verify(&message, &sig).is_ok() && !accepted.contains(&key_id) {
                    accepted.push(key_id);
                    break;
                }
            }
        }
        if accepted.len() < self.threshold {
            return Err(Error::VerifyEnvelopeFailed);
        }
        Ok((payload, accepted))
    }
}

/// Whether `data` has the shape of a DSSE envelope. The payload type is not
/// checked here; the decoder rejects unexpected types with a specific error.
pub(crate) fn is_envelope(data: &[u8]) -> bool {
    serde_json::from_slice::<Envelope>(data).is_ok()
}
