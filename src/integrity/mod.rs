//! Signing and verification of container objects.
//!
//! Objects are signed at group granularity by default. A signature object
//! stores an envelope over the canonical JSON message describing the covered
//! descriptors and their payload digests; two envelope encodings coexist,
//! OpenPGP clearsign and DSSE. [`Signer`] produces signatures, [`Verifier`]
//! plans and runs verification tasks, including the two legacy schemes that
//! signed raw payload digests.

pub(crate) mod clearsign;
pub mod digest;
pub mod dsse;
pub(crate) mod legacy;
pub mod message;
pub mod sign;
pub mod verify;

pub use digest::Digest;
pub use dsse::{
    DsseDecoder, DsseEncoder, DsseSigner, DsseVerifier, EcdsaP256Signer, EcdsaP256Verifier,
    Ed25519Signer, Ed25519Verifier, PAYLOAD_TYPE,
};
pub use message::{HeaderMetadata, ImageMetadata, ObjectMetadata};
pub use sign::Signer;
pub use verify::{Verifier, VerifyResult};
