//! OpenPGP clearsigned envelopes over the canonical message.

use crate::error::{Error, Result};
use pgp::composed::cleartext::CleartextSignedMessage;
use pgp::{ArmorOptions, SignedPublicKey, SignedSecretKey};

/// Clearsign `message` with `key`, returning the armored envelope bytes.
pub(crate) fn sign(message: &str, key: &SignedSecretKey) -> Result<Vec<u8>> {
    let mut rng = rand::thread_rng();
    let signed = CleartextSignedMessage::sign(&mut rng, message, key, String::default)?;
    Ok(signed.to_armored_string(ArmorOptions::default())?.into_bytes())
}

/// The primary key fingerprint recorded in signature descriptors. OpenPGP v4
/// fingerprints are 20 bytes.
pub(crate) fn fingerprint(key: &SignedSecretKey) -> Vec<u8> {
    use pgp::types::PublicKeyTrait;
    key.fingerprint().as_bytes().to_vec()
}

/// Whether `data` looks like a clearsigned envelope.
pub(crate) fn is_clearsign(data: &[u8]) -> bool {
    data.starts_with(b"-----BEGIN PGP SIGNED MESSAGE-----")
}

/// Verify a clearsigned envelope against a set of public keys. Returns the
/// signed text and the fingerprint of the key that verified it, or
/// [`Error::UnknownIssuer`] when no key in the ring did.
pub(crate) fn verify(data: &[u8], keyring: &[SignedPublicKey]) -> Result<(String, Vec<u8>)> {
    use pgp::types::PublicKeyTrait;

    let armored = std::str::from_utf8(data)
        .map_err(|_| Error::Format("clearsigned envelope is not UTF-8".into()))?;
    let (msg, _) = CleartextSignedMessage::from_string(armored)?;

    for key in keyring {
        if msg.verify(key).is_ok() {
            return Ok((msg.signed_text(), key.fingerprint().as_bytes().to_vec()));
        }
        // Signatures are commonly made by a signing subkey; attribute them
        // to the primary key's fingerprint.
        for subkey in &key.public_subkeys {
            if msg.verify(subkey).is_ok() {
                return Ok((msg.signed_text(), key.fingerprint().as_bytes().to_vec()));
            }
        }
    }
    Err(Error::UnknownIssuer)
}
