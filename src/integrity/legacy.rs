//! Verification of legacy signatures.
//!
//! Before signatures covered a structured message, they clearsigned a bare
//! digest of the raw payload bytes: the concatenated payloads of a whole
//! group, or one object's payload. The signed text is
//! `SIFHASH:\n<hex sha384>`. These are verified but never produced.

use crate::container::{Backing, ContainerFile};
use crate::descriptor::{Descriptor, HashType};
use crate::error::{Error, Result};
use crate::integrity::clearsign;
use pgp::SignedPublicKey;

const PREFIX: &str = "SIFHASH:\n";

/// Digest the concatenated payloads of `objects` in table order, producing
/// the text a legacy signature is expected to cover.
pub(crate) fn signed_text<B: Backing>(
    f: &ContainerFile<B>,
    objects: &[Descriptor],
) -> Result<String> {
    let mut hasher = HashType::Sha384.hasher();
    let mut buf = [0u8; 32 * 1024];
    for d in objects {
        let mut r = f.reader(d)?;
        loop {
            let n = std::io::Read::read(&mut r, &mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
    }
    Ok(format!("{}{}", PREFIX, hex::encode(hasher.finalize())))
}

/// Verify a legacy clearsigned envelope: the signature must check out
/// against the keyring and the signed digest must match `expected` (the
/// output of [`signed_text`]). Returns the issuing key's fingerprint.
pub(crate) fn verify(data: &[u8], expected: &str, keyring: &[SignedPublicKey]) -> Result<Vec<u8>> {
    let (text, fingerprint) = clearsign::verify(data, keyring)?;
    let text = text.trim_end();
    if !text.starts_with(PREFIX.trim_end()) {
        return Err(Error::Format("not a legacy signature".into()));
    }
    if text != expected.trim_end() {
        // The digest in the signed text no longer matches the payload bytes.
        return Err(Error::DigestMismatch(0));
    }
    Ok(fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerFile, CreateOpts};
    use crate::descriptor::DataType;
    use crate::input::DescriptorInput;
    use crate::integrity::clearsign::tests::test_key;
    use crate::integrity::digest::Digest;
    use crate::select::Selector;
    use uuid::Uuid;

    fn test_container() -> ContainerFile<Vec<u8>> {
        let opts = CreateOpts::default()
            .deterministic()
            .with_id(Uuid::parse_str("de170c43-36ab-44a8-bca9-1ea1a070a274").unwrap())
            .with_time(946702800)
            .with_descriptors(vec![
                DescriptorInput::new(DataType::Generic, &b"abc"[..]),
                DescriptorInput::new(DataType::Generic, &b"def"[..]),
            ]);
        ContainerFile::create(Vec::new(), opts).unwrap()
    }

    #[test]
    fn signed_text_matches_concatenation() {
        let f = test_container();
        let objects = f.descriptors(&Selector::any()).unwrap();
        let text = signed_text(&f, &objects).unwrap();
        let expected = Digest::over(HashType::Sha384, &mut &b"abcdef"[..]).unwrap();
        assert_eq!(
            text,
            format!("SIFHASH:\n{}", hex::encode(expected.value())),
            "group digest covers payloads back to back in table order"
        );
    }

    #[test]
    fn verify_round_trip() {
        let (secret, public) = test_key();
        let f = test_container();
        let objects = f.descriptors(&Selector::any()).unwrap();
        let text = signed_text(&f, &objects).unwrap();
        let envelope = clearsign::sign(&text, &secret).unwrap();
        let fp = verify(&envelope, &text, std::slice::from_ref(&public)).unwrap();
        assert_eq!(fp, clearsign::fingerprint(&secret));
    }

    #[test]
    fn digest_mismatch_detected() {
        let (secret, public) = test_key();
        let f = test_container();
        let objects = f.descriptors(&Selector::any()).unwrap();
        let text = signed_text(&f, &objects).unwrap();
        let envelope = clearsign::sign(&text, &secret).unwrap();
        let other = signed_text(&f, &objects[..1]).unwrap();
        match verify(&envelope, &other, std::slice::from_ref(&public)) {
            Err(Error::DigestMismatch(_)) => {}
            other => panic!("expected DigestMismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn non_legacy_text_rejected() {
        let (secret, public) = test_key();
        let envelope = clearsign::sign("{\"Header\":{}}", &secret).unwrap();
        assert!(
            verify(&envelope, "SIFHASH:\n00", std::slice::from_ref(&public)).is_err(),
            "a modern message is not a legacy signature"
        );
    }
}
