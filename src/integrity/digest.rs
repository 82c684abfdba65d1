//! Streaming digests over object payloads.

use crate::descriptor::HashType;
use crate::error::{Error, Result};
use digest::DynDigest;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::io::Read;
use std::str::FromStr;

impl HashType {
    /// The lowercase algorithm name used in digest strings.
    pub fn name(self) -> &'static str {
        match self {
            HashType::Sha256 => "sha256",
            HashType::Sha384 => "sha384",
            HashType::Sha512 => "sha512",
            HashType::Blake2s => "blake2s",
            HashType::Blake2b => "blake2b",
        }
    }

    /// Look up a hash algorithm by name.
    pub fn from_name(name: &str) -> Result<HashType> {
        match name {
            "sha256" => Ok(HashType::Sha256),
            "sha384" => Ok(HashType::Sha384),
            "sha512" => Ok(HashType::Sha512),
            "blake2s" => Ok(HashType::Blake2s),
            "blake2b" => Ok(HashType::Blake2b),
            other => Err(Error::UnsupportedHash(other.to_string())),
        }
    }

    pub(crate) fn hasher(self) -> Box<dyn DynDigest> {
        match self {
            HashType::Sha256 => Box::new(sha2::Sha256::default()),
            HashType::Sha384 => Box::new(sha2::Sha384::default()),
            HashType::Sha512 => Box::new(sha2::Sha512::default()),
            HashType::Blake2s => Box::new(blake2::Blake2s256::default()),
            HashType::Blake2b => Box::new(blake2::Blake2b512::default()),
        }
    }
}

/// A payload digest: hash algorithm plus raw value. The text form is
/// `<alg>:<hex>`, which is also how digests appear in signed messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Digest {
    pub(crate) hash: HashType,
    pub(crate) value: Vec<u8>,
}

impl Digest {
    /// Digest everything remaining in `r` with the given algorithm.
    pub fn over<R: Read>(hash: HashType, r: &mut R) -> Result<Digest> {
        let mut hasher = hash.hasher();
        let mut buf = [0u8; 32 * 1024];
        loop {
            let n = r.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Digest {
            hash,
            value: hasher.finalize().to_vec(),
        })
    }

    /// The hash algorithm this digest was computed with.
    pub fn hash_type(&self) -> HashType {
        self.hash
    }

    /// The raw digest bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.hash.name(), hex::encode(&self.value))
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Digest> {
        let (name, value) = s
            .split_once(':')
            .ok_or_else(|| Error::UnsupportedHash(s.to_string()))?;
        let hash = HashType::from_name(name)?;
        let value =
            hex::decode(value).map_err(|_| Error::UnsupportedHash(s.to_string()))?;
        Ok(Digest { hash, value })
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Digest, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_sha256() {
        let mut data = &b"abc"[..];
        let d = Digest::over(HashType::Sha256, &mut data).unwrap();
        assert_eq!(
            d.to_string(),
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn digest_lengths() {
        let cases = [
            (HashType::Sha256, 32),
            (HashType::Sha384, 48),
            (HashType::Sha512, 64),
            (HashType::Blake2s, 32),
            (HashType::Blake2b, 64),
        ];
        for (hash, len) in cases {
            let d = Digest::over(hash, &mut &b"payload"[..]).unwrap();
            assert_eq!(d.value().len(), len, "{} digest length", hash.name());
        }
    }

    #[test]
    fn text_round_trip() {
        let d = Digest::over(HashType::Blake2b, &mut &b"xyz"[..]).unwrap();
        let parsed: Digest = d.to_string().parse().unwrap();
        assert_eq!(d, parsed, "digest should round-trip through its text form");
    }

    #[test]
    fn bad_text_forms_rejected() {
        assert!("sha256".parse::<Digest>().is_err(), "missing separator");
        assert!("md5:00".parse::<Digest>().is_err(), "unsupported algorithm");
        assert!("sha256:zz".parse::<Digest>().is_err(), "bad hex");
    }

    #[test]
    fn serde_as_string() {
        let d = Digest::over(HashType::Sha256, &mut &b"abc"[..]).unwrap();
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.starts_with("\"sha256:"), "digests serialize as strings");
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
    }
}
