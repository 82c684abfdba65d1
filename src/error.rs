//! Library error types.
//!
use crate::descriptor::DataType;
use std::fmt;

/// A sif Result, normally returning a sif [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A sif error. Encompasses any issue that can happen while loading, editing,
/// signing, or verifying a container file.
#[derive(Debug)]
pub enum Error {
    /// The byte stream is not a well-formed container: bad magic, unsupported
    /// version, out-of-range enum value, or inconsistent header bounds.
    Format(String),
    /// The descriptor table has no free slots left.
    CapacityExceeded,
    /// No used descriptor matched the selector.
    ObjectNotFound,
    /// More than one used descriptor matched a selector that requires a
    /// unique match.
    MultipleObjectsFound,
    /// An object ID was zero or otherwise unusable.
    InvalidObjectId(u32),
    /// A group ID was zero or had reserved bits set.
    InvalidGroupId(u32),
    /// A signing or verification operation found no object groups to work on.
    NoGroupsFound,
    /// An operation that needs at least one object was given none.
    NoObjects,
    /// A typed operation was invoked on a descriptor of the wrong data type.
    UnexpectedDataType {
        /// The data type the descriptor actually has
        got: DataType,
        /// The data type(s) the operation accepts
        want: &'static str,
    },
    /// A primary system partition already exists in the container.
    PrimaryPartition,
    /// The container was already unloaded.
    AlreadyUnloaded,
    /// An object name does not fit the fixed name field.
    NameTooLong {
        /// The actual encoded length
        actual: usize,
        /// The maximum allowed length
        max: usize,
    },
    /// Encoded metadata does not fit the descriptor's extra field.
    MetadataTooLarge {
        /// The actual encoded length
        actual: usize,
        /// The maximum allowed length
        max: usize,
    },
    /// A descriptor input requires typed metadata that was never set.
    MetadataNotSet,
    /// No signature object was found for the given object or group ID.
    SignatureNotFound {
        /// The object or group ID the search was linked to
        id: u32,
        /// Whether `id` is a group ID
        is_group: bool,
    },
    /// A signature failed to verify.
    SignatureNotValid {
        /// ID of the signature object
        id: u32,
        /// The underlying cause
        source: Box<Error>,
    },
    /// No key in the key material produced a valid signature.
    UnknownIssuer,
    /// A signature does not cover the set of objects the caller asked to
    /// verify.
    CoverageMismatch,
    /// A recomputed object digest differs from the signed digest.
    DigestMismatch(u32),
    /// A DSSE envelope carried a payload type other than the SIF metadata
    /// media type.
    UnexpectedPayloadType(String),
    /// A DSSE envelope could not be decoded, or too few of its signatures
    /// verified.
    VerifyEnvelopeFailed,
    /// Signers composing one envelope advertised different hash algorithms.
    MultipleHashAlgorithms,
    /// Neither a keyring, a verifier set, nor a suppressing callback was
    /// supplied.
    NoKeyMaterial,
    /// A digest string named a hash algorithm this library does not support.
    UnsupportedHash(String),
    /// An error from the underlying byte stream.
    Io(std::io::Error),
    /// A JSON encoding or decoding failure.
    Json(serde_json::Error),
    /// An error from the OpenPGP implementation.
    Pgp(pgp::errors::Error),
    /// An error from a DSSE signer or verifier.
    Crypto(signature::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Format(ref err) => write!(f, "invalid SIF format: {}", err),
            Error::CapacityExceeded => write!(f, "no descriptor slots available"),
            Error::ObjectNotFound => write!(f, "object not found"),
            Error::MultipleObjectsFound => write!(f, "multiple objects found"),
            Error::InvalidObjectId(id) => write!(f, "invalid object ID {}", id),
            Error::InvalidGroupId(id) => write!(f, "invalid group ID {}", id),
            Error::NoGroupsFound => write!(f, "no object groups found"),
            Error::NoObjects => write!(f, "no objects specified"),
            Error::UnexpectedDataType { got, want } => {
                write!(f, "unexpected data type {}, expected {}", got, want)
            }
            Error::PrimaryPartition => write!(f, "a primary system partition already exists"),
            Error::AlreadyUnloaded => write!(f, "container already unloaded"),
            Error::NameTooLong { actual, max } => {
                write!(f, "name is {} bytes, maximum allowed is {}", actual, max)
            }
            Error::MetadataTooLarge { actual, max } => write!(
                f,
                "encoded metadata is {} bytes, maximum allowed is {}",
                actual, max
            ),
            Error::MetadataNotSet => write!(f, "required metadata was not set on the input"),
            Error::SignatureNotFound { id, is_group: true } => {
                write!(f, "no signature found for object group {}", id)
            }
            Error::SignatureNotFound { id, is_group: false } => {
                write!(f, "no signature found for object {}", id)
            }
            Error::SignatureNotValid { id, ref source } => {
                write!(f, "signature object {} not valid: {}", id, source)
            }
            Error::UnknownIssuer => write!(f, "signature made by unknown issuer"),
            Error::CoverageMismatch => {
                write!(f, "signature does not cover the requested objects")
            }
            Error::DigestMismatch(id) => write!(f, "digest mismatch for object {}", id),
            Error::UnexpectedPayloadType(ref t) => {
                write!(f, "unexpected DSSE payload type {:?}", t)
            }
            Error::VerifyEnvelopeFailed => write!(f, "envelope verification failed"),
            Error::MultipleHashAlgorithms => {
                write!(f, "signers use multiple hash algorithms")
            }
            Error::NoKeyMaterial => write!(f, "no key material provided"),
            Error::UnsupportedHash(ref name) => write!(f, "unsupported hash algorithm {:?}", name),
            Error::Io(ref err) => write!(f, "I/O error: {}", err),
            Error::Json(ref err) => write!(f, "JSON error: {}", err),
            Error::Pgp(ref err) => write!(f, "OpenPGP error: {}", err),
            Error::Crypto(ref err) => write!(f, "signature error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::SignatureNotValid { ref source, .. } => Some(source),
            Error::Io(ref err) => Some(err),
            Error::Json(ref err) => Some(err),
            Error::Pgp(ref err) => Some(err),
            Error::Crypto(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<pgp::errors::Error> for Error {
    fn from(e: pgp::errors::Error) -> Self {
        Self::Pgp(e)
    }
}

impl From<signature::Error> for Error {
    fn from(e: signature::Error) -> Self {
        Self::Crypto(e)
    }
}
