//! Descriptor slots: the fixed-size table entries naming and locating each
//! object in a container.
//!
//! A slot is a packed little-endian structure. The first byte is a used flag;
//! a free slot is all zeros on disk and is not represented in memory. The
//! trailing 48-byte extra field carries per-data-type metadata: a binary
//! packing for partitions, signatures, and cryptographic messages, and raw
//! NUL-padded JSON for everything else.

use crate::arch::Arch;
use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// Total encoded size of one descriptor slot.
pub const DESCRIPTOR_LEN: usize = 185;
/// Width of the fixed NUL-padded name field.
pub const NAME_LEN: usize = 64;
/// Width of the per-data-type extra field.
pub const EXTRA_LEN: usize = 48;

/// Group ID value marking an object as deliberately ungrouped. Bit 31 is
/// reserved in group IDs; any stored value with it set reads back as no
/// group.
pub const NO_GROUP: u32 = 1 << 31;

/// Bit set in a link value to reference a group rather than an object.
pub(crate) const LINK_GROUP_BIT: u32 = 1 << 31;

const USED_OFF: usize = 0;
const TYPE_OFF: usize = 1;
const ID_OFF: usize = 5;
const GROUP_OFF: usize = 9;
const LINK_OFF: usize = 13;
const FILE_OFF_OFF: usize = 17;
const FILE_LEN_OFF: usize = 25;
const STORE_LEN_OFF: usize = 33;
const CTIME_OFF: usize = 41;
const MTIME_OFF: usize = 49;
const UID_OFF: usize = 57;
const GID_OFF: usize = 65;
const NAME_OFF: usize = 73;
const EXTRA_OFF: usize = NAME_OFF + NAME_LEN;

/// The kind of payload an object holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Definition file used to build the image.
    Deffile,
    /// Environment variables.
    EnvVar,
    /// Label metadata.
    Labels,
    /// A filesystem partition.
    Partition,
    /// A signature envelope over other objects.
    Signature,
    /// Free-form JSON metadata.
    GenericJson,
    /// Free-form opaque data.
    Generic,
    /// An encrypted or signed cryptographic message.
    CryptoMessage,
    /// A software bill of materials document.
    Sbom,
    /// The root index of an OCI image layout.
    OciRootIndex,
    /// An OCI blob.
    OciBlob,
}

impl DataType {
    pub(crate) fn to_u32(self) -> u32 {
        match self {
            DataType::Deffile => 0x4001,
            DataType::EnvVar => 0x4002,
            DataType::Labels => 0x4003,
            DataType::Partition => 0x4004,
            DataType::Signature => 0x4005,
            DataType::GenericJson => 0x4006,
            DataType::Generic => 0x4007,
            DataType::CryptoMessage => 0x4008,
            DataType::Sbom => 0x4009,
            DataType::OciRootIndex => 0x400A,
            DataType::OciBlob => 0x400B,
        }
    }

    pub(crate) fn from_u32(raw: u32) -> Result<DataType> {
        match raw {
            0x4001 => Ok(DataType::Deffile),
            0x4002 => Ok(DataType::EnvVar),
            0x4003 => Ok(DataType::Labels),
            0x4004 => Ok(DataType::Partition),
            0x4005 => Ok(DataType::Signature),
            0x4006 => Ok(DataType::GenericJson),
            0x4007 => Ok(DataType::Generic),
            0x4008 => Ok(DataType::CryptoMessage),
            0x4009 => Ok(DataType::Sbom),
            0x400A => Ok(DataType::OciRootIndex),
            0x400B => Ok(DataType::OciBlob),
            other => Err(Error::Format(format!("unrecognized data type {:#x}", other))),
        }
    }

    /// Whether the extra field of this data type holds NUL-padded JSON.
    pub fn has_json_extra(self) -> bool {
        matches!(
            self,
            DataType::GenericJson
                | DataType::Generic
                | DataType::Sbom
                | DataType::OciRootIndex
                | DataType::OciBlob
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            DataType::Deffile => "deffile",
            DataType::EnvVar => "envvar",
            DataType::Labels => "labels",
            DataType::Partition => "partition",
            DataType::Signature => "signature",
            DataType::GenericJson => "generic-json",
            DataType::Generic => "generic",
            DataType::CryptoMessage => "crypto-message",
            DataType::Sbom => "sbom",
            DataType::OciRootIndex => "oci-root-index",
            DataType::OciBlob => "oci-blob",
        };
        f.write_str(name)
    }
}

/// Filesystem format of a partition object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FsType {
    /// SquashFS
    Squash,
    /// ext3
    Ext3,
    /// Immutable object archive
    ImmuObj,
    /// Raw bytes
    Raw,
    /// Encrypted SquashFS
    EncryptedSquash,
}

impl FsType {
    fn to_u32(self) -> u32 {
        match self {
            FsType::Squash => 1,
            FsType::Ext3 => 2,
            FsType::ImmuObj => 3,
            FsType::Raw => 4,
            FsType::EncryptedSquash => 5,
        }
    }

    fn from_u32(raw: u32) -> Result<FsType> {
        match raw {
            1 => Ok(FsType::Squash),
            2 => Ok(FsType::Ext3),
            3 => Ok(FsType::ImmuObj),
            4 => Ok(FsType::Raw),
            5 => Ok(FsType::EncryptedSquash),
            other => Err(Error::Format(format!("unrecognized fs type {}", other))),
        }
    }
}

/// Role of a partition object within the container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PartType {
    /// A non-primary system partition.
    System,
    /// The primary system partition consumers boot from.
    PrimSys,
    /// A data partition.
    Data,
    /// An overlay partition.
    Overlay,
}

impl PartType {
    fn to_u32(self) -> u32 {
        match self {
            PartType::System => 1,
            PartType::PrimSys => 2,
            PartType::Data => 3,
            PartType::Overlay => 4,
        }
    }

    fn from_u32(raw: u32) -> Result<PartType> {
        match raw {
            1 => Ok(PartType::System),
            2 => Ok(PartType::PrimSys),
            3 => Ok(PartType::Data),
            4 => Ok(PartType::Overlay),
            other => Err(Error::Format(format!("unrecognized partition type {}", other))),
        }
    }
}

impl fmt::Display for PartType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            PartType::System => "system",
            PartType::PrimSys => "primsys",
            PartType::Data => "data",
            PartType::Overlay => "overlay",
        };
        f.write_str(name)
    }
}

/// Hash algorithm recorded in a signature descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HashType {
    /// SHA-256
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
    /// BLAKE2s-256
    Blake2s,
    /// BLAKE2b-512
    Blake2b,
}

impl HashType {
    fn to_u32(self) -> u32 {
        match self {
            HashType::Sha256 => 1,
            HashType::Sha384 => 2,
            HashType::Sha512 => 3,
            HashType::Blake2s => 4,
            HashType::Blake2b => 5,
        }
    }

    fn from_u32(raw: u32) -> Result<HashType> {
        match raw {
            1 => Ok(HashType::Sha256),
            2 => Ok(HashType::Sha384),
            3 => Ok(HashType::Sha512),
            4 => Ok(HashType::Blake2s),
            5 => Ok(HashType::Blake2b),
            other => Err(Error::Format(format!("unrecognized hash type {}", other))),
        }
    }
}

/// Encoding of a cryptographic message object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FormatType {
    /// OpenPGP packets
    OpenPgp,
    /// PEM armor
    Pem,
    /// PKCS#7
    Pkcs7,
}

impl FormatType {
    fn to_u32(self) -> u32 {
        match self {
            FormatType::OpenPgp => 1,
            FormatType::Pem => 2,
            FormatType::Pkcs7 => 3,
        }
    }

    fn from_u32(raw: u32) -> Result<FormatType> {
        match raw {
            1 => Ok(FormatType::OpenPgp),
            2 => Ok(FormatType::Pem),
            3 => Ok(FormatType::Pkcs7),
            other => Err(Error::Format(format!("unrecognized format type {}", other))),
        }
    }
}

/// Content of a cryptographic message object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// A clearsigned message
    Clearsign,
    /// RSAES-OAEP ciphertext
    RsaOaep,
    /// RSAES-PKCS1-v1_5 ciphertext
    RsaPkcs1,
    /// AES ciphertext
    Aes,
}

impl MessageType {
    fn to_u32(self) -> u32 {
        match self {
            MessageType::Clearsign => 1,
            MessageType::RsaOaep => 2,
            MessageType::RsaPkcs1 => 3,
            MessageType::Aes => 4,
        }
    }

    fn from_u32(raw: u32) -> Result<MessageType> {
        match raw {
            1 => Ok(MessageType::Clearsign),
            2 => Ok(MessageType::RsaOaep),
            3 => Ok(MessageType::RsaPkcs1),
            4 => Ok(MessageType::Aes),
            other => Err(Error::Format(format!("unrecognized message type {}", other))),
        }
    }
}

/// One live descriptor table entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub(crate) data_type: DataType,
    pub(crate) id: u32,
    pub(crate) group_id: u32,
    pub(crate) link: u32,
    pub(crate) file_off: i64,
    pub(crate) file_len: i64,
    pub(crate) store_len: i64,
    pub(crate) ctime: i64,
    pub(crate) mtime: i64,
    pub(crate) uid: i64,
    pub(crate) gid: i64,
    pub(crate) name: String,
    pub(crate) extra: [u8; EXTRA_LEN],
}

impl Descriptor {
    /// The kind of payload this object holds.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// The unique object ID, always positive.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The object group this descriptor belongs to, if any. A raw group value
    /// with the reserved high bit set reads back as no group.
    pub fn group_id(&self) -> Option<u32> {
        if self.group_id == 0 || self.group_id & NO_GROUP != 0 {
            None
        } else {
            Some(self.group_id)
        }
    }

    /// The object or group this descriptor links to, if any. The boolean is
    /// true when the link names a group.
    pub fn linked_id(&self) -> Option<(u32, bool)> {
        if self.link == 0 {
            None
        } else if self.link & LINK_GROUP_BIT != 0 {
            Some((self.link & !LINK_GROUP_BIT, true))
        } else {
            Some((self.link, false))
        }
    }

    /// Absolute offset of the payload within the container file.
    pub fn offset(&self) -> i64 {
        self.file_off
    }

    /// Payload length in bytes.
    pub fn size(&self) -> i64 {
        self.file_len
    }

    /// Stored length, payload plus any trailing padding.
    pub fn size_with_padding(&self) -> i64 {
        self.store_len
    }

    /// Creation time, in seconds since the Unix epoch.
    pub fn created_at(&self) -> i64 {
        self.ctime
    }

    /// Last modification time, in seconds since the Unix epoch.
    pub fn modified_at(&self) -> i64 {
        self.mtime
    }

    /// Owner user ID recorded at creation, zero in deterministic containers.
    pub fn uid(&self) -> i64 {
        self.uid
    }

    /// Owner group ID recorded at creation, zero in deterministic containers.
    pub fn gid(&self) -> i64 {
        self.gid
    }

    /// The object name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Partition metadata from the extra field. Fails with
    /// [`Error::UnexpectedDataType`] on non-partition descriptors.
    pub fn partition_metadata(&self) -> Result<(FsType, PartType, Arch)> {
        if self.data_type != DataType::Partition {
            return Err(Error::UnexpectedDataType {
                got: self.data_type,
                want: "partition",
            });
        }
        decode_partition_extra(&self.extra)
    }

    /// Signature metadata from the extra field: the hash algorithm and the
    /// signing entity (a 20-byte OpenPGP fingerprint or a 32-byte DSSE key
    /// ID, zero-padded).
    pub fn signature_metadata(&self) -> Result<(HashType, [u8; 32])> {
        if self.data_type != DataType::Signature {
            return Err(Error::UnexpectedDataType {
                got: self.data_type,
                want: "signature",
            });
        }
        let hash = HashType::from_u32(LittleEndian::read_u32(&self.extra[..4]))?;
        let mut entity = [0u8; 32];
        entity.copy_from_slice(&self.extra[4..36]);
        Ok((hash, entity))
    }

    /// Cryptographic message metadata from the extra field.
    pub fn crypto_message_metadata(&self) -> Result<(FormatType, MessageType)> {
        if self.data_type != DataType::CryptoMessage {
            return Err(Error::UnexpectedDataType {
                got: self.data_type,
                want: "crypto-message",
            });
        }
        let format = FormatType::from_u32(LittleEndian::read_u32(&self.extra[..4]))?;
        let message = MessageType::from_u32(LittleEndian::read_u32(&self.extra[4..8]))?;
        Ok((format, message))
    }

    /// Deserialize JSON metadata from the extra field of a generic, SBOM, or
    /// OCI descriptor.
    pub fn metadata<T: DeserializeOwned>(&self) -> Result<T> {
        if !self.data_type.has_json_extra() {
            return Err(Error::UnexpectedDataType {
                got: self.data_type,
                want: "a data type with JSON metadata",
            });
        }
        let end = self
            .extra
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |p| p + 1);
        Ok(serde_json::from_slice(&self.extra[..end])?)
    }

    pub(crate) fn set_metadata<T: Serialize>(&mut self, value: &T) -> Result<()> {
        if !self.data_type.has_json_extra() {
            return Err(Error::UnexpectedDataType {
                got: self.data_type,
                want: "a data type with JSON metadata",
            });
        }
        self.extra = encode_json_extra(value)?;
        Ok(())
    }

    pub(crate) fn set_part_type(&mut self, part_type: PartType) -> Result<()> {
        let (fs, _, arch) = self.partition_metadata()?;
        self.extra = encode_partition_extra(fs, part_type, arch);
        Ok(())
    }

    /// Whether this descriptor is the primary system partition.
    pub(crate) fn is_primary(&self) -> bool {
        matches!(self.partition_metadata(), Ok((_, PartType::PrimSys, _)))
    }

    /// Encode into one on-disk slot, used flag set.
    pub(crate) fn encode(&self) -> [u8; DESCRIPTOR_LEN] {
        let mut buf = [0u8; DESCRIPTOR_LEN];
        buf[USED_OFF] = 1;
        LittleEndian::write_u32(&mut buf[TYPE_OFF..], self.data_type.to_u32());
        LittleEndian::write_u32(&mut buf[ID_OFF..], self.id);
        LittleEndian::write_u32(&mut buf[GROUP_OFF..], self.group_id);
        LittleEndian::write_u32(&mut buf[LINK_OFF..], self.link);
        LittleEndian::write_i64(&mut buf[FILE_OFF_OFF..], self.file_off);
        LittleEndian::write_i64(&mut buf[FILE_LEN_OFF..], self.file_len);
        LittleEndian::write_i64(&mut buf[STORE_LEN_OFF..], self.store_len);
        LittleEndian::write_i64(&mut buf[CTIME_OFF..], self.ctime);
        LittleEndian::write_i64(&mut buf[MTIME_OFF..], self.mtime);
        LittleEndian::write_i64(&mut buf[UID_OFF..], self.uid);
        LittleEndian::write_i64(&mut buf[GID_OFF..], self.gid);
        buf[NAME_OFF..NAME_OFF + self.name.len()].copy_from_slice(self.name.as_bytes());
        buf[EXTRA_OFF..].copy_from_slice(&self.extra);
        buf
    }

    /// Decode one on-disk slot. Returns `None` for a free slot.
    pub(crate) fn decode(buf: &[u8]) -> Result<Option<Descriptor>> {
        if buf.len() < DESCRIPTOR_LEN {
            return Err(Error::Format(format!(
                "descriptor requires {} bytes, got {}",
                DESCRIPTOR_LEN,
                buf.len()
            )));
        }
        match buf[USED_OFF] {
            0 => return Ok(None),
            1 => {}
            other => {
                return Err(Error::Format(format!(
                    "descriptor used flag must be 0 or 1, got {}",
                    other
                )))
            }
        }
        let data_type = DataType::from_u32(LittleEndian::read_u32(&buf[TYPE_OFF..]))?;
        let name_raw = &buf[NAME_OFF..NAME_OFF + NAME_LEN];
        let name_end = name_raw.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        let name = std::str::from_utf8(&name_raw[..name_end])
            .map_err(|_| Error::Format("descriptor name is not UTF-8".into()))?
            .to_string();
        let mut extra = [0u8; EXTRA_LEN];
        extra.copy_from_slice(&buf[EXTRA_OFF..EXTRA_OFF + EXTRA_LEN]);
        Ok(Some(Descriptor {
            data_type,
            id: LittleEndian::read_u32(&buf[ID_OFF..]),
            group_id: LittleEndian::read_u32(&buf[GROUP_OFF..]),
            link: LittleEndian::read_u32(&buf[LINK_OFF..]),
            file_off: LittleEndian::read_i64(&buf[FILE_OFF_OFF..]),
            file_len: LittleEndian::read_i64(&buf[FILE_LEN_OFF..]),
            store_len: LittleEndian::read_i64(&buf[STORE_LEN_OFF..]),
            ctime: LittleEndian::read_i64(&buf[CTIME_OFF..]),
            mtime: LittleEndian::read_i64(&buf[MTIME_OFF..]),
            uid: LittleEndian::read_i64(&buf[UID_OFF..]),
            gid: LittleEndian::read_i64(&buf[GID_OFF..]),
            name,
            extra,
        }))
    }
}

pub(crate) fn encode_partition_extra(fs: FsType, part: PartType, arch: Arch) -> [u8; EXTRA_LEN] {
    let mut extra = [0u8; EXTRA_LEN];
    LittleEndian::write_u32(&mut extra[..4], fs.to_u32());
    LittleEndian::write_u32(&mut extra[4..8], part.to_u32());
    let name = arch.name().as_bytes();
    extra[8..8 + name.len()].copy_from_slice(name);
    extra
}

fn decode_partition_extra(extra: &[u8; EXTRA_LEN]) -> Result<(FsType, PartType, Arch)> {
    let fs = FsType::from_u32(LittleEndian::read_u32(&extra[..4]))?;
    let part = PartType::from_u32(LittleEndian::read_u32(&extra[4..8]))?;
    let arch_raw = &extra[8..40];
    let arch_end = arch_raw.iter().position(|&b| b == 0).unwrap_or(arch_raw.len());
    let arch_name = std::str::from_utf8(&arch_raw[..arch_end])
        .map_err(|_| Error::Format("partition architecture is not UTF-8".into()))?;
    Ok((fs, part, Arch::from_name(arch_name)))
}

pub(crate) fn encode_signature_extra(hash: HashType, entity: &[u8]) -> [u8; EXTRA_LEN] {
    let mut extra = [0u8; EXTRA_LEN];
    LittleEndian::write_u32(&mut extra[..4], hash.to_u32());
    let n = entity.len().min(32);
    extra[4..4 + n].copy_from_slice(&entity[..n]);
    extra
}

pub(crate) fn encode_crypto_extra(format: FormatType, message: MessageType) -> [u8; EXTRA_LEN] {
    let mut extra = [0u8; EXTRA_LEN];
    LittleEndian::write_u32(&mut extra[..4], format.to_u32());
    LittleEndian::write_u32(&mut extra[4..8], message.to_u32());
    extra
}

pub(crate) fn encode_json_extra<T: Serialize>(value: &T) -> Result<[u8; EXTRA_LEN]> {
    let encoded = serde_json::to_vec(value)?;
    if encoded.len() > EXTRA_LEN {
        return Err(Error::MetadataTooLarge {
            actual: encoded.len(),
            max: EXTRA_LEN,
        });
    }
    let mut extra = [0u8; EXTRA_LEN];
    extra[..encoded.len()].copy_from_slice(&encoded);
    Ok(extra)
}
