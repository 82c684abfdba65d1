//! Inputs describing objects to be added to a container.
//!
//! A [`DescriptorInput`] pairs a payload byte stream with the metadata that
//! will land in the object's descriptor: name, group, link, and the typed
//! extra field. Inputs are created with [`DescriptorInput::new`] and refined
//! with chained setters; validation that depends on container state (primary
//! partition uniqueness, slot availability) happens when the input is added.

use crate::arch::Arch;
use crate::descriptor::{
    encode_crypto_extra, encode_json_extra, encode_partition_extra, encode_signature_extra,
    DataType, FormatType, FsType, HashType, MessageType, PartType, EXTRA_LEN, LINK_GROUP_BIT,
    NO_GROUP,
};
use crate::error::{Error, Result};
use serde::Serialize;
use std::io::Read;

/// The group objects join when no group option is given.
pub const DEFAULT_GROUP: u32 = 1;

/// Everything needed to add one object to a container.
pub struct DescriptorInput {
    pub(crate) data_type: DataType,
    pub(crate) payload: Box<dyn Read>,
    pub(crate) group_id: u32,
    pub(crate) link: u32,
    pub(crate) name: String,
    pub(crate) time: Option<i64>,
    pub(crate) store_len: Option<i64>,
    pub(crate) extra: Option<[u8; EXTRA_LEN]>,
}

impl DescriptorInput {
    /// Describe a new object of the given data type whose payload is read
    /// from `payload`. The object joins [`DEFAULT_GROUP`] unless regrouped.
    pub fn new<R: Read + 'static>(data_type: DataType, payload: R) -> DescriptorInput {
        DescriptorInput {
            data_type,
            payload: Box::new(payload),
            group_id: DEFAULT_GROUP,
            link: 0,
            name: String::new(),
            time: None,
            store_len: None,
            extra: None,
        }
    }

    /// Set the object name.
    pub fn with_name(mut self, name: &str) -> DescriptorInput {
        self.name = name.to_string();
        self
    }

    /// Place the object in the given group.
    pub fn with_group(mut self, group_id: u32) -> DescriptorInput {
        self.group_id = group_id;
        self
    }

    /// Leave the object ungrouped.
    pub fn with_no_group(mut self) -> DescriptorInput {
        self.group_id = NO_GROUP;
        self
    }

    /// Link the object to another object.
    pub fn with_link(mut self, id: u32) -> DescriptorInput {
        self.link = id;
        self
    }

    /// Link the object to an object group.
    pub fn with_group_link(mut self, group_id: u32) -> DescriptorInput {
        self.link = group_id | LINK_GROUP_BIT;
        self
    }

    /// Pin the object's creation and modification times, overriding any time
    /// carried by the add options.
    pub fn with_time(mut self, time: i64) -> DescriptorInput {
        self.time = Some(time);
        self
    }

    /// Reserve at least `store_len` bytes for the payload, padding the tail
    /// with zeros if the stream is shorter.
    pub fn with_store_len(mut self, store_len: i64) -> DescriptorInput {
        self.store_len = Some(store_len);
        self
    }

    /// Attach partition metadata. Required for partition inputs.
    pub fn with_partition_metadata(
        mut self,
        fs: FsType,
        part: PartType,
        arch: Arch,
    ) -> Result<DescriptorInput> {
        if self.data_type != DataType::Partition {
            return Err(Error::UnexpectedDataType {
                got: self.data_type,
                want: "partition",
            });
        }
        self.extra = Some(encode_partition_extra(fs, part, arch));
        Ok(self)
    }

    /// Attach signature metadata. Required for signature inputs.
    pub fn with_signature_metadata(
        mut self,
        hash: HashType,
        entity: &[u8],
    ) -> Result<DescriptorInput> {
        if self.data_type != DataType::Signature {
            return Err(Error::UnexpectedDataType {
                got: self.data_type,
                want: "signature",
            });
        }
        self.extra = Some(encode_signature_extra(hash, entity));
        Ok(self)
    }

    /// Attach cryptographic message metadata. Required for crypto-message
    /// inputs.
    pub fn with_crypto_message_metadata(
        mut self,
        format: FormatType,
        message: MessageType,
    ) -> Result<DescriptorInput> {
        if self.data_type != DataType::CryptoMessage {
            return Err(Error::UnexpectedDataType {
                got: self.data_type,
                want: "crypto-message",
            });
        }
        self.extra = Some(encode_crypto_extra(format, message));
        Ok(self)
    }

    /// Attach JSON metadata to a generic, SBOM, or OCI input.
    pub fn with_metadata<T: Serialize>(mut self, value: &T) -> Result<DescriptorInput> {
        if !self.data_type.has_json_extra() {
            return Err(Error::UnexpectedDataType {
                got: self.data_type,
                want: "a data type with JSON metadata",
            });
        }
        self.extra = Some(encode_json_extra(value)?);
        Ok(self)
    }

    /// The extra field this input will produce. Typed data types must have
    /// had their metadata attached by the time the input is added.
    pub(crate) fn extra(&self) -> Result<[u8; EXTRA_LEN]> {
        match self.extra {
            Some(extra) => Ok(extra),
            None => match self.data_type {
                DataType::Partition | DataType::Signature | DataType::CryptoMessage => {
                    Err(Error::MetadataNotSet)
                }
                _ => Ok([0u8; EXTRA_LEN]),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_type_metadata_rejected() {
        let input = DescriptorInput::new(DataType::Generic, &b"abc"[..]);
        match input.with_partition_metadata(FsType::Raw, PartType::Data, Arch::Amd64) {
            Err(Error::UnexpectedDataType { got, .. }) => assert_eq!(got, DataType::Generic),
            other => panic!("expected UnexpectedDataType, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn partition_requires_metadata() {
        let input = DescriptorInput::new(DataType::Partition, &b"\xfa\xce"[..]);
        match input.extra() {
            Err(Error::MetadataNotSet) => {}
            other => panic!("expected MetadataNotSet, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn plain_types_default_to_empty_extra() {
        let input = DescriptorInput::new(DataType::Generic, &b"abc"[..]);
        assert_eq!(input.extra().unwrap(), [0u8; EXTRA_LEN]);
    }

    #[test]
    fn group_and_link_encoding() {
        let input = DescriptorInput::new(DataType::Generic, &b""[..])
            .with_no_group()
            .with_group_link(2);
        assert_eq!(input.group_id, NO_GROUP);
        assert_eq!(input.link, 2 | LINK_GROUP_BIT);
    }
}
