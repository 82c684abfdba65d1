//! The fixed global header at the start of every container file.
//!
//! The header is a packed little-endian structure with no inferred padding:
//! a 32-byte launch script region, magic and version tags, the architecture
//! code of the primary system partition, the container UUID, timestamps, the
//! bounds of the descriptor table and data area, and the id high-water mark
//! (the highest object ID ever assigned, which deletion never rewinds). The
//! codec here is purely syntactic; semantic checks (magic, version, bounds,
//! table invariants) are done when a container is loaded.

use crate::arch::{Arch, ARCH_CODE_LEN};
use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use uuid::Uuid;

/// Width of the launch script region.
pub const LAUNCH_LEN: usize = 32;
/// Total encoded header size, launch script region included.
pub const HEADER_LEN: usize = 132;

pub(crate) const MAGIC: &[u8; 10] = b"SIF_MAGIC\0";
pub(crate) const VERSION: &[u8; 3] = b"02\0";

const MAGIC_OFF: usize = LAUNCH_LEN;
const VERSION_OFF: usize = MAGIC_OFF + MAGIC.len();
const ARCH_OFF: usize = VERSION_OFF + VERSION.len();
const ID_OFF: usize = ARCH_OFF + ARCH_CODE_LEN;
const CREATED_OFF: usize = ID_OFF + 16;
const MODIFIED_OFF: usize = CREATED_OFF + 8;
const DESCR_FREE_OFF: usize = MODIFIED_OFF + 8;
const DESCR_TOTAL_OFF: usize = DESCR_FREE_OFF + 8;
const DESCR_OFFSET_OFF: usize = DESCR_TOTAL_OFF + 8;
const DESCR_SIZE_OFF: usize = DESCR_OFFSET_OFF + 8;
const DATA_OFFSET_OFF: usize = DESCR_SIZE_OFF + 8;
const DATA_SIZE_OFF: usize = DATA_OFFSET_OFF + 8;
const LAST_ID_OFF: usize = DATA_SIZE_OFF + 8;

/// Default launch script: a `#!` line padded with spaces to [`LAUNCH_LEN`].
pub(crate) const DEFAULT_LAUNCH: &[u8; LAUNCH_LEN] = b"#!/usr/bin/env run-singularity \n";

/// The decoded global header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub(crate) launch: [u8; LAUNCH_LEN],
    pub(crate) arch: Arch,
    pub(crate) id: Uuid,
    pub(crate) created_at: i64,
    pub(crate) modified_at: i64,
    pub(crate) descriptors_free: i64,
    pub(crate) descriptors_total: i64,
    pub(crate) descriptors_offset: i64,
    pub(crate) descriptors_size: i64,
    pub(crate) data_offset: i64,
    pub(crate) data_size: i64,
    pub(crate) last_id: u32,
}

impl Header {
    /// Architecture of the primary system partition, [`Arch::Unknown`] if the
    /// container has none.
    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// The container UUID.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Creation time, in seconds since the Unix epoch.
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Last modification time, in seconds since the Unix epoch.
    pub fn modified_at(&self) -> i64 {
        self.modified_at
    }

    /// Number of live descriptors in the table.
    pub fn descriptor_count(&self) -> i64 {
        self.descriptors_total - self.descriptors_free
    }

    /// Maximum number of descriptors the table can hold.
    pub fn descriptor_capacity(&self) -> i64 {
        self.descriptors_total
    }

    /// Absolute offset of the data area.
    pub fn data_offset(&self) -> i64 {
        self.data_offset
    }

    /// Used bytes in the data area.
    pub fn data_size(&self) -> i64 {
        self.data_size
    }

    /// The launch script region, with trailing NULs stripped.
    pub fn launch_script(&self) -> &[u8] {
        let end = self
            .launch
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |p| p + 1);
        &self.launch[..end]
    }

    /// Encode the header into its fixed on-disk form, magic and version tags
    /// included.
    pub(crate) fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[..LAUNCH_LEN].copy_from_slice(&self.launch);
        buf[MAGIC_OFF..VERSION_OFF].copy_from_slice(MAGIC);
        buf[VERSION_OFF..ARCH_OFF].copy_from_slice(VERSION);
        buf[ARCH_OFF..ID_OFF].copy_from_slice(self.arch.code());
        buf[ID_OFF..CREATED_OFF].copy_from_slice(self.id.as_bytes());
        LittleEndian::write_i64(&mut buf[CREATED_OFF..], self.created_at);
        LittleEndian::write_i64(&mut buf[MODIFIED_OFF..], self.modified_at);
        LittleEndian::write_i64(&mut buf[DESCR_FREE_OFF..], self.descriptors_free);
        LittleEndian::write_i64(&mut buf[DESCR_TOTAL_OFF..], self.descriptors_total);
        LittleEndian::write_i64(&mut buf[DESCR_OFFSET_OFF..], self.descriptors_offset);
        LittleEndian::write_i64(&mut buf[DESCR_SIZE_OFF..], self.descriptors_size);
        LittleEndian::write_i64(&mut buf[DATA_OFFSET_OFF..], self.data_offset);
        LittleEndian::write_i64(&mut buf[DATA_SIZE_OFF..], self.data_size);
        LittleEndian::write_u32(&mut buf[LAST_ID_OFF..], self.last_id);
        buf
    }

    /// Decode a header from its fixed on-disk form. Fails only on a short
    /// buffer or an out-of-range architecture code; magic and version are
    /// checked by the loader.
    pub(crate) fn decode(buf: &[u8]) -> Result<Header> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Format(format!(
                "header requires {} bytes, got {}",
                HEADER_LEN,
                buf.len()
            )));
        }
        let mut launch = [0u8; LAUNCH_LEN];
        launch.copy_from_slice(&buf[..LAUNCH_LEN]);
        let arch = Arch::from_code(&buf[ARCH_OFF..ID_OFF])?;
        let mut id = [0u8; 16];
        id.copy_from_slice(&buf[ID_OFF..CREATED_OFF]);
        Ok(Header {
            launch,
            arch,
            id: Uuid::from_bytes(id),
            created_at: LittleEndian::read_i64(&buf[CREATED_OFF..]),
            modified_at: LittleEndian::read_i64(&buf[MODIFIED_OFF..]),
            descriptors_free: LittleEndian::read_i64(&buf[DESCR_FREE_OFF..]),
            descriptors_total: LittleEndian::read_i64(&buf[DESCR_TOTAL_OFF..]),
            descriptors_offset: LittleEndian::read_i64(&buf[DESCR_OFFSET_OFF..]),
            descriptors_size: LittleEndian::read_i64(&buf[DESCR_SIZE_OFF..]),
            data_offset: LittleEndian::read_i64(&buf[DATA_OFFSET_OFF..]),
            data_size: LittleEndian::read_i64(&buf[DATA_SIZE_OFF..]),
            last_id: LittleEndian::read_u32(&buf[LAST_ID_OFF..]),
        })
    }

    /// Check the magic and version tags of a raw header buffer.
    pub(crate) fn check_tags(buf: &[u8]) -> Result<()> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Format(format!(
                "header requires {} bytes, got {}",
                HEADER_LEN,
                buf.len()
            )));
        }
        if &buf[MAGIC_OFF..VERSION_OFF] != MAGIC {
            return Err(Error::Format("bad magic".into()));
        }
        if &buf[VERSION_OFF..ARCH_OFF] != VERSION {
            return Err(Error::Format(format!(
                "unsupported version {:?}",
                &buf[VERSION_OFF..ARCH_OFF]
            )));
        }
        Ok(())
    }
}

/// Space-pad a caller-supplied launch script into the fixed region.
pub(crate) fn pad_launch_script(script: &[u8]) -> Result<[u8; LAUNCH_LEN]> {
    if script.len() > LAUNCH_LEN {
        return Err(Error::Format(format!(
            "launch script is {} bytes, region holds {}",
            script.len(),
            LAUNCH_LEN
        )));
    }
    let mut launch = [b' '; LAUNCH_LEN];
    launch[..script.len()].copy_from_slice(script);
    Ok(launch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_header() -> Header {
        Header {
            launch: *DEFAULT_LAUNCH,
            arch: Arch::Amd64,
            id: Uuid::from_u128(0xde170c43_36ab_44a8_bca9_1ea1a070a274),
            created_at: 946702800,
            modified_at: 946702801,
            descriptors_free: 46,
            descriptors_total: 48,
            descriptors_offset: 132,
            descriptors_size: 48 * 185,
            data_offset: 132 + 48 * 185,
            data_size: 1234,
            last_id: 2,
        }
    }

    #[test]
    fn encode_decode() {
        let h = test_header();
        let buf = h.encode();
        Header::check_tags(&buf).expect("tags should check out");
        let dec = Header::decode(&buf).expect("decoding should have worked");
        assert_eq!(h, dec, "encode->decode should yield the same header");
    }

    #[test]
    fn fixed_field_offsets() {
        let h = test_header();
        let buf = h.encode();
        assert_eq!(&buf[32..42], b"SIF_MAGIC\0", "magic lives at offset 32");
        assert_eq!(&buf[42..45], b"02\0", "version follows magic");
        assert_eq!(&buf[45..48], b"02\0", "amd64 arch code follows version");
        assert_eq!(
            &buf[48..64],
            Uuid::from_u128(0xde170c43_36ab_44a8_bca9_1ea1a070a274).as_bytes(),
            "uuid follows arch"
        );
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(Header::decode(&[0u8; 100]).is_err());
        assert!(Header::check_tags(&[0u8; 100]).is_err());
    }

    #[test]
    fn rejects_bad_tags() {
        let mut buf = test_header().encode();
        buf[32] = b'X';
        assert!(Header::check_tags(&buf).is_err(), "bad magic should fail");
        let mut buf = test_header().encode();
        buf[42] = b'9';
        assert!(Header::check_tags(&buf).is_err(), "bad version should fail");
    }

    #[test]
    fn launch_script_padding() {
        let launch = pad_launch_script(b"#!/bin/sh\n").unwrap();
        assert_eq!(&launch[..10], b"#!/bin/sh\n");
        assert!(launch[10..].iter().all(|&b| b == b' '));
        assert!(pad_launch_script(&[b'x'; 33]).is_err(), "over-long script should fail");
    }
}
