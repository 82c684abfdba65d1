//! The canonical JSON message covered by every modern signature.
//!
//! Signatures cover this message rather than raw file bytes, so the same
//! semantic content verifies even if the physical layout changes between
//! tools. Object offsets are deliberately absent for that reason.

use crate::container::{Backing, ContainerFile};
use crate::descriptor::{Descriptor, HashType};
use crate::error::{Error, Result};
use crate::integrity::digest::Digest;
use crate::select::Selector;
use serde::{Deserialize, Serialize};

/// Container-level fields covered by a signature.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeaderMetadata {
    /// Architecture recorded in the header at signing time.
    #[serde(rename = "Arch")]
    pub arch: String,
    /// Container UUID.
    #[serde(rename = "ID")]
    pub id: String,
}

/// Descriptor fields covered by a signature, plus a payload digest. The
/// payload offset is layout-dependent, not semantic, and is excluded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectMetadata {
    #[serde(rename = "ID")]
    pub id: u32,
    #[serde(rename = "GroupID")]
    pub group_id: u32,
    #[serde(rename = "Link")]
    pub link: u32,
    #[serde(rename = "DataType")]
    pub data_type: u32,
    #[serde(rename = "FileLen")]
    pub file_len: i64,
    #[serde(rename = "StoreLen")]
    pub store_len: i64,
    #[serde(rename = "Ctime")]
    pub ctime: i64,
    #[serde(rename = "Mtime")]
    pub mtime: i64,
    #[serde(rename = "UID")]
    pub uid: i64,
    #[serde(rename = "GID")]
    pub gid: i64,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Digest")]
    pub digest: Digest,
}

/// The canonical signed message: header fields plus one entry per covered
/// object, in table order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageMetadata {
    #[serde(rename = "Header")]
    pub header: HeaderMetadata,
    #[serde(rename = "Objects")]
    pub objects: Vec<ObjectMetadata>,
}

impl ImageMetadata {
    /// Assemble the message for `objects`, digesting each payload with
    /// `hash`.
    pub fn new<B: Backing>(
        f: &ContainerFile<B>,
        objects: &[Descriptor],
        hash: HashType,
    ) -> Result<ImageMetadata> {
        if objects.is_empty() {
            return Err(Error::NoObjects);
        }
        let mut entries = Vec::with_capacity(objects.len());
        for d in objects {
            let mut r = f.reader(d)?;
            entries.push(ObjectMetadata {
                id: d.id(),
                group_id: d.group_id().unwrap_or(0),
                link: d.linked_id().map_or(0, |(id, _)| id),
                data_type: d.data_type().to_u32(),
                file_len: d.size(),
                store_len: d.size_with_padding(),
                ctime: d.created_at(),
                mtime: d.modified_at(),
                uid: d.uid(),
                gid: d.gid(),
                name: d.name().to_string(),
                digest: Digest::over(hash, &mut r)?,
            });
        }
        Ok(ImageMetadata {
            header: HeaderMetadata {
                arch: f.header().arch().name().to_string(),
                id: f.id().to_string(),
            },
            objects: entries,
        })
    }

    /// IDs of the objects this message covers.
    pub fn object_ids(&self) -> Vec<u32> {
        self.objects.iter().map(|o| o.id).collect()
    }

    /// Resolve every listed object in the current container and recompute
    /// its payload digest. Returns the verified descriptors, or the first
    /// mismatch.
    pub fn verify<B: Backing>(&self, f: &ContainerFile<B>) -> Result<Vec<Descriptor>> {
        let mut verified = Vec::with_capacity(self.objects.len());
        for o in &self.objects {
            let d = f
                .descriptor(&Selector::any().with_id(o.id))
                .map_err(|_| Error::ObjectNotFound)?;
            let mut r = f.reader(&d)?;
            let digest = Digest::over(o.digest.hash_type(), &mut r)?;
            if digest != o.digest {
                return Err(Error::DigestMismatch(o.id));
            }
            verified.push(d);
        }
        Ok(verified)
    }
}
