//! Mutation operations: adding, deleting, and retyping objects.
//!
//! Every operation here leaves the file self-consistent: payload bytes are
//! written before the descriptor slot and header that reference them, live
//! counts and data-area bounds are updated together, and modification times
//! never move backwards unless a caller pins an explicit time.

use crate::container::{now, Backing, ContainerFile};
use crate::descriptor::{DataType, Descriptor, PartType, NAME_LEN, NO_GROUP};
use crate::error::{Error, Result};
use crate::input::DescriptorInput;
use crate::select::Selector;
use serde::Serialize;
use std::io::Read;

const COPY_CHUNK: usize = 32 * 1024;

/// Options for [`ContainerFile::add_object`].
#[derive(Clone, Copy, Default)]
pub struct AddOpts {
    pub(crate) time: Option<i64>,
    pub(crate) deterministic: bool,
}

impl AddOpts {
    /// Pin the object's creation and modification times.
    pub fn with_time(mut self, time: i64) -> AddOpts {
        self.time = Some(time);
        self
    }

    /// Zero time and process identity fields.
    pub fn deterministic(mut self) -> AddOpts {
        self.deterministic = true;
        self
    }
}

/// Options for [`ContainerFile::delete_object`].
#[derive(Clone, Copy, Default)]
pub struct DeleteOpts {
    pub(crate) time: Option<i64>,
    pub(crate) zero: bool,
    pub(crate) compact: bool,
}

impl DeleteOpts {
    /// Pin the container's modification time.
    pub fn with_time(mut self, time: i64) -> DeleteOpts {
        self.time = Some(time);
        self
    }

    /// Overwrite the freed payload bytes with zeros.
    pub fn zero(mut self) -> DeleteOpts {
        self.zero = true;
        self
    }

    /// Truncate the data area if the deleted object occupies its tail.
    pub fn compact(mut self) -> DeleteOpts {
        self.compact = true;
        self
    }
}

/// Options for [`ContainerFile::set_prim_part`] and
/// [`ContainerFile::set_metadata`].
#[derive(Clone, Copy, Default)]
pub struct SetOpts {
    pub(crate) time: Option<i64>,
}

impl SetOpts {
    /// Pin the container's modification time.
    pub fn with_time(mut self, time: i64) -> SetOpts {
        self.time = Some(time);
        self
    }
}

impl<B: Backing> ContainerFile<B> {
    /// Add one object, returning its assigned ID. IDs come from the header's
    /// high-water mark, which deletion never rewinds, so a freed ID is never
    /// reissued even after the file is unloaded and reloaded.
    pub fn add_object(&mut self, mut input: DescriptorInput, opts: AddOpts) -> Result<u32> {
        self.check_writable()?;
        if input.name.len() > NAME_LEN {
            return Err(Error::NameTooLong {
                actual: input.name.len(),
                max: NAME_LEN,
            });
        }
        if input.group_id & NO_GROUP != 0 && input.group_id != NO_GROUP {
            return Err(Error::InvalidGroupId(input.group_id));
        }
        let extra = input.extra()?;

        let mut primary_arch = None;
        if input.data_type == DataType::Partition {
            let probe = Descriptor {
                data_type: DataType::Partition,
                id: 0,
                group_id: 0,
                link: 0,
                file_off: 0,
                file_len: 0,
                store_len: 0,
                ctime: 0,
                mtime: 0,
                uid: 0,
                gid: 0,
                name: String::new(),
                extra,
            };
            let (_, part, arch) = probe.partition_metadata()?;
            if part == PartType::PrimSys {
                if self.table.iter().any(|(_, d)| d.is_primary()) {
                    return Err(Error::PrimaryPartition);
                }
                primary_arch = Some(arch);
            }
        }

        let slot = self.table.allocate()?;
        let id = self.header.last_id + 1;
        let pinned = input.time.or(opts.time);
        let time = match pinned {
            Some(t) => t,
            None if opts.deterministic => 0,
            None => now(),
        };
        let (uid, gid) = if opts.deterministic {
            (0, 0)
        } else {
            unsafe { (libc::getuid() as i64, libc::getgid() as i64) }
        };

        // Stream the payload to the end of the data area before any
        // descriptor or header state changes land on disk.
        let file_off = self.data_end();
        let mut written: i64 = 0;
        let mut buf = [0u8; COPY_CHUNK];
        loop {
            let n = input.payload.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.backing_mut()?
                .write_all_at(&buf[..n], (file_off + written) as u64)?;
            written += n as i64;
        }
        let store_len = input.store_len.unwrap_or(0).max(written);
        if store_len > written {
            write_zeros(
                self.backing_mut()?,
                (file_off + written) as u64,
                (store_len - written) as u64,
            )?;
        }

        let d = Descriptor {
            data_type: input.data_type,
            id,
            group_id: input.group_id,
            link: input.link,
            file_off,
            file_len: written,
            store_len,
            ctime: time,
            mtime: time,
            uid,
            gid,
            name: input.name,
            extra,
        };
        self.table.insert(slot, d);
        self.header.last_id = id;
        if let Some(arch) = primary_arch {
            self.header.arch = arch;
        }
        self.header.descriptors_free -= 1;
        self.header.data_size += store_len;
        self.touch(pinned.is_some() || opts.deterministic, time);
        self.write_slot(slot)?;
        self.write_header()?;
        Ok(id)
    }

    /// Delete the object with the given ID. The slot is zeroed; payload
    /// bytes are zeroed or reclaimed only when the options ask for it.
    pub fn delete_object(&mut self, id: u32, opts: DeleteOpts) -> Result<()> {
        self.check_writable()?;
        let selector = Selector::any().with_id(id);
        let (slot, d) = self.table.get_descriptor(&selector)?;
        let d = d.clone();

        if opts.zero {
            write_zeros(self.backing_mut()?, d.file_off as u64, d.file_len as u64)?;
        }
        if opts.compact && d.file_off + d.store_len == self.data_end() {
            self.header.data_size -= d.store_len;
            let end = self.data_end() as u64;
            self.backing_mut()?.set_len(end)?;
        }
        if d.is_primary() {
            self.header.arch = crate::arch::Arch::Unknown;
        }

        self.table.free(slot);
        self.header.descriptors_free += 1;
        let time = opts.time.unwrap_or_else(now);
        self.touch(opts.time.is_some(), time);
        self.write_slot(slot)?;
        self.write_header()?;
        Ok(())
    }

    /// Mark the partition with the given ID as the primary system partition,
    /// demoting any existing primary to a plain system partition and
    /// updating the header architecture to match.
    pub fn set_prim_part(&mut self, id: u32, opts: SetOpts) -> Result<()> {
        self.check_writable()?;
        let selector = Selector::any().with_id(id);
        let (slot, d) = self.table.get_descriptor(&selector)?;
        let (_, _, arch) = d.partition_metadata()?;

        let old = self
            .table
            .iter()
            .find(|(_, d)| d.is_primary() && d.id() != id)
            .map(|(i, _)| i);
        if let Some(old_slot) = old {
            self.table
                .get_mut(old_slot)
                .expect("slot was just seen used")
                .set_part_type(PartType::System)?;
            self.write_slot(old_slot)?;
        }

        self.table
            .get_mut(slot)
            .expect("slot was just seen used")
            .set_part_type(PartType::PrimSys)?;
        self.header.arch = arch;
        let time = opts.time.unwrap_or_else(now);
        self.touch(opts.time.is_some(), time);
        self.write_slot(slot)?;
        self.write_header()?;
        Ok(())
    }

    /// Replace the JSON metadata in the extra field of the object with the
    /// given ID.
    pub fn set_metadata<T: Serialize>(&mut self, id: u32, value: &T, opts: SetOpts) -> Result<()> {
        self.check_writable()?;
        let (slot, _) = self.table.get_descriptor(&Selector::any().with_id(id))?;
        self.table
            .get_mut(slot)
            .expect("slot was just seen used")
            .set_metadata(value)?;
        let time = opts.time.unwrap_or_else(now);
        self.table.get_mut(slot).unwrap().mtime = time;
        self.touch(opts.time.is_some(), time);
        self.write_slot(slot)?;
        self.write_header()?;
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if self.backing.is_none() {
            return Err(Error::AlreadyUnloaded);
        }
        if !self.writable {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "container loaded read-only",
            )));
        }
        Ok(())
    }

    /// Advance the header modification time. An explicitly pinned time is
    /// taken as-is; otherwise the clock never moves the time backwards.
    fn touch(&mut self, pinned: bool, time: i64) {
        self.header.modified_at = if pinned {
            time
        } else {
            time.max(self.header.modified_at)
        };
    }
}

fn write_zeros<B: Backing>(backing: &mut B, mut offset: u64, mut len: u64) -> Result<()> {
    let zeros = [0u8; COPY_CHUNK];
    while len > 0 {
        let n = (len as usize).min(COPY_CHUNK);
        backing.write_all_at(&zeros[..n], offset)?;
        offset += n as u64;
        len -= n as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;
    use crate::container::{CreateOpts, LoadOpts};
    use crate::descriptor::FsType;
    use uuid::Uuid;

    const TIME: i64 = 946702800;

    fn deterministic() -> CreateOpts {
        CreateOpts::default()
            .deterministic()
            .with_id(Uuid::parse_str("de170c43-36ab-44a8-bca9-1ea1a070a274").unwrap())
            .with_time(TIME)
    }

    fn add_opts() -> AddOpts {
        AddOpts::default().deterministic().with_time(TIME)
    }

    fn partition(arch: Arch, part: PartType) -> DescriptorInput {
        DescriptorInput::new(DataType::Partition, &b"\xfa\xce"[..])
            .with_partition_metadata(FsType::Raw, part, arch)
            .unwrap()
    }

    #[test]
    fn set_prim_part_demotes_and_retags() {
        let mut f = ContainerFile::create(Vec::new(), deterministic()).unwrap();
        f.add_object(partition(Arch::I386, PartType::PrimSys), add_opts())
            .unwrap();
        f.add_object(partition(Arch::Amd64, PartType::System), add_opts())
            .unwrap();
        assert_eq!(f.header().arch(), Arch::I386);

        f.set_prim_part(2, SetOpts::default().with_time(TIME)).unwrap();
        let first = f.descriptor(&Selector::any().with_id(1)).unwrap();
        let second = f.descriptor(&Selector::any().with_id(2)).unwrap();
        assert_eq!(first.partition_metadata().unwrap().1, PartType::System);
        assert_eq!(second.partition_metadata().unwrap().1, PartType::PrimSys);
        assert_eq!(f.header().arch(), Arch::Amd64, "header arch follows the new primary");
        assert_eq!(f.primary_partition().unwrap().id(), 2);

        // The change must also land on disk.
        let bytes = f.into_inner().unwrap();
        let f = ContainerFile::load(bytes, LoadOpts::default()).unwrap();
        assert_eq!(f.primary_partition().unwrap().id(), 2);
        assert_eq!(f.header().arch(), Arch::Amd64);
    }

    #[test]
    fn second_primary_rejected() {
        let mut f = ContainerFile::create(Vec::new(), deterministic()).unwrap();
        f.add_object(partition(Arch::I386, PartType::PrimSys), add_opts())
            .unwrap();
        match f.add_object(partition(Arch::Amd64, PartType::PrimSys), add_opts()) {
            Err(Error::PrimaryPartition) => {}
            other => panic!("expected PrimaryPartition, got {:?}", other),
        }
    }

    #[test]
    fn delete_primary_resets_arch() {
        let mut f = ContainerFile::create(Vec::new(), deterministic()).unwrap();
        let id = f
            .add_object(partition(Arch::S390x, PartType::PrimSys), add_opts())
            .unwrap();
        assert_eq!(f.header().arch(), Arch::S390x);
        f.delete_object(id, DeleteOpts::default().with_time(TIME)).unwrap();
        assert_eq!(f.header().arch(), Arch::Unknown);
    }

    #[test]
    fn delete_then_add_reuses_slot_not_id() {
        let mut f = ContainerFile::create(Vec::new(), deterministic()).unwrap();
        let a = f
            .add_object(DescriptorInput::new(DataType::Generic, &b"abc"[..]), add_opts())
            .unwrap();
        let b = f
            .add_object(DescriptorInput::new(DataType::Generic, &b"def"[..]), add_opts())
            .unwrap();
        assert_eq!((a, b), (1, 2));

        f.delete_object(2, DeleteOpts::default().with_time(TIME).compact())
            .unwrap();
        let c = f
            .add_object(DescriptorInput::new(DataType::Generic, &b"ghi"[..]), add_opts())
            .unwrap();
        assert_eq!(c, 3, "freed IDs are never reissued");

        let ds = f.descriptors(&Selector::any()).unwrap();
        let ids: Vec<u32> = ds.iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(f.data(&ds[0]).unwrap(), b"abc");
        assert_eq!(f.data(&ds[1]).unwrap(), b"ghi");
        assert_eq!(
            f.header().data_size(),
            6,
            "compacted hole was reclaimed before the new object landed"
        );
    }

    #[test]
    fn delete_compact_restores_original_bytes() {
        let mut f = ContainerFile::create(Vec::new(), deterministic()).unwrap();
        f.add_object(DescriptorInput::new(DataType::Generic, &b"keep"[..]), add_opts())
            .unwrap();
        let before = {
            let bytes = f.into_inner().unwrap();
            f = ContainerFile::load(bytes.clone(), LoadOpts::default()).unwrap();
            bytes
        };

        let id = f
            .add_object(DescriptorInput::new(DataType::Generic, &b"scratch"[..]), add_opts())
            .unwrap();
        f.delete_object(id, DeleteOpts::default().with_time(TIME).zero().compact())
            .unwrap();
        let after = f.into_inner().unwrap();
        // Everything returns to its pre-add state except the id high-water
        // mark at header offset 128, which must not rewind.
        assert_eq!(before[..128], after[..128], "header fields are restored");
        assert_eq!(&after[128..132], &2u32.to_le_bytes(), "high-water mark keeps the freed id");
        assert_eq!(before[132..], after[132..], "table and data area are restored");
    }

    #[test]
    fn freed_id_not_reissued_after_reload() {
        let mut f = ContainerFile::create(Vec::new(), deterministic()).unwrap();
        f.add_object(DescriptorInput::new(DataType::Generic, &b"abc"[..]), add_opts())
            .unwrap();
        f.add_object(DescriptorInput::new(DataType::Generic, &b"def"[..]), add_opts())
            .unwrap();
        // Delete the highest-id object, then persist and reload. The mark
        // must survive the round-trip rather than being recomputed from the
        // surviving descriptors.
        f.delete_object(2, DeleteOpts::default().with_time(TIME).compact())
            .unwrap();
        let bytes = f.into_inner().unwrap();
        let mut f = ContainerFile::load(bytes, LoadOpts::default()).unwrap();
        let id = f
            .add_object(DescriptorInput::new(DataType::Generic, &b"ghi"[..]), add_opts())
            .unwrap();
        assert_eq!(id, 3, "freed IDs are not reissued across unload/reload");
    }

    #[test]
    fn delete_zero_clears_payload() {
        let mut f = ContainerFile::create(Vec::new(), deterministic()).unwrap();
        f.add_object(DescriptorInput::new(DataType::Generic, &b"aaaa"[..]), add_opts())
            .unwrap();
        f.add_object(DescriptorInput::new(DataType::Generic, &b"bbbb"[..]), add_opts())
            .unwrap();
        let first = f.descriptor(&Selector::any().with_id(1)).unwrap();
        let off = first.offset() as usize;

        // Not trailing, so no compaction happens, but the hole is zeroed.
        f.delete_object(1, DeleteOpts::default().with_time(TIME).zero().compact())
            .unwrap();
        assert_eq!(f.header().data_size(), 8, "non-trailing delete keeps the data area size");
        let bytes = f.into_inner().unwrap();
        assert_eq!(&bytes[off..off + 4], &[0u8; 4], "freed payload bytes are zeroed");

        let f = ContainerFile::load(bytes, LoadOpts::default()).unwrap();
        assert_eq!(f.descriptors(&Selector::any()).unwrap().len(), 1);
    }

    #[test]
    fn store_len_pads_payload() {
        let mut f = ContainerFile::create(Vec::new(), deterministic()).unwrap();
        f.add_object(
            DescriptorInput::new(DataType::Generic, &b"ab"[..]).with_store_len(8),
            add_opts(),
        )
        .unwrap();
        let d = f.descriptor(&Selector::any().with_id(1)).unwrap();
        assert_eq!(d.size(), 2);
        assert_eq!(d.size_with_padding(), 8);
        assert_eq!(f.header().data_size(), 8);
        assert_eq!(f.data(&d).unwrap(), b"ab", "reads stop at the payload length");
    }

    #[test]
    fn metadata_update_persists() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Meta {
            step: u32,
        }
        let mut f = ContainerFile::create(Vec::new(), deterministic()).unwrap();
        let id = f
            .add_object(
                DescriptorInput::new(DataType::GenericJson, &b"{}"[..])
                    .with_metadata(&Meta { step: 1 })
                    .unwrap(),
                add_opts(),
            )
            .unwrap();
        f.set_metadata(id, &Meta { step: 2 }, SetOpts::default().with_time(TIME))
            .unwrap();

        let bytes = f.into_inner().unwrap();
        let f = ContainerFile::load(bytes, LoadOpts::default()).unwrap();
        let d = f.descriptor(&Selector::any().with_id(id)).unwrap();
        assert_eq!(d.metadata::<Meta>().unwrap(), Meta { step: 2 });
    }

    #[test]
    fn read_only_rejects_mutation() {
        let bytes = ContainerFile::create(Vec::new(), deterministic())
            .unwrap()
            .into_inner()
            .unwrap();
        let mut f = ContainerFile::load(bytes, LoadOpts::default().read_only()).unwrap();
        assert!(f
            .add_object(DescriptorInput::new(DataType::Generic, &b"x"[..]), add_opts())
            .is_err());
    }

    #[test]
    fn name_too_long_rejected() {
        let mut f = ContainerFile::create(Vec::new(), deterministic()).unwrap();
        let long = "n".repeat(NAME_LEN + 1);
        match f.add_object(
            DescriptorInput::new(DataType::Generic, &b"x"[..]).with_name(&long),
            add_opts(),
        ) {
            Err(Error::NameTooLong { .. }) => {}
            other => panic!("expected NameTooLong, got {:?}", other),
        }
    }

    #[test]
    fn mtime_monotonic_without_pin() {
        let mut f = ContainerFile::create(Vec::new(), deterministic()).unwrap();
        let start = f.header().modified_at();
        f.add_object(DescriptorInput::new(DataType::Generic, &b"x"[..]), AddOpts::default())
            .unwrap();
        assert!(
            f.header().modified_at() >= start,
            "unpinned mutations never move mtime backwards"
        );
    }
}
