//! The container handle: lifecycle, validation, and object data access.
//!
//! A [`ContainerFile`] wraps a positioned-I/O backing (a real file or an
//! in-memory buffer) together with the decoded header and descriptor table.
//! Mutations persist eagerly; [`ContainerFile::unload`] flushes and releases
//! the backing. Object data is read through [`ObjectReader`]s, each holding
//! its own position, so multiple readers from one handle can run in parallel.

use crate::descriptor::{Descriptor, PartType, DESCRIPTOR_LEN};
use crate::error::{Error, Result};
use crate::header::{pad_launch_script, Header, DEFAULT_LAUNCH, HEADER_LEN};
use crate::input::DescriptorInput;
use crate::mutate::AddOpts;
use crate::select::Selector;
use crate::table::DescriptorTable;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Default number of descriptor slots in a new container.
pub const DEFAULT_DESCRIPTOR_CAPACITY: usize = 48;

/// A byte store addressed by absolute position.
///
/// All reads go through `read_at` so readers never share a cursor; this is
/// what makes concurrent [`ObjectReader`]s from one handle sound.
pub trait Backing {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize>;
    fn set_len(&mut self, len: u64) -> io::Result<()>;
    fn len(&self) -> io::Result<u64>;
    fn flush(&mut self) -> io::Result<()>;

    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(buf, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "failed to fill whole buffer",
                    ))
                }
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn write_all_at(&mut self, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write_at(buf, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write whole buffer",
                    ))
                }
                Ok(n) => {
                    buf = &buf[n..];
                    offset += n as u64;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl Backing for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::write_at(self, buf, offset)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

impl Backing for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let offset = offset.min(self.len() as u64) as usize;
        let n = buf.len().min(self.len() - offset);
        buf[..n].copy_from_slice(&self[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        let end = offset as usize + buf.len();
        if end > self.len() {
            self.resize(end, 0);
        }
        self[offset as usize..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.resize(len as usize, 0);
        Ok(())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(Vec::len(self) as u64)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Options for creating a new container.
pub struct CreateOpts {
    pub(crate) id: Option<Uuid>,
    pub(crate) time: Option<i64>,
    pub(crate) deterministic: bool,
    pub(crate) launch: Option<Vec<u8>>,
    pub(crate) capacity: usize,
    pub(crate) descriptors: Vec<DescriptorInput>,
}

impl Default for CreateOpts {
    fn default() -> Self {
        CreateOpts {
            id: None,
            time: None,
            deterministic: false,
            launch: None,
            capacity: DEFAULT_DESCRIPTOR_CAPACITY,
            descriptors: Vec::new(),
        }
    }
}

impl CreateOpts {
    /// Pin the container UUID.
    pub fn with_id(mut self, id: Uuid) -> CreateOpts {
        self.id = Some(id);
        self
    }

    /// Pin both the creation and modification times.
    pub fn with_time(mut self, time: i64) -> CreateOpts {
        self.time = Some(time);
        self
    }

    /// Zero every variable field: UUID, times, and process identity. Produces
    /// bit-identical output for identical inputs in the same order.
    pub fn deterministic(mut self) -> CreateOpts {
        self.deterministic = true;
        self
    }

    /// Override the launch script region.
    pub fn with_launch_script(mut self, script: &str) -> CreateOpts {
        self.launch = Some(script.as_bytes().to_vec());
        self
    }

    /// Size the descriptor table for `capacity` objects.
    pub fn with_descriptor_capacity(mut self, capacity: usize) -> CreateOpts {
        self.capacity = capacity;
        self
    }

    /// Objects to add immediately after the container is created, in order.
    pub fn with_descriptors(mut self, descriptors: Vec<DescriptorInput>) -> CreateOpts {
        self.descriptors = descriptors;
        self
    }
}

/// Options for loading an existing container.
#[derive(Default)]
pub struct LoadOpts {
    pub(crate) read_only: bool,
}

impl LoadOpts {
    /// Open without write access; mutation operations will fail.
    pub fn read_only(mut self) -> LoadOpts {
        self.read_only = true;
        self
    }
}

/// An open container: decoded header and descriptor table plus the backing
/// byte store.
pub struct ContainerFile<B: Backing = File> {
    pub(crate) backing: Option<B>,
    pub(crate) header: Header,
    pub(crate) table: DescriptorTable,
    pub(crate) writable: bool,
}

pub(crate) fn now() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(_) => 0,
    }
}

impl ContainerFile<File> {
    /// Create a new container file at `path`. Fails if the path exists.
    pub fn create_file<P: AsRef<Path>>(path: P, opts: CreateOpts) -> Result<ContainerFile<File>> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        ContainerFile::create(file, opts)
    }

    /// Open the container file at `path`.
    pub fn load_file<P: AsRef<Path>>(path: P, opts: LoadOpts) -> Result<ContainerFile<File>> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(!opts.read_only)
            .open(path)?;
        ContainerFile::load(file, opts)
    }
}

impl<B: Backing> ContainerFile<B> {
    /// Write a fresh header and empty descriptor table into `backing`, then
    /// add any initial objects in order.
    pub fn create(mut backing: B, opts: CreateOpts) -> Result<ContainerFile<B>> {
        let id = match opts.id {
            Some(id) => id,
            None if opts.deterministic => Uuid::nil(),
            None => Uuid::new_v4(),
        };
        let time = match opts.time {
            Some(t) => t,
            None if opts.deterministic => 0,
            None => now(),
        };
        let launch = match opts.launch {
            Some(ref script) => pad_launch_script(script)?,
            None => *DEFAULT_LAUNCH,
        };
        let capacity = opts.capacity;
        let descriptors_size = (capacity * DESCRIPTOR_LEN) as i64;
        let header = Header {
            launch,
            arch: crate::arch::Arch::Unknown,
            id,
            created_at: time,
            modified_at: time,
            descriptors_free: capacity as i64,
            descriptors_total: capacity as i64,
            descriptors_offset: HEADER_LEN as i64,
            descriptors_size,
            data_offset: HEADER_LEN as i64 + descriptors_size,
            data_size: 0,
            last_id: 0,
        };
        let table = DescriptorTable::new(capacity);
        backing.write_all_at(&header.encode(), 0)?;
        backing.write_all_at(&table.encode(), HEADER_LEN as u64)?;
        backing.set_len(header.data_offset as u64)?;

        let mut f = ContainerFile {
            backing: Some(backing),
            header,
            table,
            writable: true,
        };
        for input in opts.descriptors {
            let mut add = AddOpts::default();
            if opts.deterministic {
                add = add.deterministic();
            }
            if let Some(t) = opts.time {
                add = add.with_time(t);
            }
            f.add_object(input, add)?;
        }
        Ok(f)
    }

    /// Decode and validate a container from `backing`.
    pub fn load(backing: B, opts: LoadOpts) -> Result<ContainerFile<B>> {
        let mut raw_header = [0u8; HEADER_LEN];
        backing.read_exact_at(&mut raw_header, 0)?;
        Header::check_tags(&raw_header)?;
        let header = Header::decode(&raw_header)?;

        if header.descriptors_total <= 0 {
            return Err(Error::Format("descriptor table is empty".into()));
        }
        let capacity = header.descriptors_total as usize;
        if header.descriptors_offset != HEADER_LEN as i64 {
            return Err(Error::Format("descriptor table does not follow the header".into()));
        }
        if header.descriptors_size != (capacity * DESCRIPTOR_LEN) as i64 {
            return Err(Error::Format("descriptor table size mismatch".into()));
        }
        if header.data_offset != header.descriptors_offset + header.descriptors_size {
            return Err(Error::Format("data area does not follow the descriptor table".into()));
        }
        if header.data_size < 0 {
            return Err(Error::Format("negative data area size".into()));
        }
        let file_len = backing.len()?;
        if file_len < (header.data_offset + header.data_size) as u64 {
            return Err(Error::Format("file is shorter than the data area".into()));
        }

        let mut raw_table = vec![0u8; capacity * DESCRIPTOR_LEN];
        backing.read_exact_at(&mut raw_table, header.descriptors_offset as u64)?;
        let table = DescriptorTable::decode(&raw_table, capacity)?;

        validate(&header, &table)?;

        Ok(ContainerFile {
            backing: Some(backing),
            header,
            table,
            writable: !opts.read_only,
        })
    }

    /// Flush pending state and release the backing store. A second call
    /// fails with [`Error::AlreadyUnloaded`].
    pub fn unload(&mut self) -> Result<()> {
        let mut backing = self.backing.take().ok_or(Error::AlreadyUnloaded)?;
        if self.writable {
            backing.flush()?;
        }
        Ok(())
    }

    /// Flush pending state and hand the backing store back to the caller
    /// instead of closing it.
    pub fn into_inner(mut self) -> Result<B> {
        let mut backing = self.backing.take().ok_or(Error::AlreadyUnloaded)?;
        if self.writable {
            backing.flush()?;
        }
        Ok(backing)
    }

    /// The decoded global header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The container UUID.
    pub fn id(&self) -> Uuid {
        self.header.id
    }

    /// The unique descriptor matching `selector`.
    pub fn descriptor(&self, selector: &Selector) -> Result<Descriptor> {
        self.table.get_descriptor(selector).map(|(_, d)| d.clone())
    }

    /// All descriptors matching `selector`, in table order.
    pub fn descriptors(&self, selector: &Selector) -> Result<Vec<Descriptor>> {
        self.table.get_descriptors(selector)
    }

    /// The primary system partition descriptor.
    pub fn primary_partition(&self) -> Result<Descriptor> {
        self.descriptor(&Selector::any().with_partition_type(PartType::PrimSys))
    }

    /// Sorted distinct group IDs among live descriptors.
    pub fn group_ids(&self) -> Vec<u32> {
        self.table.group_ids()
    }

    /// A restartable positioned reader over an object's payload.
    pub fn reader(&self, d: &Descriptor) -> Result<ObjectReader<'_, B>> {
        let backing = self.backing.as_ref().ok_or(Error::AlreadyUnloaded)?;
        Ok(ObjectReader {
            backing,
            base: d.file_off as u64,
            len: d.file_len as u64,
            pos: 0,
        })
    }

    /// Structured JSON metadata from a descriptor's extra field.
    pub fn metadata<T: serde::de::DeserializeOwned>(&self, d: &Descriptor) -> Result<T> {
        d.metadata()
    }

    /// An object's payload, read eagerly.
    pub fn data(&self, d: &Descriptor) -> Result<Vec<u8>> {
        let backing = self.backing.as_ref().ok_or(Error::AlreadyUnloaded)?;
        let mut buf = vec![0u8; d.file_len as usize];
        backing.read_exact_at(&mut buf, d.file_off as u64)?;
        Ok(buf)
    }

    pub(crate) fn backing_mut(&mut self) -> Result<&mut B> {
        if !self.writable {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "container loaded read-only",
            )));
        }
        self.backing.as_mut().ok_or(Error::AlreadyUnloaded)
    }

    /// Persist the header.
    pub(crate) fn write_header(&mut self) -> Result<()> {
        let raw = self.header.encode();
        self.backing_mut()?.write_all_at(&raw, 0)?;
        Ok(())
    }

    /// Persist one descriptor slot in place.
    pub(crate) fn write_slot(&mut self, index: usize) -> Result<()> {
        let raw = self.table.encode_slot(index);
        let offset = self.header.descriptors_offset as u64 + (index * DESCRIPTOR_LEN) as u64;
        self.backing_mut()?.write_all_at(&raw, offset)?;
        Ok(())
    }

    pub(crate) fn data_end(&self) -> i64 {
        self.header.data_offset + self.header.data_size
    }
}

fn validate(header: &Header, table: &DescriptorTable) -> Result<()> {
    let live = table.live_count() as i64;
    if live != header.descriptors_total - header.descriptors_free {
        return Err(Error::Format(format!(
            "header counts {} live descriptors, table has {}",
            header.descriptors_total - header.descriptors_free,
            live
        )));
    }
    if table.max_id() > header.last_id {
        return Err(Error::Format(format!(
            "object ID {} exceeds the header id high-water mark {}",
            table.max_id(),
            header.last_id
        )));
    }

    let mut ids = Vec::new();
    for (_, d) in table.iter() {
        if d.id == 0 {
            return Err(Error::Format("descriptor with zero ID".into()));
        }
        if ids.contains(&d.id) {
            return Err(Error::Format(format!("duplicate object ID {}", d.id)));
        }
        ids.push(d.id);

        if d.file_len < 0 || d.store_len < d.file_len {
            return Err(Error::Format(format!("object {} has bad sizes", d.id)));
        }
        if d.file_off < header.data_offset
            || d.file_off + d.file_len > header.data_offset + header.data_size
        {
            return Err(Error::Format(format!(
                "object {} lies outside the data area",
                d.id
            )));
        }
    }

    for (_, d) in table.iter() {
        match d.linked_id() {
            None => {}
            Some((id, false)) => {
                if !table.iter().any(|(_, t)| t.id == id) {
                    return Err(Error::Format(format!(
                        "object {} links to nonexistent object {}",
                        d.id, id
                    )));
                }
            }
            Some((group, true)) => {
                if !table.iter().any(|(_, t)| t.group_id() == Some(group)) {
                    return Err(Error::Format(format!(
                        "object {} links to nonexistent group {}",
                        d.id, group
                    )));
                }
            }
        }
    }

    if table.iter().filter(|(_, d)| d.is_primary()).count() > 1 {
        return Err(Error::Format("multiple primary system partitions".into()));
    }
    Ok(())
}

/// A positioned reader over one object's payload.
pub struct ObjectReader<'a, B: Backing> {
    backing: &'a B,
    base: u64,
    len: u64,
    pos: u64,
}

impl<B: Backing> Read for ObjectReader<'_, B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.len.saturating_sub(self.pos);
        if remaining == 0 {
            return Ok(0);
        }
        let n = (buf.len() as u64).min(remaining) as usize;
        let n = self.backing.read_at(&mut buf[..n], self.base + self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<B: Backing> Seek for ObjectReader<'_, B> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::End(n) => self.len as i128 + n as i128,
            SeekFrom::Current(n) => self.pos as i128 + n as i128,
        };
        if target < 0 || target > u64::MAX as i128 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}
