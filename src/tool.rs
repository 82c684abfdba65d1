//! One library function per command of the `siftool` command-line surface.
//!
//! Flag parsing stays in the CLI; these functions take parsed arguments and
//! write any human-readable output to a caller-supplied writer. `keys`,
//! `mount`, and `unmount` are keyring and FUSE concerns handled by external
//! collaborators.

use crate::container::{ContainerFile, CreateOpts, LoadOpts};
use crate::descriptor::{DataType, Descriptor};
use crate::error::Result;
use crate::input::DescriptorInput;
use crate::integrity::sign::Signer;
use crate::integrity::verify::Verifier;
use crate::mutate::{AddOpts, DeleteOpts, SetOpts};
use crate::select::Selector;
use pgp::{SignedPublicKey, SignedSecretKey};
use std::io::Write;
use std::path::Path;

/// Create an empty container at `path`.
pub fn new<P: AsRef<Path>>(path: P) -> Result<()> {
    let mut f = ContainerFile::create_file(path, CreateOpts::default())?;
    f.unload()
}

/// Create a container at `path` holding `inputs`, in order.
pub fn create<P: AsRef<Path>>(path: P, inputs: Vec<DescriptorInput>) -> Result<()> {
    let mut f = ContainerFile::create_file(path, CreateOpts::default().with_descriptors(inputs))?;
    f.unload()
}

/// Add one object to the container at `path`, returning its ID.
pub fn add<P: AsRef<Path>>(path: P, input: DescriptorInput) -> Result<u32> {
    let mut f = ContainerFile::load_file(path, LoadOpts::default())?;
    let id = f.add_object(input, AddOpts::default())?;
    f.unload()?;
    Ok(id)
}

/// Delete an object from the container at `path`.
pub fn del<P: AsRef<Path>>(path: P, id: u32, opts: DeleteOpts) -> Result<()> {
    let mut f = ContainerFile::load_file(path, LoadOpts::default())?;
    f.delete_object(id, opts)?;
    f.unload()
}

/// Mark the partition `id` as the primary system partition.
pub fn setprimpart<P: AsRef<Path>>(path: P, id: u32) -> Result<()> {
    let mut f = ContainerFile::load_file(path, LoadOpts::default())?;
    f.set_prim_part(id, SetOpts::default())?;
    f.unload()
}

/// Write one object's payload to `w`.
pub fn dump<P: AsRef<Path>, W: Write>(path: P, id: u32, w: &mut W) -> Result<()> {
    let f = ContainerFile::load_file(path, LoadOpts::default().read_only())?;
    let d = f.descriptor(&Selector::any().with_id(id))?;
    let mut r = f.reader(&d)?;
    std::io::copy(&mut r, w)?;
    Ok(())
}

/// Write a formatted view of the global header to `w`.
pub fn header<P: AsRef<Path>, W: Write>(path: P, w: &mut W) -> Result<()> {
    let f = ContainerFile::load_file(path, LoadOpts::default().read_only())?;
    let h = f.header();
    writeln!(w, "Launch:       {}", String::from_utf8_lossy(h.launch_script()).trim_end())?;
    writeln!(w, "Arch:         {}", h.arch())?;
    writeln!(w, "ID:           {}", h.id())?;
    writeln!(w, "Created:      {}", h.created_at())?;
    writeln!(w, "Modified:     {}", h.modified_at())?;
    writeln!(w, "Descriptors:  {}/{}", h.descriptor_count(), h.descriptor_capacity())?;
    writeln!(w, "Data size:    {}", h.data_size())?;
    Ok(())
}

fn fmt_group(d: &Descriptor) -> String {
    match d.group_id() {
        Some(g) => g.to_string(),
        None => "NONE".to_string(),
    }
}

fn fmt_link(d: &Descriptor) -> String {
    match d.linked_id() {
        Some((id, true)) => format!("{} (G)", id),
        Some((id, false)) => id.to_string(),
        None => "NONE".to_string(),
    }
}

fn fmt_type(d: &Descriptor) -> String {
    match d.data_type() {
        DataType::Partition => match d.partition_metadata() {
            Ok((fs, part, arch)) => format!("partition ({:?}/{}/{})", fs, part, arch),
            Err(_) => "partition".to_string(),
        },
        DataType::Signature => match d.signature_metadata() {
            Ok((hash, _)) => format!("signature ({})", hash.name()),
            Err(_) => "signature".to_string(),
        },
        other => other.to_string(),
    }
}

/// Write the descriptor table listing to `w`.
pub fn list<P: AsRef<Path>, W: Write>(path: P, w: &mut W) -> Result<()> {
    let f = ContainerFile::load_file(path, LoadOpts::default().read_only())?;
    writeln!(w, "{:<4} {:<6} {:<8} {:<20} TYPE", "ID", "GROUP", "LINK", "POSITION")?;
    for d in f.descriptors(&Selector::any())? {
        writeln!(
            w,
            "{:<4} {:<6} {:<8} {:<20} {}",
            d.id(),
            fmt_group(&d),
            fmt_link(&d),
            format!("{}-{}", d.offset(), d.offset() + d.size()),
            fmt_type(&d),
        )?;
    }
    Ok(())
}

/// Write one descriptor's details to `w`.
pub fn info<P: AsRef<Path>, W: Write>(path: P, id: u32, w: &mut W) -> Result<()> {
    let f = ContainerFile::load_file(path, LoadOpts::default().read_only())?;
    let d = f.descriptor(&Selector::any().with_id(id))?;
    writeln!(w, "ID:        {}", d.id())?;
    writeln!(w, "Type:      {}", fmt_type(&d))?;
    writeln!(w, "Group:     {}", fmt_group(&d))?;
    writeln!(w, "Link:      {}", fmt_link(&d))?;
    writeln!(w, "Offset:    {}", d.offset())?;
    writeln!(w, "Size:      {}", d.size())?;
    writeln!(w, "Stored:    {}", d.size_with_padding())?;
    writeln!(w, "Created:   {}", d.created_at())?;
    writeln!(w, "Modified:  {}", d.modified_at())?;
    writeln!(w, "UID:       {}", d.uid())?;
    writeln!(w, "GID:       {}", d.gid())?;
    if !d.name().is_empty() {
        writeln!(w, "Name:      {}", d.name())?;
    }
    Ok(())
}

/// Sign every object group in the container at `path` with an OpenPGP key.
pub fn sign<P: AsRef<Path>>(path: P, key: SignedSecretKey) -> Result<()> {
    let mut f = ContainerFile::load_file(path, LoadOpts::default())?;
    Signer::new(&mut f).with_entity(key).sign()?;
    f.unload()
}

/// Verify every object group in the container at `path` against a keyring,
/// writing the fingerprints that signed it to `w`.
pub fn verify<P: AsRef<Path>, W: Write>(
    path: P,
    keyring: Vec<SignedPublicKey>,
    w: &mut W,
) -> Result<()> {
    let f = ContainerFile::load_file(path, LoadOpts::default().read_only())?;
    let mut v = Verifier::new(&f).with_keyring(keyring);
    v.verify()?;
    for fp in v.any_signed_by()? {
        writeln!(w, "{}", hex::encode(fp))?;
    }
    Ok(())
}
