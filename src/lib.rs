//! Singularity Image Format (SIF) container files.
//!
//! A SIF file packages heterogeneous payloads inside one addressable binary
//! artifact: filesystem partitions, OCI blobs, signatures, and metadata
//! documents, each indexed by a fixed-size descriptor. This crate implements
//! the on-disk format, the descriptor table engine, the mutation operations
//! that keep a file self-consistent under arbitrary edit sequences, and the
//! integrity subsystem that signs and verifies object groups with OpenPGP
//! clearsign or DSSE envelopes.
//!
//! # Reading a container
//!
//! ```no_run
//! use sif::{ContainerFile, LoadOpts, Selector};
//!
//! let f = ContainerFile::load_file("image.sif", LoadOpts::default().read_only())?;
//! let part = f.primary_partition()?;
//! let data = f.data(&part)?;
//! # Ok::<(), sif::Error>(())
//! ```
//!
//! # Building a container
//!
//! ```
//! use sif::{ContainerFile, CreateOpts, DataType, DescriptorInput};
//!
//! let f = ContainerFile::create(
//!     Vec::new(),
//!     CreateOpts::default().with_descriptors(vec![
//!         DescriptorInput::new(DataType::Generic, &b"hello"[..]).with_name("greeting"),
//!     ]),
//! )?;
//! # Ok::<(), sif::Error>(())
//! ```
//!
//! Deterministic creation (`CreateOpts::deterministic`) zeroes every
//! variable field so identical inputs produce bit-identical files.

mod arch;
mod container;
mod descriptor;
mod error;
mod header;
mod input;
mod mutate;
mod select;
mod table;

pub mod integrity;
pub mod tool;

pub use arch::Arch;
pub use container::{
    Backing, ContainerFile, CreateOpts, LoadOpts, ObjectReader, DEFAULT_DESCRIPTOR_CAPACITY,
};
pub use descriptor::{
    DataType, Descriptor, FormatType, FsType, HashType, MessageType, PartType, DESCRIPTOR_LEN,
    EXTRA_LEN, NAME_LEN, NO_GROUP,
};
pub use error::{Error, Result};
pub use header::{Header, HEADER_LEN, LAUNCH_LEN};
pub use input::{DescriptorInput, DEFAULT_GROUP};
pub use mutate::{AddOpts, DeleteOpts, SetOpts};
pub use select::Selector;
