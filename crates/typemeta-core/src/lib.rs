//! Runtime type metadata
//!
//! This crate implements the records a compiled program uses to describe its
//! types at run time, and the runtime services built on them:
//! - Value witness tables: size, alignment and value operations of a type
//! - Metadata records for every type kind, read through [`MemoryReader`]
//! - Context descriptors for modules, extensions and nominal types
//! - Protocol conformances and witness tables, with a lookup cache
//! - Concurrent uniquing of generic, structural and foreign metadata
//! - Existential containers
//! - An image builder that lays records out in memory, and remote
//!   reflection over captured images

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod abi;
pub mod config;
pub mod descriptor;
pub mod emit;
pub mod error;
pub mod existential;
pub mod layout;
pub mod metadata;
pub mod pointer;
pub mod remote;
pub mod runtime;
pub mod witness;

pub use abi::MetadataKind;
pub use config::{RuntimeOptions, RuntimeStats};
pub use emit::{Image, ImageBuilder};
pub use error::{EmitError, EmitResult, ReadError, ReadResult};
pub use metadata::{Metadata, MetadataView};
pub use pointer::{Address, ExternalReader, InProcessReader, MemoryReader, PointerWidth};
pub use remote::{ReflectionContext, SnapshotReader};
pub use runtime::MetadataRuntime;
pub use witness::{TypeLayout, ValueWitnessTable};
