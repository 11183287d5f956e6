//! On-disk storage for the voluma volume store.
//!
//! This crate owns everything that touches the disk format:
//! - [`RawFile`]: positional I/O over very large files
//! - [`OctreeBuilder`] / [`OctreeStore`]: the bricked LoD store and its
//!   table of contents
//! - [`StatsBlock`]: per-brick min/max statistics
//! - [`ContainerWriter`] / [`ContainerFile`]: the outer container with a
//!   global header, typed blocks, and a whole-file checksum

pub mod container;
pub mod octree;
pub mod raw_file;
pub mod stats;
pub mod wire;

pub use container::{
    BlockEntry, BlockType, ChecksumKind, ContainerFile, ContainerWriter, CONTAINER_MAGIC,
};
pub use octree::{OctreeBuilder, OctreeStore, TocEntry, OCTREE_MAGIC};
pub use raw_file::RawFile;
pub use stats::{BrickStats, StatsBlock};
pub use wire::Endianness;
