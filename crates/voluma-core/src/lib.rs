//! Core types and arithmetic for the voluma volume store.
//!
//! This crate provides the foundational pieces used throughout the store:
//! - Component (voxel scalar) types and typed dispatch
//! - Brick keys and the brick/LoD layout arithmetic
//! - Volume metadata
//! - Common error types

pub mod component;
pub mod error;
pub mod layout;

pub use component::{ComponentType, Scalar, VolumeMeta};
pub use error::{Error, Result};
pub use layout::{BrickKey, BrickLayout};
