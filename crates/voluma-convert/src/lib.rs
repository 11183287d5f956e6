//! Conversion pipeline for the voluma volume store.
//!
//! Takes a raw linear volume and produces a container file holding the
//! bricked LoD octree, per-brick statistics, and key/value metadata:
//!
//! 1. optional 8-bit quantization pre-pass
//! 2. LoD-0 permutation of the linear input into bricks
//! 3. per-LoD overlap fill, statistics, and downsampling
//! 4. per-brick compression and container assembly
//!
//! The converter is the sole writer; a second thread may poll
//! [`Progress`] and request cancellation through [`CancelToken`].

pub mod cache;
pub mod config;
pub mod converter;
pub mod downsample;
pub mod export;
pub mod overlap;
pub mod progress;
pub mod quantize;

pub use cache::BrickCache;
pub use config::ConvertConfig;
pub use converter::{Converter, ConvertSummary};
pub use export::export_to_raw;
pub use progress::{CancelToken, Progress};
