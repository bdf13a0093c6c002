//! Scrolling-capture stitcher: estimates how far consecutive screen captures
//! overlap and stacks them into one tall composite, one frame at a time.

pub mod compositor;
pub mod overlap;
pub mod stitcher;

pub use stitcher::{stitch, EngineError, Stitched, StitchOutcome, StitchingEngine};

#[cfg(test)]
#[path = "../tests/support/mod.rs"]
pub(crate) mod testutil;
