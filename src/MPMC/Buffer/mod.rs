#[allow(clippy::module_inception)]
pub mod Buffer;
pub mod Buffer_impl;

pub use Buffer::{RingBuffer, Slot}; // re-export for stable path
