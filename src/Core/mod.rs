pub mod coroutine;
pub mod daemon;
pub mod monitor;
pub mod signal;

pub use coroutine::{CoEnv, CoState, CoWaker, Resume};
pub use monitor::{Monitor, StuckReport};
