// Module naming follows project convention (MPMC = Multi-Producer Multi-Consumer)
#[allow(non_snake_case)]
pub mod MPMC;
#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
pub mod Actor;
#[allow(non_snake_case)]
pub mod Runtime;
#[allow(non_snake_case)]
pub mod Debug {
    pub mod StructDebug;
}

pub mod error;

pub use error::{Error, Result};
pub use Actor::{Context, DispatchMode, Flow, Handler, Module, Service};
pub use MPMC::{Address, Message};
