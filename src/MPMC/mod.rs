pub mod Buffer;
mod debug;
pub mod global;
pub mod inbox;

pub mod Structs {
    pub mod message;
    pub use message::{Address, Message}; // re-export for stable path
}

pub use global::GlobalQueue;
pub use inbox::Inbox;
pub use Structs::{Address, Message};
