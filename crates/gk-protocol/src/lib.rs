pub mod commands;
pub mod device;
pub mod topics;

pub use commands::*;
pub use device::*;
pub use topics::{TopicKind, TopicSet};
