// Transcoding engines: registry, selection, command building and supervision

pub mod availability;
pub mod core;
pub mod launch;
pub mod matcher;
pub mod pipe;
pub mod process;
pub mod registry;

pub use core::*;
