//! Repository implementations for database operations

pub mod predictions;

pub use predictions::*;
