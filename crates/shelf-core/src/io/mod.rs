//! IO modules - side effects (network streams, archives, file removal)

pub mod cleanup;
pub mod download;
pub mod extract;
