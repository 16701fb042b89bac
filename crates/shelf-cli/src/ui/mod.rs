//! Terminal output

pub mod list;
pub mod output;

pub use output::{Output, format_size};
