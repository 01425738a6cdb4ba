//! Directory listings and the entries they contain.

mod folder;
pub mod types;

pub use folder::DirectorySnapshot;
pub use types::{FileAttributes, PlaceholderInfo};
