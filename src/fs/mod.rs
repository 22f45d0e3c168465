//! File system access for checkout inspection
//!
//! Composition can optionally look at a local checkout of the application to
//! catch missing files (a Dockerfile, a migration script) before anything is
//! deployed. Every lookup goes through [`FileSystem`] so tests can use
//! [`MockFileSystem`].

mod mock;
mod real;

pub use mock::MockFileSystem;
pub use real::RealFileSystem;

use anyhow::Result;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
}

pub trait FileSystem: Send + Sync {
    fn is_file(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    fn read_to_string(&self, path: &Path) -> Result<String>;
}
