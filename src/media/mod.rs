//! Uploaded files on disk. Metadata rows live in the store.

mod storage;

pub use storage::{MediaStorage, MediaStorageError, file_extension};
