use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::types::MediaKind;

#[derive(Debug, Error)]
pub enum MediaStorageError {
    #[error("file not found")]
    NotFound,
    #[error("invalid stored filename")]
    InvalidFilename,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaStorageError {
    fn from_io(e: std::io::Error) -> Self {
        if e.kind() == ErrorKind::NotFound {
            Self::NotFound
        } else {
            Self::Io(e)
        }
    }
}

/// Files are laid out as `<data_dir>/uploads/<kind>/<filename>`.
pub struct MediaStorage {
    base_path: PathBuf,
}

impl MediaStorage {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            base_path: data_dir.join("uploads"),
        }
    }

    fn file_path(&self, kind: MediaKind, filename: &str) -> PathBuf {
        self.base_path.join(kind.as_str()).join(filename)
    }

    fn temp_path(&self) -> PathBuf {
        self.base_path.join("tmp").join(Uuid::new_v4().to_string())
    }

    /// Writes `data` under `filename` and returns its hex SHA-256 digest.
    /// The file only becomes visible once fully written.
    pub async fn put(
        &self,
        kind: MediaKind,
        filename: &str,
        data: &[u8],
    ) -> Result<String, MediaStorageError> {
        validate_stored_name(filename)?;

        let mut hasher = Sha256::new();
        hasher.update(data);
        let digest = hex::encode(hasher.finalize());

        let temp_path = self.temp_path();
        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let final_path = self.file_path(kind, filename);
        if let Err(e) = write_then_rename(&temp_path, &final_path, data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(digest)
    }

    pub async fn get(
        &self,
        kind: MediaKind,
        filename: &str,
    ) -> Result<(BufReader<File>, u64), MediaStorageError> {
        validate_stored_name(filename)?;
        let path = self.file_path(kind, filename);
        let file = File::open(&path).await.map_err(MediaStorageError::from_io)?;

        let size = file.metadata().await?.len();

        Ok((BufReader::new(file), size))
    }

    pub async fn delete(&self, kind: MediaKind, filename: &str) -> Result<bool, MediaStorageError> {
        validate_stored_name(filename)?;
        let path = self.file_path(kind, filename);

        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MediaStorageError::Io(e)),
        }
    }
}

async fn write_then_rename(
    temp_path: &Path,
    final_path: &Path,
    data: &[u8],
) -> std::io::Result<()> {
    let mut temp_file = File::create(temp_path).await?;
    temp_file.write_all(data).await?;
    temp_file.sync_all().await?;
    drop(temp_file);

    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::rename(temp_path, final_path).await
}

/// Stored names are generated by the server, never taken from the client.
fn validate_stored_name(filename: &str) -> Result<(), MediaStorageError> {
    if filename.is_empty() || filename.starts_with('.') {
        return Err(MediaStorageError::InvalidFilename);
    }

    if !filename
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Err(MediaStorageError::InvalidFilename);
    }

    if filename.contains("..") {
        return Err(MediaStorageError::InvalidFilename);
    }

    Ok(())
}

/// Lower-cased extension of a client-supplied filename, without the dot.
#[must_use]
pub fn file_extension(original_filename: &str) -> Option<String> {
    let (stem, ext) = original_filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
