//! The archive directory: listing, validated deletion, retention scanning and
//! the gzip codec used for artifacts.

use crate::models::artifact::{Artifact, ArtifactName, COMPRESSED_EXTENSION, DUMP_EXTENSION};
use async_compression::tokio::bufread::GzipDecoder;
use async_compression::tokio::write::GzipEncoder;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::io::{AsyncWriteExt, BufReader};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("filename is required")]
    MissingName,

    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Invalid backup file: {0}")]
    Invalid(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveStats {
    pub total: usize,
    pub total_size_bytes: u64,
    pub last_modified: Option<SystemTime>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteSummary {
    pub deleted: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ArchiveStore {
    root: PathBuf,
}

impl ArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_exists(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    /// Compressed artifacts, newest first by modification time.
    pub async fn list(&self, limit: Option<usize>) -> std::io::Result<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(artifacts),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(name) = ArtifactName::parse(&file_name).filter(|n| n.compressed) else {
                continue;
            };
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            artifacts.push(Artifact {
                name,
                path: entry.path(),
                size_bytes: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        artifacts.sort_by(|a, b| b.modified.cmp(&a.modified));
        if let Some(limit) = limit {
            artifacts.truncate(limit);
        }
        Ok(artifacts)
    }

    pub async fn stats(&self) -> std::io::Result<ArchiveStats> {
        let artifacts = self.list(None).await?;
        Ok(ArchiveStats {
            total: artifacts.len(),
            total_size_bytes: artifacts.iter().map(|a| a.size_bytes).sum(),
            last_modified: artifacts.first().map(|a| a.modified),
        })
    }

    /// Maps a client-supplied file name to an artifact path.
    ///
    /// The file must exist, sit directly in the archive directory once
    /// symlinks and `..` are resolved, and carry the compressed extension.
    pub async fn resolve(&self, file_name: &str) -> Result<PathBuf, ArchiveError> {
        if file_name.trim().is_empty() {
            return Err(ArchiveError::MissingName);
        }

        let candidate = self.root.join(file_name);
        let resolved = match tokio::fs::canonicalize(&candidate).await {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArchiveError::NotFound(file_name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let root = tokio::fs::canonicalize(&self.root).await?;

        if resolved.parent() != Some(root.as_path()) {
            return Err(ArchiveError::Invalid(file_name.to_string()));
        }
        let is_compressed = resolved
            .file_name()
            .map(|n| n.to_string_lossy().ends_with(COMPRESSED_EXTENSION))
            .unwrap_or(false);
        if !is_compressed || !tokio::fs::metadata(&resolved).await?.is_file() {
            return Err(ArchiveError::Invalid(file_name.to_string()));
        }
        Ok(resolved)
    }

    pub async fn delete(&self, file_name: &str) -> Result<PathBuf, ArchiveError> {
        let path = self.resolve(file_name).await?;
        tokio::fs::remove_file(&path).await?;
        Ok(path)
    }

    /// Deletes each name independently; one bad name does not stop the rest.
    pub async fn delete_many(&self, file_names: &[String]) -> DeleteSummary {
        let mut summary = DeleteSummary::default();
        for name in file_names {
            match self.delete(name).await {
                Ok(_) => summary.deleted.push(name.clone()),
                Err(e) => summary.errors.push(format!("{name}: {e}")),
            }
        }
        summary
    }

    /// Compressed and uncompressed dumps last modified strictly before `cutoff`.
    pub async fn expired(&self, cutoff: SystemTime) -> std::io::Result<Vec<PathBuf>> {
        let mut expired = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(expired),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !(file_name.ends_with(COMPRESSED_EXTENSION) || file_name.ends_with(DUMP_EXTENSION)) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            if matches!(meta.modified(), Ok(modified) if modified < cutoff) {
                expired.push(entry.path());
            }
        }
        expired.sort();
        Ok(expired)
    }
}

/// `x.sql` -> `x.sql.gz`
pub fn compressed_path(dump_path: &Path) -> PathBuf {
    let mut name = dump_path.as_os_str().to_os_string();
    name.push(".gz");
    PathBuf::from(name)
}

/// Gzips a dump next to itself and removes the raw dump.
///
/// On any failure the partial `.gz` is removed and the raw dump kept, so the
/// raw dump and its compressed form never both survive.
pub async fn compress_dump(dump_path: &Path) -> std::io::Result<PathBuf> {
    let gz_path = compressed_path(dump_path);

    let written = async {
        let mut input = tokio::fs::File::open(dump_path).await?;
        let output = tokio::fs::File::create(&gz_path).await?;
        let mut encoder = GzipEncoder::new(output);
        tokio::io::copy(&mut input, &mut encoder).await?;
        encoder.shutdown().await?;
        encoder.into_inner().sync_all().await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&gz_path).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::remove_file(dump_path).await {
        let _ = tokio::fs::remove_file(&gz_path).await;
        return Err(e);
    }
    Ok(gz_path)
}

/// Streaming reader yielding the SQL text of a compressed artifact.
pub async fn open_decompressed(path: &Path) -> std::io::Result<GzipDecoder<BufReader<tokio::fs::File>>> {
    let file = tokio::fs::File::open(path).await?;
    let mut decoder = GzipDecoder::new(BufReader::new(file));
    decoder.multiple_members(true);
    Ok(decoder)
}
