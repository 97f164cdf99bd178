//! Sandbox file browsing and ranged reads.

use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use a3s_agent_core::wire::mesos::{FileInfo, TimeInfo};

use crate::authorization::{Action, AuthorizationGate, Object};
use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilesError {
    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unknown(String),
}

impl From<FilesError> for ApiError {
    fn from(err: FilesError) -> Self {
        match err {
            FilesError::Invalid(msg) => ApiError::BadRequest(msg),
            FilesError::Unauthorized(msg) => ApiError::Forbidden(msg),
            FilesError::NotFound(msg) => ApiError::NotFound(msg),
            FilesError::Unknown(msg) => ApiError::Internal(msg),
        }
    }
}

/// Bytes returned by a read, plus the file's total size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    pub size: u64,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait FileService: Send + Sync {
    /// Lists a directory, or describes a single file.
    async fn browse(&self, path: &str, principal: Option<&str>) -> Result<Vec<FileInfo>, FilesError>;

    /// Reads up to `length` bytes at `offset`; the whole remainder if `None`.
    async fn read(
        &self,
        offset: u64,
        length: Option<u64>,
        path: &str,
        principal: Option<&str>,
    ) -> Result<FileChunk, FilesError>;
}

/// Files under the agent work directory. Paths are relative to the root;
/// a leading `/` is ignored and `..` components are rejected.
pub struct SandboxFiles {
    root: PathBuf,
    gate: AuthorizationGate,
}

impl SandboxFiles {
    pub fn new(root: impl Into<PathBuf>, gate: AuthorizationGate) -> Self {
        Self {
            root: root.into(),
            gate,
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, FilesError> {
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(FilesError::Invalid(format!(
                        "Path '{}' escapes the sandbox",
                        path
                    )));
                }
            }
        }
        Ok(resolved)
    }

    async fn authorize(&self, principal: Option<&str>, path: &str) -> Result<(), FilesError> {
        let approver = self
            .gate
            .approver(principal, Action::AccessSandbox)
            .await
            .map_err(|e| FilesError::Unknown(e.to_string()))?;
        match approver.approved(&Object::default()) {
            Ok(true) => Ok(()),
            Ok(false) => Err(FilesError::Unauthorized(format!(
                "Access to '{}' is not authorized",
                path
            ))),
            Err(e) => Err(FilesError::Unknown(e.to_string())),
        }
    }

    async fn metadata(&self, resolved: &Path, path: &str) -> Result<std::fs::Metadata, FilesError> {
        tokio::fs::metadata(resolved).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                FilesError::NotFound(format!("'{}' cannot be found", path))
            }
            _ => FilesError::Unknown(format!("Failed to stat '{}': {}", path, e)),
        })
    }
}

fn file_info(path: String, metadata: &std::fs::Metadata) -> FileInfo {
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| TimeInfo {
            nanoseconds: i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        });

    #[cfg(unix)]
    let (nlink, mode) = {
        use std::os::unix::fs::MetadataExt;
        (i32::try_from(metadata.nlink()).ok(), Some(metadata.mode()))
    };
    #[cfg(not(unix))]
    let (nlink, mode) = (None, None);

    FileInfo {
        path,
        nlink,
        size: Some(metadata.len()),
        mtime,
        mode,
    }
}

fn join_virtual(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        format!("/{}", name)
    } else if dir.starts_with('/') {
        format!("{}/{}", dir, name)
    } else {
        format!("/{}/{}", dir, name)
    }
}

#[async_trait]
impl FileService for SandboxFiles {
    async fn browse(
        &self,
        path: &str,
        principal: Option<&str>,
    ) -> Result<Vec<FileInfo>, FilesError> {
        let resolved = self.resolve(path)?;
        self.authorize(principal, path).await?;

        let metadata = self.metadata(&resolved, path).await?;
        if !metadata.is_dir() {
            return Ok(vec![file_info(path.to_string(), &metadata)]);
        }

        let mut entries = tokio::fs::read_dir(&resolved)
            .await
            .map_err(|e| FilesError::Unknown(format!("Failed to list '{}': {}", path, e)))?;
        let mut infos = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FilesError::Unknown(format!("Failed to list '{}': {}", path, e)))?
        {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            infos.push(file_info(join_virtual(path, &name), &metadata));
        }
        infos.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(infos)
    }

    async fn read(
        &self,
        offset: u64,
        length: Option<u64>,
        path: &str,
        principal: Option<&str>,
    ) -> Result<FileChunk, FilesError> {
        let resolved = self.resolve(path)?;
        self.authorize(principal, path).await?;

        let metadata = self.metadata(&resolved, path).await?;
        if metadata.is_dir() {
            return Err(FilesError::Invalid(format!(
                "Cannot read '{}': it is a directory",
                path
            )));
        }

        let size = metadata.len();
        if offset >= size {
            return Ok(FileChunk {
                size,
                data: Vec::new(),
            });
        }

        let remaining = size - offset;
        let wanted = length.map_or(remaining, |l| l.min(remaining));

        let io_error =
            |e: std::io::Error| FilesError::Unknown(format!("Failed to read '{}': {}", path, e));
        let mut file = tokio::fs::File::open(&resolved).await.map_err(io_error)?;
        file.seek(SeekFrom::Start(offset)).await.map_err(io_error)?;
        let mut data = Vec::with_capacity(usize::try_from(wanted).unwrap_or(0));
        file.take(wanted)
            .read_to_end(&mut data)
            .await
            .map_err(io_error)?;

        Ok(FileChunk { size, data })
    }
}
