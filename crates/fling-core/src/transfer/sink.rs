//! Receiver-side persistence capability.
//!
//! A [`SinkFactory`] is consulted once per transfer, when the `meta`
//! control frame announces the file. It may decline, in which case the
//! receiver accumulates the payload in memory instead. [`FileSink`] and
//! [`DirectorySinkFactory`] are the bundled filesystem implementations.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::Result;

use super::FileMeta;

/// Ordered byte destination for one incoming file.
#[async_trait]
pub trait StreamingSink: Send {
    /// Append a segment to the destination.
    async fn write(&mut self, chunk: &[u8]) -> Result<()>;

    /// Flush and close the destination.
    async fn finish(&mut self) -> Result<()>;
}

/// Supplies streaming sinks for announced files.
#[async_trait]
pub trait SinkFactory: Send {
    /// Open a sink for the announced file. Returning `Ok(None)` declines,
    /// telling the receiver to buffer in memory instead.
    async fn create(&mut self, meta: &FileMeta) -> Result<Option<Box<dyn StreamingSink>>>;
}

/// Streaming sink writing to a single file.
#[derive(Debug)]
pub struct FileSink {
    file: File,
    path: PathBuf,
}

impl FileSink {
    /// Create the file, making parent directories as needed.
    pub async fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = File::create(path).await?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// The path being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StreamingSink for FileSink {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.file.write_all(chunk).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }
}

/// Factory that places every incoming file directly under one directory.
#[derive(Debug, Clone)]
pub struct DirectorySinkFactory {
    dir: PathBuf,
}

impl DirectorySinkFactory {
    /// Create a factory rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SinkFactory for DirectorySinkFactory {
    async fn create(&mut self, meta: &FileMeta) -> Result<Option<Box<dyn StreamingSink>>> {
        let name = sanitize_file_name(&meta.name);
        if name != meta.name {
            tracing::debug!(announced = %meta.name, using = %name, "sanitized incoming file name");
        }
        let sink = FileSink::create(&self.dir.join(name)).await?;
        Ok(Some(Box::new(sink)))
    }
}

/// Reduce an announced file name to a single safe path component.
///
/// Announced names come from the remote peer; directory structure and
/// traversal components are stripped rather than trusted.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let candidate = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    match candidate {
        "" | "." | ".." => "download".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_plain_name_unchanged() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("with spaces.txt"), "with spaces.txt");
    }

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("dir/inner.txt"), "inner.txt");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\evil\\notes.txt"), "notes.txt");
    }

    #[test]
    fn test_sanitize_rejects_bare_traversal() {
        assert_eq!(sanitize_file_name(".."), "download");
        assert_eq!(sanitize_file_name("."), "download");
        assert_eq!(sanitize_file_name(""), "download");
        assert_eq!(sanitize_file_name("a/.."), "download");
    }

    #[tokio::test]
    async fn test_file_sink_writes_segments_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let mut sink = FileSink::create(&path).await.unwrap();
        sink.write(b"hello ").await.unwrap();
        sink.write(b"world").await.unwrap();
        sink.finish().await.unwrap();

        let written = tokio::fs::read(&path).await.unwrap();
        assert_eq!(written, b"hello world");
    }

    #[tokio::test]
    async fn test_file_sink_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("out.bin");

        let mut sink = FileSink::create(&path).await.unwrap();
        sink.write(b"x").await.unwrap();
        sink.finish().await.unwrap();

        assert_eq!(sink.path(), path);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_directory_factory_contains_traversal_names() {
        let root = tempfile::tempdir().unwrap();
        let inbox = root.path().join("inbox");
        tokio::fs::create_dir(&inbox).await.unwrap();
        let mut factory = DirectorySinkFactory::new(&inbox);

        let meta = FileMeta {
            name: "../escape.txt".to_string(),
            size: 4,
            mime: "text/plain".to_string(),
        };
        let mut sink = factory.create(&meta).await.unwrap().unwrap();
        sink.write(b"data").await.unwrap();
        sink.finish().await.unwrap();

        assert!(inbox.join("escape.txt").exists());
        assert!(!root.path().join("escape.txt").exists());
    }
}
