//! Filesystem-backed object storage.
//!
//! Objects are addressed by `/`-separated paths such as
//! `bookPictures/<uid>/<title>_<millis>`. A listing returns the immediate
//! sub-folders ("prefixes") and objects ("items") below a prefix.

use crate::error::{AppError, Result};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Result of listing one level below a prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListResult {
    /// Full paths of sub-folders.
    pub prefixes: Vec<String>,
    /// Full paths of objects.
    pub items: Vec<String>,
}

/// Object storage rooted at a directory.
#[derive(Debug, Clone)]
pub struct ObjectStorage {
    root: PathBuf,
    public_url: String,
}

impl ObjectStorage {
    /// Create a storage rooted at `root`. `public_url` prefixes download URLs.
    pub fn new(root: impl Into<PathBuf>, public_url: &str) -> Self {
        Self {
            root: root.into(),
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    /// Map an object path to a file path, rejecting anything that could
    /// escape the root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        let mut segments = 0;

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if segment.starts_with('.') || segment.contains('\\') || segment.contains('\0') {
                return Err(AppError::InvalidInput(format!(
                    "Invalid storage path: {}",
                    path
                )));
            }
            resolved.push(segment);
            segments += 1;
        }

        if segments == 0 {
            return Err(AppError::InvalidInput("Empty storage path".to_string()));
        }
        Ok(resolved)
    }

    /// Store an object, replacing any previous content.
    ///
    /// Data is written to a hidden temporary file first so a listing never
    /// sees a half-written object.
    pub async fn upload(&self, path: &str, data: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        let parent = target
            .parent()
            .ok_or_else(|| AppError::InvalidInput(format!("Invalid storage path: {}", path)))?;
        tokio::fs::create_dir_all(parent).await?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let temp = parent.join(format!(".{}.{}.upload", file_name, Uuid::new_v4()));

        tokio::fs::write(&temp, data).await?;
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        tracing::debug!(path = %path, bytes = data.len(), "Stored object");
        Ok(())
    }

    /// List the folders and objects directly below `prefix`.
    ///
    /// A missing prefix lists as empty. Results are sorted by name.
    pub async fn list_all(&self, prefix: &str) -> Result<ListResult> {
        let dir = self.resolve(prefix)?;
        let prefix = prefix.trim_matches('/');
        let mut result = ListResult::default();

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(result),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }

            let full = format!("{}/{}", prefix, name);
            if entry.file_type().await?.is_dir() {
                result.prefixes.push(full);
            } else {
                result.items.push(full);
            }
        }

        result.prefixes.sort();
        result.items.sort();
        Ok(result)
    }

    /// Whether an object exists.
    pub async fn exists(&self, path: &str) -> Result<bool> {
        let file = self.resolve(path)?;
        Ok(tokio::fs::metadata(&file)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    /// Resolve the download URL of an existing object.
    pub async fn download_url(&self, path: &str) -> Result<String> {
        if !self.exists(path).await? {
            return Err(AppError::NotFound(format!("Object {}", path)));
        }
        Ok(self.url_for(path))
    }

    /// Build the download URL for a path without checking it exists.
    pub fn url_for(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        format!(
            "{}/storage/o/{}?alt=media&token={}",
            self.public_url,
            urlencoding::encode(path),
            download_token(path)
        )
    }

    /// Read an object's content.
    pub async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let file = self.resolve(path)?;
        match tokio::fs::read(&file).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("Object {}", path)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete an object. Folders left empty are removed too.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let file = self.resolve(path)?;
        match tokio::fs::remove_file(&file).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::NotFound(format!("Object {}", path)));
            }
            Err(e) => return Err(e.into()),
        }

        let mut dir = file.parent().map(Path::to_path_buf);
        while let Some(current) = dir {
            if current == self.root || tokio::fs::remove_dir(&current).await.is_err() {
                break;
            }
            dir = current.parent().map(Path::to_path_buf);
        }

        tracing::debug!(path = %path, "Deleted object");
        Ok(())
    }
}

/// Access token embedded in download URLs.
pub fn download_token(path: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, path.trim_matches('/').as_bytes()).to_string()
}

/// Recover the object path from a download URL.
///
/// The path is the percent-encoded segment between the last `/` and the
/// query string.
pub fn path_from_download_url(url: &str) -> Option<String> {
    let without_query = url.split_once('?').map_or(url, |(head, _)| head);
    let encoded = without_query.rsplit_once('/').map(|(_, tail)| tail)?;
    if encoded.is_empty() {
        return None;
    }

    urlencoding::decode(encoded).ok().map(|p| p.into_owned())
}

/// Make a user supplied name safe to use as one path segment.
pub fn sanitize_segment(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    cleaned.trim_start_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_round_trips_to_path() {
        let storage = ObjectStorage::new("/tmp/unused", "http://localhost:8080/");
        let url = storage.url_for("bookPictures/u1/Dune_1700000000000");

        assert!(url.starts_with("http://localhost:8080/storage/o/bookPictures%2Fu1%2FDune_"));
        assert_eq!(
            path_from_download_url(&url).as_deref(),
            Some("bookPictures/u1/Dune_1700000000000")
        );
    }

    #[test]
    fn path_from_url_without_query() {
        assert_eq!(
            path_from_download_url("/storage/o/a%2Fb").as_deref(),
            Some("a/b")
        );
        assert_eq!(path_from_download_url("no-slash"), None);
    }

    #[test]
    fn resolve_rejects_escapes() {
        let storage = ObjectStorage::new("/tmp/unused", "");
        assert!(storage.resolve("../etc/passwd").is_err());
        assert!(storage.resolve("a/.hidden").is_err());
        assert!(storage.resolve("").is_err());
        assert!(storage.resolve("a/b").is_ok());
    }

    #[test]
    fn sanitize_strips_separators() {
        assert_eq!(sanitize_segment("  ../A/B  "), "_A_B");
        assert_eq!(sanitize_segment("Dune"), "Dune");
    }

    #[tokio::test]
    async fn upload_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ObjectStorage::new(dir.path(), "");

        storage.upload("root/u1/a", b"one").await.unwrap();
        storage.upload("root/u2/b", b"two").await.unwrap();
        storage.upload("root/top", b"three").await.unwrap();

        let listing = storage.list_all("root").await.unwrap();
        assert_eq!(listing.prefixes, vec!["root/u1", "root/u2"]);
        assert_eq!(listing.items, vec!["root/top"]);

        assert_eq!(storage.read("root/u1/a").await.unwrap(), b"one");

        storage.delete("root/u1/a").await.unwrap();
        let listing = storage.list_all("root").await.unwrap();
        assert_eq!(listing.prefixes, vec!["root/u2"]);

        assert!(matches!(
            storage.delete("root/u1/a").await,
            Err(AppError::NotFound(_))
        ));
        assert!(storage.list_all("missing").await.unwrap().items.is_empty());
    }
}
