//! Book listings: upload, enumerate and delete a user's books.
//!
//! Each user owns one `userBooks/<uid>` document whose `books` array holds
//! the listings; every listing points at one picture stored under
//! `<root>/<uid>/<title>_<millis>`.

use crate::db::{self, Database};
use crate::error::{AppError, Result};
use crate::storage::{self, ObjectStorage, sanitize_segment};
use serde::{Deserialize, Serialize};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A book listed by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBook {
    /// Title, unique within the owner's collection.
    pub title: String,
    /// Author.
    #[serde(default)]
    pub author: String,
    /// Genre tags.
    #[serde(default)]
    pub genres: Vec<String>,
    /// Download URL of the picture.
    pub picture: String,
    /// Download token of the picture.
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BookList {
    #[serde(default)]
    books: Vec<UserBook>,
}

/// Input of an upload.
#[derive(Debug, Clone)]
pub struct NewListing {
    /// Title.
    pub title: String,
    /// Author.
    pub author: String,
    /// Selected genres.
    pub genres: Vec<String>,
    /// Raw image bytes.
    pub image: Vec<u8>,
}

/// What a delete managed to do. The two halves are independent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    /// A listing with the title existed.
    pub found: bool,
    /// The listing was removed from the book-list document.
    pub list_updated: bool,
    /// The picture object was deleted.
    pub image_deleted: bool,
}

/// Trim, drop empties and de-duplicate tags, keeping first-seen order.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Upload/delete flow over the document store and object storage.
///
/// Writes to one user's book list are serialized, so concurrent uploads and
/// deletes never overwrite each other's copy of the list.
pub struct ListingService {
    db: Database,
    storage: ObjectStorage,
    root: String,
    writers: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ListingService {
    /// Create a listing service storing pictures below `root`.
    pub fn new(db: Database, storage: ObjectStorage, root: &str) -> Self {
        Self {
            db,
            storage,
            root: root.trim_matches('/').to_string(),
            writers: Mutex::new(HashMap::new()),
        }
    }

    fn writer(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.writers
            .lock()
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    /// Listings of a user, empty when the user has none.
    pub fn list(&self, user_id: &str) -> Result<Vec<UserBook>> {
        Ok(self.read_list(user_id)?.books)
    }

    fn read_list(&self, user_id: &str) -> Result<BookList> {
        match self.db.get_document(db::USER_BOOKS, user_id)? {
            Some(doc) => Ok(serde_json::from_value(doc.data)?),
            None => Ok(BookList::default()),
        }
    }

    /// Upload a picture and append the listing to the user's book list.
    ///
    /// When the document write fails the picture is deleted again, so a
    /// failed upload leaves no orphaned object behind.
    pub async fn upload(&self, user_id: &str, listing: NewListing) -> Result<UserBook> {
        let title = listing.title.trim().to_string();
        if title.is_empty() {
            return Err(AppError::Field {
                field: "title",
                message: "Title is required".to_string(),
            });
        }

        let format = image::guess_format(&listing.image).map_err(|_| AppError::Field {
            field: "picture",
            message: "Unsupported image format".to_string(),
        })?;

        let writer = self.writer(user_id);
        let _guard = writer.lock().await;

        let mut current = self.read_list(user_id)?;
        if current.books.iter().any(|b| b.title == title) {
            return Err(AppError::Conflict(format!(
                "A book titled '{}' is already on your shelf",
                title
            )));
        }

        let path = format!(
            "{}/{}/{}_{}",
            self.root,
            user_id,
            sanitize_segment(&title),
            chrono::Utc::now().timestamp_millis()
        );
        self.storage.upload(&path, &listing.image).await?;
        tracing::info!(user_id = %user_id, path = %path, format = ?format, "Uploaded book picture");

        let book = UserBook {
            title,
            author: listing.author.trim().to_string(),
            genres: normalize_tags(&listing.genres),
            picture: self.storage.url_for(&path),
            token: storage::download_token(&path),
        };
        current.books.push(book.clone());

        let write = serde_json::to_value(&current)
            .map_err(AppError::from)
            .and_then(|body| self.db.set_document(db::USER_BOOKS, user_id, body, true));

        if let Err(e) = write {
            tracing::error!(user_id = %user_id, error = %e, "Error saving book list, removing picture");
            if let Err(cleanup) = self.storage.delete(&path).await {
                tracing::error!(path = %path, error = %cleanup, "Failed to remove orphaned picture");
            }
            return Err(e);
        }

        Ok(book)
    }

    /// Remove the listing with `title` and delete its picture.
    ///
    /// Exactly one matching entry is removed. Failures of the document write
    /// and of the object delete are logged separately; neither undoes the
    /// other.
    pub async fn delete(&self, user_id: &str, title: &str) -> DeleteOutcome {
        let mut outcome = DeleteOutcome::default();
        let writer = self.writer(user_id);
        let _guard = writer.lock().await;

        let mut current = match self.read_list(user_id) {
            Ok(list) => list,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Error deleting book");
                return outcome;
            }
        };

        let Some(index) = current.books.iter().position(|b| b.title == title) else {
            return outcome;
        };
        outcome.found = true;

        let removed = current.books.remove(index);

        match self
            .db
            .update_document(db::USER_BOOKS, user_id, json!({ "books": current.books }))
        {
            Ok(()) => outcome.list_updated = true,
            Err(e) => {
                tracing::error!(user_id = %user_id, title = %title, error = %e, "Error updating book list")
            }
        }

        match storage::path_from_download_url(&removed.picture) {
            Some(path) => match self.storage.delete(&path).await {
                Ok(()) => outcome.image_deleted = true,
                Err(e) => {
                    tracing::error!(path = %path, error = %e, "Error deleting book picture")
                }
            },
            None => tracing::error!(url = %removed.picture, "Cannot derive storage path from URL"),
        }

        outcome
    }

    /// Delete pictures in the user's folder that no listing references.
    pub async fn reconcile(&self, user_id: &str) -> Result<usize> {
        let referenced: HashSet<String> = self
            .list(user_id)?
            .iter()
            .filter_map(|b| storage::path_from_download_url(&b.picture))
            .collect();

        let folder = self
            .storage
            .list_all(&format!("{}/{}", self.root, user_id))
            .await?;

        let mut removed = 0;
        for item in folder.items {
            if referenced.contains(&item) {
                continue;
            }
            self.storage.delete(&item).await?;
            tracing::info!(path = %item, "Removed orphaned picture");
            removed += 1;
        }

        Ok(removed)
    }
}
