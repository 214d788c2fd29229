//! Swipe feed built from every user's book pictures.

use crate::db::{self, Database};
use crate::error::{AppError, Result};
use crate::listing::UserBook;
use crate::storage::{self, ObjectStorage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// One entry of the swipe feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedBook {
    /// Position in the feed, starting at 1.
    pub id: u64,
    /// Listing title, or `Book <id>` when no listing references the picture.
    pub title: String,
    /// Download URL of the picture.
    pub image: String,
    /// Uploader.
    pub owner_id: String,
}

struct OwnerFolder {
    owner_id: String,
    items: Vec<String>,
    titles: HashMap<String, String>,
}

/// Enumerates book pictures across users.
pub struct CatalogReader {
    db: Database,
    storage: ObjectStorage,
    root: String,
    max_concurrency: usize,
}

impl CatalogReader {
    /// Create a reader over pictures stored below `root`.
    pub fn new(db: Database, storage: ObjectStorage, root: &str, max_concurrency: usize) -> Self {
        Self {
            db,
            storage,
            root: root.trim_matches('/').to_string(),
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Build the feed for `viewer_id`, leaving out the viewer's own books.
    ///
    /// Folders are listed and URLs resolved concurrently, at most
    /// `max_concurrency` lookups at a time. The feed keeps listing order.
    pub async fn feed(&self, viewer_id: &str) -> Result<Vec<FeedBook>> {
        let top = self.storage.list_all(&self.root).await?;

        let folders: Vec<(String, String)> = top
            .prefixes
            .into_iter()
            .filter_map(|prefix| {
                let owner = prefix.rsplit('/').next()?.to_string();
                (owner != viewer_id).then_some((owner, prefix))
            })
            .collect();

        let listed = run_bounded(folders, self.max_concurrency, |(owner_id, prefix)| {
            let storage = self.storage.clone();
            let db = self.db.clone();
            async move {
                let listing = storage.list_all(&prefix).await?;
                let titles = listing_titles(&db, &owner_id)?;
                Ok::<_, AppError>(OwnerFolder {
                    owner_id,
                    items: listing.items,
                    titles,
                })
            }
        })
        .await?;

        let items: Vec<(String, String, Option<String>)> = listed
            .into_iter()
            .flat_map(|folder| {
                let OwnerFolder {
                    owner_id,
                    items,
                    titles,
                } = folder;
                items.into_iter().map(move |path| {
                    let title = titles.get(&path).cloned();
                    (owner_id.clone(), path, title)
                })
            })
            .collect();

        let resolved = run_bounded(items, self.max_concurrency, |(owner_id, path, title)| {
            let storage = self.storage.clone();
            async move {
                let url = storage.download_url(&path).await?;
                Ok::<_, AppError>((owner_id, url, title))
            }
        })
        .await?;

        let feed: Vec<FeedBook> = resolved
            .into_iter()
            .zip(1u64..)
            .map(|((owner_id, image, title), id)| FeedBook {
                id,
                title: title.unwrap_or_else(|| format!("Book {}", id)),
                image,
                owner_id,
            })
            .collect();

        tracing::debug!(viewer = %viewer_id, books = feed.len(), "Built feed");
        Ok(feed)
    }
}

/// Map picture object path to listing title for one owner.
fn listing_titles(db: &Database, owner_id: &str) -> Result<HashMap<String, String>> {
    let Some(doc) = db.get_document(db::USER_BOOKS, owner_id)? else {
        return Ok(HashMap::new());
    };

    let books: Vec<UserBook> = doc
        .data
        .get("books")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .unwrap_or_default();

    Ok(books
        .into_iter()
        .filter_map(|b| storage::path_from_download_url(&b.picture).map(|p| (p, b.title)))
        .collect())
}

/// Run `task` over every input with at most `limit` running at once.
/// Results come back in input order; the first error aborts the rest.
async fn run_bounded<I, T, F, Fut>(inputs: Vec<I>, limit: usize, task: F) -> Result<Vec<T>>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut tasks = JoinSet::new();

    for (index, input) in inputs.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let fut = task(input);
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| AppError::Internal(format!("Limiter closed: {}", e)))?;
            fut.await.map(|value| (index, value))
        });
    }

    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        let (index, value) =
            joined.map_err(|e| AppError::Internal(format!("Catalog task failed: {}", e)))??;
        results.push((index, value));
    }

    results.sort_by_key(|(index, _)| *index);
    Ok(results.into_iter().map(|(_, value)| value).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn bounded_keeps_order_and_limit() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let out = run_bounded((0..20u64).collect(), 3, |n| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20 - n)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, AppError>(n * 2)
            }
        })
        .await
        .unwrap();

        assert_eq!(out, (0..20u64).map(|n| n * 2).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
