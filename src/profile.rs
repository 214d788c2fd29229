//! Profile documents, their local cache and the "updated" notice.

use crate::cache::LocalCache;
use crate::db::{self, Database};
use crate::error::Result;
use crate::listing::normalize_tags;
use crate::storage::{ObjectStorage, sanitize_segment};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Storage folder holding profile pictures, one sub-folder per user.
pub const PICTURE_ROOT: &str = "profilePictures";

/// A user's public profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Free-form "about me" text.
    #[serde(default)]
    pub description: String,
    /// Interest tags (genres).
    #[serde(default)]
    pub interests: Vec<String>,
    /// Download URL of the profile picture.
    #[serde(
        rename = "pictureURL",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub picture_url: Option<String>,
}

/// Cache key for a user's profile.
pub fn cache_key(user_id: &str) -> String {
    format!("userProfile:{}", user_id)
}

/// Reads and writes profile documents.
pub struct ProfileService {
    db: Database,
    storage: ObjectStorage,
    cache: LocalCache,
    updated_flag: Duration,
    updated: Mutex<HashMap<String, Instant>>,
}

impl ProfileService {
    /// Create a profile service.
    pub fn new(
        db: Database,
        storage: ObjectStorage,
        cache: LocalCache,
        updated_flag: Duration,
    ) -> Self {
        Self {
            db,
            storage,
            cache,
            updated_flag,
            updated: Mutex::new(HashMap::new()),
        }
    }

    /// Load a profile, falling back to the cached copy when the store fails.
    ///
    /// A user without a profile document gets an empty profile.
    pub async fn load(&self, user_id: &str) -> Profile {
        match self.fetch(user_id).await {
            Ok(profile) => {
                match serde_json::to_string(&profile) {
                    Ok(text) => {
                        if let Err(e) = self.cache.set(&cache_key(user_id), text) {
                            tracing::warn!(user_id = %user_id, error = %e, "Failed to cache profile");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to serialize profile"),
                }
                profile
            }
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Error fetching user profile");
                self.cached(user_id).unwrap_or_default()
            }
        }
    }

    async fn fetch(&self, user_id: &str) -> Result<Profile> {
        let mut profile = match self.db.get_document(db::PROFILES, user_id)? {
            Some(doc) => serde_json::from_value(doc.data)?,
            None => Profile::default(),
        };

        let pictures = self
            .storage
            .list_all(&format!("{}/{}", PICTURE_ROOT, user_id))
            .await?;
        if let Some(first) = pictures.items.first() {
            profile.picture_url = Some(self.storage.download_url(first).await?);
        }

        Ok(profile)
    }

    /// Last profile cached for this user.
    pub fn cached(&self, user_id: &str) -> Option<Profile> {
        self.cache
            .get(&cache_key(user_id))
            .and_then(|text| serde_json::from_str(&text).ok())
    }

    /// Write the initial profile document of a new account.
    pub fn create(&self, user_id: &str, profile: &Profile) -> Result<()> {
        self.write(user_id, profile)
    }

    /// Overwrite the profile document and raise the "updated" flag.
    pub fn save(&self, user_id: &str, profile: &Profile) -> Result<()> {
        self.write(user_id, profile)?;
        self.updated
            .lock()
            .insert(user_id.to_string(), Instant::now());
        tracing::info!(user_id = %user_id, "Profile updated");
        Ok(())
    }

    fn write(&self, user_id: &str, profile: &Profile) -> Result<()> {
        let profile = Profile {
            name: profile.name.trim().to_string(),
            description: profile.description.clone(),
            interests: normalize_tags(&profile.interests),
            // Derived from storage on load, never stored.
            picture_url: None,
        };

        // Full overwrite, no merge.
        self.db
            .set_document(db::PROFILES, user_id, serde_json::to_value(&profile)?, false)?;
        self.cache
            .set(&cache_key(user_id), serde_json::to_string(&profile)?)?;
        Ok(())
    }

    /// Whether a save happened within the notice window. Expired flags clear.
    pub fn is_recently_updated(&self, user_id: &str) -> bool {
        let mut updated = self.updated.lock();
        match updated.get(user_id) {
            Some(at) if at.elapsed() < self.updated_flag => true,
            Some(_) => {
                updated.remove(user_id);
                false
            }
            None => false,
        }
    }

    /// Drop the cached copy and notice of a deleted user.
    pub fn forget(&self, user_id: &str) -> Result<()> {
        self.updated.lock().remove(user_id);
        self.cache.remove(&cache_key(user_id))
    }

    /// Store a profile picture, returning its object path.
    pub async fn upload_picture(&self, user_id: &str, file_name: &str, data: &[u8]) -> Result<String> {
        let mut name = sanitize_segment(file_name);
        if name.is_empty() {
            name = "avatar".to_string();
        }

        let path = format!("{}/{}/{}", PICTURE_ROOT, user_id, name);
        self.storage.upload(&path, data).await?;
        Ok(path)
    }
}
