//! Application state shared across handlers.

use crate::auth::{AuthEvent, AuthService};
use crate::cache::LocalCache;
use crate::catalog::CatalogReader;
use crate::config::Config;
use crate::db::{Database, User};
use crate::listing::ListingService;
use crate::profile::ProfileService;
use crate::storage::ObjectStorage;
use crate::swipe::SwipeStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Database connection.
    pub db: Database,
    /// Authentication service.
    pub auth: Arc<AuthService>,
    /// Object storage.
    pub storage: ObjectStorage,
    /// Profile documents.
    pub profiles: Arc<ProfileService>,
    /// Book listings.
    pub listings: Arc<ListingService>,
    /// Swipe feed source.
    pub catalog: Arc<CatalogReader>,
    /// Per-session swipe state.
    pub swipes: SwipeStore,
}

impl AppState {
    /// Create application state with the profile cache file from config.
    pub fn new(config: Config, db: Database, auth: AuthService) -> Self {
        let cache = LocalCache::open(&config.profile.cache_path);
        Self::with_cache(config, db, auth, cache)
    }

    /// Create application state with an explicit profile cache.
    pub fn with_cache(config: Config, db: Database, auth: AuthService, cache: LocalCache) -> Self {
        let storage = ObjectStorage::new(&config.storage.root, &config.server.public_url);

        let profiles = ProfileService::new(
            db.clone(),
            storage.clone(),
            cache,
            Duration::from_secs(config.profile.updated_flag_seconds),
        );
        let listings = ListingService::new(db.clone(), storage.clone(), &config.catalog.root);
        let catalog = CatalogReader::new(
            db.clone(),
            storage.clone(),
            &config.catalog.root,
            config.catalog.max_concurrency,
        );

        Self {
            config: Arc::new(config),
            db,
            auth: Arc::new(auth),
            storage,
            profiles: Arc::new(profiles),
            listings: Arc::new(listings),
            catalog: Arc::new(catalog),
            swipes: SwipeStore::new(),
        }
    }

    /// User signed in with `token`, if any.
    pub fn current_user(&self, token: Option<&str>) -> Option<User> {
        self.auth.current_user(token?)
    }

    /// Follow auth-state changes and drop swipe state of closed sessions.
    ///
    /// The task ends when the auth service goes away.
    pub fn spawn_session_listener(&self) -> JoinHandle<()> {
        let mut events = self.auth.subscribe();
        let swipes = self.swipes.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(AuthEvent::SignedIn { user_id, .. }) => {
                        tracing::debug!(user_id = %user_id, "Signed in");
                    }
                    Ok(AuthEvent::SignedOut { user_id, token }) => {
                        let dropped = swipes.end_session(&token);
                        tracing::debug!(user_id = %user_id, dropped, "Signed out");
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Auth event listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
