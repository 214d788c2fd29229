use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Book swapping server.
#[derive(Parser, Debug, Clone)]
#[command(name = "bookswap")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "BOOKSWAP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// User management commands.
    User {
        /// User subcommand action.
        #[command(subcommand)]
        action: UserCommand,
    },

    /// Genre vocabulary commands.
    Genre {
        /// Genre subcommand action.
        #[command(subcommand)]
        action: GenreCommand,
    },

    /// Delete book pictures that no listing references.
    Reconcile {
        /// Only reconcile this user (by email).
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// User management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum UserCommand {
    /// Add a new user.
    Add {
        /// Email address.
        email: String,
        /// Password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
        /// Profile name.
        #[arg(short, long, default_value = "")]
        name: String,
    },

    /// Delete a user.
    Del {
        /// Email of the user to delete.
        email: String,
    },

    /// List all users.
    List,

    /// Change user password.
    Passwd {
        /// Email address.
        email: String,
        /// New password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
    },
}

/// Genre management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum GenreCommand {
    /// Add a genre.
    Add {
        /// Genre name.
        name: String,
    },

    /// Remove a genre.
    Del {
        /// Genre name.
        name: String,
    },

    /// List all genres.
    List,
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Object storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Profile configuration.
    #[serde(default)]
    pub profile: ProfileConfig,

    /// Catalog configuration.
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Site title.
    #[serde(default = "default_title")]
    pub title: String,

    /// Public base URL used when building download URLs (empty for relative URLs).
    #[serde(default)]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            title: default_title(),
            public_url: String::new(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        8080,
    )
}

fn default_title() -> String {
    "BookSwap".to_string()
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/bookswap.db")
}

/// Object storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for stored objects.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/objects")
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Registration mode: "open", "disabled".
    #[serde(default = "default_registration")]
    pub registration: String,

    /// Session token duration in days.
    #[serde(default = "default_session_days")]
    pub session_days: u32,

    /// Password reset token lifetime in minutes.
    #[serde(default = "default_reset_minutes")]
    pub reset_token_minutes: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            registration: default_registration(),
            session_days: default_session_days(),
            reset_token_minutes: default_reset_minutes(),
        }
    }
}

fn default_registration() -> String {
    "open".to_string()
}

fn default_session_days() -> u32 {
    30
}

fn default_reset_minutes() -> u32 {
    60
}

impl AuthConfig {
    /// Check if registration is enabled.
    pub fn registration_enabled(&self) -> bool {
        self.registration == "open"
    }
}

/// Profile configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// How long the "Profile updated!" flag stays set after a save.
    #[serde(default = "default_updated_flag_seconds")]
    pub updated_flag_seconds: u64,

    /// File holding the local profile cache.
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            updated_flag_seconds: default_updated_flag_seconds(),
            cache_path: default_cache_path(),
        }
    }
}

fn default_updated_flag_seconds() -> u64 {
    3
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("data/profile-cache.json")
}

/// Catalog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Storage folder holding per-user book pictures.
    #[serde(default = "default_catalog_root")]
    pub root: String,

    /// Maximum number of concurrent storage lookups while building the feed.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            root: default_catalog_root(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_catalog_root() -> String {
    "bookPictures".to_string()
}

fn default_max_concurrency() -> usize {
    8
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("bookswap.toml"),
            dirs::config_dir()
                .map(|p| p.join("bookswap").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/bookswap/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# bookswap configuration

[server]
bind = "0.0.0.0:8080"
title = "BookSwap"
# Prefix for download URLs, e.g. "https://books.example.org"
public_url = ""

[database]
# path = "/var/lib/bookswap/bookswap.db"

[storage]
# root = "/var/lib/bookswap/objects"

[auth]
# Registration mode: "open" or "disabled"
registration = "open"
# Session duration in days
session_days = 30
# Password reset token lifetime in minutes
reset_token_minutes = 60

[profile]
# Seconds the "Profile updated!" notice stays visible
updated_flag_seconds = 3
# cache_path = "/var/lib/bookswap/profile-cache.json"

[catalog]
root = "bookPictures"
# Concurrent storage lookups while building the swipe feed
max_concurrency = 8
"#
        .to_string()
    }
}

/// Genres seeded by `bookswap init`.
pub const DEFAULT_GENRES: &[&str] = &[
    "Biography",
    "Classics",
    "Comics",
    "Fantasy",
    "History",
    "Horror",
    "Mystery",
    "Philosophy",
    "Poetry",
    "Romance",
    "Science",
    "Science Fiction",
    "Self-help",
    "Thriller",
];
