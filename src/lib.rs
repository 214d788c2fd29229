//! bookswap: a small social server for swapping physical books.
//!
//! Users sign up with a profile, list the books they want to give away
//! (a picture plus title, author and genres) and swipe through everyone
//! else's books, liking or disliking one at a time.
//!
//! # Features
//!
//! - Email/password accounts with session tokens and password reset
//! - Profiles with interests and a profile picture
//! - Book listings backed by a document store and object storage
//! - A swipe feed built from every other user's book pictures
//! - Per-session like/dislike history
//! - Server-rendered pages plus a JSON API

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Authentication and user management.
pub mod auth;
/// Local key/value cache file.
pub mod cache;
/// Swipe feed built from stored book pictures.
pub mod catalog;
/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Genre vocabulary.
pub mod genre;
/// Book listings.
pub mod listing;
/// User profiles.
pub mod profile;
/// HTTP server.
pub mod server;
/// Filesystem object storage.
pub mod storage;
/// Like/dislike state.
pub mod swipe;

#[cfg(test)]
mod tests;

pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::AppState;
