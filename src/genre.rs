//! Genre vocabulary stored in the `bookGenres` collection.

use crate::db::{self, Database};
use crate::error::{AppError, Result};
use serde_json::json;

fn genre_id(name: &str) -> String {
    name.trim().to_lowercase().replace(char::is_whitespace, "-")
}

/// All genre names, sorted.
pub fn list_genres(db: &Database) -> Result<Vec<String>> {
    let mut genres: Vec<String> = db
        .list_documents(db::GENRES)?
        .into_iter()
        .filter_map(|doc| doc.data.get("book")?.as_str().map(str::to_string))
        .collect();
    genres.sort();
    Ok(genres)
}

/// Add a genre. Adding an existing genre is a no-op.
pub fn add_genre(db: &Database, name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::InvalidInput("Genre name is empty".to_string()));
    }
    db.set_document(db::GENRES, &genre_id(name), json!({ "book": name }), false)
}

/// Remove a genre.
pub fn remove_genre(db: &Database, name: &str) -> Result<bool> {
    db.delete_document(db::GENRES, &genre_id(name))
}
