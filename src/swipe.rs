//! Per-session like/dislike state and the feed cursor.

use crate::catalog::FeedBook;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// A swipe verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwipeAction {
    /// Keep the book in the liked list.
    Like(FeedBook),
    /// Keep the book in the disliked list.
    Dislike(FeedBook),
}

/// Liked and disliked books, in swipe order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SwipeState {
    /// Liked books.
    pub liked: Vec<FeedBook>,
    /// Disliked books.
    pub disliked: Vec<FeedBook>,
}

impl SwipeState {
    /// Apply one action.
    pub fn reduce(&mut self, action: SwipeAction) {
        match action {
            SwipeAction::Like(book) => self.liked.push(book),
            SwipeAction::Dislike(book) => self.disliked.push(book),
        }
    }
}

/// Position in a fetched feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedCursor {
    /// The fetched feed.
    pub books: Vec<FeedBook>,
    /// Index of the book on screen.
    pub index: usize,
    /// Set once a swipe is attempted on the last book.
    pub no_more_books: bool,
}

impl FeedCursor {
    /// Start at the first book.
    pub fn new(books: Vec<FeedBook>) -> Self {
        Self {
            books,
            index: 0,
            no_more_books: false,
        }
    }

    /// Book currently on screen.
    pub fn current(&self) -> Option<&FeedBook> {
        if self.no_more_books {
            return None;
        }
        self.books.get(self.index)
    }

    /// Like the current book.
    pub fn like(&mut self, state: &mut SwipeState) {
        self.swipe(state, SwipeAction::Like);
    }

    /// Dislike the current book.
    pub fn dislike(&mut self, state: &mut SwipeState) {
        self.swipe(state, SwipeAction::Dislike);
    }

    // The last book can't be swiped; the attempt only ends the feed.
    fn swipe(&mut self, state: &mut SwipeState, verdict: fn(FeedBook) -> SwipeAction) {
        if self.index + 1 < self.books.len() {
            state.reduce(verdict(self.books[self.index].clone()));
            self.index += 1;
        } else {
            self.no_more_books = true;
        }
    }
}

/// Swipe state of one signed-in session.
#[derive(Debug, Clone, Default)]
pub struct SwipeSession {
    /// Liked/disliked history.
    pub state: SwipeState,
    /// Current feed, if one was fetched.
    pub cursor: Option<FeedCursor>,
}

/// Swipe sessions keyed by session token.
#[derive(Clone, Default)]
pub struct SwipeStore {
    sessions: Arc<RwLock<HashMap<String, SwipeSession>>>,
}

impl SwipeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the session's feed, keeping its history.
    pub fn load_feed(&self, token: &str, books: Vec<FeedBook>) -> FeedCursor {
        let mut sessions = self.sessions.write();
        let session = sessions.entry(token.to_string()).or_default();
        let cursor = FeedCursor::new(books);
        session.cursor = Some(cursor.clone());
        cursor
    }

    /// Current feed position, if a feed was loaded.
    pub fn cursor(&self, token: &str) -> Option<FeedCursor> {
        self.sessions.read().get(token)?.cursor.clone()
    }

    /// Apply `swipe` to the session's cursor and state.
    ///
    /// Returns `None` when no feed was loaded for the session.
    pub fn swipe(
        &self,
        token: &str,
        swipe: impl FnOnce(&mut FeedCursor, &mut SwipeState),
    ) -> Option<FeedCursor> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(token)?;
        let cursor = session.cursor.as_mut()?;
        swipe(cursor, &mut session.state);
        Some(cursor.clone())
    }

    /// Liked/disliked history of the session.
    pub fn history(&self, token: &str) -> SwipeState {
        self.sessions
            .read()
            .get(token)
            .map(|s| s.state.clone())
            .unwrap_or_default()
    }

    /// Drop everything held for a session.
    pub fn end_session(&self, token: &str) -> bool {
        self.sessions.write().remove(token).is_some()
    }

    /// Number of sessions holding state.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no session holds state.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
