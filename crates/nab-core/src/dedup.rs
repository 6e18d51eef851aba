//! Cursor-based deduplication of fetched batches.
//!
//! A source's cursor is the highest post id seen so far. Given the cursor and a
//! fresh batch, [`select_new`] returns the posts to announce (oldest first) and
//! the cursor to store afterwards.
//!
//! - A source without a cursor only gets a baseline: nothing is announced.
//! - The cursor never moves backwards.
//! - Posts that fall out of the fetch window before a cycle sees them are lost;
//!   the window size (`FETCH_LIMIT`) bounds the backlog a cycle can recover.

use crate::domain::{Post, PostId};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Selection {
    /// Posts newer than the previous cursor, ascending by id.
    pub new_posts: Vec<Post>,
    /// Cursor to persist once the batch has been handled.
    pub cursor: Option<PostId>,
}

impl Selection {
    pub fn cursor_changed(&self, previous: Option<PostId>) -> bool {
        self.cursor != previous
    }
}

pub fn select_new(cursor: Option<PostId>, batch: Vec<Post>) -> Selection {
    let batch_max = batch.iter().map(|p| p.id).max();

    let Some(previous) = cursor else {
        return Selection {
            new_posts: Vec::new(),
            cursor: batch_max,
        };
    };

    let mut new_posts: Vec<Post> = batch.into_iter().filter(|p| p.id > previous).collect();
    new_posts.sort_by_key(|p| p.id);
    new_posts.dedup_by_key(|p| p.id);

    Selection {
        new_posts,
        cursor: Some(batch_max.map_or(previous, |max| max.max(previous))),
    }
}
