//! Members and books.
//!
//! Both are owned by the entity store and only referenced by reservations.
//! Neither changes after it is registered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{BookId, MemberId};

/// A library member who can place reservations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    /// Unique across members.
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub created_at: DateTime<Utc>,
}

impl Member {
    pub fn new(
        id: MemberId,
        name: impl Into<String>,
        email: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            email: email.into(),
            phone: String::new(),
            created_at,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = phone.into();
        self
    }
}

/// A reservable title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: String,
    /// Unique across books.
    pub isbn: String,
    /// Advisory shelf flag. Whether the book is actually held for someone is
    /// derived from its reservations, not from this field.
    pub available: bool,
    pub created_at: DateTime<Utc>,
}

impl Book {
    pub fn new(
        id: BookId,
        title: impl Into<String>,
        author: impl Into<String>,
        isbn: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            author: author.into(),
            isbn: isbn.into(),
            available: true,
            created_at,
        }
    }
}
