//! Typed shapes of the records the bot reads and writes.
//!
//! Field names are the store's wire names; the same database is shared with
//! other council tooling, so they stay snake_case and optional where older
//! rows may lack them.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub matric_number: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default, rename = "joinedAt")]
    pub joined_at: String,
}

impl UserProfile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub message: String,
    /// Human date shown in listings (`YYYY-MM-DD`).
    #[serde(default)]
    pub date: String,
    /// Milliseconds since the epoch; the ordering field for paging.
    pub timestamp: i64,
    #[serde(default)]
    pub posted_by: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub date: String,
    #[serde(default)]
    pub created_at: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Faq {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub created_at: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LostItem {
    pub photo_file_id: String,
    pub description: String,
    pub reported_by: i64,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    pub file_id: String,
    pub kind: String,
    #[serde(default)]
    pub file_name: Option<String>,
    pub uploaded_by: i64,
    pub uploaded_at: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub message: String,
    pub chat_id: i64,
    pub timestamp: i64,
}

/// Entry of the council contacts directory (maintained outside the bot).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    #[serde(default)]
    pub office: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}
