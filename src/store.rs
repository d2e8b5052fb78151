//! Persistence seam for chats, messages, customers and directions.
//!
//! [`ChatStore`] is implemented by [`postgres::PgStore`] in production and by
//! an in-memory store in tests, so the conversation logic never touches SQL.

pub mod postgres;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{Local, SecondsFormat, Utc};

use crate::extract::Registration;
use crate::reservation::ChatStatus;
use crate::types::{Chat, Customer, Intent, Role, StoredMessage};

pub type StoreResult<T> = Result<T, sqlx::Error>;

/// Everything a turn writes after the inbound message, applied atomically.
#[derive(Debug, Clone)]
pub struct TurnCommit {
    pub chat_id: String,
    pub number: String,
    pub status: ChatStatus,
    pub pending_name: Option<String>,
    pub last_intent: Option<Intent>,
    pub new_customer: Option<Registration>,
    pub reply: String,
}

#[derive(Debug, Clone)]
pub struct CommittedTurn {
    pub message: StoredMessage,
    pub customer: Option<Customer>,
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Returns the chat for `(number, day)`, creating it on first use.
    async fn open_chat(&self, number: &str, day: &str) -> StoreResult<Chat>;

    async fn find_chat(&self, number: &str, day: &str) -> StoreResult<Option<Chat>>;

    async fn append_message(&self, chat: &Chat, role: Role, content: &str)
        -> StoreResult<StoredMessage>;

    /// The newest `limit` messages, oldest first.
    async fn recent_messages(&self, chat_id: &str, limit: i64) -> StoreResult<Vec<StoredMessage>>;

    async fn messages(&self, chat_id: &str) -> StoreResult<Vec<StoredMessage>>;

    async fn directions(&self) -> StoreResult<Option<String>>;

    async fn customer_by_phone(&self, phone: &str) -> StoreResult<Option<Customer>>;

    async fn customer_by_email(&self, email: &str) -> StoreResult<Option<Customer>>;

    async fn commit_turn(&self, commit: TurnCommit) -> StoreResult<CommittedTurn>;
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Calendar day in server local time; chats roll over at local midnight.
pub fn today() -> String {
    Local::now().date_naive().format("%Y-%m-%d").to_string()
}
