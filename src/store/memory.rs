use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::{now_iso, ChatStore, CommittedTurn, StoreResult, TurnCommit};
use crate::reservation::ChatStatus;
use crate::types::{Chat, Customer, Role, StoredMessage};

#[derive(Default)]
struct Tables {
    chats: Vec<Chat>,
    messages: Vec<StoredMessage>,
    customers: Vec<Customer>,
    directions: Vec<String>,
}

/// Test double with the same observable behaviour as the Postgres store.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn with_directions(directions: &str) -> Self {
        let store = Self::default();
        store.tables.lock().unwrap().directions.push(directions.to_string());
        store
    }

    pub fn add_customer(&self, name: &str, email: &str, phone: &str) -> Customer {
        let customer = Customer {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            email: email.to_string(),
            phone: phone.to_string(),
        };
        self.tables.lock().unwrap().customers.push(customer.clone());
        customer
    }

    pub fn set_status(&self, number: &str, status: ChatStatus, pending_name: Option<&str>) {
        let mut tables = self.tables.lock().unwrap();
        let day = super::today();
        if !tables.chats.iter().any(|c| c.number == number && c.day == day) {
            tables.chats.push(new_chat(number, &day));
        }
        for chat in tables.chats.iter_mut().filter(|c| c.number == number && c.day == day) {
            chat.status = status;
            chat.pending_name = pending_name.map(str::to_string);
        }
    }

    pub fn chats(&self) -> Vec<Chat> {
        self.tables.lock().unwrap().chats.clone()
    }

    pub fn customers(&self) -> Vec<Customer> {
        self.tables.lock().unwrap().customers.clone()
    }

    pub fn all_messages(&self) -> Vec<StoredMessage> {
        self.tables.lock().unwrap().messages.clone()
    }
}

fn new_chat(number: &str, day: &str) -> Chat {
    Chat {
        id: Uuid::new_v4().to_string(),
        number: number.to_string(),
        day: day.to_string(),
        status: ChatStatus::Idle,
        pending_name: None,
        last_intent: None,
        created_at: now_iso(),
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn open_chat(&self, number: &str, day: &str) -> StoreResult<Chat> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(chat) = tables.chats.iter().find(|c| c.number == number && c.day == day) {
            return Ok(chat.clone());
        }
        let chat = new_chat(number, day);
        tables.chats.push(chat.clone());
        Ok(chat)
    }

    async fn find_chat(&self, number: &str, day: &str) -> StoreResult<Option<Chat>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .chats
            .iter()
            .find(|c| c.number == number && c.day == day)
            .cloned())
    }

    async fn append_message(
        &self,
        chat: &Chat,
        role: Role,
        content: &str,
    ) -> StoreResult<StoredMessage> {
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            chat_id: chat.id.clone(),
            number: chat.number.clone(),
            role,
            content: content.to_string(),
            created_at: now_iso(),
        };
        self.tables.lock().unwrap().messages.push(message.clone());
        Ok(message)
    }

    async fn recent_messages(&self, chat_id: &str, limit: i64) -> StoreResult<Vec<StoredMessage>> {
        let all = self.messages(chat_id).await?;
        let skip = all.len().saturating_sub(limit.max(0) as usize);
        Ok(all.into_iter().skip(skip).collect())
    }

    async fn messages(&self, chat_id: &str) -> StoreResult<Vec<StoredMessage>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect())
    }

    async fn directions(&self) -> StoreResult<Option<String>> {
        Ok(self.tables.lock().unwrap().directions.first().cloned())
    }

    async fn customer_by_phone(&self, phone: &str) -> StoreResult<Option<Customer>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.customers.iter().find(|c| c.phone == phone).cloned())
    }

    async fn customer_by_email(&self, email: &str) -> StoreResult<Option<Customer>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .customers
            .iter()
            .find(|c| c.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn commit_turn(&self, commit: TurnCommit) -> StoreResult<CommittedTurn> {
        let mut tables = self.tables.lock().unwrap();
        let index = tables
            .chats
            .iter()
            .position(|c| c.id == commit.chat_id)
            .ok_or(sqlx::Error::RowNotFound)?;
        let customer = commit.new_customer.as_ref().map(|reg| Customer {
            id: Uuid::new_v4().to_string(),
            name: reg.name.clone(),
            email: reg.email.clone(),
            phone: commit.number.clone(),
        });
        if let Some(customer) = &customer {
            tables.customers.push(customer.clone());
        }
        let chat = &mut tables.chats[index];
        chat.status = commit.status;
        chat.pending_name = commit.pending_name.clone();
        chat.last_intent = commit.last_intent;

        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            chat_id: commit.chat_id.clone(),
            number: commit.number.clone(),
            role: Role::Assistant,
            content: commit.reply.clone(),
            created_at: now_iso(),
        };
        tables.messages.push(message.clone());
        Ok(CommittedTurn { message, customer })
    }
}
