use async_trait::async_trait;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    PgPool, Row,
};
use tracing::warn;
use uuid::Uuid;

use super::{now_iso, ChatStore, CommittedTurn, StoreResult, TurnCommit};
use crate::reservation::ChatStatus;
use crate::types::{Chat, Customer, Intent, Role, StoredMessage};

const CHAT_COLUMNS: &str =
    "id, number, day, status, pending_name, last_intent, created_at";
const MESSAGE_COLUMNS: &str = "id, chat_id, number, role, content, created_at";
const CUSTOMER_COLUMNS: &str = "id, name, email, phone";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects and applies the embedded migrations.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

fn parse_chat_row(row: PgRow) -> Chat {
    let id: String = row.get("id");
    let raw_status: Option<String> = row.get("status");
    let status = ChatStatus::from_db(raw_status.as_deref()).unwrap_or_else(|| {
        warn!(chat_id = %id, status = ?raw_status, "unknown chat status, treating as idle");
        ChatStatus::Idle
    });
    Chat {
        id,
        number: row.get("number"),
        day: row.get("day"),
        status,
        pending_name: row.get("pending_name"),
        last_intent: row
            .get::<Option<String>, _>("last_intent")
            .map(|v| Intent::parse(&v)),
        created_at: row.get("created_at"),
    }
}

fn parse_message_row(row: PgRow) -> StoredMessage {
    StoredMessage {
        id: row.get("id"),
        chat_id: row.get("chat_id"),
        number: row.get("number"),
        role: Role::parse(&row.get::<String, _>("role")),
        content: row.get("content"),
        created_at: row.get("created_at"),
    }
}

fn parse_customer_row(row: PgRow) -> Customer {
    Customer {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        phone: row.get("phone"),
    }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn open_chat(&self, number: &str, day: &str) -> StoreResult<Chat> {
        let now = now_iso();
        sqlx::query(
            "INSERT INTO chats (id, number, day, status, pending_name, last_intent, created_at, updated_at) \
             VALUES ($1, $2, $3, NULL, NULL, NULL, $4, $4) \
             ON CONFLICT (number, day) DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(number)
        .bind(day)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.find_chat(number, day)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    async fn find_chat(&self, number: &str, day: &str) -> StoreResult<Option<Chat>> {
        let row = sqlx::query(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats WHERE number = $1 AND day = $2"
        ))
        .bind(number)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(parse_chat_row))
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
        sqlx::query(
            "INSERT INTO messages (id, chat_id, number, role, content, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&message.id)
        .bind(&message.chat_id)
        .bind(&message.number)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(message)
    }

    async fn recent_messages(&self, chat_id: &str, limit: i64) -> StoreResult<Vec<StoredMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM ( \
                 SELECT {MESSAGE_COLUMNS}, seq FROM messages \
                 WHERE chat_id = $1 ORDER BY seq DESC LIMIT $2 \
             ) recent ORDER BY seq ASC"
        ))
        .bind(chat_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(parse_message_row).collect())
    }

    async fn messages(&self, chat_id: &str) -> StoreResult<Vec<StoredMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = $1 ORDER BY seq ASC"
        ))
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(parse_message_row).collect())
    }

    async fn directions(&self) -> StoreResult<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT content FROM directions ORDER BY id ASC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
    }

    async fn customer_by_phone(&self, phone: &str) -> StoreResult<Option<Customer>> {
        let row = sqlx::query(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE phone = $1"
        ))
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(parse_customer_row))
    }

    async fn customer_by_email(&self, email: &str) -> StoreResult<Option<Customer>> {
        let row = sqlx::query(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE lower(email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(parse_customer_row))
    }

    async fn commit_turn(&self, commit: TurnCommit) -> StoreResult<CommittedTurn> {
        let now = now_iso();
        let mut tx = self.pool.begin().await?;

        let customer = match &commit.new_customer {
            Some(reg) => {
                let customer = Customer {
                    id: Uuid::new_v4().to_string(),
                    name: reg.name.clone(),
                    email: reg.email.clone(),
                    phone: commit.number.clone(),
                };
                sqlx::query(
                    "INSERT INTO customers (id, name, email, phone, created_at) \
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(&customer.id)
                .bind(&customer.name)
                .bind(&customer.email)
                .bind(&customer.phone)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                Some(customer)
            }
            None => None,
        };

        sqlx::query(
            "UPDATE chats SET status = $1, pending_name = $2, last_intent = $3, updated_at = $4 \
             WHERE id = $5",
        )
        .bind(commit.status.as_db())
        .bind(&commit.pending_name)
        .bind(commit.last_intent.map(Intent::as_str))
        .bind(&now)
        .bind(&commit.chat_id)
        .execute(&mut *tx)
        .await?;

        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            chat_id: commit.chat_id.clone(),
            number: commit.number.clone(),
            role: Role::Assistant,
            content: commit.reply.clone(),
            created_at: now,
        };
        sqlx::query(
            "INSERT INTO messages (id, chat_id, number, role, content, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&message.id)
        .bind(&message.chat_id)
        .bind(&message.number)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&message.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CommittedTurn { message, customer })
    }
}
