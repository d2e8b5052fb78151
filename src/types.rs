use serde::{Deserialize, Serialize};

use crate::reservation::ChatStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(value: &str) -> Role {
        match value.trim().to_ascii_lowercase().as_str() {
            "assistant" => Role::Assistant,
            "system" => Role::System,
            _ => Role::User,
        }
    }
}

/// Closed set of labels the assistant classifies every free-form turn into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ReservarTurno,
    ConsultarHorario,
    CancelarTurno,
    Saludo,
    Ayuda,
    Otra,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::ReservarTurno => "reservar_turno",
            Intent::ConsultarHorario => "consultar_horario",
            Intent::CancelarTurno => "cancelar_turno",
            Intent::Saludo => "saludo",
            Intent::Ayuda => "ayuda",
            Intent::Otra => "otra",
        }
    }

    /// Unknown labels collapse into `Otra`.
    pub fn parse(value: &str) -> Intent {
        match value.trim().to_ascii_lowercase().as_str() {
            "reservar_turno" => Intent::ReservarTurno,
            "consultar_horario" => Intent::ConsultarHorario,
            "cancelar_turno" => Intent::CancelarTurno,
            "saludo" => Intent::Saludo,
            "ayuda" => Intent::Ayuda,
            _ => Intent::Otra,
        }
    }
}

/// One turn as sent by the messaging gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequestBody {
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<ChatTurn>>,
}

/// Per-phone, per-day conversation record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub number: String,
    pub day: String,
    pub status: ChatStatus,
    pub pending_name: Option<String>,
    pub last_intent: Option<Intent>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub chat_id: String,
    pub number: String,
    pub role: Role,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    pub message: String,
    pub response: String,
    pub status: ChatStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_exists: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<Customer>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistory {
    pub chat: Chat,
    pub messages: Vec<StoredMessage>,
}
