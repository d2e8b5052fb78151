//! Reservation flow as an explicit finite-state machine.
//!
//! The chat's persisted [`ChatStatus`] selects which [`Step`] the next inbound
//! message feeds. The caller gathers an [`Observation`] for that step (model
//! verdicts, customer lookups) and [`transition`] decides the next status, the
//! reply and the side effect. No IO happens here.

use serde::{Serialize, Serializer};

use crate::extract::{name_from_reply, Registration};
use crate::types::Intent;

pub const ASK_TIME: &str = "Genial 😄 ¿Qué día y horario te quedarían cómodos para la consulta?";
pub const ASK_USER_DATA: &str =
    "Para poder avanzar necesito tus datos 📝. Por favor decime tu nombre y un correo electrónico.";
pub const DECLINED: &str =
    "Entiendo, no hay problema. Si querés reservar más adelante, estoy acá 😊";
pub const USER_DATA_MISSING: &str =
    "No pude identificar tus datos 😅. Por favor decime tu nombre y un correo electrónico válido.";
pub const USER_DATA_UNREADABLE: &str =
    "Hubo un problema interpretando tus datos 😕. Podés volver a decirme tu nombre y correo?";
pub const USER_DATA_SAVED: &str =
    "¡Gracias! ✅ Ahora sí, ¿qué día y horario te quedarían cómodos para la consulta?";
pub const EMAIL_TAKEN: &str =
    "Este correo ya está registrado. ¿Querés usar otro o continuar con el existente?";
pub const ASK_NAME: &str =
    "¡Perfecto! Antes de continuar necesito algunos datos para registrarte. ¿Cuál es tu nombre?";
pub const ASK_NAME_AGAIN: &str =
    "Me falta tu nombre para completar el registro. ¿Me lo decís de nuevo?";
pub const INVALID_EMAIL: &str =
    "Ese correo no parece válido 🤔. ¿Podés escribirlo de nuevo? (por ejemplo: nombre@correo.com)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChatStatus {
    #[default]
    Idle,
    AwaitingReservationConfirmation,
    AwaitingUserData,
    AwaitingTimeSelection,
    AwaitingName,
    AwaitingEmail,
    AwaitingTurnoConfirmation,
}

impl ChatStatus {
    /// Column value; idle is stored as NULL.
    pub fn as_db(self) -> Option<&'static str> {
        match self {
            ChatStatus::Idle => None,
            ChatStatus::AwaitingReservationConfirmation => Some("awaiting_reservation_confirmation"),
            ChatStatus::AwaitingUserData => Some("awaiting_user_data"),
            ChatStatus::AwaitingTimeSelection => Some("awaiting_time_selection"),
            ChatStatus::AwaitingName => Some("awaiting_name"),
            ChatStatus::AwaitingEmail => Some("awaiting_email"),
            ChatStatus::AwaitingTurnoConfirmation => Some("awaiting_turno_confirmation"),
        }
    }

    /// `None` for a value that is not a known flow state.
    pub fn from_db(value: Option<&str>) -> Option<ChatStatus> {
        let Some(raw) = value else {
            return Some(ChatStatus::Idle);
        };
        match raw.trim() {
            "" => Some(ChatStatus::Idle),
            "awaiting_reservation_confirmation" => Some(ChatStatus::AwaitingReservationConfirmation),
            "awaiting_user_data" => Some(ChatStatus::AwaitingUserData),
            "awaiting_time_selection" => Some(ChatStatus::AwaitingTimeSelection),
            "awaiting_name" => Some(ChatStatus::AwaitingName),
            "awaiting_email" => Some(ChatStatus::AwaitingEmail),
            "awaiting_turno_confirmation" => Some(ChatStatus::AwaitingTurnoConfirmation),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        self.as_db().unwrap_or("idle")
    }

    pub fn step(self) -> Step {
        match self {
            ChatStatus::AwaitingReservationConfirmation | ChatStatus::AwaitingTurnoConfirmation => {
                Step::Confirmation
            }
            ChatStatus::AwaitingUserData => Step::UserData,
            ChatStatus::AwaitingName => Step::Name,
            ChatStatus::AwaitingEmail => Step::Email,
            ChatStatus::Idle | ChatStatus::AwaitingTimeSelection => Step::Conversation,
        }
    }
}

impl Serialize for ChatStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_db().serialize(serializer)
    }
}

/// What the flow needs to know about the inbound message in a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Yes/no answer to a proposal the assistant made.
    Confirmation,
    /// Name and email in a single message.
    UserData,
    Name,
    Email,
    /// No deterministic handling: the assistant answers freely.
    Conversation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Found(Registration),
    Missing,
    /// The extractor answered with something that is neither data nor a refusal.
    Unreadable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Observation<'a> {
    /// The assistant already answered this turn.
    Reply {
        intent: Intent,
        offers_booking: bool,
        customer_exists: bool,
        inline: Option<Registration>,
        email_taken: bool,
    },
    Confirmation {
        answer: Option<bool>,
        customer_exists: bool,
    },
    UserData {
        extraction: Extraction,
        email_taken: bool,
    },
    Name(&'a str),
    Email {
        email: Option<String>,
        pending_name: Option<&'a str>,
        email_taken: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    None,
    RememberName(String),
    /// Create the customer and forget any pending name.
    Register(Registration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: ChatStatus,
    /// `None` keeps the assistant's own reply.
    pub reply: Option<String>,
    pub effect: Effect,
}

impl Transition {
    fn to(next: ChatStatus, reply: &str) -> Self {
        Self {
            next,
            reply: Some(reply.to_string()),
            effect: Effect::None,
        }
    }

    fn keep_reply(next: ChatStatus) -> Self {
        Self {
            next,
            reply: None,
            effect: Effect::None,
        }
    }
}

pub fn registered_reply(reg: &Registration) -> String {
    format!(
        "¡Gracias {}! Te registré con el correo {}. ¿Querés que avancemos con la reserva del turno?",
        reg.name, reg.email
    )
}

pub fn ask_email_reply(name: &str) -> String {
    format!("¡Gracias, {name}! Ahora decime tu correo electrónico 📧.")
}

/// `None` means the message is not handled by the flow and the status stays.
pub fn transition(status: ChatStatus, observation: Observation<'_>) -> Option<Transition> {
    use ChatStatus::*;

    match (status, observation) {
        (
            Idle,
            Observation::Reply {
                intent: Intent::ReservarTurno,
                customer_exists,
                inline,
                email_taken,
                ..
            },
        ) => Some(if customer_exists {
            Transition::keep_reply(AwaitingTimeSelection)
        } else {
            match inline {
                Some(_) if email_taken => Transition::to(Idle, EMAIL_TAKEN),
                Some(reg) => Transition {
                    next: AwaitingTurnoConfirmation,
                    reply: Some(registered_reply(&reg)),
                    effect: Effect::Register(reg),
                },
                None => Transition::to(AwaitingName, ASK_NAME),
            }
        }),
        (Idle, Observation::Reply { offers_booking, .. }) => {
            offers_booking.then(|| Transition::keep_reply(AwaitingReservationConfirmation))
        }
        (
            _,
            Observation::Reply {
                intent: Intent::CancelarTurno,
                ..
            },
        ) => Some(Transition::keep_reply(Idle)),
        (_, Observation::Reply { .. }) => None,

        (
            AwaitingReservationConfirmation,
            Observation::Confirmation {
                answer: Some(true),
                customer_exists,
            },
        ) => Some(if customer_exists {
            Transition::to(AwaitingTimeSelection, ASK_TIME)
        } else {
            Transition::to(AwaitingUserData, ASK_USER_DATA)
        }),
        (
            AwaitingTurnoConfirmation,
            Observation::Confirmation {
                answer: Some(true), ..
            },
        ) => Some(Transition::to(AwaitingTimeSelection, ASK_TIME)),
        (
            AwaitingReservationConfirmation | AwaitingTurnoConfirmation,
            Observation::Confirmation {
                answer: Some(false),
                ..
            },
        ) => Some(Transition::to(Idle, DECLINED)),

        (
            AwaitingUserData,
            Observation::UserData {
                extraction,
                email_taken,
            },
        ) => Some(match extraction {
            Extraction::Found(_) if email_taken => Transition::to(AwaitingUserData, EMAIL_TAKEN),
            Extraction::Found(reg) => Transition {
                next: AwaitingTimeSelection,
                reply: Some(USER_DATA_SAVED.to_string()),
                effect: Effect::Register(reg),
            },
            Extraction::Missing => Transition::to(AwaitingUserData, USER_DATA_MISSING),
            Extraction::Unreadable => Transition::to(AwaitingUserData, USER_DATA_UNREADABLE),
        }),

        (AwaitingName, Observation::Name(text)) => Some(match name_from_reply(text) {
            Some(name) => Transition {
                next: AwaitingEmail,
                reply: Some(ask_email_reply(&name)),
                effect: Effect::RememberName(name),
            },
            None => Transition::to(AwaitingName, ASK_NAME),
        }),

        (
            AwaitingEmail,
            Observation::Email {
                email,
                pending_name,
                email_taken,
            },
        ) => Some(match (email, pending_name) {
            (None, _) => Transition::to(AwaitingEmail, INVALID_EMAIL),
            (Some(_), None) => Transition::to(AwaitingName, ASK_NAME_AGAIN),
            (Some(_), Some(_)) if email_taken => Transition::to(AwaitingEmail, EMAIL_TAKEN),
            (Some(email), Some(name)) => {
                let reg = Registration {
                    name: name.to_string(),
                    email,
                };
                Transition {
                    next: AwaitingTurnoConfirmation,
                    reply: Some(registered_reply(&reg)),
                    effect: Effect::Register(reg),
                }
            }
        }),

        _ => None,
    }
}
