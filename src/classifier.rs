//! Model-backed judgements: the classified assistant reply, the two yes/no
//! classifiers and the registration extractor. Parsing is tolerant; anything
//! unreadable degrades to a safe default instead of an error.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::ai::{CompletionRequest, LanguageModel, PromptMessage};
use crate::error::UpstreamError;
use crate::extract::{clean_name, valid_email, Registration};
use crate::prompting::{
    booking_offer_prompt, confirmation_prompt, registration_prompt,
    render_assistant_system_prompt, render_assistant_user_prompt, AssistantSystemContext,
    AssistantUserContext,
};
use crate::reservation::Extraction;
use crate::types::{Intent, StoredMessage};

pub const FALLBACK_MESSAGE: &str = "No entendí lo que querés decir.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantReply {
    pub intent: Intent,
    pub message: String,
}

impl AssistantReply {
    fn fallback() -> Self {
        Self {
            intent: Intent::Otra,
            message: FALLBACK_MESSAGE.to_string(),
        }
    }
}

pub struct AssistantTurn<'a> {
    pub directions: &'a str,
    pub customer_name: Option<&'a str>,
    pub history: &'a [StoredMessage],
    pub context: &'a str,
    pub query: &'a str,
}

pub struct Classifier {
    llm: Arc<dyn LanguageModel>,
    chat_model: String,
    classifier_model: String,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LanguageModel>, chat_model: String, classifier_model: String) -> Self {
        Self {
            llm,
            chat_model,
            classifier_model,
        }
    }

    /// Generates the user-facing answer and labels the user's intent in one call.
    pub async fn respond(&self, turn: AssistantTurn<'_>) -> Result<AssistantReply, UpstreamError> {
        let mut messages = Vec::with_capacity(turn.history.len() + 2);
        messages.push(PromptMessage::system(render_assistant_system_prompt(
            &AssistantSystemContext {
                directions: turn.directions,
                customer_name: turn.customer_name,
            },
        )));
        messages.extend(turn.history.iter().map(|m| PromptMessage {
            role: m.role,
            content: m.content.clone(),
        }));
        messages.push(PromptMessage::user(render_assistant_user_prompt(
            &AssistantUserContext {
                context: turn.context,
                query: turn.query,
            },
        )));

        let raw = self
            .llm
            .complete(CompletionRequest {
                model: self.chat_model.clone(),
                messages,
                temperature: 0.0,
                json_object: true,
            })
            .await?;
        let reply = parse_assistant_reply(&raw);
        debug!(intent = reply.intent.as_str(), "assistant replied");
        Ok(reply)
    }

    /// Whether the assistant's reply explicitly offers to book an appointment.
    /// An indeterminate verdict counts as no.
    pub async fn offers_booking(&self, reply: &str) -> Result<bool, UpstreamError> {
        let verdict = self.yes_no(booking_offer_prompt(), reply).await?;
        Ok(verdict == Some(true))
    }

    /// `None` when the model's answer is neither "true" nor "false".
    pub async fn confirms_booking(&self, message: &str) -> Result<Option<bool>, UpstreamError> {
        self.yes_no(confirmation_prompt(), message).await
    }

    pub async fn extract_registration(&self, message: &str) -> Result<Extraction, UpstreamError> {
        let raw = self
            .llm
            .complete(CompletionRequest {
                model: self.classifier_model.clone(),
                messages: vec![
                    PromptMessage::system(registration_prompt()),
                    PromptMessage::user(message),
                ],
                temperature: 0.0,
                json_object: false,
            })
            .await?;
        let extraction = parse_registration(&raw);
        if extraction == Extraction::Unreadable {
            warn!(raw = %raw, "registration extractor answered with unreadable output");
        }
        Ok(extraction)
    }

    async fn yes_no(&self, system: &str, text: &str) -> Result<Option<bool>, UpstreamError> {
        let raw = self
            .llm
            .complete(CompletionRequest {
                model: self.classifier_model.clone(),
                messages: vec![PromptMessage::system(system), PromptMessage::user(text)],
                temperature: 0.0,
                json_object: false,
            })
            .await?;
        Ok(parse_verdict(&raw))
    }
}

pub fn parse_verdict(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Candidate JSON payloads: the raw text, the text without a code fence, and
/// the outermost `{...}` span.
fn json_candidates(raw: &str) -> Vec<&str> {
    let trimmed = raw.trim();
    let mut candidates = vec![trimmed];

    if trimmed.starts_with("```") {
        let stripped = trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
        if !stripped.is_empty() {
            candidates.push(stripped);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            candidates.push(&trimmed[start..=end]);
        }
    }
    candidates
}

pub fn parse_assistant_reply(raw: &str) -> AssistantReply {
    if raw.trim().is_empty() {
        return AssistantReply::fallback();
    }
    for candidate in json_candidates(raw) {
        let Ok(parsed) = serde_json::from_str::<Value>(candidate) else {
            continue;
        };
        let message = parsed
            .get("message")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if message.is_empty() {
            continue;
        }
        let intent = parsed
            .get("intent")
            .and_then(Value::as_str)
            .map(Intent::parse)
            .unwrap_or(Intent::Otra);
        return AssistantReply {
            intent,
            message: message.to_string(),
        };
    }
    warn!("assistant reply was not the expected JSON object");
    AssistantReply::fallback()
}

pub fn parse_registration(raw: &str) -> Extraction {
    let trimmed = raw.trim().trim_matches('"').trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("invalid") {
        return Extraction::Missing;
    }
    let parsed = json_candidates(trimmed)
        .into_iter()
        .find_map(|candidate| serde_json::from_str::<Value>(candidate).ok());
    let Some(parsed) = parsed else {
        return Extraction::Unreadable;
    };

    let name = parsed.get("name").and_then(Value::as_str).and_then(clean_name);
    let email = parsed.get("email").and_then(Value::as_str).and_then(valid_email);
    match (name, email) {
        (Some(name), Some(email)) => Extraction::Found(Registration { name, email }),
        _ => Extraction::Missing,
    }
}
