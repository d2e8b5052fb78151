//! One inbound message, start to finish.
//!
//! A turn is serialised per phone number, persists the inbound message, lets
//! the reservation flow handle it when the chat is mid-flow, and otherwise
//! asks the assistant with retrieved context and recent history. Everything
//! written after the inbound message goes through a single
//! [`ChatStore::commit_turn`].

use std::sync::Arc;

use tracing::{debug, info};

use crate::classifier::{AssistantTurn, Classifier, FALLBACK_MESSAGE};
use crate::error::ApiError;
use crate::extract::{registration_from_text, valid_email};
use crate::locks::KeyedLocks;
use crate::prompting::DEFAULT_DIRECTIONS;
use crate::reservation::{transition, ChatStatus, Effect, Extraction, Observation, Step};
use crate::retriever::Retriever;
use crate::store::{today, ChatStore, CommittedTurn, TurnCommit};
use crate::types::{Chat, ChatHistory, ChatReply, ChatRequestBody, Customer, Intent, Role};

pub const INVALID_REQUEST: &str = "Número o mensaje inválido.";
pub const NO_CHAT_TODAY: &str = "No hay conversación para ese número hoy.";

/// Validated inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub number: String,
    pub text: String,
}

impl Inbound {
    /// The last turn of the request is the user's new message.
    pub fn from_body(body: ChatRequestBody) -> Result<Self, ApiError> {
        let number = body
            .number
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        let text = body
            .messages
            .as_ref()
            .and_then(|turns| turns.last())
            .and_then(|turn| turn.content.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        match (number, text) {
            (Some(number), Some(text)) => Ok(Self { number, text }),
            _ => Err(ApiError::BadRequest(INVALID_REQUEST.to_string())),
        }
    }
}

/// Decided outcome of a turn before it is written.
struct Outcome {
    next: ChatStatus,
    reply: String,
    effect: Effect,
    intent: Option<Intent>,
    customer_exists: Option<bool>,
    customer: Option<Customer>,
}

pub struct Conversation {
    store: Arc<dyn ChatStore>,
    classifier: Classifier,
    retriever: Retriever,
    locks: KeyedLocks,
    history_limit: i64,
}

impl Conversation {
    pub fn new(
        store: Arc<dyn ChatStore>,
        classifier: Classifier,
        retriever: Retriever,
        history_limit: i64,
    ) -> Self {
        Self {
            store,
            classifier,
            retriever,
            locks: KeyedLocks::default(),
            history_limit,
        }
    }

    pub async fn handle(&self, body: ChatRequestBody) -> Result<ChatReply, ApiError> {
        let inbound = Inbound::from_body(body)?;
        let _turn = self.locks.acquire(&inbound.number).await;

        let chat = self.store.open_chat(&inbound.number, &today()).await?;
        let received = self
            .store
            .append_message(&chat, Role::User, &inbound.text)
            .await?;
        debug!(
            number = %chat.number,
            chat_id = %chat.id,
            status = chat.status.label(),
            "message received"
        );

        let outcome = match self.flow_step(&chat, &inbound.text).await? {
            Some(outcome) => outcome,
            None => self.converse(&chat, &inbound.text, &received.id).await?,
        };
        self.commit(&chat, outcome).await
    }

    /// Today's chat for `number` with every message in order.
    pub async fn history(&self, number: &str) -> Result<ChatHistory, ApiError> {
        let number = number.trim();
        if number.is_empty() {
            return Err(ApiError::BadRequest(INVALID_REQUEST.to_string()));
        }
        let chat = self
            .store
            .find_chat(number, &today())
            .await?
            .ok_or_else(|| ApiError::NotFound(NO_CHAT_TODAY.to_string()))?;
        let messages = self.store.messages(&chat.id).await?;
        Ok(ChatHistory { chat, messages })
    }

    /// Deterministic handling for a chat that is mid-flow. `None` hands the
    /// message to the assistant.
    async fn flow_step(&self, chat: &Chat, text: &str) -> Result<Option<Outcome>, ApiError> {
        let mut customer = None;
        let observation = match chat.status.step() {
            Step::Conversation => return Ok(None),
            Step::Confirmation => {
                let answer = self.classifier.confirms_booking(text).await?;
                customer = self.store.customer_by_phone(&chat.number).await?;
                Observation::Confirmation {
                    answer,
                    customer_exists: customer.is_some(),
                }
            }
            Step::UserData => {
                let extraction = match registration_from_text(text) {
                    Some(reg) => Extraction::Found(reg),
                    None => self.classifier.extract_registration(text).await?,
                };
                let email_taken = match &extraction {
                    Extraction::Found(reg) => self.email_taken(&reg.email).await?,
                    _ => false,
                };
                Observation::UserData {
                    extraction,
                    email_taken,
                }
            }
            Step::Name => Observation::Name(text),
            Step::Email => {
                let email = valid_email(text);
                let email_taken = match &email {
                    Some(email) => self.email_taken(email).await?,
                    None => false,
                };
                Observation::Email {
                    email,
                    pending_name: chat.pending_name.as_deref(),
                    email_taken,
                }
            }
        };

        let Some(step) = transition(chat.status, observation) else {
            debug!(chat_id = %chat.id, status = chat.status.label(), "flow did not handle message");
            return Ok(None);
        };
        let customer_exists = match chat.status.step() {
            Step::Confirmation => Some(customer.is_some()),
            _ => None,
        };
        Ok(Some(Outcome {
            next: step.next,
            reply: step.reply.unwrap_or_else(|| FALLBACK_MESSAGE.to_string()),
            effect: step.effect,
            intent: None,
            customer_exists,
            customer,
        }))
    }

    /// Free-form answer from the assistant, then the flow decides whether
    /// the answer moves the chat.
    async fn converse(&self, chat: &Chat, text: &str, received_id: &str) -> Result<Outcome, ApiError> {
        let (mut history, directions, context, customer) = tokio::try_join!(
            async {
                self.store
                    .recent_messages(&chat.id, self.history_limit + 1)
                    .await
                    .map_err(ApiError::from)
            },
            async { self.store.directions().await.map_err(ApiError::from) },
            async { self.retriever.context_for(text).await.map_err(ApiError::from) },
            async {
                self.store
                    .customer_by_phone(&chat.number)
                    .await
                    .map_err(ApiError::from)
            },
        )?;
        // The question goes last in the prompt, not in the history.
        if history.last().is_some_and(|m| m.id == received_id) {
            history.pop();
        }
        let excess = history.len().saturating_sub(self.history_limit.max(0) as usize);
        let history = history.split_off(excess);

        let reply = self
            .classifier
            .respond(AssistantTurn {
                directions: directions.as_deref().unwrap_or(DEFAULT_DIRECTIONS),
                customer_name: customer.as_ref().map(|c| c.name.as_str()),
                history: &history,
                context: &context,
                query: text,
            })
            .await?;

        let idle = chat.status == ChatStatus::Idle;
        let booking = reply.intent == Intent::ReservarTurno;
        let offers_booking = if idle && !booking {
            self.classifier.offers_booking(&reply.message).await?
        } else {
            false
        };
        let inline = if idle && booking && customer.is_none() {
            registration_from_text(text)
        } else {
            None
        };
        let email_taken = match &inline {
            Some(reg) => self.email_taken(&reg.email).await?,
            None => false,
        };

        let observation = Observation::Reply {
            intent: reply.intent,
            offers_booking,
            customer_exists: customer.is_some(),
            inline,
            email_taken,
        };
        let (next, reply_text, effect) = match transition(chat.status, observation) {
            Some(step) => (
                step.next,
                step.reply.unwrap_or_else(|| reply.message.clone()),
                step.effect,
            ),
            None => (chat.status, reply.message.clone(), Effect::None),
        };
        Ok(Outcome {
            next,
            reply: reply_text,
            effect,
            intent: Some(reply.intent),
            customer_exists: booking.then_some(customer.is_some()),
            customer,
        })
    }

    async fn email_taken(&self, email: &str) -> Result<bool, ApiError> {
        Ok(self.store.customer_by_email(email).await?.is_some())
    }

    async fn commit(&self, chat: &Chat, outcome: Outcome) -> Result<ChatReply, ApiError> {
        let (pending_name, new_customer) = match outcome.effect {
            Effect::None if outcome.next == ChatStatus::Idle => (None, None),
            Effect::None => (chat.pending_name.clone(), None),
            Effect::RememberName(name) => (Some(name), None),
            Effect::Register(reg) => (None, Some(reg)),
        };
        let registering = new_customer.is_some();

        let CommittedTurn { message, customer } = self
            .store
            .commit_turn(TurnCommit {
                chat_id: chat.id.clone(),
                number: chat.number.clone(),
                status: outcome.next,
                pending_name,
                last_intent: outcome.intent.or(chat.last_intent),
                new_customer,
                reply: outcome.reply,
            })
            .await?;

        if registering {
            info!(number = %chat.number, chat_id = %chat.id, "customer registered");
        }
        info!(
            number = %chat.number,
            chat_id = %chat.id,
            from = chat.status.label(),
            status = outcome.next.label(),
            intent = outcome.intent.map(Intent::as_str),
            "turn committed"
        );

        let customer = customer.or(outcome.customer);
        Ok(ChatReply {
            intent: outcome.intent,
            response: message.content.clone(),
            message: message.content,
            status: outcome.next,
            customer_exists: outcome.customer_exists.or(registering.then_some(true)),
            customer,
        })
    }
}
