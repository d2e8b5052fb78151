use minijinja::{context, Environment};

use crate::types::Intent;

const ASSISTANT_SYSTEM_TEMPLATE: &str = include_str!("prompts/assistant_system.j2");
const ASSISTANT_USER_TEMPLATE: &str = include_str!("prompts/assistant_user.j2");
const BOOKING_OFFER_PROMPT: &str = include_str!("prompts/booking_offer.j2");
const CONFIRMATION_PROMPT: &str = include_str!("prompts/confirmation.j2");
const REGISTRATION_PROMPT: &str = include_str!("prompts/registration.j2");

pub const DEFAULT_DIRECTIONS: &str = "Sin directiva.";

const INTENT_LABELS: [Intent; 6] = [
    Intent::ReservarTurno,
    Intent::ConsultarHorario,
    Intent::CancelarTurno,
    Intent::Saludo,
    Intent::Ayuda,
    Intent::Otra,
];

pub struct AssistantSystemContext<'a> {
    pub directions: &'a str,
    pub customer_name: Option<&'a str>,
}

pub struct AssistantUserContext<'a> {
    pub context: &'a str,
    pub query: &'a str,
}

fn render(name: &str, source: &str, ctx: minijinja::Value) -> Option<String> {
    let mut env = Environment::new();
    env.add_template(name, source).ok()?;
    let template = env.get_template(name).ok()?;
    template.render(ctx).ok()
}

pub fn render_assistant_system_prompt(ctx: &AssistantSystemContext<'_>) -> String {
    let directions = if ctx.directions.trim().is_empty() {
        DEFAULT_DIRECTIONS
    } else {
        ctx.directions.trim()
    };
    let labels = INTENT_LABELS.iter().map(|i| i.as_str()).collect::<Vec<_>>();

    render(
        "assistant_system",
        ASSISTANT_SYSTEM_TEMPLATE,
        context! {
            directions => directions,
            customer_name => ctx.customer_name,
            intents => labels,
        },
    )
    .unwrap_or_else(|| fallback_assistant_system_prompt(directions, &labels))
}

fn fallback_assistant_system_prompt(directions: &str, labels: &[&str]) -> String {
    format!(
        "{directions}\n\nSos un asistente virtual de una clínica de belleza. \
         Clasificá la intención del usuario con una de estas etiquetas: {}. \
         Respondé con un JSON con las propiedades \"intent\" y \"message\".",
        labels.join(", ")
    )
}

pub fn render_assistant_user_prompt(ctx: &AssistantUserContext<'_>) -> String {
    render(
        "assistant_user",
        ASSISTANT_USER_TEMPLATE,
        context! {
            context => ctx.context.trim(),
            query => ctx.query.trim(),
        },
    )
    .unwrap_or_else(|| format!("Contexto:\n{}\n\nPregunta: {}", ctx.context, ctx.query))
}

pub fn booking_offer_prompt() -> &'static str {
    BOOKING_OFFER_PROMPT
}

pub fn confirmation_prompt() -> &'static str {
    CONFIRMATION_PROMPT
}

pub fn registration_prompt() -> &'static str {
    REGISTRATION_PROMPT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_lists_every_intent_and_directions() {
        let prompt = render_assistant_system_prompt(&AssistantSystemContext {
            directions: "Atendé de lunes a viernes.",
            customer_name: None,
        });
        assert!(prompt.starts_with("Atendé de lunes a viernes."));
        for label in INTENT_LABELS {
            assert!(prompt.contains(label.as_str()), "missing {}", label.as_str());
        }
        assert!(!prompt.contains("ya está registrado"));
    }

    #[test]
    fn blank_directions_use_default() {
        let prompt = render_assistant_system_prompt(&AssistantSystemContext {
            directions: "   ",
            customer_name: Some("Ana"),
        });
        assert!(prompt.starts_with(DEFAULT_DIRECTIONS));
        assert!(prompt.contains("con el nombre Ana"));
    }

    #[test]
    fn user_prompt_carries_context_and_query() {
        let prompt = render_assistant_user_prompt(&AssistantUserContext {
            context: "Limpieza facial: 45 minutos.",
            query: "¿Cuánto dura la limpieza?",
        });
        assert!(prompt.contains("Contexto:\nLimpieza facial: 45 minutos."));
        assert!(prompt.contains("Pregunta: ¿Cuánto dura la limpieza?"));
    }
}
