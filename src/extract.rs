use std::sync::LazyLock;

use regex::Regex;

const MAX_NAME_CHARS: usize = 120;

static EMAIL_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Invalid email shape regex")
});

static EMAIL_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\w.-]+@[\w.-]+\.[a-zA-Z]{2,}").expect("Invalid email search regex")
});

static FULL_NAME_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-ZÁÉÍÓÚÑ][a-záéíóúñ]+(?:\s+[A-ZÁÉÍÓÚÑ][a-záéíóúñ]+)+")
        .expect("Invalid full name regex")
});

/// Name and email collected for a new customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub name: String,
    pub email: String,
}

pub fn normalize_email(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

/// Returns the normalized address when `value` is email-shaped.
pub fn valid_email(value: &str) -> Option<String> {
    let normalized = normalize_email(value);
    EMAIL_SHAPE.is_match(&normalized).then_some(normalized)
}

pub fn find_email(text: &str) -> Option<String> {
    let found = EMAIL_IN_TEXT.find(text)?;
    valid_email(found.as_str())
}

/// First run of two or more capitalised words, e.g. "Ana Pérez".
pub fn find_full_name(text: &str) -> Option<String> {
    let found = FULL_NAME_IN_TEXT.find(text)?;
    clean_name(found.as_str())
}

/// Name typed in reply to "what is your name?". Any non-empty text is
/// accepted; punctuation is only stripped when something else remains.
pub fn name_from_reply(raw: &str) -> Option<String> {
    clean_name(raw).or_else(|| {
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        (!collapsed.is_empty()).then(|| collapsed.chars().take(MAX_NAME_CHARS).collect())
    })
}

pub fn clean_name(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed
        .trim_matches(|c: char| c.is_ascii_punctuation())
        .trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_NAME_CHARS).collect())
}

/// Pulls a name and an email out of a free-form message without calling the model.
pub fn registration_from_text(text: &str) -> Option<Registration> {
    let email = find_email(text)?;
    let name = find_full_name(text)?;
    Some(Registration { name, email })
}
