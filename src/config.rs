//! Process configuration, read once from the environment at startup.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub openai: OpenAiConfig,
    pub pinecone: PineconeConfig,
    /// Passages fetched from the vector index per question.
    pub context_top_k: usize,
    /// Stored messages replayed to the model as conversation history.
    pub history_limit: i64,
    pub http_timeout_secs: u64,
    pub log_level: String,
    pub log_json: bool,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub classifier_model: String,
    pub embedding_model: String,
}

#[derive(Debug, Clone)]
pub struct PineconeConfig {
    pub api_key: String,
    pub index_name: String,
    /// Data-plane host; looked up from the control plane when absent.
    pub index_host: Option<String>,
    pub namespace: Option<String>,
    /// Metadata field holding the passage text.
    pub text_key: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: parse_env("PORT", 3003),
            database_url: resolve_database_url(),
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10),
            openai: OpenAiConfig {
                api_key: env_or("OPENAI_API_KEY", ""),
                base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1")
                    .trim_end_matches('/')
                    .to_string(),
                chat_model: env_or("OPENAI_CHAT_MODEL", "gpt-4o"),
                classifier_model: env_or("OPENAI_CLASSIFIER_MODEL", "gpt-3.5-turbo"),
                embedding_model: env_or("OPENAI_EMBEDDING_MODEL", "text-embedding-ada-002"),
            },
            pinecone: PineconeConfig {
                api_key: env_or("PINECONE_API_KEY", ""),
                index_name: env_or("PINECONE_INDEXNAME", ""),
                index_host: env_opt("PINECONE_INDEX_HOST"),
                namespace: env_opt("PINECONE_NAMESPACE"),
                text_key: env_or("PINECONE_TEXT_KEY", "text"),
            },
            context_top_k: parse_env("CONTEXT_TOP_K", 5),
            history_limit: parse_env("HISTORY_LIMIT", 10),
            http_timeout_secs: parse_env("HTTP_TIMEOUT_SECS", 60),
            log_level: env::var("RUST_LOG")
                .or_else(|_| env::var("LOG_LEVEL"))
                .unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

fn resolve_database_url() -> String {
    if let Some(url) = env_opt("DATABASE_URL") {
        return url;
    }
    let host = env::var("POSTGRES_HOST")
        .or_else(|_| env::var("PGHOST"))
        .unwrap_or_else(|_| "localhost".to_string());
    let port = env::var("POSTGRES_PORT")
        .or_else(|_| env::var("PGPORT"))
        .unwrap_or_else(|_| "5432".to_string());
    let user = env::var("POSTGRES_USER")
        .or_else(|_| env::var("PGUSER"))
        .unwrap_or_else(|_| "postgres".to_string());
    let password = env::var("POSTGRES_PASSWORD")
        .or_else(|_| env::var("PGPASSWORD"))
        .unwrap_or_else(|_| "postgres".to_string());
    let db = env::var("POSTGRES_DB")
        .or_else(|_| env::var("PGDATABASE"))
        .unwrap_or_else(|_| "clinic_chat".to_string());
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_falls_back_on_garbage() {
        env::set_var("CLINIC_CHAT_TEST_TOP_K", "not-a-number");
        assert_eq!(parse_env("CLINIC_CHAT_TEST_TOP_K", 5usize), 5);
        env::set_var("CLINIC_CHAT_TEST_TOP_K", " 7 ");
        assert_eq!(parse_env("CLINIC_CHAT_TEST_TOP_K", 5usize), 7);
        env::remove_var("CLINIC_CHAT_TEST_TOP_K");
    }

    #[test]
    fn blank_optional_values_are_absent() {
        env::set_var("CLINIC_CHAT_TEST_HOST", "   ");
        assert_eq!(env_opt("CLINIC_CHAT_TEST_HOST"), None);
        env::remove_var("CLINIC_CHAT_TEST_HOST");
    }
}
