/// Process configuration, resolved from the environment once at
/// startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub active_store: String,
    pub archive_store: String,
    pub generator: GeneratorSettings,
}

#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub chat_base_url: String,
    pub chat_api_key: Option<String>,
    pub chat_model: String,
    pub embeddings_base_url: String,
    pub embeddings_api_key: Option<String>,
    pub embeddings_model: String,
    /// Base URL of the vector index; retrieval is skipped when unset.
    pub index_url: Option<String>,
    pub index_api_key: Option<String>,
    pub top_k: usize,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            active_store: std::env::var("ACTIVE_STORE_NAME")
                .unwrap_or_else(|_| "active_interactions".into()),
            archive_store: std::env::var("ARCHIVE_STORE_NAME")
                .unwrap_or_else(|_| "interactions".into()),
            generator: GeneratorSettings::from_env(),
        }
    }
}

impl GeneratorSettings {
    pub fn from_env() -> Self {
        let chat_base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".into());
        let chat_api_key = std::env::var("OPENAI_API_KEY").ok();
        Self {
            embeddings_base_url: std::env::var("EMBEDDINGS_BASE_URL")
                .unwrap_or_else(|_| chat_base_url.clone()),
            embeddings_api_key: std::env::var("EMBEDDINGS_API_KEY")
                .ok()
                .or_else(|| chat_api_key.clone()),
            embeddings_model: std::env::var("EMBEDDINGS_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".into()),
            chat_model: std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            index_url: std::env::var("VECTOR_INDEX_URL").ok(),
            index_api_key: std::env::var("VECTOR_INDEX_API_KEY").ok(),
            top_k: std::env::var("RETRIEVAL_TOP_K")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
            chat_base_url,
            chat_api_key,
        }
    }
}
