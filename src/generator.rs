use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::session::{Role, Session};
use crate::settings::GeneratorSettings;

const QA_SYSTEM_PROMPT: &str = "You are an assistant for question-answering tasks, and you should respond based on the provided retrieved context. \
If you cannot find an answer within this context, respond with a helpful message like: \
'I don't have the exact answer you're looking for, but I'm here to help with anything else I can related to the company! \
Feel free to open a ticket in Help Center if you need more assistance.'";

/// Boundary to the retrieval-augmented answer generator. Contract: the
/// returned session has `context` set to the retrieval evidence used,
/// `chat_history` extended by exactly two turns (user then assistant,
/// each independently timestamped), and `answer` set to the assistant
/// content; an empty input history additionally gets the synthesized
/// greeting prepended first.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, session: Session) -> anyhow::Result<Session>;
}

/// Production generator: embeds the question, queries a vector index
/// for supporting passages, then runs one chat completion over the
/// passages plus the session history.
#[derive(Clone)]
pub struct RagGenerator {
    http: reqwest::Client,
    settings: GeneratorSettings,
}

impl RagGenerator {
    pub fn new(settings: GeneratorSettings) -> Self {
        Self { http: reqwest::Client::new(), settings }
    }

    async fn retrieve(&self, question: &str) -> anyhow::Result<Vec<String>> {
        let Some(index_url) = &self.settings.index_url else {
            return Ok(Vec::new());
        };
        let vector = self.embed(question).await?;

        let url = format!("{}/query", index_url.trim_end_matches('/'));
        let body = IndexQueryRequest {
            vector,
            top_k: self.settings.top_k,
            include_metadata: true,
        };
        let mut rb = self.http.post(url).json(&body);
        if let Some(key) = &self.settings.index_api_key {
            rb = rb.header("Api-Key", key);
        }
        let resp = rb.send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("vector index query failed: {}", resp.status());
        }
        let v: IndexQueryResponse = resp.json().await?;
        let passages = v
            .matches
            .into_iter()
            .filter_map(|m| m.metadata.and_then(|md| md.text))
            .collect();
        Ok(passages)
    }

    async fn embed(&self, input: &str) -> anyhow::Result<Vec<f32>> {
        let url = format!(
            "{}/embeddings",
            self.settings.embeddings_base_url.trim_end_matches('/')
        );
        let body = EmbeddingsRequest {
            model: &self.settings.embeddings_model,
            input: vec![input],
        };
        let mut rb = self.http.post(url).json(&body);
        if let Some(key) = &self.settings.embeddings_api_key {
            rb = rb.bearer_auth(key);
        }
        let resp = rb.send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("embeddings call failed: {}", resp.status());
        }
        let mut v: EmbeddingsResponse = resp.json().await?;
        match v.data.pop() {
            Some(d) => Ok(d.embedding),
            None => anyhow::bail!("embeddings response contained no vectors"),
        }
    }

    async fn complete(&self, session: &Session, passages: &[String]) -> anyhow::Result<String> {
        let system = format!("{}\n\n{}", QA_SYSTEM_PROMPT, passages.join("\n\n"));
        let mut messages = vec![OaiMessage { role: "system", content: system }];
        for turn in &session.chat_history {
            messages.push(OaiMessage {
                role: match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: turn.content.clone(),
            });
        }
        messages.push(OaiMessage { role: "user", content: session.input.clone() });

        let url = format!(
            "{}/chat/completions",
            self.settings.chat_base_url.trim_end_matches('/')
        );
        let body = OaiChatRequest {
            model: &self.settings.chat_model,
            messages,
            temperature: 0.0,
        };
        let mut rb = self.http.post(url).json(&body);
        if let Some(key) = &self.settings.chat_api_key {
            rb = rb.bearer_auth(key);
        }
        let resp = rb.send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("model call failed: {}", resp.status());
        }
        let v: OaiChatResponse = resp.json().await?;
        let content = v
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        Ok(content)
    }
}

#[async_trait]
impl AnswerGenerator for RagGenerator {
    async fn generate(&self, mut session: Session) -> anyhow::Result<Session> {
        session.ensure_greeting();
        let passages = self.retrieve(&session.input).await?;
        let asked_at = Utc::now();
        let answer = self.complete(&session, &passages).await?;
        session.append_exchange(answer, passages, asked_at, Utc::now());
        Ok(session)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsDatum {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct IndexQueryRequest {
    vector: Vec<f32>,
    #[serde(rename = "topK")]
    top_k: usize,
    #[serde(rename = "includeMetadata")]
    include_metadata: bool,
}

#[derive(Debug, Deserialize)]
struct IndexQueryResponse {
    matches: Vec<IndexMatch>,
}

#[derive(Debug, Deserialize)]
struct IndexMatch {
    metadata: Option<IndexMetadata>,
}

#[derive(Debug, Deserialize)]
struct IndexMetadata {
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct OaiChatRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OaiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OaiChatResponse {
    choices: Vec<OaiChoice>,
}

#[derive(Debug, Deserialize)]
struct OaiChoice {
    message: OaiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OaiChoiceMessage {
    content: String,
}

/// Deterministic generator for tests: honors the turn-append contract
/// and always answers with the canned text.
#[cfg(test)]
pub struct CannedGenerator {
    pub answer: String,
}

#[cfg(test)]
#[async_trait]
impl AnswerGenerator for CannedGenerator {
    async fn generate(&self, mut session: Session) -> anyhow::Result<Session> {
        session.ensure_greeting();
        let asked_at = Utc::now();
        session.append_exchange(
            self.answer.clone(),
            vec!["canned passage".into()],
            asked_at,
            Utc::now(),
        );
        Ok(session)
    }
}
