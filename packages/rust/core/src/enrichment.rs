//! AI metadata collaborator.
//!
//! Calls the Gemini `generateContent` endpoint for SEO metadata and caches
//! each parsed answer in the ledger, keyed by task, prompt hash and model, so
//! a resumed run never pays twice for the same prompt.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};
use url::Url;

use threadvault_shared::{AiConfig, ArticleMetadata, Result, SeoMetadata, ThreadvaultError};
use threadvault_storage::Ledger;

/// Body characters sent with a refine prompt.
pub const REFINE_BODY_CHARS: usize = 8000;

/// Kind of metadata request, also the cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    SeoMetadata,
    ArticleMetadata,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SeoMetadata => "seo_metadata",
            Self::ArticleMetadata => "article_metadata",
        }
    }
}

// ---------------------------------------------------------------------------
// Gemini client
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

/// Thin client for one Gemini model.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    url: Url,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let url = config
            .endpoint
            .join(&format!("v1beta/models/{}:generateContent", config.model))
            .map_err(|e| ThreadvaultError::config(format!("invalid AI endpoint: {e}")))?;

        Ok(Self {
            http: reqwest::Client::new(),
            url,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `prompt` and return the answer text with code fences removed.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseMimeType": "application/json" },
            "safetySettings": [
                { "category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_NONE" },
                { "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_NONE" },
                { "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_NONE" },
                { "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_NONE" },
            ],
        });

        let response = self
            .http
            .post(self.url.clone())
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ThreadvaultError::Network(format!("AI request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ThreadvaultError::Http {
                url: self.url.to_string(),
                status: status.as_u16(),
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ThreadvaultError::Enrichment(format!("unreadable AI response: {e}")))?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
            .ok_or_else(|| ThreadvaultError::Enrichment("AI response has no text".into()))?;

        Ok(strip_code_fences(&text))
    }
}

fn strip_code_fences(text: &str) -> String {
    text.trim()
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Cache key for a prompt.
fn prompt_hash(prompt: &str, task: TaskType) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(task.as_str().as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

fn seo_prompt(original_title: &str, snippet: &str, author: &str) -> String {
    format!(
        r#"你是一名游戏博客的SEO编辑。根据以下信息生成SEO元数据。
原始标题: "{original_title}"
作者: "{author}"
内容摘要: "{snippet}..."
只返回如下JSON，不要任何解释:
{{
  "seo_title": "50到70个字符的SEO标题",
  "description": "120到160个字符的Meta描述",
  "tags": ["5到8个相关标签"]
}}"#
    )
}

fn article_prompt(body: &str) -> String {
    let excerpt: String = body.chars().take(REFINE_BODY_CHARS).collect();
    format!(
        r#"你是一名博客SEO编辑。根据下面的文章正文生成元数据。
只返回如下JSON，不要任何解释或代码块标记:
{{
  "title": "信息完整且符合原文主旨的中文标题",
  "seo_title": "面向搜索引擎的简短中文标题，60字以内",
  "description": "概括文章核心内容的元描述，150字以内",
  "categories": ["主要分类，通常只有一个"],
  "tags": ["5到8个关键词标签"]
}}

[正文开始]
{excerpt}
[正文结束]"#
    )
}

// ---------------------------------------------------------------------------
// Metadata service
// ---------------------------------------------------------------------------

/// Cached metadata lookups. Every failure degrades to `None`.
pub struct MetadataService {
    client: GeminiClient,
    ledger: Option<Arc<Ledger>>,
}

impl MetadataService {
    pub fn new(client: GeminiClient, ledger: Option<Arc<Ledger>>) -> Self {
        Self { client, ledger }
    }

    /// SEO title, description and tags for a freshly crawled thread.
    #[instrument(skip_all, fields(title = %original_title))]
    pub async fn seo_metadata(&self, original_title: &str, snippet: &str, author: &str) -> Option<SeoMetadata> {
        let prompt = seo_prompt(original_title, snippet, author);
        self.cached(TaskType::SeoMetadata, &prompt).await
    }

    /// Full front matter for an already formatted article body.
    #[instrument(skip_all, fields(body_chars = body.chars().count()))]
    pub async fn article_metadata(&self, body: &str) -> Option<ArticleMetadata> {
        let prompt = article_prompt(body);
        let meta: ArticleMetadata = self.cached(TaskType::ArticleMetadata, &prompt).await?;
        if meta.title.trim().is_empty() {
            warn!("AI metadata has an empty title");
            return None;
        }
        Some(meta)
    }

    async fn cached<T>(&self, task: TaskType, prompt: &str) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let hash = prompt_hash(prompt, task);

        if let Some(ledger) = &self.ledger {
            match ledger
                .get_enrichment_cache(task.as_str(), &hash, self.client.model())
                .await
            {
                Ok(Some(json)) => match serde_json::from_str::<T>(&json) {
                    Ok(value) => {
                        debug!(task = task.as_str(), "metadata cache hit");
                        return Some(value);
                    }
                    Err(e) => warn!(task = task.as_str(), error = %e, "stale metadata cache entry"),
                },
                Ok(None) => {}
                Err(e) => warn!(task = task.as_str(), error = %e, "metadata cache read failed"),
            }
        }

        let text = match self.client.generate(prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(task = task.as_str(), error = %e, "AI call failed");
                return None;
            }
        };

        let value: T = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                warn!(task = task.as_str(), error = %e, "AI answer is not the expected JSON");
                return None;
            }
        };

        if let Some(ledger) = &self.ledger {
            let stored = serde_json::to_string(&value).unwrap_or_default();
            if let Err(e) = ledger
                .set_enrichment_cache(task.as_str(), &hash, self.client.model(), &stored)
                .await
            {
                warn!(task = task.as_str(), error = %e, "metadata cache write failed");
            }
        }

        Some(value)
    }
}
