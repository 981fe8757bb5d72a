const GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

const SYSTEM_INSTRUCTION: &str = "Maximum 30 words. 1 sentence. Create a detailed, creative \
     logo concept description. Focus on visual elements, colors, and mood. Do not include \
     introductory text like 'Here is a logo'.";

/// Shown when the suggestion backend is unreachable, so "surprise me" never
/// surfaces an error.
const FALLBACK_PROMPT: &str =
    "A futuristic geometric hexagon logo with neon blue glowing edges.";

/// Produces a creative prompt for the "surprise me" affordance.
#[async_trait::async_trait]
pub trait PromptSuggester: Send + Sync {
    async fn suggest(&self) -> anyhow::Result<String>;
}

pub struct GroqPromptSuggester {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GroqPromptSuggester {
    pub fn new(api_key: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            api_key,
            model,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let api_key =
            std::env::var("GROQ_API_KEY").map_err(|_| anyhow::anyhow!("GROQ_API_KEY not set"))?;
        let model = std::env::var("GROQ_MODEL")
            .unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string());
        Ok(Self::new(api_key, model))
    }

    async fn request_prompt(&self) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": SYSTEM_INSTRUCTION },
            ],
        });

        let response = self
            .client
            .post(GROQ_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Groq returned {status}: {body}");
        }

        let json: serde_json::Value = response.json().await?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default();
        let prompt = clean_prompt(content);
        if prompt.is_empty() {
            anyhow::bail!("Groq returned an empty prompt");
        }
        Ok(prompt)
    }
}

#[async_trait::async_trait]
impl PromptSuggester for GroqPromptSuggester {
    async fn suggest(&self) -> anyhow::Result<String> {
        match self.request_prompt().await {
            Ok(prompt) => Ok(prompt),
            Err(e) => {
                // degrade to the canned prompt so the form never breaks
                tracing::warn!(error = %e, "prompt suggestion failed, using fallback");
                Ok(FALLBACK_PROMPT.to_string())
            }
        }
    }
}

fn clean_prompt(raw: &str) -> String {
    raw.replace('"', "").trim().to_string()
}
