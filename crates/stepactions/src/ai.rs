use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use stepcore::{StepContext, StepError, StepHandler, StepOutput};

const DEFAULT_OUTPUT_VARIABLE: &str = "aiResponse";

/// Token accounting reported by a content provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedContent {
    pub text: String,
    pub usage: TokenUsage,
}

/// Something that turns a prompt into text
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<GeneratedContent, StepError>;
}

/// Settings for [`HttpContentProvider`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentProviderConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub default_provider: Option<String>,
    pub default_model: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ContentProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            default_provider: None,
            default_model: None,
            timeout_secs: 60,
        }
    }
}

impl ContentProviderConfig {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            endpoint: var("STEPFLOW_AI_ENDPOINT"),
            api_key: var("STEPFLOW_AI_API_KEY"),
            default_provider: var("STEPFLOW_AI_PROVIDER"),
            default_model: var("STEPFLOW_AI_MODEL"),
            ..Self::default()
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ai_provider: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    content: ResponseContent,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseContent {
    generated_text: String,
}

/// Content provider reached over HTTP.
///
/// Posts `{prompt, aiProvider, model}` as JSON and expects
/// `{content: {generatedText}, usage: {promptTokens, completionTokens}}` back.
pub struct HttpContentProvider {
    client: reqwest::Client,
    endpoint: String,
    config: ContentProviderConfig,
}

impl HttpContentProvider {
    pub fn new(endpoint: impl Into<String>, config: ContentProviderConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            config,
        })
    }
}

#[async_trait]
impl ContentProvider for HttpContentProvider {
    async fn generate(
        &self,
        prompt: &str,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<GeneratedContent, StepError> {
        let body = GenerateRequest {
            prompt,
            ai_provider: provider.or(self.config.default_provider.as_deref()),
            model: model.or(self.config.default_model.as_deref()),
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StepError::Provider(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StepError::Provider(format!("HTTP {}: {}", status.as_u16(), text)));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| StepError::Provider(format!("unreadable response: {}", e)))?;

        Ok(GeneratedContent {
            text: parsed.content.generated_text,
            usage: parsed.usage,
        })
    }
}

/// Offline stand-in used when no endpoint is configured. Echoes the prompt
/// back with a rough token estimate.
pub struct PlaceholderContentProvider;

#[async_trait]
impl ContentProvider for PlaceholderContentProvider {
    async fn generate(
        &self,
        prompt: &str,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<GeneratedContent, StepError> {
        tracing::warn!(
            provider = ?provider,
            model = ?model,
            "No content provider configured, returning placeholder content"
        );
        let text = format!("This is placeholder content generated for: {}", prompt);
        Ok(GeneratedContent {
            usage: TokenUsage {
                prompt_tokens: (prompt.len() / 4) as u64,
                completion_tokens: (text.len() / 4) as u64,
            },
            text,
        })
    }
}

pub(crate) fn provider_from_env() -> Arc<dyn ContentProvider> {
    let config = ContentProviderConfig::from_env();
    let Some(endpoint) = config.endpoint.clone() else {
        return Arc::new(PlaceholderContentProvider);
    };
    match HttpContentProvider::new(endpoint, config) {
        Ok(provider) => Arc::new(provider),
        Err(e) => {
            tracing::warn!("Failed to build HTTP content provider: {}", e);
            Arc::new(PlaceholderContentProvider)
        }
    }
}

/// Generates text from a templated prompt.
///
/// Step data: `prompt` (required), `aiProvider`, `model`, `outputVariable`
/// (default `aiResponse`). Token usage lands in `<outputVariable>Usage`.
pub struct AiGenerateHandler {
    provider: Arc<dyn ContentProvider>,
}

impl AiGenerateHandler {
    pub fn new(provider: Arc<dyn ContentProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl StepHandler for AiGenerateHandler {
    fn step_type(&self) -> &str {
        "ai.generate"
    }

    async fn invoke(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        let prompt = ctx.render(ctx.require_str("prompt")?);
        let provider = ctx.step.data_str("aiProvider");
        let model = ctx.step.data_str("model");
        let output_variable = ctx
            .step
            .data_str("outputVariable")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(DEFAULT_OUTPUT_VARIABLE);

        ctx.events.info(format!(
            "Generating content with {}",
            provider.unwrap_or("default provider")
        ));

        let generated = tokio::select! {
            result = self.provider.generate(&prompt, provider, model) => result?,
            _ = ctx.cancellation.cancelled() => return Err(StepError::Cancelled),
        };

        Ok(StepOutput::new()
            .with_variable(output_variable, generated.text)
            .with_variable(
                format!("{}Usage", output_variable),
                json!({
                    "promptTokens": generated.usage.prompt_tokens,
                    "completionTokens": generated.usage.completion_tokens,
                }),
            ))
    }

    fn description(&self) -> &str {
        "Generates content from a prompt through the configured provider"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use stepcore::{EventBus, Step, Variables};
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<(String, Option<String>, Option<String>)>>,
        fail: bool,
    }

    #[async_trait]
    impl ContentProvider for Recording {
        async fn generate(
            &self,
            prompt: &str,
            provider: Option<&str>,
            model: Option<&str>,
        ) -> Result<GeneratedContent, StepError> {
            self.calls.lock().unwrap().push((
                prompt.to_string(),
                provider.map(str::to_string),
                model.map(str::to_string),
            ));
            if self.fail {
                return Err(StepError::Provider("rate limited".into()));
            }
            Ok(GeneratedContent {
                text: format!("draft for {}", prompt),
                usage: TokenUsage {
                    prompt_tokens: 3,
                    completion_tokens: 7,
                },
            })
        }
    }

    fn context(step: Step) -> StepContext {
        let bus = EventBus::new(8);
        let mut variables = Variables::new();
        variables.insert("topic".into(), json!("solar power"));
        StepContext {
            execution_id: "exec-1".into(),
            events: bus.create_emitter("exec-1".into(), step.id.clone()),
            step,
            variables,
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn writes_text_and_usage_to_output_variable() {
        let provider = Arc::new(Recording::default());
        let handler = AiGenerateHandler::new(provider.clone());
        let step = Step::new("write", "ai.generate")
            .with_data("prompt", "Write about {{topic}}")
            .with_data("aiProvider", "openai")
            .with_data("model", "gpt-4")
            .with_data("outputVariable", "draft");

        let out = handler.invoke(context(step)).await.unwrap();
        assert_eq!(out.variables["draft"], json!("draft for Write about solar power"));
        assert_eq!(
            out.variables["draftUsage"],
            json!({ "promptTokens": 3, "completionTokens": 7 })
        );

        let calls = provider.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            (
                "Write about solar power".to_string(),
                Some("openai".to_string()),
                Some("gpt-4".to_string())
            )
        );
    }

    #[tokio::test]
    async fn defaults_output_variable() {
        let handler = AiGenerateHandler::new(Arc::new(Recording::default()));
        let step = Step::new("write", "ai.generate").with_data("prompt", "hello");

        let out = handler.invoke(context(step)).await.unwrap();
        assert!(out.variables.contains_key("aiResponse"));
        assert!(out.variables.contains_key("aiResponseUsage"));
    }

    #[tokio::test]
    async fn provider_errors_fail_the_step() {
        let handler = AiGenerateHandler::new(Arc::new(Recording {
            fail: true,
            ..Default::default()
        }));
        let step = Step::new("write", "ai.generate").with_data("prompt", "hello");
        assert_eq!(
            handler.invoke(context(step)).await,
            Err(StepError::Provider("rate limited".into()))
        );
    }

    #[tokio::test]
    async fn prompt_is_required() {
        let handler = AiGenerateHandler::new(Arc::new(Recording::default()));
        let step = Step::new("write", "ai.generate");
        assert_eq!(
            handler.invoke(context(step)).await,
            Err(StepError::MissingData("prompt".into()))
        );
    }

    #[tokio::test]
    async fn placeholder_estimates_tokens() {
        let content = PlaceholderContentProvider
            .generate("abcdefgh", None, None)
            .await
            .unwrap();
        assert!(content.text.ends_with("abcdefgh"));
        assert_eq!(content.usage.prompt_tokens, 2);
    }
}
