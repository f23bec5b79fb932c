//! Static model table with public lookup API.

use crate::{Api, CostInfo, Model, Provider};

/// Context size assumed for models missing from the table
pub const DEFAULT_CONTEXT_WINDOW: u32 = 128_000;

struct ModelEntry {
    id: &'static str,
    name: &'static str,
    provider: Provider,
    reasoning: bool,
    context_window: u32,
    max_tokens: u32,
    cost_input: f64,
    cost_output: f64,
    cost_cache_read: f64,
    cost_cache_write: f64,
}

const MODEL_ENTRIES: &[ModelEntry] = &[
    ModelEntry {
        id: "claude-sonnet-4-5-20250929",
        name: "Claude Sonnet 4.5",
        provider: Provider::Anthropic,
        reasoning: true,
        context_window: 200_000,
        max_tokens: 64_000,
        cost_input: 3.0,
        cost_output: 15.0,
        cost_cache_read: 0.3,
        cost_cache_write: 3.75,
    },
    ModelEntry {
        id: "claude-opus-4-1-20250805",
        name: "Claude Opus 4.1",
        provider: Provider::Anthropic,
        reasoning: true,
        context_window: 200_000,
        max_tokens: 32_000,
        cost_input: 15.0,
        cost_output: 75.0,
        cost_cache_read: 1.5,
        cost_cache_write: 18.75,
    },
    ModelEntry {
        id: "claude-3-5-haiku-20241022",
        name: "Claude Haiku 3.5",
        provider: Provider::Anthropic,
        reasoning: false,
        context_window: 200_000,
        max_tokens: 8192,
        cost_input: 0.8,
        cost_output: 4.0,
        cost_cache_read: 0.08,
        cost_cache_write: 1.0,
    },
    ModelEntry {
        id: "gpt-4.1",
        name: "GPT-4.1",
        provider: Provider::OpenAI,
        reasoning: false,
        context_window: 1_047_576,
        max_tokens: 32_768,
        cost_input: 2.0,
        cost_output: 8.0,
        cost_cache_read: 0.5,
        cost_cache_write: 0.0,
    },
    ModelEntry {
        id: "gpt-4o",
        name: "GPT-4o",
        provider: Provider::OpenAI,
        reasoning: false,
        context_window: 128_000,
        max_tokens: 16_384,
        cost_input: 2.5,
        cost_output: 10.0,
        cost_cache_read: 1.25,
        cost_cache_write: 0.0,
    },
    ModelEntry {
        id: "o4-mini",
        name: "o4-mini",
        provider: Provider::OpenAI,
        reasoning: true,
        context_window: 200_000,
        max_tokens: 100_000,
        cost_input: 1.1,
        cost_output: 4.4,
        cost_cache_read: 0.275,
        cost_cache_write: 0.0,
    },
    ModelEntry {
        id: "llama-3.3-70b-versatile",
        name: "Llama 3.3 70B",
        provider: Provider::Groq,
        reasoning: false,
        context_window: 131_072,
        max_tokens: 32_768,
        cost_input: 0.59,
        cost_output: 0.79,
        cost_cache_read: 0.0,
        cost_cache_write: 0.0,
    },
    ModelEntry {
        id: "deepseek/deepseek-r1",
        name: "DeepSeek R1",
        provider: Provider::OpenRouter,
        reasoning: true,
        context_window: 163_840,
        max_tokens: 32_768,
        cost_input: 0.4,
        cost_output: 2.0,
        cost_cache_read: 0.0,
        cost_cache_write: 0.0,
    },
    ModelEntry {
        id: "qwen2.5-coder:14b",
        name: "Qwen2.5 Coder 14B",
        provider: Provider::Ollama,
        reasoning: false,
        context_window: 32_768,
        max_tokens: 8192,
        cost_input: 0.0,
        cost_output: 0.0,
        cost_cache_read: 0.0,
        cost_cache_write: 0.0,
    },
];

impl ModelEntry {
    fn to_model(&self) -> Model {
        let (api, base_url): (Api, &str) = self.provider.default_endpoint();
        Model {
            id: self.id.to_string(),
            name: self.name.to_string(),
            api,
            provider: self.provider,
            base_url: base_url.to_string(),
            reasoning: self.reasoning,
            cost: CostInfo {
                input: self.cost_input,
                output: self.cost_output,
                cache_read: self.cost_cache_read,
                cache_write: self.cost_cache_write,
            },
            context_window: self.context_window,
            max_tokens: self.max_tokens,
        }
    }
}

/// Look up a model by provider and ID.
pub fn get_model(provider: Provider, id: &str) -> Option<Model> {
    MODEL_ENTRIES
        .iter()
        .find(|e| e.id == id && e.provider == provider)
        .map(|e| e.to_model())
}

/// Look up a model by ID only (first match across all providers).
pub fn get_model_by_id(id: &str) -> Option<Model> {
    MODEL_ENTRIES
        .iter()
        .find(|e| e.id == id)
        .map(|e| e.to_model())
}

/// Get all models for a specific provider.
pub fn get_models(provider: Provider) -> Vec<Model> {
    MODEL_ENTRIES
        .iter()
        .filter(|e| e.provider == provider)
        .map(|e| e.to_model())
        .collect()
}

/// Maximum context size for a model id, falling back to
/// [`DEFAULT_CONTEXT_WINDOW`] for unknown ids.
pub fn context_window(id: &str) -> u32 {
    MODEL_ENTRIES
        .iter()
        .find(|e| e.id == id)
        .map(|e| e.context_window)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW)
}
