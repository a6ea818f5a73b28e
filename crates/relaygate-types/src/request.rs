//! Generation request and response types.
//!
//! [`GenerationRequest`] is what callers hand to the gateway. Backends
//! receive the same type and answer with a [`GenerationResponse`] or, when
//! streaming, a sequence of [`StreamChunk`]s.

use serde::{Deserialize, Serialize};

use crate::backend::{Priority, UserTier};

/// A text-generation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRequest {
    /// The user prompt.
    pub prompt: String,

    /// Optional system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// Image references (URLs or data URIs). Non-empty implies `multimodal`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,

    /// Function / tool schemas. Non-empty implies `functions`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<serde_json::Value>,

    /// Whether the caller wants a streamed response.
    #[serde(default)]
    pub stream: bool,

    /// Size of the conversation context in tokens, if known.
    #[serde(default, alias = "contextTokens", skip_serializing_if = "Option::is_none")]
    pub context_tokens: Option<u32>,

    /// Caller's service tier.
    #[serde(default, alias = "userTier")]
    pub user_tier: UserTier,

    /// Request priority.
    #[serde(default)]
    pub priority: Priority,

    /// Desired latency in milliseconds. Falls back to the gateway default.
    #[serde(default, alias = "latencyTargetMs", skip_serializing_if = "Option::is_none")]
    pub latency_target_ms: Option<u64>,

    /// Token budget for the response.
    #[serde(default = "default_max_tokens", alias = "maxTokens")]
    pub max_tokens: u32,

    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Backend the caller (or the fallback chain) would like to use.
    #[serde(default, alias = "preferredBackend", skip_serializing_if = "Option::is_none")]
    pub preferred_backend: Option<String>,

    /// Number of retries already spent on this logical call.
    ///
    /// The gateway only ever mutates its own working copy.
    #[serde(default, alias = "retryCount")]
    pub retry_count: u32,
}

fn default_max_tokens() -> u32 {
    1024
}

impl GenerationRequest {
    /// Create a request with default tier, priority and token budget.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            images: Vec::new(),
            functions: Vec::new(),
            stream: false,
            context_tokens: None,
            user_tier: UserTier::default(),
            priority: Priority::default(),
            latency_target_ms: None,
            max_tokens: default_max_tokens(),
            temperature: None,
            preferred_backend: None,
            retry_count: 0,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.images.push(image.into());
        self
    }

    pub fn with_function(mut self, schema: serde_json::Value) -> Self {
        self.functions.push(schema);
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn with_context_tokens(mut self, tokens: u32) -> Self {
        self.context_tokens = Some(tokens);
        self
    }

    pub fn with_tier(mut self, tier: UserTier) -> Self {
        self.user_tier = tier;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_latency_target_ms(mut self, latency_ms: u64) -> Self {
        self.latency_target_ms = Some(latency_ms);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn prefer(mut self, backend: impl Into<String>) -> Self {
        self.preferred_backend = Some(backend.into());
        self
    }
}

/// Token usage reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// A completed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Id of the backend that produced the response.
    pub backend: String,

    /// Generated text.
    pub content: String,

    /// Why generation stopped (e.g. `"stop"`, `"length"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    /// Token usage, if the backend reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Wall-clock latency of the successful call. Filled in by the gateway.
    #[serde(default)]
    pub latency_ms: u64,
}

impl GenerationResponse {
    /// A response with `content` from `backend` and no usage data.
    pub fn text(backend: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            content: content.into(),
            finish_reason: Some("stop".into()),
            usage: None,
            latency_ms: 0,
        }
    }
}

// ── Streaming ───────────────────────────────────────────────────────────

/// A single chunk of a streamed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// A partial piece of generated text.
    TextDelta {
        /// Backend that produced the chunk.
        backend: String,
        /// The partial text.
        text: String,
    },

    /// The stream finished normally.
    Done {
        backend: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl StreamChunk {
    /// Convenience constructor for a text delta.
    pub fn text(backend: impl Into<String>, text: impl Into<String>) -> Self {
        StreamChunk::TextDelta {
            backend: backend.into(),
            text: text.into(),
        }
    }

    /// Convenience constructor for the terminal chunk.
    pub fn done(backend: impl Into<String>) -> Self {
        StreamChunk::Done {
            backend: backend.into(),
            finish_reason: Some("stop".into()),
            usage: None,
        }
    }

    /// Backend that produced this chunk.
    pub fn backend(&self) -> &str {
        match self {
            StreamChunk::TextDelta { backend, .. } | StreamChunk::Done { backend, .. } => backend,
        }
    }

    /// Whether this is the terminal chunk.
    pub fn is_done(&self) -> bool {
        matches!(self, StreamChunk::Done { .. })
    }
}
