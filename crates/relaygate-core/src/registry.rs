//! Backend registry and capability inference.
//!
//! [`CapabilityRegistry`] maps backend ids to their descriptors and live
//! handles, preserving registration order so that ties during routing
//! resolve deterministically. [`required_capabilities`] derives what a
//! request needs from its shape and prompt text.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use relaygate_types::{BackendDescriptor, Capability, CapabilitySet, GenerationRequest};

use crate::backend::Backend;
use crate::error::{GatewayError, Result};

/// Context size above which a request needs `long_context`.
pub const LONG_CONTEXT_TOKENS: u32 = 32_000;

/// Prompt length (in characters) above which a request needs `long_context`.
pub const LONG_PROMPT_CHARS: usize = 100_000;

const REASONING_KEYWORDS: &[&str] = &[
    "analyze",
    "reason",
    "explain why",
    "step by step",
    "prove",
    "think through",
];

const CODE_KEYWORDS: &[&str] = &["code", "function", "implement", "debug", "refactor", "program"];

/// Infer the capabilities `request` requires.
///
/// `text` is always required. The rest come from the request shape
/// (images, function schemas, streaming, context size) and from keywords
/// in the prompt.
pub fn required_capabilities(request: &GenerationRequest) -> CapabilitySet {
    let mut required = CapabilitySet::from([Capability::Text]);

    if !request.images.is_empty() {
        required.insert(Capability::Multimodal);
    }
    if !request.functions.is_empty() {
        required.insert(Capability::Functions);
    }
    if request.stream {
        required.insert(Capability::Streaming);
    }
    if request.context_tokens.is_some_and(|t| t > LONG_CONTEXT_TOKENS)
        || request.prompt.chars().count() > LONG_PROMPT_CHARS
    {
        required.insert(Capability::LongContext);
    }

    let prompt = request.prompt.to_lowercase();
    if REASONING_KEYWORDS.iter().any(|k| prompt.contains(k)) {
        required.insert(Capability::Reasoning);
    }
    if CODE_KEYWORDS.iter().any(|k| prompt.contains(k)) {
        required.insert(Capability::Code);
    }

    required
}

struct Entry {
    descriptor: BackendDescriptor,
    handle: Arc<dyn Backend>,
}

#[derive(Default)]
struct Inner {
    order: Vec<String>,
    entries: HashMap<String, Entry>,
}

/// Registered backends, in registration order.
///
/// Reads vastly outnumber writes (one per registration), so a
/// reader-writer lock guards the table.
#[derive(Default)]
pub struct CapabilityRegistry {
    inner: RwLock<Inner>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend. Its descriptor is stored as declared.
    ///
    /// # Errors
    ///
    /// [`GatewayError::DuplicateBackend`] if the id is already taken.
    pub fn register(&self, backend: Arc<dyn Backend>) -> Result<()> {
        let descriptor = backend.descriptor().clone();
        let mut inner = self.inner.write();
        if inner.entries.contains_key(&descriptor.id) {
            return Err(GatewayError::DuplicateBackend(descriptor.id));
        }
        inner.order.push(descriptor.id.clone());
        inner.entries.insert(
            descriptor.id.clone(),
            Entry {
                descriptor,
                handle: backend,
            },
        );
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().entries.contains_key(id)
    }

    pub fn descriptor(&self, id: &str) -> Option<BackendDescriptor> {
        self.inner.read().entries.get(id).map(|e| e.descriptor.clone())
    }

    /// The live handle for `id`.
    pub fn backend(&self, id: &str) -> Option<Arc<dyn Backend>> {
        self.inner.read().entries.get(id).map(|e| e.handle.clone())
    }

    /// All descriptors, in registration order.
    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id))
            .map(|e| e.descriptor.clone())
            .collect()
    }

    /// All live handles, in registration order.
    pub fn backends(&self) -> Vec<Arc<dyn Backend>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id))
            .map(|e| e.handle.clone())
            .collect()
    }

    /// Descriptors whose capabilities cover `required`, in registration order.
    pub fn capable(&self, required: &CapabilitySet) -> Vec<BackendDescriptor> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id))
            .filter(|e| e.descriptor.capabilities.is_superset(required))
            .map(|e| e.descriptor.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
