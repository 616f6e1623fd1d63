//! Generation provider trait.
//!
//! A [`GenerationProvider`] turns a prompt into a stream of answer fragments.
//! Streaming and non-streaming backends share one contract: the caller always
//! receives a [`FragmentStream`], which in non-streaming mode yields a single
//! complete fragment.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{self, Stream};

use crate::error::Result;

/// Answer fragments in production order. An `Err` item ends the stream.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Model identifier, chosen per call.
    pub model: String,
    /// Ask the backend for incremental output.
    pub stream: bool,
}

/// A language-model backend.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Model used when the caller does not pick one.
    fn default_model(&self) -> &str;

    /// Whether `model` can be asked for incremental output.
    fn supports_streaming(&self, _model: &str) -> bool {
        true
    }

    /// Start generating. Errors returned here mean nothing was produced;
    /// errors inside the stream arrive after zero or more fragments.
    async fn generate(&self, request: GenerationRequest) -> Result<FragmentStream>;
}

/// Wrap a complete answer as a one-fragment stream.
pub fn single_fragment(text: String) -> FragmentStream {
    Box::pin(stream::once(async move { Ok(text) }))
}
