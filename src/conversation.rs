//! Conversation orchestration: question → retrieval → prompt → streamed answer.
//!
//! An [`Orchestrator`] owns read-only handles to the index and the two
//! providers. Each exchange walks the stages in [`ExchangeStage`] order and
//! finishes by recording exactly one [`ConversationTurn`] in the caller's
//! [`Session`], unless retrieval fails first.
//!
//! # Streaming
//!
//! Callers that want progressive output pass a bounded
//! `tokio::sync::mpsc::Sender<ExchangeEvent>`. Each fragment is forwarded
//! before the next one is pulled from the generator, so a slow consumer
//! slows generation down. The event sequence for one exchange is:
//!
//! ```text
//! Fragment* Context Completed      normal completion
//! Fragment* Failed                 generation error
//! ```
//!
//! Dropping the receiver abandons the exchange: generation stops and the
//! partial answer is committed with [`TurnStatus::Abandoned`].

use std::fmt;
use std::sync::Arc;

use docqa_core::context::assemble_context;
use docqa_core::embedding::EmbeddingProvider;
use docqa_core::error::{RagError, Result};
use docqa_core::generation::{FragmentStream, GenerationProvider, GenerationRequest};
use docqa_core::index::VectorIndex;
use docqa_core::models::{Chunk, ConversationTurn, SourceInfo, TurnStatus};
use docqa_core::prompt::render_prompt;
use docqa_core::retrieve::{retrieve, MmrParams};
use docqa_core::session::Session;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::index_store;

/// Where an exchange currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStage {
    Received,
    Retrieving,
    Assembling,
    Generating,
    Completed,
}

impl fmt::Display for ExchangeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExchangeStage::Received => "received",
            ExchangeStage::Retrieving => "retrieving",
            ExchangeStage::Assembling => "assembling",
            ExchangeStage::Generating => "generating",
            ExchangeStage::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Progress notification delivered to a streaming caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeEvent {
    /// Next piece of the answer.
    Fragment(String),
    /// Sources of the passages that grounded the answer.
    Context(Vec<SourceInfo>),
    /// The answer is complete and recorded.
    Completed,
    /// Generation failed; the partial answer is recorded.
    Failed(String),
}

/// Result of one exchange, as committed to the session.
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub answer: String,
    pub context: Vec<Chunk>,
    pub status: TurnStatus,
}

impl ExchangeOutcome {
    pub fn sources(&self) -> Vec<SourceInfo> {
        self.context.iter().map(SourceInfo::from).collect()
    }
}

/// Non-streaming answer with its sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    pub context: Vec<SourceInfo>,
}

/// Drives exchanges against one index and one pair of providers.
#[derive(Clone)]
pub struct Orchestrator {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    params: MmrParams,
    known_models: Vec<String>,
}

impl Orchestrator {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
        params: MmrParams,
    ) -> Self {
        Self {
            index,
            embedder,
            generator,
            params,
            known_models: Vec::new(),
        }
    }

    /// Models offered for selection. Picking another one only logs a warning.
    pub fn with_known_models(mut self, models: Vec<String>) -> Self {
        self.known_models = models;
        self
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Same providers and settings over a different index.
    pub fn with_index(&self, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            index,
            ..self.clone()
        }
    }

    /// Run one exchange and record it in `session`.
    ///
    /// `model` defaults to the generator's default model. When `events` is
    /// given, fragments are forwarded as they arrive.
    ///
    /// Retrieval and embedding errors return before anything is recorded.
    /// Generation errors record the partial answer as
    /// [`TurnStatus::Failed`] and are then returned.
    pub async fn respond(
        &self,
        session: &mut Session,
        question: &str,
        model: Option<&str>,
        events: Option<&mpsc::Sender<ExchangeEvent>>,
    ) -> Result<ExchangeOutcome> {
        let model = model.unwrap_or_else(|| self.generator.default_model()).to_string();
        self.check_model(&model);
        stage(ExchangeStage::Received, &model);

        stage(ExchangeStage::Retrieving, &model);
        let retrieved = retrieve(question, self.index.as_ref(), self.embedder.as_ref(), &self.params).await?;
        debug!(passages = retrieved.len(), "retrieved");

        stage(ExchangeStage::Assembling, &model);
        let context = assemble_context(question, &retrieved);
        let prompt = render_prompt(session.transcript(), &context, question);

        stage(ExchangeStage::Generating, &model);
        let mut answer = String::new();
        let mut status = TurnStatus::Completed;
        let mut failure: Option<RagError> = None;

        match self.start_generation(prompt, &model).await {
            Ok(mut fragments) => {
                while let Some(item) = fragments.next().await {
                    match item {
                        Ok(fragment) => {
                            answer.push_str(&fragment);
                            if !emit(events, ExchangeEvent::Fragment(fragment)).await {
                                status = TurnStatus::Abandoned;
                                break;
                            }
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
            }
            Err(e) => failure = Some(e),
        }

        if let Some(e) = &failure {
            status = TurnStatus::Failed;
            warn!(model = %model, partial_chars = answer.chars().count(), error = %e, "generation failed");
            emit(events, ExchangeEvent::Failed(e.to_string())).await;
        }

        let outcome = ExchangeOutcome {
            answer,
            context: retrieved.chunks,
            status,
        };
        session.record(ConversationTurn {
            question: question.to_string(),
            answer: outcome.answer.clone(),
            context: outcome.context.clone(),
            status,
        });

        if let Some(e) = failure {
            return Err(e);
        }

        match status {
            TurnStatus::Abandoned => {
                info!(model = %model, "exchange abandoned by caller");
            }
            _ => {
                if emit(events, ExchangeEvent::Context(outcome.sources())).await {
                    emit(events, ExchangeEvent::Completed).await;
                }
                stage(ExchangeStage::Completed, &model);
            }
        }

        Ok(outcome)
    }

    /// Answer without streaming to the caller.
    pub async fn ask(
        &self,
        session: &mut Session,
        question: &str,
        model: Option<&str>,
    ) -> Result<AskResponse> {
        let outcome = self.respond(session, question, model, None).await?;
        Ok(AskResponse {
            context: outcome.sources(),
            answer: outcome.answer,
        })
    }

    /// Open the fragment stream, retrying once without streaming when a
    /// streaming request cannot be started.
    async fn start_generation(&self, prompt: String, model: &str) -> Result<FragmentStream> {
        let stream = self.generator.supports_streaming(model);
        let request = GenerationRequest {
            prompt,
            model: model.to_string(),
            stream,
        };
        if !stream {
            return self.generator.generate(request).await;
        }

        let fallback = GenerationRequest {
            stream: false,
            ..request.clone()
        };
        match self.generator.generate(request).await {
            Ok(fragments) => Ok(fragments),
            Err(e) => {
                warn!(model = %model, error = %e, "streaming unavailable, retrying without streaming");
                self.generator.generate(fallback).await
            }
        }
    }

    fn check_model(&self, model: &str) {
        if !self.known_models.is_empty() && !self.known_models.iter().any(|m| m == model) {
            warn!(model = %model, "model is not in generation.models");
        }
    }
}

fn stage(stage: ExchangeStage, model: &str) {
    debug!(stage = %stage, model = %model, "exchange stage");
}

/// Deliver an event. Returns false once the receiver has gone away.
async fn emit(events: Option<&mpsc::Sender<ExchangeEvent>>, event: ExchangeEvent) -> bool {
    match events {
        Some(tx) => tx.send(event).await.is_ok(),
        None => true,
    }
}

/// Load the configured index and answer one question against it.
///
/// `history` is a transcript carried over from a previous session. A missing
/// or incompatible index fails with [`RagError::IndexLoad`].
pub async fn ask(
    config: &Config,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    question: &str,
    history: &str,
    model: Option<&str>,
) -> Result<AskResponse> {
    let params = MmrParams::new(
        config.retrieval.k,
        config.retrieval.fetch_k,
        config.retrieval.lambda_mult,
    )?;
    let index = index_store::load_compatible(&config.index.path, embedder.as_ref()).await?;

    let orchestrator = Orchestrator::new(Arc::new(index), embedder, generator, params)
        .with_known_models(config.generation.models.clone());
    let mut session = Session::with_transcript(history);
    orchestrator.ask(&mut session, question, model).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docqa_core::generation::single_fragment;
    use docqa_core::index::memory::InMemoryIndex;
    use docqa_core::index::IndexInfo;
    use std::sync::Mutex;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    /// Records every request; fails streaming requests when asked to.
    struct RecordingGenerator {
        reject_streaming: bool,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    #[async_trait]
    impl GenerationProvider for RecordingGenerator {
        fn default_model(&self) -> &str {
            "llama3:latest"
        }
        async fn generate(&self, request: GenerationRequest) -> Result<FragmentStream> {
            let stream = request.stream;
            self.requests.lock().unwrap().push(request);
            if stream && self.reject_streaming {
                return Err(RagError::Generation {
                    model: "llama3:latest".into(),
                    message: "stream not supported".into(),
                });
            }
            Ok(single_fragment("answer".to_string()))
        }
    }

    fn orchestrator(generator: Arc<RecordingGenerator>) -> Orchestrator {
        let index = InMemoryIndex::new(IndexInfo {
            model: "fixed".into(),
            dims: 2,
        });
        Orchestrator::new(
            Arc::new(index),
            Arc::new(FixedEmbedder),
            generator,
            MmrParams::default(),
        )
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(ExchangeStage::Received.to_string(), "received");
        assert_eq!(ExchangeStage::Completed.to_string(), "completed");
    }

    #[tokio::test]
    async fn test_streaming_start_failure_retries_without_streaming() {
        let generator = Arc::new(RecordingGenerator {
            reject_streaming: true,
            requests: Mutex::new(Vec::new()),
        });
        let orch = orchestrator(generator.clone());
        let mut session = Session::new();

        let outcome = orch.respond(&mut session, "What?", None, None).await.unwrap();
        assert_eq!(outcome.answer, "answer");
        assert_eq!(outcome.status, TurnStatus::Completed);

        let requests = generator.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].stream);
        assert!(!requests[1].stream);
        assert_eq!(requests[0].prompt, requests[1].prompt);
    }

    #[tokio::test]
    async fn test_empty_index_still_answers() {
        let generator = Arc::new(RecordingGenerator {
            reject_streaming: false,
            requests: Mutex::new(Vec::new()),
        });
        let orch = orchestrator(generator.clone());
        let mut session = Session::new();

        let response = orch.ask(&mut session, "Anything?", Some("mistral:7b")).await.unwrap();
        assert_eq!(response.answer, "answer");
        assert!(response.context.is_empty());

        let requests = generator.requests.lock().unwrap();
        assert_eq!(requests[0].model, "mistral:7b");
        assert!(requests[0].prompt.contains("No relevant context found."));
    }
}
