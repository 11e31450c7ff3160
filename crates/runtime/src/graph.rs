//! Read dataflow runtime
//!
//! Executes a query as route → split → expand → retrieve → verify →
//! summarise → persist. Nodes are pure `ReadState → ReadState` functions;
//! enrichment failures degrade to defaults with an `error` marker instead
//! of failing the read. Sub-question retrievals fan out under a bounded
//! semaphore; a deadline cancels outstanding work (futures are dropped)
//! and returns the best-effort answer flagged `truncated`, skipping the
//! session write.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use engram_config::constants::runtime as runtime_constants;
use engram_config::{Language, MemoryConfig};
use engram_core::{
    ChatMessage, GraphNode, GraphStore, LanguageModel, NodeLabel, Result, SearchMode,
};
use engram_engine::ActivationEngine;
use engram_retrieval::{Retriever, SearchRequest};

use crate::prompts;
use crate::session::SessionStore;
use crate::state::{IntermediateOutput, ReadState, SearchSwitch, SubQuestion};

/// Read request (§ read API)
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub end_user_id: String,
    pub query: String,
    pub search_switch: SearchSwitch,
    pub config_id: String,
    /// Overall deadline; default applies when unset
    pub deadline: Option<Duration>,
}

/// Final read result
#[derive(Debug, Clone)]
pub struct ReadResponse {
    pub answer: String,
    pub intermediate_outputs: Vec<IntermediateOutput>,
    pub end_user_id: String,
    pub truncated: bool,
}

/// Streamed event: intermediate outputs, then exactly one answer
#[derive(Debug, Clone)]
pub enum ReadEvent {
    Intermediate(IntermediateOutput),
    Answer { answer: String, truncated: bool },
}

#[derive(Debug, Clone)]
pub struct ReadRuntimeConfig {
    pub retrieval_concurrency: usize,
    pub default_deadline: Duration,
    pub evidence_limit: usize,
}

impl Default for ReadRuntimeConfig {
    fn default() -> Self {
        Self {
            retrieval_concurrency: runtime_constants::DEFAULT_RETRIEVAL_CONCURRENCY,
            default_deadline: Duration::from_secs(runtime_constants::DEFAULT_READ_DEADLINE_SECS),
            evidence_limit: 20,
        }
    }
}

pub struct ReadRuntime {
    llm: Arc<dyn LanguageModel>,
    retriever: Arc<Retriever>,
    store: Arc<dyn GraphStore>,
    session: Arc<SessionStore>,
    clock: Arc<dyn engram_core::Clock>,
    config: ReadRuntimeConfig,
}

impl ReadRuntime {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        retriever: Arc<Retriever>,
        store: Arc<dyn GraphStore>,
        session: Arc<SessionStore>,
        clock: Arc<dyn engram_core::Clock>,
        config: ReadRuntimeConfig,
    ) -> Self {
        Self {
            llm,
            retriever,
            store,
            session,
            clock,
            config,
        }
    }

    fn sentinel(language: Language) -> &'static str {
        match language {
            Language::Zh => runtime_constants::SENTINEL_ANSWER_ZH,
            Language::En => runtime_constants::SENTINEL_ANSWER_EN,
        }
    }

    /// Run the full dataflow and return the final response
    pub async fn read(
        &self,
        request: &ReadRequest,
        memory_config: &MemoryConfig,
    ) -> Result<ReadResponse> {
        self.read_with_events(request, memory_config, None).await
    }

    /// Run the dataflow, emitting events as nodes complete
    pub async fn read_with_events(
        &self,
        request: &ReadRequest,
        memory_config: &MemoryConfig,
        events: Option<mpsc::Sender<ReadEvent>>,
    ) -> Result<ReadResponse> {
        let deadline = request.deadline.unwrap_or(self.config.default_deadline);
        let emitted: Arc<Mutex<Vec<IntermediateOutput>>> = Arc::new(Mutex::new(Vec::new()));

        let outcome = tokio::time::timeout(
            deadline,
            self.pipeline(request, memory_config, emitted.clone(), events.clone()),
        )
        .await;

        let response = match outcome {
            Ok(result) => result?,
            Err(_) => {
                // Deadline hit: outstanding fan-outs were cancelled by
                // dropping the pipeline future. No session write happens.
                warn!(
                    end_user_id = %request.end_user_id,
                    ?deadline,
                    "read deadline exceeded, returning truncated answer"
                );
                ReadResponse {
                    answer: Self::sentinel(memory_config.language).to_string(),
                    intermediate_outputs: emitted.lock().clone(),
                    end_user_id: request.end_user_id.clone(),
                    truncated: true,
                }
            }
        };

        if let Some(events) = events {
            let _ = events
                .send(ReadEvent::Answer {
                    answer: response.answer.clone(),
                    truncated: response.truncated,
                })
                .await;
        }
        Ok(response)
    }

    async fn pipeline(
        &self,
        request: &ReadRequest,
        memory_config: &MemoryConfig,
        emitted: Arc<Mutex<Vec<IntermediateOutput>>>,
        events: Option<mpsc::Sender<ReadEvent>>,
    ) -> Result<ReadResponse> {
        let emit = |output: IntermediateOutput| {
            emitted.lock().push(output.clone());
            let events = events.clone();
            async move {
                if let Some(events) = events {
                    let _ = events.send(ReadEvent::Intermediate(output)).await;
                }
            }
        };

        let history = self
            .session
            .history(&request.end_user_id)
            .await
            .map(|turns| SessionStore::render(&turns))
            .unwrap_or_default();

        let mut state = ReadState::new(&request.end_user_id, &request.query, request.search_switch);
        state.session_history = history;

        let input_summary = IntermediateOutput::new(
            "input_summary",
            "输入概要",
            json!({
                "query": state.query,
                "search_switch": u8::from(state.search_switch),
                "has_history": !state.session_history.is_empty(),
            }),
        );
        emit(input_summary.clone()).await;
        state = state.with_output(input_summary);

        if state.search_switch == SearchSwitch::Deep {
            let (next, output) = self.node_split(state).await;
            emit(output).await;
            state = next;

            let (next, output) = self.node_expand(state).await;
            emit(output).await;
            state = next;
        }

        let (next, output) = self.node_search(state).await?;
        emit(output).await;
        state = next;

        if state.search_switch == SearchSwitch::Fast {
            let (next, output) = self.node_verify(state).await;
            emit(output).await;
            state = next;
        }

        state = self.node_answer(state, memory_config.language).await;
        self.node_persist(&state, memory_config).await;

        info!(
            end_user_id = %state.end_user_id,
            evidence = state.evidence.len(),
            truncated = state.truncated,
            "read complete"
        );
        Ok(ReadResponse {
            answer: state
                .answer
                .unwrap_or_else(|| Self::sentinel(memory_config.language).to_string()),
            intermediate_outputs: state.outputs,
            end_user_id: state.end_user_id,
            truncated: state.truncated,
        })
    }

    /// Deep mode: decompose the query into typed sub-questions
    async fn node_split(&self, state: ReadState) -> (ReadState, IntermediateOutput) {
        let messages = [
            ChatMessage::system(prompts::split_system_prompt(&state.session_history)),
            ChatMessage::user(state.query.clone()),
        ];

        let output = match self
            .llm
            .chat_structured(&messages, &prompts::split_schema())
            .await
        {
            Ok(value) => {
                let questions: Vec<SubQuestion> = value
                    .get("questions")
                    .and_then(|v| v.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .enumerate()
                            .filter_map(|(index, item)| {
                                Some(SubQuestion {
                                    id: format!("Q{}", index + 1),
                                    question: item.get("question")?.as_str()?.to_string(),
                                    question_type: item
                                        .get("type")
                                        .and_then(|t| t.as_str())
                                        .unwrap_or("factual")
                                        .to_string(),
                                    reason: item
                                        .get("reason")
                                        .and_then(|r| r.as_str())
                                        .unwrap_or_default()
                                        .to_string(),
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                let mut next = state;
                next.sub_questions = questions;
                let output = IntermediateOutput::new(
                    "problem_split",
                    "问题拆分",
                    serde_json::to_value(&next.sub_questions).unwrap_or_default(),
                );
                return (next.with_output(output.clone()), output);
            }
            Err(e) => {
                warn!(error = %e, "problem split failed, continuing with the original query");
                IntermediateOutput::degraded("problem_split", "问题拆分", e.to_string())
            }
        };
        (state.with_output(output.clone()), output)
    }

    /// Deep mode: expand each sub-question into rephrasings
    async fn node_expand(&self, state: ReadState) -> (ReadState, IntermediateOutput) {
        let mut questions: Vec<String> = vec![state.query.clone()];
        questions.extend(state.sub_questions.iter().map(|q| q.question.clone()));

        let calls = questions.iter().map(|question| {
            let messages = [
                ChatMessage::system(prompts::expansion_system_prompt()),
                ChatMessage::user(question.clone()),
            ];
            async move {
                self.llm
                    .chat_structured(&messages, &prompts::expansion_schema())
                    .await
            }
        });

        let mut expansions: Vec<String> = Vec::new();
        let mut first_error: Option<String> = None;
        for result in join_all(calls).await {
            match result {
                Ok(value) => {
                    if let Some(items) = value.get("expansions").and_then(|v| v.as_array()) {
                        expansions.extend(
                            items
                                .iter()
                                .filter_map(|v| v.as_str())
                                .map(str::to_string),
                        );
                    }
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e.to_string());
                    }
                }
            }
        }
        expansions.sort();
        expansions.dedup();

        let mut next = state;
        next.expansions = expansions;
        let output = match first_error {
            Some(error) if next.expansions.is_empty() => {
                warn!(%error, "problem expansion failed entirely");
                IntermediateOutput::degraded("problem_extension", "问题扩写", error)
            }
            _ => IntermediateOutput::new(
                "problem_extension",
                "问题扩写",
                json!(next.expansions),
            ),
        };
        (next.with_output(output.clone()), output)
    }

    /// Fan out hybrid retrieval over every formulation of the question
    async fn node_search(&self, state: ReadState) -> Result<(ReadState, IntermediateOutput)> {
        let labels: Vec<NodeLabel> = match state.search_switch {
            SearchSwitch::Fast => vec![NodeLabel::MemorySummary],
            SearchSwitch::Deep | SearchSwitch::Quick => NodeLabel::retrievable().to_vec(),
        };

        let semaphore = Arc::new(Semaphore::new(self.config.retrieval_concurrency));
        let questions = state.retrieval_questions();
        let searches = questions.iter().map(|question| {
            let semaphore = semaphore.clone();
            let request = SearchRequest::new(&state.end_user_id, question, SearchMode::Hybrid)
                .with_labels(labels.clone());
            async move {
                let _permit = semaphore.acquire().await;
                self.retriever.search(&request).await
            }
        });

        let mut evidence = Vec::new();
        for result in join_all(searches).await {
            match result {
                Ok(hits) => evidence.extend(hits),
                Err(e) => warn!(error = %e, "one retrieval arm failed"),
            }
        }
        // Keep the best-scoring copy of each id, then rank.
        evidence.sort_by(|a, b| {
            a.id.cmp(&b.id).then(
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });
        evidence.dedup_by(|a, b| a.id == b.id);
        evidence.sort_by(|a, b| a.rank_cmp(b));
        evidence.truncate(self.config.evidence_limit);

        debug!(
            questions = questions.len(),
            evidence = evidence.len(),
            "retrieval fan-out complete"
        );

        let mut next = state;
        next.evidence = evidence;
        let output = IntermediateOutput::new(
            "retrieval_summary",
            "检索结果",
            json!(next
                .evidence
                .iter()
                .map(|h| json!({
                    "id": h.id,
                    "label": h.label.as_str(),
                    "score": h.score,
                    "content": h.content,
                }))
                .collect::<Vec<_>>()),
        );
        Ok((next.with_output(output.clone()), output))
    }

    /// Fast mode: discard evidence its own sources do not support
    async fn node_verify(&self, state: ReadState) -> (ReadState, IntermediateOutput) {
        if state.evidence.is_empty() {
            let output = IntermediateOutput::new("retrieval_summary", "证据校验", json!([]));
            return (state.with_output(output.clone()), output);
        }

        // Pair each hit with its source excerpts from the graph.
        let mut items: Vec<(String, String)> = Vec::with_capacity(state.evidence.len());
        for hit in &state.evidence {
            let source = match hit.label {
                NodeLabel::MemorySummary => self
                    .store
                    .summary_detail(&state.end_user_id, &hit.id)
                    .await
                    .ok()
                    .flatten()
                    .map(|detail| {
                        detail
                            .chunks
                            .iter()
                            .map(|c| c.content.clone())
                            .collect::<Vec<_>>()
                            .join(" / ")
                    })
                    .unwrap_or_default(),
                _ => String::new(),
            };
            items.push((hit.content.clone(), source));
        }

        // Hits without recoverable sources stay unverified but kept.
        let verifiable: Vec<(usize, &(String, String))> = items
            .iter()
            .enumerate()
            .filter(|(_, (_, source))| !source.is_empty())
            .collect();
        if verifiable.is_empty() {
            let output = IntermediateOutput::new("retrieval_summary", "证据校验", json!([]));
            return (state.with_output(output.clone()), output);
        }

        let prompt_items: Vec<(String, String)> = verifiable
            .iter()
            .map(|(_, pair)| (*pair).clone())
            .collect();
        let messages = [
            ChatMessage::system(prompts::verification_system_prompt()),
            ChatMessage::user(prompts::verification_user_prompt(&prompt_items)),
        ];

        match self
            .llm
            .chat_structured(&messages, &prompts::verification_schema())
            .await
        {
            Ok(value) => {
                let mut unsupported: Vec<usize> = Vec::new();
                if let Some(verdicts) = value.get("verdicts").and_then(|v| v.as_array()) {
                    for verdict in verdicts {
                        let (Some(index), Some(supported)) = (
                            verdict.get("index").and_then(|i| i.as_u64()),
                            verdict.get("supported").and_then(|s| s.as_bool()),
                        ) else {
                            continue;
                        };
                        if !supported {
                            if let Some((evidence_idx, _)) = verifiable.get(index as usize) {
                                unsupported.push(*evidence_idx);
                            }
                        }
                    }
                }

                let mut next = state;
                let discarded = unsupported.len();
                let mut keep_index = 0usize;
                next.evidence.retain(|_| {
                    let keep = !unsupported.contains(&keep_index);
                    keep_index += 1;
                    keep
                });

                debug!(discarded, "verification discarded unsupported evidence");
                let output = IntermediateOutput::new(
                    "retrieval_summary",
                    "证据校验",
                    json!({"kept": next.evidence.len(), "discarded": discarded}),
                );
                (next.with_output(output.clone()), output)
            }
            Err(e) => {
                warn!(error = %e, "verification failed, keeping evidence unverified");
                let output =
                    IntermediateOutput::degraded("retrieval_summary", "证据校验", e.to_string());
                (state.with_output(output.clone()), output)
            }
        }
    }

    /// Compose the final answer from verified evidence and session history
    async fn node_answer(&self, state: ReadState, language: Language) -> ReadState {
        let mut next = state;
        if next.evidence.is_empty() {
            next.answer = Some(Self::sentinel(language).to_string());
            return next;
        }

        let evidence_texts: Vec<String> =
            next.evidence.iter().map(|h| h.content.clone()).collect();
        let messages = [
            ChatMessage::system(prompts::answer_system_prompt(
                language,
                &next.session_history,
            )),
            ChatMessage::user(prompts::answer_user_prompt(&next.query, &evidence_texts)),
        ];

        match self.llm.chat(&messages).await {
            Ok(answer) if !answer.trim().is_empty() => {
                next.answer = Some(answer.trim().to_string());
            }
            Ok(_) => next.answer = Some(Self::sentinel(language).to_string()),
            Err(e) => {
                warn!(error = %e, "answer synthesis failed, returning sentinel");
                next.outputs.push(IntermediateOutput::degraded(
                    "input_summary",
                    "回答生成",
                    e.to_string(),
                ));
                next.answer = Some(Self::sentinel(language).to_string());
            }
        }
        next
    }

    /// Session write + activation updates for surfaced evidence
    async fn node_persist(&self, state: &ReadState, memory_config: &MemoryConfig) {
        if state.truncated {
            return;
        }
        let Some(answer) = &state.answer else {
            return;
        };

        if let Err(e) = self
            .session
            .append(&state.end_user_id, &state.query, answer)
            .await
        {
            warn!(error = %e, "session write failed");
        }

        let engine = ActivationEngine::new(&memory_config.forgetting);
        let now = self.clock.now();
        let ids: Vec<String> = state
            .evidence
            .iter()
            .filter(|h| h.label.has_activation())
            .map(|h| h.id.clone())
            .collect();
        if ids.is_empty() {
            return;
        }

        let nodes = match self.store.fetch_by_ids(&ids).await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "access-update fetch failed");
                return;
            }
        };
        for node in nodes {
            let update = match &node {
                GraphNode::Statement(s) => engine.on_access(
                    &s.id,
                    NodeLabel::Statement,
                    &s.access_history,
                    s.importance_score,
                    now,
                ),
                GraphNode::ExtractedEntity(e) => engine.on_access(
                    &e.id,
                    NodeLabel::ExtractedEntity,
                    &e.access_history,
                    e.importance_score,
                    now,
                ),
                _ => continue,
            };
            if let Err(e) = self.store.update_activation(&update).await {
                warn!(node_id = %update.node_id, error = %e, "activation update failed");
            }
        }
    }
}

impl ReadRuntime {
    /// Streaming variant: intermediate outputs as they are produced,
    /// terminated by exactly one `Answer` event.
    pub fn stream(
        self: Arc<Self>,
        request: ReadRequest,
        memory_config: MemoryConfig,
    ) -> tokio_stream::wrappers::ReceiverStream<ReadEvent> {
        let runtime = self;
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            if let Err(e) = runtime
                .read_with_events(&request, &memory_config, Some(tx.clone()))
                .await
            {
                warn!(error = %e, "streaming read failed");
                let _ = tx
                    .send(ReadEvent::Answer {
                        answer: Self::sentinel(memory_config.language).to_string(),
                        truncated: false,
                    })
                    .await;
            }
        });
        tokio_stream::wrappers::ReceiverStream::new(rx)
    }
}
