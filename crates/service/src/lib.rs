//! Memory service: wiring root and public API
//!
//! One `MemoryService` owns the wired subsystems (graph store, providers,
//! KV cache, write coordinator, read runtime, forgetting scheduler, views)
//! and exposes the engine's external interface: the write API, the read
//! API (plain and streaming), the forgetting API and the perceptual &
//! episodic projections.

pub mod cache;
pub mod reflection;
pub mod views;

use std::sync::Arc;

use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use engram_config::{
    ConfigProvider, ForgettingConfig, Language, MemoryConfig, OntologyRegistry, Settings,
    StaticConfigProvider,
};
use engram_core::types::views::{
    EpisodicOverviewItem, EpisodicTimeRange, LatestMemory, MemoryCounts,
};
use engram_core::{
    Clock, DialoguePayload, Embedder, GraphStore, IngestReceipt, InMemoryKvCache, KvCache,
    LanguageModel, MemoryError, MemoryType, PerceptualType, Reranker, Result, SystemClock,
};
use engram_engine::{ActivationEngine, CurvePoint, ForgettingReport, ForgettingScheduler};
use engram_extraction::WriteCoordinator;
use engram_graph::MemoryGraph;
use engram_llm::ProviderFactory;
use engram_retrieval::{Retriever, RetrieverConfig};
use engram_runtime::{
    ReadEvent, ReadRequest, ReadResponse, ReadRuntime, ReadRuntimeConfig, SearchSwitch,
    SessionConfig, SessionStore,
};

pub use cache::RedisKvCache;
pub use reflection::{
    EmotionSuggestion, ImplicitProfile, ReflectionEngine, ReflectionOutcome,
};
pub use views::{EmotionRecord, EpisodicDetail, MemoryViews};

/// Initialise tracing from the observability settings. Call once at
/// process start; subsequent calls are ignored.
pub fn init_tracing(settings: &Settings) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.observability.log_filter.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if settings.observability.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_ok() {
        info!("tracing initialised");
    }
}

/// Everything the service needs, wired once per process
pub struct MemoryService {
    config_provider: Arc<dyn ConfigProvider>,
    store: Arc<dyn GraphStore>,
    llm: Arc<dyn LanguageModel>,
    embedder: Arc<dyn Embedder>,
    clock: Arc<dyn Clock>,
    coordinator: WriteCoordinator,
    runtime: Arc<ReadRuntime>,
    scheduler: ForgettingScheduler,
    session: Arc<SessionStore>,
    views: MemoryViews,
    reflection: ReflectionEngine,
}

/// Builder for the wiring root. Defaults give a fully embedded service:
/// in-process graph, in-memory KV cache, default config provider.
pub struct MemoryServiceBuilder {
    llm: Option<Arc<dyn LanguageModel>>,
    embedder: Option<Arc<dyn Embedder>>,
    reranker: Option<Arc<dyn Reranker>>,
    store: Option<Arc<dyn GraphStore>>,
    kv: Option<Arc<dyn KvCache>>,
    config_provider: Option<Arc<dyn ConfigProvider>>,
    clock: Option<Arc<dyn Clock>>,
    ontology: OntologyRegistry,
    retriever_config: RetrieverConfig,
    runtime_config: ReadRuntimeConfig,
    session_config: SessionConfig,
    language: Language,
    distributed_forgetting_lock: bool,
}

impl Default for MemoryServiceBuilder {
    fn default() -> Self {
        Self {
            llm: None,
            embedder: None,
            reranker: None,
            store: None,
            kv: None,
            config_provider: None,
            clock: None,
            ontology: OntologyRegistry::curated(),
            retriever_config: RetrieverConfig::default(),
            runtime_config: ReadRuntimeConfig::default(),
            session_config: SessionConfig::default(),
            language: Language::default(),
            distributed_forgetting_lock: false,
        }
    }
}

impl MemoryServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire providers from settings (HTTP LLM/embedder/reranker, Redis KV
    /// when configured)
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let factory = ProviderFactory::new(settings.providers.clone());
        let mut builder = Self::new()
            .with_llm(factory.language_model()?)
            .with_embedder(factory.embedder()?);
        if let Some(reranker) = factory.reranker()? {
            builder = builder.with_reranker(reranker);
        }
        if let Some(url) = &settings.cache.redis_url {
            builder = builder
                .with_kv(Arc::new(RedisKvCache::connect(url).await?))
                .with_distributed_forgetting_lock();
        }
        Ok(builder)
    }

    pub fn with_llm(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn GraphStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_kv(mut self, kv: Arc<dyn KvCache>) -> Self {
        self.kv = Some(kv);
        self
    }

    pub fn with_config_provider(mut self, provider: Arc<dyn ConfigProvider>) -> Self {
        self.config_provider = Some(provider);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_ontology(mut self, ontology: OntologyRegistry) -> Self {
        self.ontology = ontology;
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// Take the KV-backed named lock before each forgetting cycle;
    /// required when more than one process runs cycles.
    pub fn with_distributed_forgetting_lock(mut self) -> Self {
        self.distributed_forgetting_lock = true;
        self
    }

    pub fn build(self) -> Result<MemoryService> {
        let llm = self
            .llm
            .ok_or_else(|| MemoryError::validation("a language model must be wired"))?;
        let embedder = self
            .embedder
            .ok_or_else(|| MemoryError::validation("an embedder must be wired"))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store: Arc<dyn GraphStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryGraph::with_clock(clock.clone())?),
        };
        let kv: Arc<dyn KvCache> = self.kv.unwrap_or_else(|| Arc::new(InMemoryKvCache::new()));
        let config_provider: Arc<dyn ConfigProvider> = self
            .config_provider
            .unwrap_or_else(|| Arc::new(StaticConfigProvider::new()));

        let session = Arc::new(SessionStore::new(
            kv.clone(),
            clock.clone(),
            self.session_config,
        ));
        let retriever = Arc::new(Retriever::new(
            store.clone(),
            embedder.clone(),
            self.reranker,
            self.retriever_config,
        ));
        let runtime = Arc::new(ReadRuntime::new(
            llm.clone(),
            retriever,
            store.clone(),
            session.clone(),
            clock.clone(),
            self.runtime_config,
        ));
        let coordinator = WriteCoordinator::new(
            llm.clone(),
            embedder.clone(),
            store.clone(),
            clock.clone(),
            self.ontology,
        );
        let mut scheduler = ForgettingScheduler::new(
            store.clone(),
            llm.clone(),
            embedder.clone(),
            clock.clone(),
            self.language,
        );
        if self.distributed_forgetting_lock {
            scheduler = scheduler.with_distributed_lock(kv.clone());
        }
        let views = MemoryViews::new(store.clone(), clock.clone());
        let reflection =
            ReflectionEngine::new(store.clone(), llm.clone(), kv.clone(), clock.clone());

        Ok(MemoryService {
            config_provider,
            store,
            llm,
            embedder,
            clock,
            coordinator,
            runtime,
            scheduler,
            session,
            views,
            reflection,
        })
    }
}

impl MemoryService {
    pub fn builder() -> MemoryServiceBuilder {
        MemoryServiceBuilder::new()
    }

    async fn resolve_config(&self, config_id: &str) -> Result<MemoryConfig> {
        self.config_provider.get(config_id).await
    }

    // ── Write API ─────────────────────────────────────────────────────────

    /// Ingest one dialogue for a tenant
    pub async fn ingest_dialogue(
        &self,
        end_user_id: &str,
        config_id: &str,
        payload: &DialoguePayload,
    ) -> Result<IngestReceipt> {
        if end_user_id.trim().is_empty() {
            return Err(MemoryError::validation("end_user_id must not be empty"));
        }
        let config = self.resolve_config(config_id).await?;

        let session_context = if config.extraction.include_dialogue_context {
            let turns = self.session.history(end_user_id).await.unwrap_or_default();
            Some(SessionStore::render(&turns))
        } else {
            None
        };

        let receipt = self
            .coordinator
            .ingest(
                end_user_id,
                &config,
                payload,
                session_context.as_deref(),
                None,
            )
            .await?;

        // Optional self-reflection pass every `iteration_period` writes.
        match self.reflection.record_write(end_user_id, &config).await {
            Ok(true) => {
                if let Err(e) = self.reflection.reflect(end_user_id, &config).await {
                    tracing::warn!(error = %e, "reflection pass failed");
                }
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "reflection counter update failed"),
        }

        Ok(receipt)
    }

    /// Manually run one reflection pass for a tenant
    pub async fn run_reflection(
        &self,
        end_user_id: &str,
        config_id: &str,
    ) -> Result<ReflectionOutcome> {
        let config = self.resolve_config(config_id).await?;
        self.reflection.reflect(end_user_id, &config).await
    }

    // ── Read API ──────────────────────────────────────────────────────────

    pub async fn read_memory(
        &self,
        end_user_id: &str,
        query: &str,
        search_switch: u8,
        config_id: &str,
    ) -> Result<ReadResponse> {
        let config = self.resolve_config(config_id).await?;
        let request = ReadRequest {
            end_user_id: end_user_id.to_string(),
            query: query.to_string(),
            search_switch: SearchSwitch::try_from(search_switch)
                .map_err(MemoryError::Validation)?,
            config_id: config_id.to_string(),
            deadline: None,
        };
        self.runtime.read(&request, &config).await
    }

    /// Streaming read: intermediate outputs, then the final answer event
    pub async fn read_memory_stream(
        &self,
        end_user_id: &str,
        query: &str,
        search_switch: u8,
        config_id: &str,
    ) -> Result<ReceiverStream<ReadEvent>> {
        let config = self.resolve_config(config_id).await?;
        let request = ReadRequest {
            end_user_id: end_user_id.to_string(),
            query: query.to_string(),
            search_switch: SearchSwitch::try_from(search_switch)
                .map_err(MemoryError::Validation)?,
            config_id: config_id.to_string(),
            deadline: None,
        };
        Ok(self.runtime.clone().stream(request, config))
    }

    // ── Forgetting API ────────────────────────────────────────────────────

    pub async fn trigger_forgetting_cycle(
        &self,
        end_user_id: Option<&str>,
        max_batch: Option<usize>,
        min_days: Option<i64>,
        config_id: &str,
    ) -> Result<ForgettingReport> {
        let mut forgetting = self.resolve_config(config_id).await?.forgetting;
        if let Some(max_batch) = max_batch {
            forgetting.max_batch = max_batch;
        }
        if let Some(min_days) = min_days {
            forgetting.min_days = min_days;
        }
        forgetting.validate()?;
        self.scheduler.run_cycle(end_user_id, &forgetting).await
    }

    /// Projected activation per day for a single access at day zero
    pub async fn forgetting_curve(
        &self,
        importance: f64,
        days: u32,
        config_id: &str,
    ) -> Result<Vec<CurvePoint>> {
        let config = self.resolve_config(config_id).await?;
        let engine = ActivationEngine::for_curve(&config.forgetting);
        Ok(engine.forgetting_curve(self.clock.now(), importance, days))
    }

    pub async fn get_forgetting_config(&self, config_id: &str) -> Result<ForgettingConfig> {
        Ok(self.resolve_config(config_id).await?.forgetting)
    }

    /// Partial update of the forgetting parameters for one config
    /// generation; fields are validated before persisting.
    pub async fn update_forgetting_config(
        &self,
        config_id: &str,
        fields: &serde_json::Value,
    ) -> Result<ForgettingConfig> {
        let mut config = self.resolve_config(config_id).await?;
        config.forgetting.apply_fields(fields)?;
        let updated = config.forgetting.clone();
        self.config_provider.put(config).await?;
        Ok(updated)
    }

    // ── Perceptual & episodic views ───────────────────────────────────────

    pub async fn memory_count(&self, end_user_id: &str) -> Result<MemoryCounts> {
        self.views.memory_count(end_user_id).await
    }

    pub async fn latest_memory(
        &self,
        end_user_id: &str,
        perceptual_type: PerceptualType,
    ) -> Result<Option<LatestMemory>> {
        self.views.latest_memory(end_user_id, perceptual_type).await
    }

    pub async fn episodic_overview(
        &self,
        end_user_id: &str,
        time_range: EpisodicTimeRange,
        episodic_type: Option<MemoryType>,
        title_keyword: Option<&str>,
    ) -> Result<Vec<EpisodicOverviewItem>> {
        self.views
            .episodic_overview(end_user_id, time_range, episodic_type, title_keyword, 100)
            .await
    }

    pub async fn episodic_detail(
        &self,
        end_user_id: &str,
        summary_id: &str,
    ) -> Result<Option<EpisodicDetail>> {
        self.views.episodic_detail(end_user_id, summary_id).await
    }

    // ── Accessors for embedding callers ───────────────────────────────────

    pub fn store(&self) -> Arc<dyn GraphStore> {
        self.store.clone()
    }

    pub fn session(&self) -> Arc<SessionStore> {
        self.session.clone()
    }

    pub fn language_model(&self) -> Arc<dyn LanguageModel> {
        self.llm.clone()
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        self.embedder.clone()
    }
}
