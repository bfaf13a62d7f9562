//! Batch moderation orchestrator.
//!
//! Wires the trigger engine, the verdict cache, the remote analyzer, and
//! the dispatch fabric into one entry point. Within one batch the output
//! order always equals the input order; cached and freshly analyzed
//! results are merged back into their original slots.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use modgate_common::error::{Error, Result};
use modgate_common::models::{Message, StatusCode, Verdict, Violation, ViolationEvent};
use modgate_common::traits::{AiAnalyzer, CallbackHandler, EventHandler, ProcessedHandler, TokenStorage};
use tokio::sync::watch;
use tracing::warn;

use crate::cache::VerdictCache;
use crate::engine::{EngineStats, TriggerEngine};
use crate::events::{EventName, HandlerRegistry};
use crate::tasks::spawn_cache_sweep_task;

const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;
const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024;
const DEFAULT_MAX_LEARN_TOKEN_LENGTH: usize = 255;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_CACHE_MAX_BYTES: usize = 32 * 1024 * 1024;
const LEARN_PERSIST_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-call behavior switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    /// Forces AI analysis without consulting the trigger pre-filter.
    pub skip_trigger_filter: bool,
}

/// Pipeline construction options. Missing collaborators surface as
/// configuration errors on the first call, not at construction.
pub struct PipelineOptions {
    pub analyzer: Option<Arc<dyn AiAnalyzer>>,
    pub storage: Option<Arc<dyn TokenStorage>>,
    pub callbacks: Option<Arc<dyn CallbackHandler>>,
    pub processed: Option<Arc<dyn ProcessedHandler>>,

    pub confidence_threshold: f64,
    pub sync_interval: Duration,
    pub max_message_size: usize,
    pub max_learn_token_length: usize,
    pub cache_ttl: Duration,
    /// Byte budget for the verdict cache.
    pub cache_max_bytes: usize,
    pub auto_learn: bool,
    /// Wins over `auto_learn` when both are set.
    pub disable_auto_learn: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            analyzer: None,
            storage: None,
            callbacks: None,
            processed: None,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_learn_token_length: DEFAULT_MAX_LEARN_TOKEN_LENGTH,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_max_bytes: DEFAULT_CACHE_MAX_BYTES,
            auto_learn: true,
            disable_auto_learn: false,
        }
    }
}

struct NoopCallbacks;

impl CallbackHandler for NoopCallbacks {}

struct PendingAnalysis {
    index: usize,
    message: Message,
    triggers: Vec<String>,
}

/// Two-stage moderation pipeline.
///
/// Must be created inside a Tokio runtime: construction spawns the cache
/// sweep janitor, and [`shutdown`](Pipeline::shutdown) terminates it along
/// with [`run`](Pipeline::run).
pub struct Pipeline {
    analyzer: Option<Arc<dyn AiAnalyzer>>,
    storage: Option<Arc<dyn TokenStorage>>,
    callbacks: Arc<dyn CallbackHandler>,
    processed: Option<Arc<dyn ProcessedHandler>>,

    engine: TriggerEngine,
    cache: Option<Arc<VerdictCache>>,
    registry: HandlerRegistry,

    confidence_threshold: f64,
    sync_interval: Duration,
    max_message_size: usize,
    max_learn_token_length: usize,
    cache_ttl: Duration,
    auto_learn: bool,

    processed_counts: [AtomicU64; 6],

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Truncates to at most `max` bytes without splitting a UTF-8 sequence.
fn truncate_utf8(data: &str, max: usize) -> &str {
    if data.len() <= max {
        return data;
    }
    let mut end = max;
    while !data.is_char_boundary(end) {
        end -= 1;
    }
    &data[..end]
}

impl Pipeline {
    pub fn new(options: PipelineOptions) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cache_max_bytes = if options.cache_max_bytes == 0 {
            DEFAULT_CACHE_MAX_BYTES
        } else {
            options.cache_max_bytes
        };
        let cache_ttl = if options.cache_ttl.is_zero() {
            DEFAULT_CACHE_TTL
        } else {
            options.cache_ttl
        };
        let cache = VerdictCache::new(cache_max_bytes).map(Arc::new);
        if let Some(cache) = &cache {
            spawn_cache_sweep_task(Arc::clone(cache), cache_ttl, shutdown_rx.clone());
        }

        let auto_learn = options.auto_learn && !options.disable_auto_learn;
        Self {
            analyzer: options.analyzer,
            storage: options.storage,
            callbacks: options.callbacks.unwrap_or_else(|| Arc::new(NoopCallbacks)),
            processed: options.processed,
            engine: TriggerEngine::new(),
            cache,
            registry: HandlerRegistry::new(),
            confidence_threshold: if options.confidence_threshold > 0.0 {
                options.confidence_threshold
            } else {
                DEFAULT_CONFIDENCE_THRESHOLD
            },
            sync_interval: if options.sync_interval.is_zero() {
                DEFAULT_SYNC_INTERVAL
            } else {
                options.sync_interval
            },
            max_message_size: options.max_message_size,
            max_learn_token_length: if options.max_learn_token_length == 0 {
                DEFAULT_MAX_LEARN_TOKEN_LENGTH
            } else {
                options.max_learn_token_length
            },
            cache_ttl,
            auto_learn,
            processed_counts: Default::default(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    fn validated(&self) -> Result<(Arc<dyn AiAnalyzer>, Arc<dyn TokenStorage>)> {
        let analyzer = self
            .analyzer
            .clone()
            .ok_or_else(|| Error::Config("AI analyzer is not configured".into()))?;
        let storage = self
            .storage
            .clone()
            .ok_or_else(|| Error::Config("token storage is not configured".into()))?;
        if self.max_message_size == 0 {
            return Err(Error::Config("invalid max message size: 0".into()));
        }
        Ok((analyzer, storage))
    }

    /// Registers a handler for one named event.
    pub fn on(&self, event: EventName, handler: Arc<dyn EventHandler>) {
        self.registry.on(event, handler);
    }

    pub fn on_allow_clean(&self, handler: Arc<dyn EventHandler>) {
        self.on(EventName::AllowClean, handler);
    }

    pub fn on_mark_abuse(&self, handler: Arc<dyn EventHandler>) {
        self.on(EventName::MarkAbuse, handler);
    }

    pub fn on_human_review(&self, handler: Arc<dyn EventHandler>) {
        self.on(EventName::HumanReview, handler);
    }

    pub fn on_auto_restrict(&self, handler: Arc<dyn EventHandler>) {
        self.on(EventName::AutoRestrict, handler);
    }

    pub fn on_auto_ban_escalate(&self, handler: Arc<dyn EventHandler>) {
        self.on(EventName::AutoBanEscalate, handler);
    }

    pub fn on_critical_escalate(&self, handler: Arc<dyn EventHandler>) {
        self.on(EventName::CriticalEscalate, handler);
    }

    /// Reloads the trigger set from storage into the engine.
    pub async fn sync_once(&self) -> Result<()> {
        let storage = self
            .storage
            .clone()
            .ok_or_else(|| Error::Config("token storage is not configured".into()))?;
        let tokens = storage.get_tokens().await?;
        self.engine.replace_all(&tokens);
        Ok(())
    }

    /// Performs an initial sync, then re-syncs every `sync_interval` until
    /// [`shutdown`](Pipeline::shutdown). Periodic sync failures are logged
    /// and the loop continues; only the initial sync error aborts.
    pub async fn run(&self) -> Result<()> {
        self.validated()?;
        self.sync_once().await?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        if *shutdown_rx.borrow() {
            return Ok(());
        }
        let mut ticker = tokio::time::interval(self.sync_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return Ok(());
                    }
                }
                _ = ticker.tick() => {
                    if let Err(error) = self.sync_once().await {
                        warn!(%error, "token sync failed");
                    }
                }
            }
        }
    }

    /// Stops [`run`](Pipeline::run) and the cache janitor.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn process_message(&self, message: Message) -> Result<Violation> {
        self.process_message_with_options(message, ProcessOptions::default())
            .await
    }

    pub async fn process_message_with_options(
        &self,
        message: Message,
        options: ProcessOptions,
    ) -> Result<Violation> {
        let mut results = self
            .process_batch_with_options(std::slice::from_ref(&message), options)
            .await?;
        results
            .pop()
            .ok_or_else(|| Error::Internal("empty batch result".into()))
    }

    pub async fn process_batch(&self, messages: &[Message]) -> Result<Vec<Violation>> {
        self.process_batch_with_options(messages, ProcessOptions::default())
            .await
    }

    pub async fn process_batch_with_options(
        &self,
        messages: &[Message],
        options: ProcessOptions,
    ) -> Result<Vec<Violation>> {
        let (analyzer, storage) = self.validated()?;
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let mut out: Vec<Option<Violation>> = (0..messages.len()).map(|_| None).collect();
        let mut to_analyze: Vec<PendingAnalysis> = Vec::new();

        for (index, message) in messages.iter().enumerate() {
            let mut prepared = message.clone();
            prepared.data = truncate_utf8(&prepared.data, self.max_message_size).to_string();

            if options.skip_trigger_filter {
                if let Some(cached) = self.cached_verdict(&prepared) {
                    let violation = Violation {
                        message: prepared,
                        verdict: cached,
                        triggered_by_rule: false,
                    };
                    self.record(&violation).await;
                    out[index] = Some(violation);
                } else {
                    to_analyze.push(PendingAnalysis {
                        index,
                        message: prepared,
                        triggers: Vec::new(),
                    });
                }
                continue;
            }

            let triggers = self.engine.find_triggers(&prepared.data);
            if triggers.is_empty() {
                let verdict = Verdict {
                    status: StatusCode::Clean,
                    reason: "no trigger".into(),
                    confidence: 1.0,
                    trigger_tokens: Vec::new(),
                    violator_user_id: prepared.user,
                    message_id: prepared.id,
                };
                let violation = Violation {
                    message: prepared,
                    verdict,
                    triggered_by_rule: false,
                };
                self.record(&violation).await;
                out[index] = Some(violation);
                continue;
            }

            if let Some(mut cached) = self.cached_verdict(&prepared) {
                if cached.trigger_tokens.is_empty() {
                    cached.trigger_tokens = triggers;
                }
                let violation = Violation {
                    message: prepared,
                    verdict: cached,
                    triggered_by_rule: true,
                };
                self.record(&violation).await;
                out[index] = Some(violation);
                continue;
            }

            to_analyze.push(PendingAnalysis {
                index,
                message: prepared,
                triggers,
            });
        }

        if !to_analyze.is_empty() {
            let ai_messages: Vec<Message> =
                to_analyze.iter().map(|p| p.message.clone()).collect();
            let results = analyzer.analyze_batch(&ai_messages).await?;

            let mut by_id: HashMap<i64, Verdict> = HashMap::with_capacity(results.len());
            for verdict in results {
                by_id.insert(verdict.message_id, verdict);
            }

            for pending in to_analyze {
                let mut verdict = by_id.get(&pending.message.id).cloned().unwrap_or_else(|| {
                    Verdict {
                        status: StatusCode::Suspicious,
                        reason: "missing AI result".into(),
                        confidence: 0.0,
                        trigger_tokens: pending.triggers.clone(),
                        violator_user_id: pending.message.user,
                        message_id: pending.message.id,
                    }
                });
                if verdict.violator_user_id == 0 {
                    verdict.violator_user_id = pending.message.user;
                }
                if verdict.message_id == 0 {
                    verdict.message_id = pending.message.id;
                }
                if verdict.trigger_tokens.is_empty() {
                    verdict.trigger_tokens = pending.triggers.clone();
                }

                self.cache_verdict(&pending.message.data, &verdict);
                self.learn(&verdict, &storage);

                let violation = Violation {
                    triggered_by_rule: !pending.triggers.is_empty(),
                    message: pending.message,
                    verdict,
                };
                self.record(&violation).await;
                out[pending.index] = Some(violation);
            }
        }

        out.into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| {
                    Error::Internal(format!("batch result missing at index {index}"))
                })
            })
            .collect()
    }

    /// Cache lookup keyed by the prepared payload. Ids on a shared entry
    /// are rewritten to the current message before the caller sees it.
    fn cached_verdict(&self, message: &Message) -> Option<Verdict> {
        let cache = self.cache.as_ref()?;
        let mut verdict = cache.get(&message.data, Instant::now())?;
        verdict.message_id = message.id;
        verdict.violator_user_id = message.user;
        Some(verdict)
    }

    fn cache_verdict(&self, key: &str, verdict: &Verdict) {
        if let Some(cache) = &self.cache {
            cache.insert(key, verdict.clone(), self.cache_ttl, Instant::now());
        }
    }

    /// Harvests trigger tokens from a confident verdict into the engine and,
    /// for tokens the engine did not already know, into storage. Statuses
    /// below `Suspicious` never feed the learned set.
    fn learn(&self, verdict: &Verdict, storage: &Arc<dyn TokenStorage>) {
        if !self.auto_learn {
            return;
        }
        if verdict.confidence < self.confidence_threshold {
            return;
        }
        if verdict.status < StatusCode::Suspicious {
            return;
        }
        for token in &verdict.trigger_tokens {
            let normalized = token.trim().to_lowercase();
            if normalized.is_empty() {
                continue;
            }
            if normalized.len() > self.max_learn_token_length {
                warn!(
                    token = %normalized,
                    length = normalized.len(),
                    max_length = self.max_learn_token_length,
                    "learned token exceeds max length"
                );
                continue;
            }
            if !self.engine.add_token(&normalized) {
                continue;
            }
            let storage = Arc::clone(storage);
            tokio::spawn(async move {
                match tokio::time::timeout(LEARN_PERSIST_TIMEOUT, storage.add_token(&normalized))
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        warn!(%error, token = %normalized, "token persist failed");
                    }
                    Err(_) => {
                        warn!(token = %normalized, "token persist timed out");
                    }
                }
            });
        }
    }

    async fn record(&self, violation: &Violation) {
        let status = violation.verdict.status;
        self.processed_counts[(status.code() - 1) as usize].fetch_add(1, Ordering::Relaxed);

        self.dispatch_by_status(violation).await;
        let event = ViolationEvent::from(violation);
        self.registry.dispatch(EventName::from(status), &event).await;
    }

    async fn dispatch_by_status(&self, violation: &Violation) {
        let result = match violation.verdict.status {
            StatusCode::Clean => self.callbacks.on_clean(violation).await,
            StatusCode::NonCriticalAbuse => self.callbacks.on_non_critical_abuse(violation).await,
            StatusCode::HumanReview => self.callbacks.on_suspicious(violation).await,
            StatusCode::Suspicious => self.callbacks.on_commercial_off_platform(violation).await,
            StatusCode::CommercialOffPlatform => {
                self.callbacks.on_dangerous_illegal(violation).await
            }
            StatusCode::DangerousIllegal => self.callbacks.on_critical(violation).await,
        };
        if let Err(error) = result {
            warn!(%error, status = violation.verdict.status.code(), "status callback failed");
        }

        if let Some(processed) = &self.processed {
            if let Err(error) = processed.on_processed(violation).await {
                warn!(%error, "processed callback failed");
            }
        }
    }

    /// Count of processed messages per decision code.
    pub fn metrics(&self) -> HashMap<StatusCode, u64> {
        StatusCode::ALL
            .iter()
            .map(|&status| {
                (
                    status,
                    self.processed_counts[(status.code() - 1) as usize].load(Ordering::Relaxed),
                )
            })
            .collect()
    }

    /// Number of trigger tokens currently held in memory.
    pub fn token_count(&self) -> usize {
        self.engine.count()
    }

    pub fn engine_stats(&self) -> EngineStats {
        self.engine.stats()
    }
}
