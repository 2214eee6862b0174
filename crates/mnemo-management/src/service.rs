use mnemo_config::MnemoConfig;
use mnemo_core::*;
use mnemo_llm::LlmProvider;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::Collections;
use crate::consolidation::{ConsolidationRequest, ConsolidationResult, Consolidator};
use crate::forgetting::Forgetter;
use crate::report::{ExportFormat, MemoryStats, Reporter};
use crate::scheduler::{ForgettingScheduler, parse_schedule};

/// Management surface for an agent's memory.
///
/// Enabling a forgetting policy starts the scheduled sweep if it is not
/// already running. The sweep task is aborted when the service is dropped.
pub struct ManagementService {
    index: Arc<dyn MemoryIndex>,
    forgetter: Forgetter,
    consolidator: Consolidator,
    reporter: Reporter,
    cron: String,
    check_interval: Option<Duration>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl ManagementService {
    pub fn new(
        index: Arc<dyn MemoryIndex>,
        vectors: Arc<dyn VectorStore>,
        llm: Arc<dyn LlmProvider>,
        config: &MnemoConfig,
    ) -> Result<Self> {
        let management = &config.management;
        parse_schedule(&management.forgetting_cron)?;

        let collections = Collections::from_config(config);
        let forgetter = Forgetter::new(index.clone(), vectors.clone(), collections.clone());
        let model = management
            .consolidation_model
            .clone()
            .unwrap_or_else(|| config.llm.model.clone());
        let consolidator = Consolidator::new(
            index.clone(),
            vectors,
            llm,
            collections,
            model,
            management.consolidation_temperature,
        );
        let reporter = Reporter::new(index.clone(), forgetter.clone());

        Ok(Self {
            index,
            forgetter,
            consolidator,
            reporter,
            cron: management.forgetting_cron.clone(),
            check_interval: None,
            scheduler: Mutex::new(None),
        })
    }

    /// How often the scheduler checks whether a sweep is due.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = Some(interval);
        self
    }

    pub fn forgetter(&self) -> &Forgetter {
        &self.forgetter
    }

    // ── Filters ────────────────────────────────────────────────

    /// Replace the agent's filter rules. Importance rules must parse.
    pub async fn set_filter_rules(&self, agent_id: AgentId, rules: Vec<FilterRule>) -> Result<()> {
        let empty = Metadata::new();
        let sample = FilterSubject {
            content: "",
            metadata: &empty,
            importance: Some(0.0),
        };
        for rule in &rules {
            if rule.condition.trim().is_empty() {
                return Err(MnemoError::validation("condition", "must not be empty"));
            }
            rule.matches(&sample)?;
        }

        let mut config = self.index.agent_config(agent_id).await?;
        config.filter_rules = rules;
        self.index.save_agent_config(agent_id, &config).await?;
        info!(agent_id = %agent_id, rules = config.filter_rules.len(), "filter rules updated");
        Ok(())
    }

    pub async fn filter_rules(&self, agent_id: AgentId) -> Result<Vec<FilterRule>> {
        Ok(self.index.agent_config(agent_id).await?.filter_rules)
    }

    pub async fn apply_filters(&self, agent_id: AgentId, subject: &FilterSubject<'_>) -> Result<FilterVerdict> {
        let rules = self.filter_rules(agent_id).await?;
        let verdict = evaluate_rules(&rules, subject);
        debug!(agent_id = %agent_id, rejected = verdict.is_rejected(), "filters applied");
        Ok(verdict)
    }

    // ── Forgetting ─────────────────────────────────────────────

    pub async fn set_forgetting_policy(&self, agent_id: AgentId, policy: ForgettingPolicy) -> Result<()> {
        policy.validate()?;
        let mut config = self.index.agent_config(agent_id).await?;
        let enabled = policy.enabled;
        config.forgetting_policy = Some(policy);
        self.index.save_agent_config(agent_id, &config).await?;
        info!(agent_id = %agent_id, enabled, "forgetting policy updated");

        if enabled {
            self.start_scheduler()?;
        }
        Ok(())
    }

    pub async fn forgetting_policy(&self, agent_id: AgentId) -> Result<Option<ForgettingPolicy>> {
        Ok(self.index.agent_config(agent_id).await?.forgetting_policy)
    }

    pub async fn forget_memories(&self, agent_id: AgentId, policy: &ForgettingPolicy) -> Result<usize> {
        self.forgetter.forget_memories(agent_id, policy).await
    }

    pub async fn run_forgetting_sweep(&self) -> Result<usize> {
        self.forgetter.run_sweep().await
    }

    /// Spawn the sweep task. Returns false if it was already running.
    pub fn start_scheduler(&self) -> Result<bool> {
        let mut slot = self.scheduler.lock();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(false);
        }
        let mut scheduler = ForgettingScheduler::new(&self.cron, self.forgetter.clone())?;
        if let Some(interval) = self.check_interval {
            scheduler = scheduler.with_check_interval(interval);
        }
        *slot = Some(scheduler.spawn());
        Ok(true)
    }

    pub fn scheduler_running(&self) -> bool {
        self.scheduler.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop_scheduler(&self) {
        if let Some(handle) = self.scheduler.lock().take() {
            handle.abort();
            info!("forgetting scheduler stopped");
        }
    }

    // ── Consolidation & reporting ──────────────────────────────

    pub async fn consolidate_memories(
        &self,
        agent_id: AgentId,
        request: &ConsolidationRequest,
    ) -> Result<ConsolidationResult> {
        self.consolidator.consolidate(agent_id, request).await
    }

    pub async fn memory_stats(&self, agent_id: AgentId) -> Result<MemoryStats> {
        self.reporter.stats(agent_id).await
    }

    pub async fn export_memories(&self, agent_id: AgentId, format: ExportFormat) -> Result<String> {
        self.reporter.export(agent_id, format).await
    }

    pub async fn purge_memories(&self, agent_id: AgentId) -> Result<usize> {
        self.reporter.purge(agent_id).await
    }
}

impl Drop for ManagementService {
    fn drop(&mut self) {
        if let Some(handle) = self.scheduler.get_mut().take() {
            handle.abort();
        }
    }
}
