use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use mnemo_config::{ConfigLoader, MnemoConfig, WarningSeverity};
use mnemo_core::*;
use mnemo_llm::{BatchJob, JobStatus};
use mnemo_management::{ConsolidationRequest, ExportFormat, SummarizationLevel};
use mnemo_memory::ReflectionContext;
use mnemo_retrieval::rag;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::App;
use crate::logging;

/// Mnemo: tiered memory for AI agents
#[derive(Parser, Debug)]
#[command(name = "mnemo", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to mnemo.toml config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store a memory
    Remember {
        #[arg(short, long)]
        agent: Uuid,
        content: String,
        /// stm, episodic or semantic
        #[arg(short = 't', long = "type", default_value = "episodic")]
        kind: MemoryKind,
        /// Session (required for stm)
        #[arg(short, long)]
        session: Option<Uuid>,
        /// observation, action or interaction
        #[arg(short, long)]
        event_type: Option<EventType>,
        /// Importance 1-10
        #[arg(short, long)]
        importance: Option<u8>,
        /// Metadata as a JSON object
        #[arg(short, long)]
        metadata: Option<String>,
    },
    /// Retrieve memories, ranked by similarity when a query is given
    Recall {
        #[arg(short, long)]
        agent: Uuid,
        /// Free-text query (hybrid search)
        query: Option<String>,
        #[arg(short = 't', long = "type")]
        kind: Option<MemoryKind>,
        #[arg(short, long)]
        session: Option<Uuid>,
        #[arg(long)]
        min_importance: Option<u8>,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(long)]
        offset: Option<usize>,
    },
    /// Show or clear a session's short-term window
    Stm {
        session: Uuid,
        #[arg(long)]
        clear: bool,
    },
    /// Build a retrieval-augmented prompt for a question
    Ask {
        #[arg(short, long)]
        agent: Uuid,
        question: String,
        #[arg(short, long, value_enum, default_value = "standard")]
        mode: ModeArg,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Attach citations (standard mode)
        #[arg(long, conflicts_with = "confidence")]
        citations: bool,
        /// Attach a confidence estimate (standard mode)
        #[arg(long)]
        confidence: bool,
    },
    /// Generate a reflection now
    Reflect {
        #[arg(short, long)]
        agent: Uuid,
        #[arg(long)]
        max_memories: Option<usize>,
        #[arg(long)]
        min_importance: Option<u8>,
    },
    /// Summarise episodic memory
    Consolidate {
        #[arg(short, long)]
        agent: Uuid,
        /// low, medium or high
        #[arg(long, default_value = "medium")]
        level: SummarizationLevel,
        /// Only memories from the last N days
        #[arg(long)]
        since_days: Option<i64>,
    },
    /// Forget memories now (all agents with enabled policies if no agent is given)
    Forget {
        #[arg(short, long)]
        agent: Option<Uuid>,
        /// Use this strategy instead of the stored policy
        #[arg(short, long, value_enum, requires = "agent")]
        strategy: Option<StrategyArg>,
        #[arg(long, requires = "strategy")]
        threshold: Option<f64>,
        #[arg(long, requires = "strategy")]
        archive: bool,
    },
    /// Show or set an agent's forgetting policy
    Policy {
        #[arg(short, long)]
        agent: Uuid,
        #[arg(short, long, value_enum)]
        strategy: Option<StrategyArg>,
        #[arg(long, requires = "strategy")]
        threshold: Option<f64>,
        /// Archive memories before deleting them
        #[arg(long, requires = "strategy")]
        archive: bool,
        /// Store the policy without scheduling it
        #[arg(long, requires = "strategy")]
        disable: bool,
    },
    /// Show or replace an agent's write filters
    Filters {
        #[arg(short, long)]
        agent: Uuid,
        /// TYPE:ACTION:CONDITION, e.g. content:reject:password or "importance:flag:< 3"
        #[arg(short, long, value_parser = parse_rule)]
        rule: Vec<FilterRule>,
        /// Remove all rules
        #[arg(long, conflicts_with = "rule")]
        clear: bool,
    },
    /// Memory statistics for an agent
    Stats {
        #[arg(short, long)]
        agent: Uuid,
    },
    /// Export an agent's memory index
    Export {
        #[arg(short, long)]
        agent: Uuid,
        /// json or csv
        #[arg(short, long, default_value = "json")]
        format: ExportFormat,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Embed texts through the batch queue
    Embed {
        /// Texts to embed
        #[arg(required_unless_present = "file")]
        texts: Vec<String>,
        /// Read one text per non-empty line
        #[arg(short, long, conflicts_with = "texts")]
        file: Option<PathBuf>,
        /// Include the vectors in the output
        #[arg(long)]
        vectors: bool,
        /// Seconds to wait for the job
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },
    /// Delete every memory of an agent
    Purge {
        #[arg(short, long)]
        agent: Uuid,
        /// Confirm the purge
        #[arg(long)]
        yes: bool,
    },
    /// Run the forgetting scheduler and reflection worker until Ctrl-C
    Daemon,
    /// Show or validate configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Report configuration problems
    Validate,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    Standard,
    Agentic,
}

impl From<ModeArg> for RagMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Standard => RagMode::Standard,
            ModeArg::Agentic => RagMode::Agentic,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyArg {
    TimeBased,
    AccessBased,
    ImportanceBased,
}

impl From<StrategyArg> for ForgettingStrategy {
    fn from(strategy: StrategyArg) -> Self {
        match strategy {
            StrategyArg::TimeBased => ForgettingStrategy::TimeBased,
            StrategyArg::AccessBased => ForgettingStrategy::AccessBased,
            StrategyArg::ImportanceBased => ForgettingStrategy::ImportanceBased,
        }
    }
}

/// Parse "type:action:condition". The condition may itself contain colons.
pub fn parse_rule(s: &str) -> std::result::Result<FilterRule, String> {
    let mut parts = s.splitn(3, ':');
    let (Some(kind), Some(action), Some(condition)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("invalid rule `{s}`: expected TYPE:ACTION:CONDITION"));
    };
    let rule_type = match kind.trim() {
        "content" => FilterType::Content,
        "metadata" => FilterType::Metadata,
        "importance" => FilterType::Importance,
        other => return Err(format!("unknown rule type `{other}`")),
    };
    let action = match action.trim() {
        "reject" => FilterAction::Reject,
        "flag" => FilterAction::Flag,
        other => return Err(format!("unknown rule action `{other}`")),
    };
    Ok(FilterRule::new(rule_type, condition.trim(), action))
}

/// What `embed` prints unless `--vectors` is given.
#[derive(Debug, Serialize)]
pub struct EmbedSummary {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub count: usize,
    pub dimensions: usize,
}

impl From<&BatchJob> for EmbedSummary {
    fn from(job: &BatchJob) -> Self {
        let embeddings = job.embeddings.as_deref().unwrap_or_default();
        Self {
            id: job.id,
            status: job.status,
            progress: job.progress,
            count: embeddings.len(),
            dimensions: embeddings.first().map_or(0, Vec::len),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Load config first so we can use it for log format
        let loader = ConfigLoader::load(self.config.as_deref())?;
        let config = loader.get();

        let level = logging::resolve_level(
            self.verbose,
            self.quiet,
            self.log_level.as_deref(),
            &config.logging.level,
        );
        logging::init(level, &config.logging.format);

        match self.command {
            Commands::Config { action } => {
                println!("{}", Self::cmd_config(&config, &action)?);
                Ok(())
            }
            Commands::Daemon => {
                let app = App::build(config)?;
                Self::cmd_daemon(app, &loader).await
            }
            command => {
                let app = App::build(config)?;
                let output = Self::execute(&app, command).await;
                app.shutdown(Duration::from_secs(30)).await;
                println!("{}", output?);
                Ok(())
            }
        }
    }

    /// Run a one-shot command and return what it prints.
    pub async fn execute(app: &App, command: Commands) -> Result<String> {
        match command {
            Commands::Remember {
                agent,
                content,
                kind,
                session,
                event_type,
                importance,
                metadata,
            } => {
                let metadata = match metadata {
                    Some(raw) => Some(serde_json::from_str::<Metadata>(&raw).map_err(|e| {
                        MnemoError::validation("metadata", format!("expected a JSON object: {e}"))
                    })?),
                    None => None,
                };
                let stored = app
                    .memory
                    .store_memory(MemoryInput {
                        agent_id: agent,
                        kind,
                        content,
                        session_id: session,
                        event_type,
                        importance,
                        metadata,
                    })
                    .await?;
                to_json(&stored)
            }
            Commands::Recall {
                agent,
                query,
                kind,
                session,
                min_importance,
                limit,
                offset,
            } => {
                let results = match query {
                    Some(text) => app.hybrid.retrieve_auto(agent, &text, limit).await?.merged_results,
                    None => {
                        app.memory
                            .retrieve_memories(&MemoryQuery {
                                agent_id: agent,
                                kind,
                                session_id: session,
                                time_range: None,
                                min_importance,
                                limit,
                                offset,
                            })
                            .await?
                    }
                };
                to_json(&results)
            }
            Commands::Stm { session, clear } => {
                let stm = app.memory.stm();
                if clear {
                    stm.clear(session).await?;
                    return Ok(format!("Cleared short-term memory for session {session}"));
                }
                stm.get_as_string(session, "\n").await
            }
            Commands::Ask {
                agent,
                question,
                mode,
                top_k,
                citations,
                confidence,
            } => {
                let mut query = RagQuery::new(agent, question).with_mode(mode.into());
                if let Some(k) = top_k {
                    query = query.with_top_k(k);
                }
                if mode == ModeArg::Standard && citations {
                    return to_json(&app.standard_rag.execute_with_citations(&query).await?);
                }
                if mode == ModeArg::Standard && confidence {
                    return to_json(&app.standard_rag.execute_with_confidence(&query).await?);
                }
                to_json(&rag::answer(&app.standard_rag, &app.agentic_rag, &query).await?)
            }
            Commands::Reflect {
                agent,
                max_memories,
                min_importance,
            } => {
                let context = ReflectionContext {
                    time_range: None,
                    importance_threshold: min_importance,
                    max_memories,
                };
                let reflection = app.memory.reflection().trigger_reflection(agent, &context).await?;
                to_json(&reflection)
            }
            Commands::Consolidate {
                agent,
                level,
                since_days,
            } => {
                let now = Utc::now();
                let request = ConsolidationRequest {
                    time_range: since_days.map(|d| TimeRange::new(now - ChronoDuration::days(d), now)),
                    level,
                };
                to_json(&app.management.consolidate_memories(agent, &request).await?)
            }
            Commands::Forget {
                agent,
                strategy,
                threshold,
                archive,
            } => {
                let Some(agent) = agent else {
                    let total = app.management.run_forgetting_sweep().await?;
                    return Ok(format!("Forgot {total} memories across all agents"));
                };
                let policy = match strategy {
                    Some(strategy) => ForgettingPolicy {
                        enabled: true,
                        strategy: strategy.into(),
                        threshold: threshold
                            .ok_or_else(|| MnemoError::validation("threshold", "required with --strategy"))?,
                        archive_before_delete: archive,
                    },
                    None => app
                        .management
                        .forgetting_policy(agent)
                        .await?
                        .ok_or_else(|| MnemoError::not_found("forgetting policy", agent))?,
                };
                let n = app.management.forget_memories(agent, &policy).await?;
                Ok(format!("Forgot {n} memories for agent {agent}"))
            }
            Commands::Policy {
                agent,
                strategy,
                threshold,
                archive,
                disable,
            } => {
                if let Some(strategy) = strategy {
                    let policy = ForgettingPolicy {
                        enabled: !disable,
                        strategy: strategy.into(),
                        threshold: threshold
                            .ok_or_else(|| MnemoError::validation("threshold", "required with --strategy"))?,
                        archive_before_delete: archive,
                    };
                    app.management.set_forgetting_policy(agent, policy).await?;
                }
                match app.management.forgetting_policy(agent).await? {
                    Some(policy) => to_json(&policy),
                    None => Ok(format!("No forgetting policy for agent {agent}")),
                }
            }
            Commands::Filters { agent, rule, clear } => {
                if clear || !rule.is_empty() {
                    app.management.set_filter_rules(agent, rule).await?;
                }
                to_json(&app.management.filter_rules(agent).await?)
            }
            Commands::Stats { agent } => to_json(&app.management.memory_stats(agent).await?),
            Commands::Export {
                agent,
                format,
                output,
            } => {
                let data = app.management.export_memories(agent, format).await?;
                match output {
                    Some(path) => {
                        std::fs::write(&path, &data)?;
                        Ok(format!("Exported to {}", path.display()))
                    }
                    None => Ok(data),
                }
            }
            Commands::Embed {
                texts,
                file,
                vectors,
                timeout,
            } => {
                let texts = match file {
                    Some(path) => std::fs::read_to_string(&path)?
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string)
                        .collect(),
                    None => texts,
                };
                if texts.is_empty() {
                    return Err(MnemoError::validation("texts", "nothing to embed"));
                }
                let id = app.batch.submit(texts)?;
                let job = app
                    .batch
                    .wait_for(id, Duration::from_secs(timeout))
                    .await
                    .ok_or_else(|| MnemoError::not_found("batch job", id))?;
                if job.status == JobStatus::Failed {
                    return Err(MnemoError::Embedding(job.error.unwrap_or_default()));
                }
                if vectors {
                    to_json(&job)
                } else {
                    to_json(&EmbedSummary::from(&job))
                }
            }
            Commands::Purge { agent, yes } => {
                if !yes {
                    return Err(MnemoError::validation("yes", "purge deletes every memory; pass --yes to confirm"));
                }
                let n = app.management.purge_memories(agent).await?;
                Ok(format!("Purged {n} memories for agent {agent}"))
            }
            Commands::Daemon | Commands::Config { .. } => Err(MnemoError::validation(
                "command",
                "not a one-shot command",
            )),
        }
    }

    async fn cmd_daemon(app: App, loader: &ConfigLoader) -> Result<()> {
        // Kept alive for the lifetime of the daemon
        let _watcher = match loader.watch() {
            Ok(w) => Some(w),
            Err(e) => {
                warn!(error = %e, "config hot-reload disabled");
                None
            }
        };

        app.management.start_scheduler()?;
        info!(
            cron = %app.config.management.forgetting_cron,
            "mnemo daemon running; press Ctrl-C to stop"
        );

        tokio::signal::ctrl_c().await?;
        info!("shutting down");
        let stats = app.worker.stats();
        app.shutdown(Duration::from_secs(30)).await;
        info!(completed = stats.completed, failed = stats.failed, "reflection worker stopped");
        Ok(())
    }

    fn cmd_config(config: &MnemoConfig, action: &ConfigAction) -> Result<String> {
        match action {
            ConfigAction::Show { json: true } => to_json(config),
            ConfigAction::Show { json: false } => {
                toml::to_string_pretty(config).map_err(|e| MnemoError::Config(e.to_string()))
            }
            ConfigAction::Validate => {
                let warnings = config.validate().map_err(MnemoError::Config)?;
                if warnings.is_empty() {
                    return Ok("Configuration is valid".to_string());
                }
                let errors = warnings
                    .iter()
                    .filter(|w| w.severity == WarningSeverity::Error)
                    .count();
                let mut out: Vec<String> = warnings.iter().map(|w| w.to_string()).collect();
                out.push(format!("{} issues, {errors} errors", warnings.len()));
                Ok(out.join("\n"))
            }
        }
    }
}
