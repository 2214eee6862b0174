#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};
    use mnemo_config::MnemoConfig;
    use mnemo_core::*;
    use mnemo_llm::*;
    use mnemo_management::*;
    use mnemo_store::LocalStore;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn service_with(store: &LocalStore, llm: Arc<MockProvider>, config: &MnemoConfig) -> ManagementService {
        ManagementService::new(store.index.clone(), store.vectors.clone(), llm, config).unwrap()
    }

    fn service(store: &LocalStore) -> ManagementService {
        service_with(store, Arc::new(MockProvider::new("mock")), &MnemoConfig::default())
    }

    /// Insert an index row plus its vector point.
    async fn seed(
        store: &LocalStore,
        agent: Uuid,
        kind: MemoryKind,
        content: &str,
        importance: Option<u8>,
        age_days: i64,
    ) -> IndexEntry {
        let collection = match kind {
            MemoryKind::Semantic => "semantic_memories",
            MemoryKind::Reflection => "reflections",
            _ => "episodic_memories",
        };
        let mut entry = IndexEntry::new(agent, kind);
        entry.importance = importance;
        entry.created_at = Utc::now() - ChronoDuration::days(age_days);
        entry.storage_location = Some(StorageLocation::new(collection, entry.id));
        store.index.insert(&entry).await.unwrap();

        let mut payload = Metadata::new();
        payload.insert("content".into(), json!(content));
        payload.insert("agent_id".into(), json!(agent.to_string()));
        store
            .vectors
            .upsert(
                collection,
                Point {
                    id: entry.id.to_string(),
                    vector: MockEmbedding::new(16).vector_for(content),
                    payload,
                },
            )
            .await
            .unwrap();
        entry
    }

    async fn exists(store: &LocalStore, entry: &IndexEntry) -> bool {
        store.index.get(entry.id).await.unwrap().is_some()
    }

    async fn point_exists(store: &LocalStore, entry: &IndexEntry) -> bool {
        let loc = entry.storage_location.as_ref().unwrap();
        store.vectors.retrieve(&loc.collection, &loc.point_id).await.unwrap().is_some()
    }

    fn policy(strategy: ForgettingStrategy, threshold: f64) -> ForgettingPolicy {
        ForgettingPolicy {
            enabled: true,
            strategy,
            threshold,
            archive_before_delete: false,
        }
    }

    // ── Filters ────────────────────────────────────────────────

    mod filters {
        use super::*;

        #[tokio::test]
        async fn test_rules_persist_and_apply() {
            let store = LocalStore::open_in_memory().unwrap();
            let svc = service(&store);
            let agent = Uuid::new_v4();
            svc.set_filter_rules(
                agent,
                vec![
                    FilterRule::new(FilterType::Importance, "< 3", FilterAction::Flag),
                    FilterRule::new(FilterType::Content, "password", FilterAction::Reject),
                ],
            )
            .await
            .unwrap();
            assert_eq!(svc.filter_rules(agent).await.unwrap().len(), 2);

            let metadata = Metadata::new();
            let verdict = svc
                .apply_filters(
                    agent,
                    &FilterSubject {
                        content: "my PASSWORD is hunter2",
                        metadata: &metadata,
                        importance: Some(1.0),
                    },
                )
                .await
                .unwrap();
            assert!(verdict.is_rejected());

            let verdict = svc
                .apply_filters(
                    agent,
                    &FilterSubject {
                        content: "lunch at noon",
                        metadata: &metadata,
                        importance: Some(1.0),
                    },
                )
                .await
                .unwrap();
            match verdict {
                FilterVerdict::Accept { flagged } => assert_eq!(flagged.len(), 1),
                other => panic!("expected accept, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_bad_importance_condition_rejected() {
            let store = LocalStore::open_in_memory().unwrap();
            let svc = service(&store);
            let agent = Uuid::new_v4();
            let err = svc
                .set_filter_rules(
                    agent,
                    vec![FilterRule::new(FilterType::Importance, "roughly 4", FilterAction::Reject)],
                )
                .await
                .unwrap_err();
            assert!(matches!(err, MnemoError::Validation { .. }));
            assert!(svc.filter_rules(agent).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_rules_keep_forgetting_policy() {
            let store = LocalStore::open_in_memory().unwrap();
            let svc = service(&store);
            let agent = Uuid::new_v4();
            let mut disabled = policy(ForgettingStrategy::TimeBased, 30.0);
            disabled.enabled = false;
            svc.set_forgetting_policy(agent, disabled.clone()).await.unwrap();
            svc.set_filter_rules(
                agent,
                vec![FilterRule::new(FilterType::Metadata, "secret", FilterAction::Flag)],
            )
            .await
            .unwrap();
            assert_eq!(svc.forgetting_policy(agent).await.unwrap(), Some(disabled));
        }
    }

    // ── Forgetting ─────────────────────────────────────────────

    mod forgetting {
        use super::*;

        #[tokio::test]
        async fn test_importance_based_threshold() {
            let store = LocalStore::open_in_memory().unwrap();
            let svc = service(&store);
            let agent = Uuid::new_v4();
            let low = seed(&store, agent, MemoryKind::Episodic, "trivial", Some(2), 0).await;
            let high = seed(&store, agent, MemoryKind::Episodic, "important", Some(5), 0).await;

            let n = svc
                .forget_memories(agent, &policy(ForgettingStrategy::ImportanceBased, 3.0))
                .await
                .unwrap();
            assert_eq!(n, 1);
            assert!(!exists(&store, &low).await);
            assert!(!point_exists(&store, &low).await);
            assert!(exists(&store, &high).await);
            assert!(point_exists(&store, &high).await);
        }

        #[tokio::test]
        async fn test_time_based_cutoff() {
            let store = LocalStore::open_in_memory().unwrap();
            let svc = service(&store);
            let agent = Uuid::new_v4();
            let old = seed(&store, agent, MemoryKind::Semantic, "old fact", None, 40).await;
            let fresh = seed(&store, agent, MemoryKind::Episodic, "fresh", Some(5), 1).await;

            let n = svc
                .forget_memories(agent, &policy(ForgettingStrategy::TimeBased, 30.0))
                .await
                .unwrap();
            assert_eq!(n, 1);
            assert!(!exists(&store, &old).await);
            assert!(exists(&store, &fresh).await);
        }

        #[tokio::test]
        async fn test_access_based_falls_back_to_creation() {
            let store = LocalStore::open_in_memory().unwrap();
            let svc = service(&store);
            let agent = Uuid::new_v4();
            let never_read = seed(&store, agent, MemoryKind::Episodic, "never read", Some(5), 20).await;
            let read_recently = seed(&store, agent, MemoryKind::Episodic, "read", Some(5), 20).await;
            let stale_read = seed(&store, agent, MemoryKind::Episodic, "stale", Some(5), 20).await;
            store.index.track_access(read_recently.id, Utc::now()).await.unwrap();
            store
                .index
                .track_access(stale_read.id, Utc::now() - ChronoDuration::days(15))
                .await
                .unwrap();

            let n = svc
                .forget_memories(agent, &policy(ForgettingStrategy::AccessBased, 10.0))
                .await
                .unwrap();
            assert_eq!(n, 2);
            assert!(!exists(&store, &never_read).await);
            assert!(!exists(&store, &stale_read).await);
            assert!(exists(&store, &read_recently).await);
        }

        #[tokio::test]
        async fn test_scoped_to_agent() {
            let store = LocalStore::open_in_memory().unwrap();
            let svc = service(&store);
            let mine = seed(&store, Uuid::new_v4(), MemoryKind::Episodic, "a", Some(1), 0).await;
            let theirs = seed(&store, Uuid::new_v4(), MemoryKind::Episodic, "b", Some(1), 0).await;

            let n = svc
                .forget_memories(mine.agent_id, &policy(ForgettingStrategy::ImportanceBased, 3.0))
                .await
                .unwrap();
            assert_eq!(n, 1);
            assert!(exists(&store, &theirs).await);
        }

        #[tokio::test]
        async fn test_archive_before_delete_still_deletes() {
            let store = LocalStore::open_in_memory().unwrap();
            let svc = service(&store);
            let agent = Uuid::new_v4();
            let low = seed(&store, agent, MemoryKind::Episodic, "archive me", Some(1), 0).await;
            let mut archiving = policy(ForgettingStrategy::ImportanceBased, 3.0);
            archiving.archive_before_delete = true;

            assert_eq!(svc.forget_memories(agent, &archiving).await.unwrap(), 1);
            assert!(!exists(&store, &low).await);
        }

        #[tokio::test]
        async fn test_invalid_policy_rejected() {
            let store = LocalStore::open_in_memory().unwrap();
            let svc = service(&store);
            let agent = Uuid::new_v4();
            let err = svc
                .set_forgetting_policy(agent, policy(ForgettingStrategy::ImportanceBased, 42.0))
                .await
                .unwrap_err();
            assert!(matches!(err, MnemoError::Validation { .. }));
            assert!(svc.forgetting_policy(agent).await.unwrap().is_none());
            assert!(!svc.scheduler_running());
        }

        #[tokio::test]
        async fn test_extreme_age_thresholds_rejected_without_deleting() {
            let store = LocalStore::open_in_memory().unwrap();
            let svc = service(&store);
            let agent = Uuid::new_v4();
            let kept = seed(&store, agent, MemoryKind::Episodic, "ancient", Some(5), 400).await;

            for strategy in [ForgettingStrategy::TimeBased, ForgettingStrategy::AccessBased] {
                for threshold in [MAX_FORGET_DAYS + 1.0, 1.0e8, f64::MAX] {
                    let err = svc.forget_memories(agent, &policy(strategy, threshold)).await.unwrap_err();
                    assert!(matches!(err, MnemoError::Validation { .. }));
                }
            }
            assert!(exists(&store, &kept).await);

            // The bound itself is still a usable cutoff.
            let n = svc
                .forget_memories(agent, &policy(ForgettingStrategy::TimeBased, MAX_FORGET_DAYS))
                .await
                .unwrap();
            assert_eq!(n, 0);
            assert!(exists(&store, &kept).await);
        }

        #[tokio::test]
        async fn test_extreme_threshold_policy_not_stored() {
            let store = LocalStore::open_in_memory().unwrap();
            let svc = service(&store);
            let agent = Uuid::new_v4();
            let err = svc
                .set_forgetting_policy(agent, policy(ForgettingStrategy::TimeBased, 1.0e8))
                .await
                .unwrap_err();
            assert!(matches!(err, MnemoError::Validation { .. }));
            assert!(svc.forgetting_policy(agent).await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_sweep_only_enabled_policies() {
            let store = LocalStore::open_in_memory().unwrap();
            let svc = service(&store);
            let on = Uuid::new_v4();
            let off = Uuid::new_v4();
            let a = seed(&store, on, MemoryKind::Episodic, "a", Some(1), 0).await;
            let b = seed(&store, off, MemoryKind::Episodic, "b", Some(1), 0).await;

            svc.set_forgetting_policy(on, policy(ForgettingStrategy::ImportanceBased, 3.0))
                .await
                .unwrap();
            let mut disabled = policy(ForgettingStrategy::ImportanceBased, 3.0);
            disabled.enabled = false;
            svc.set_forgetting_policy(off, disabled).await.unwrap();

            assert_eq!(svc.run_forgetting_sweep().await.unwrap(), 1);
            assert!(!exists(&store, &a).await);
            assert!(exists(&store, &b).await);
        }
    }

    // ── Scheduler ──────────────────────────────────────────────

    mod scheduler {
        use super::*;

        #[tokio::test]
        async fn test_enabling_policy_starts_sweep() {
            let store = LocalStore::open_in_memory().unwrap();
            let mut config = MnemoConfig::default();
            config.management.forgetting_cron = "* * * * * *".into();
            let svc = service_with(&store, Arc::new(MockProvider::new("mock")), &config)
                .with_check_interval(Duration::from_millis(20));
            let agent = Uuid::new_v4();
            let low = seed(&store, agent, MemoryKind::Episodic, "drop me", Some(1), 0).await;

            assert!(!svc.scheduler_running());
            svc.set_forgetting_policy(agent, policy(ForgettingStrategy::ImportanceBased, 3.0))
                .await
                .unwrap();
            assert!(svc.scheduler_running());
            assert!(!svc.start_scheduler().unwrap());

            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            while exists(&store, &low).await && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            assert!(!exists(&store, &low).await);

            svc.stop_scheduler();
            assert!(!svc.scheduler_running());
        }

        #[test]
        fn test_bad_cron_fails_construction() {
            let store = LocalStore::open_in_memory().unwrap();
            let mut config = MnemoConfig::default();
            config.management.forgetting_cron = "nightly".into();
            let result = ManagementService::new(
                store.index.clone(),
                store.vectors.clone(),
                Arc::new(MockProvider::new("mock")),
                &config,
            );
            assert!(matches!(result, Err(MnemoError::Config(_))));
        }

        #[test]
        fn test_next_run_is_in_future() {
            let store = LocalStore::open_in_memory().unwrap();
            let forgetter = Forgetter::new(store.index.clone(), store.vectors.clone(), Collections::default());
            let scheduler = ForgettingScheduler::new("0 0 2 * * *", forgetter).unwrap();
            let next = scheduler.next_run().unwrap();
            assert!(next > Utc::now());
            assert_eq!(next.format("%H:%M:%S").to_string(), "02:00:00");
        }
    }

    // ── Consolidation ──────────────────────────────────────────

    mod consolidation {
        use super::*;

        #[tokio::test]
        async fn test_summary_over_episodic_in_order() {
            let store = LocalStore::open_in_memory().unwrap();
            let llm = Arc::new(MockProvider::new("mock").with_response("Alice met Bob, then had lunch."));
            let svc = service_with(&store, llm.clone(), &MnemoConfig::default());
            let agent = Uuid::new_v4();
            seed(&store, agent, MemoryKind::Episodic, "had lunch", Some(3), 1).await;
            seed(&store, agent, MemoryKind::Episodic, "met Bob", Some(6), 2).await;
            seed(&store, agent, MemoryKind::Semantic, "Bob is a person", None, 3).await;

            let result = svc
                .consolidate_memories(
                    agent,
                    &ConsolidationRequest {
                        time_range: None,
                        level: SummarizationLevel::High,
                    },
                )
                .await
                .unwrap();
            assert_eq!(result.original_count, 2);
            assert_eq!(result.consolidated_count, 1);
            assert_eq!(result.summary, "Alice met Bob, then had lunch.");

            let requests = llm.recorded_requests();
            assert_eq!(requests.len(), 1);
            assert_eq!(requests[0].max_tokens, 500);
            assert_eq!(requests[0].temperature, 0.5);
            assert!(requests[0].prompt.contains("1. met Bob\n2. had lunch"));
            assert!(!requests[0].prompt.contains("Bob is a person"));
        }

        #[tokio::test]
        async fn test_time_range_and_empty() {
            let store = LocalStore::open_in_memory().unwrap();
            let llm = Arc::new(MockProvider::new("mock"));
            let svc = service_with(&store, llm.clone(), &MnemoConfig::default());
            let agent = Uuid::new_v4();
            seed(&store, agent, MemoryKind::Episodic, "long ago", Some(3), 30).await;

            let range = TimeRange::new(Utc::now() - ChronoDuration::days(7), Utc::now());
            let result = svc
                .consolidate_memories(
                    agent,
                    &ConsolidationRequest {
                        time_range: Some(range),
                        level: SummarizationLevel::Low,
                    },
                )
                .await
                .unwrap();
            assert_eq!(
                result,
                ConsolidationResult {
                    original_count: 0,
                    consolidated_count: 0,
                    summary: String::new(),
                }
            );
            assert_eq!(llm.request_count(), 0);
        }

        #[tokio::test]
        async fn test_llm_failure_falls_back() {
            let store = LocalStore::open_in_memory().unwrap();
            let llm = Arc::new(MockProvider::new("mock").with_error("upstream down"));
            let svc = service_with(&store, llm, &MnemoConfig::default());
            let agent = Uuid::new_v4();
            let kept = seed(&store, agent, MemoryKind::Episodic, "something", Some(3), 0).await;

            let result = svc
                .consolidate_memories(agent, &ConsolidationRequest::default())
                .await
                .unwrap();
            assert_eq!(result.original_count, 1);
            assert_eq!(result.summary, "Summary generation failed.");
            assert!(exists(&store, &kept).await);
        }

        #[tokio::test]
        async fn test_consolidation_model_override() {
            let store = LocalStore::open_in_memory().unwrap();
            let llm = Arc::new(MockProvider::new("mock").with_response("ok"));
            let mut config = MnemoConfig::default();
            config.management.consolidation_model = Some("summarizer-small".into());
            let svc = service_with(&store, llm.clone(), &config);
            let agent = Uuid::new_v4();
            seed(&store, agent, MemoryKind::Episodic, "x", Some(3), 0).await;

            svc.consolidate_memories(agent, &ConsolidationRequest::default())
                .await
                .unwrap();
            let request = &llm.recorded_requests()[0];
            assert_eq!(request.model, "summarizer-small");
            assert_eq!(request.max_tokens, 250);
        }
    }

    // ── Stats, export, purge ───────────────────────────────────

    mod reporting {
        use super::*;

        #[tokio::test]
        async fn test_stats() {
            let store = LocalStore::open_in_memory().unwrap();
            let svc = service(&store);
            let agent = Uuid::new_v4();
            seed(&store, agent, MemoryKind::Episodic, "a", Some(4), 3).await;
            seed(&store, agent, MemoryKind::Episodic, "b", Some(8), 1).await;
            seed(&store, agent, MemoryKind::Semantic, "c", None, 2).await;

            let stats = svc.memory_stats(agent).await.unwrap();
            assert_eq!(stats.total_memories, 3);
            assert_eq!(stats.by_type.get("episodic"), Some(&2));
            assert_eq!(stats.by_type.get("semantic"), Some(&1));
            assert_eq!(stats.average_importance, 6.0);
            assert_eq!(stats.storage_size, 0);
            assert!(stats.oldest_memory.unwrap() < stats.newest_memory.unwrap());

            let empty = svc.memory_stats(Uuid::new_v4()).await.unwrap();
            assert_eq!(empty.total_memories, 0);
            assert!(empty.oldest_memory.is_none());
        }

        #[tokio::test]
        async fn test_export_json_newest_first() {
            let store = LocalStore::open_in_memory().unwrap();
            let svc = service(&store);
            let agent = Uuid::new_v4();
            let older = seed(&store, agent, MemoryKind::Episodic, "a", Some(4), 3).await;
            let newer = seed(&store, agent, MemoryKind::Episodic, "b", Some(8), 1).await;

            let out = svc.export_memories(agent, ExportFormat::Json).await.unwrap();
            let rows: Vec<IndexEntry> = serde_json::from_str(&out).unwrap();
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0].id, newer.id);
            assert_eq!(rows[1].id, older.id);
        }

        #[tokio::test]
        async fn test_export_csv() {
            let store = LocalStore::open_in_memory().unwrap();
            let svc = service(&store);
            let agent = Uuid::new_v4();
            let entry = seed(&store, agent, MemoryKind::Episodic, "a", Some(7), 1).await;

            let out = svc.export_memories(agent, "CSV".parse().unwrap()).await.unwrap();
            let lines: Vec<&str> = out.lines().collect();
            assert_eq!(lines[0], "id,type,importance,created_at");
            assert!(lines[1].starts_with(&format!("{},episodic,7,", entry.id)));
            assert!(lines[1].ends_with('Z'));
            assert!("xml".parse::<ExportFormat>().is_err());
        }

        #[tokio::test]
        async fn test_purge_removes_rows_and_points() {
            let store = LocalStore::open_in_memory().unwrap();
            let svc = service(&store);
            let agent = Uuid::new_v4();
            let a = seed(&store, agent, MemoryKind::Episodic, "a", Some(4), 0).await;
            let b = seed(&store, agent, MemoryKind::Reflection, "b", Some(9), 0).await;
            let other = seed(&store, Uuid::new_v4(), MemoryKind::Episodic, "c", Some(4), 0).await;

            assert_eq!(svc.purge_memories(agent).await.unwrap(), 2);
            assert!(!exists(&store, &a).await);
            assert!(!point_exists(&store, &b).await);
            assert!(exists(&store, &other).await);
            assert_eq!(svc.memory_stats(agent).await.unwrap().total_memories, 0);
        }
    }
}
