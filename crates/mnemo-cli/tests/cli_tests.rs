#[cfg(test)]
mod tests {
    use clap::Parser;
    use mnemo_cli::commands::{Commands, ModeArg, StrategyArg, parse_rule};
    use mnemo_cli::logging::resolve_level;
    use mnemo_cli::{App, Cli};
    use mnemo_config::MnemoConfig;
    use mnemo_core::*;
    use mnemo_llm::{MockEmbedding, MockProvider};
    use mnemo_store::LocalStore;
    use serde_json::Value;
    use std::sync::Arc;
    use uuid::Uuid;

    fn app() -> App {
        App::assemble(
            MnemoConfig::default(),
            LocalStore::open_in_memory().unwrap(),
            Arc::new(MockProvider::new("mock")),
            Arc::new(MockEmbedding::new(64)),
        )
        .unwrap()
    }

    fn command(args: &[&str]) -> Commands {
        let mut argv = vec!["mnemo"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().command
    }

    async fn run(app: &App, args: &[&str]) -> Result<String> {
        Cli::execute(app, command(args)).await
    }

    // ── Argument parsing ───────────────────────────────────────

    mod parsing {
        use super::*;

        #[test]
        fn test_remember_defaults_to_episodic() {
            let agent = Uuid::new_v4().to_string();
            match command(&["remember", "-a", &agent, "met Bob"]) {
                Commands::Remember { kind, content, .. } => {
                    assert_eq!(kind, MemoryKind::Episodic);
                    assert_eq!(content, "met Bob");
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        fn test_ask_mode_and_flags() {
            let agent = Uuid::new_v4().to_string();
            match command(&["ask", "-a", &agent, "--mode", "agentic", "-k", "3", "why?"]) {
                Commands::Ask { mode, top_k, .. } => {
                    assert_eq!(mode, ModeArg::Agentic);
                    assert_eq!(top_k, Some(3));
                }
                other => panic!("unexpected {other:?}"),
            }
            assert!(
                Cli::try_parse_from(["mnemo", "ask", "-a", agent.as_str(), "q", "--citations", "--confidence"]).is_err()
            );
        }

        #[test]
        fn test_policy_strategy_names() {
            let agent = Uuid::new_v4().to_string();
            match command(&["policy", "-a", &agent, "-s", "importance-based", "--threshold", "3"]) {
                Commands::Policy { strategy, threshold, .. } => {
                    assert_eq!(strategy, Some(StrategyArg::ImportanceBased));
                    assert_eq!(threshold, Some(3.0));
                }
                other => panic!("unexpected {other:?}"),
            }
            assert!(Cli::try_parse_from(["mnemo", "policy", "-a", agent.as_str(), "--threshold", "3"]).is_err());
        }

        #[test]
        fn test_bad_values_rejected() {
            let agent = Uuid::new_v4().to_string();
            assert!(Cli::try_parse_from(["mnemo", "remember", "-a", "not-a-uuid", "x"]).is_err());
            assert!(Cli::try_parse_from(["mnemo", "remember", "-a", agent.as_str(), "-t", "dream", "x"]).is_err());
            assert!(Cli::try_parse_from(["mnemo", "export", "-a", agent.as_str(), "-f", "xml"]).is_err());
            assert!(Cli::try_parse_from(["mnemo", "consolidate", "-a", agent.as_str(), "--level", "max"]).is_err());
        }

        #[test]
        fn test_embed_needs_texts_or_file() {
            assert!(Cli::try_parse_from(["mnemo", "embed"]).is_err());
            assert!(Cli::try_parse_from(["mnemo", "embed", "a", "-f", "texts.txt"]).is_err());
            match command(&["embed", "-f", "texts.txt"]) {
                Commands::Embed { texts, file, .. } => {
                    assert!(texts.is_empty());
                    assert_eq!(file.unwrap().to_str(), Some("texts.txt"));
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        fn test_parse_rule() {
            let rule = parse_rule("importance:flag:< 3").unwrap();
            assert_eq!(rule, FilterRule::new(FilterType::Importance, "< 3", FilterAction::Flag));
            let rule = parse_rule("content:reject:http://x").unwrap();
            assert_eq!(rule.condition, "http://x");
            assert!(parse_rule("content:reject").is_err());
            assert!(parse_rule("regex:reject:.*").is_err());
            assert!(parse_rule("content:delete:x").is_err());
        }

        #[test]
        fn test_log_level_precedence() {
            assert_eq!(resolve_level(true, false, Some("warn"), "info"), "debug");
            assert_eq!(resolve_level(false, true, Some("warn"), "info"), "error");
            assert_eq!(resolve_level(false, false, Some("warn"), "info"), "warn");
            assert_eq!(resolve_level(false, false, None, "info"), "info");
        }
    }

    // ── Commands ───────────────────────────────────────────────

    mod commands {
        use super::*;

        #[tokio::test]
        async fn test_remember_then_recall() {
            let app = app();
            let agent = Uuid::new_v4().to_string();
            let out = run(&app, &["remember", "-a", &agent, "-e", "interaction", "lunch with Bob"])
                .await
                .unwrap();
            let stored: Value = serde_json::from_str(&out).unwrap();
            assert_eq!(stored["kind"], "episodic");

            let out = run(&app, &["recall", "-a", &agent, "lunch with Bob"]).await.unwrap();
            let hits: Vec<Value> = serde_json::from_str(&out).unwrap();
            assert_eq!(hits[0]["content"], "lunch with Bob");

            let out = run(&app, &["recall", "-a", &agent, "-t", "episodic"]).await.unwrap();
            let rows: Vec<Value> = serde_json::from_str(&out).unwrap();
            assert_eq!(rows.len(), 1);
        }

        #[tokio::test]
        async fn test_stm_window() {
            let app = app();
            let agent = Uuid::new_v4().to_string();
            let session = Uuid::new_v4().to_string();
            for turn in ["hi", "how are you?"] {
                run(&app, &["remember", "-a", &agent, "-t", "stm", "-s", &session, turn])
                    .await
                    .unwrap();
            }
            assert_eq!(run(&app, &["stm", &session]).await.unwrap(), "hi\nhow are you?");
            run(&app, &["stm", &session, "--clear"]).await.unwrap();
            assert_eq!(run(&app, &["stm", &session]).await.unwrap(), "");
        }

        #[tokio::test]
        async fn test_bad_metadata_is_validation_error() {
            let app = app();
            let agent = Uuid::new_v4().to_string();
            let err = run(&app, &["remember", "-a", &agent, "-m", "[1,2]", "x"]).await.unwrap_err();
            assert!(matches!(err, MnemoError::Validation { .. }));
        }

        #[tokio::test]
        async fn test_ask_modes() {
            let app = app();
            let agent = Uuid::new_v4().to_string();
            run(&app, &["remember", "-a", &agent, "Bob likes tea"]).await.unwrap();

            let out = run(&app, &["ask", "-a", &agent, "Bob likes tea"]).await.unwrap();
            let answer: Value = serde_json::from_str(&out).unwrap();
            assert_eq!(answer["metadata"]["mode"], "standard");
            assert!(answer.get("steps").is_none());

            let out = run(&app, &["ask", "-a", &agent, "--mode", "agentic", "Bob likes tea"])
                .await
                .unwrap();
            let answer: Value = serde_json::from_str(&out).unwrap();
            assert_eq!(answer["metadata"]["mode"], "agentic");
            let steps = answer["steps"].as_array().unwrap().len();
            assert!((5..=6).contains(&steps));

            let out = run(&app, &["ask", "-a", &agent, "--citations", "Bob likes tea"]).await.unwrap();
            let answer: Value = serde_json::from_str(&out).unwrap();
            assert_eq!(answer["citations"].as_array().unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_filters_block_writes() {
            let app = app();
            let agent = Uuid::new_v4().to_string();
            let out = run(&app, &["filters", "-a", &agent, "-r", "content:reject:password"])
                .await
                .unwrap();
            let rules: Vec<FilterRule> = serde_json::from_str(&out).unwrap();
            assert_eq!(rules.len(), 1);

            let err = run(&app, &["remember", "-a", &agent, "my password is 1234"])
                .await
                .unwrap_err();
            assert!(matches!(err, MnemoError::Rejected { .. }));

            let out = run(&app, &["filters", "-a", &agent, "--clear"]).await.unwrap();
            assert_eq!(serde_json::from_str::<Vec<FilterRule>>(&out).unwrap().len(), 0);
        }

        #[tokio::test]
        async fn test_policy_and_forget() {
            let app = app();
            let agent = Uuid::new_v4().to_string();
            // observation scores 5, interaction with high priority scores 9
            run(&app, &["remember", "-a", &agent, "trivial"]).await.unwrap();
            run(
                &app,
                &["remember", "-a", &agent, "-e", "interaction", "-m", r#"{"priority":"high"}"#, "vital"],
            )
            .await
            .unwrap();

            let err = run(&app, &["forget", "-a", &agent]).await.unwrap_err();
            assert!(matches!(err, MnemoError::NotFound { .. }));

            let out = run(
                &app,
                &["policy", "-a", &agent, "-s", "importance-based", "--threshold", "6", "--disable"],
            )
            .await
            .unwrap();
            let policy: ForgettingPolicy = serde_json::from_str(&out).unwrap();
            assert!(!policy.enabled);
            assert_eq!(policy.strategy, ForgettingStrategy::ImportanceBased);

            let out = run(&app, &["forget", "-a", &agent]).await.unwrap();
            assert!(out.starts_with("Forgot 1 memories"));

            let stats: Value = serde_json::from_str(&run(&app, &["stats", "-a", &agent]).await.unwrap()).unwrap();
            assert_eq!(stats["total_memories"], 1);
        }

        #[tokio::test]
        async fn test_export_and_purge() {
            let app = app();
            let agent = Uuid::new_v4().to_string();
            run(&app, &["remember", "-a", &agent, "-i", "6", "one"]).await.unwrap();
            run(&app, &["remember", "-a", &agent, "-t", "semantic", "Paris is in France"])
                .await
                .unwrap();

            let csv = run(&app, &["export", "-a", &agent, "-f", "csv"]).await.unwrap();
            assert_eq!(csv.lines().count(), 3);

            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("export.json");
            let path_str = path.to_str().unwrap();
            run(&app, &["export", "-a", &agent, "-o", path_str]).await.unwrap();
            let rows: Vec<Value> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
            assert_eq!(rows.len(), 2);

            assert!(run(&app, &["purge", "-a", &agent]).await.is_err());
            let out = run(&app, &["purge", "-a", &agent, "--yes"]).await.unwrap();
            assert_eq!(out, format!("Purged 2 memories for agent {agent}"));
        }

        #[tokio::test]
        async fn test_embed_through_batch_queue() {
            let app = app();
            let out = run(&app, &["embed", "first text", "second text"]).await.unwrap();
            let summary: Value = serde_json::from_str(&out).unwrap();
            assert_eq!(summary["status"], "completed");
            assert_eq!(summary["progress"], 100);
            assert_eq!(summary["count"], 2);
            assert_eq!(summary["dimensions"], 64);
            assert!(summary.get("embeddings").is_none());

            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("texts.txt");
            std::fs::write(&path, "one\n\ntwo\nthree\n").unwrap();
            let out = run(&app, &["embed", "-f", path.to_str().unwrap(), "--vectors"])
                .await
                .unwrap();
            let job: Value = serde_json::from_str(&out).unwrap();
            assert_eq!(job["texts"].as_array().unwrap().len(), 3);
            assert_eq!(job["embeddings"].as_array().unwrap().len(), 3);

            assert_eq!(app.batch.stats().completed, 2);
        }

        #[tokio::test]
        async fn test_embed_empty_file_is_validation_error() {
            let app = app();
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("blank.txt");
            std::fs::write(&path, "\n  \n").unwrap();
            let err = run(&app, &["embed", "-f", path.to_str().unwrap()]).await.unwrap_err();
            assert!(matches!(err, MnemoError::Validation { .. }));
        }

        #[tokio::test]
        async fn test_consolidate_without_memories() {
            let app = app();
            let agent = Uuid::new_v4().to_string();
            let out = run(&app, &["consolidate", "-a", &agent, "--since-days", "7"]).await.unwrap();
            let result: Value = serde_json::from_str(&out).unwrap();
            assert_eq!(result["original_count"], 0);
            assert_eq!(result["summary"], "");
        }

        #[tokio::test]
        async fn test_reflect_with_nothing_to_reflect_on() {
            let app = app();
            let agent = Uuid::new_v4().to_string();
            let err = run(&app, &["reflect", "-a", &agent]).await.unwrap_err();
            assert!(matches!(err, MnemoError::Reflection(_)));
        }
    }
}
