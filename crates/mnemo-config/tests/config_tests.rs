#[cfg(test)]
mod tests {
    use mnemo_config::ConfigLoader;
    use mnemo_config::schema::*;
    use std::io::Write;

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_stm_config_defaults() {
        let config = StmConfig::default();
        assert_eq!(config.window_size, 10);
        assert_eq!(config.ttl_secs, 3600);
        assert_eq!(config.max_window_size, 100);
    }

    #[test]
    fn test_episodic_config_defaults() {
        let config = EpisodicConfig::default();
        assert_eq!(config.top_k, 10);
        assert_eq!(config.candidate_multiplier, 2);
        assert_eq!(config.weights.recency, 0.33);
        assert_eq!(config.weights.importance, 0.33);
        assert_eq!(config.weights.relevance, 0.34);
        assert_eq!(config.recency_half_life_days, 30.0);
    }

    #[test]
    fn test_reflection_config_defaults() {
        let config = ReflectionConfig::default();
        assert_eq!(config.threshold, 50);
        assert_eq!(config.max_memories, 20);
        assert_eq!(config.collection, "reflections");
        assert_eq!(config.max_tokens, 500);
    }

    #[test]
    fn test_retrieval_config_defaults() {
        let config = RetrievalConfig::default();
        assert_eq!(config.vector_weight, 0.7);
        assert_eq!(config.graph_weight, 0.3);
        assert_eq!(config.max_graph_entities, 3);
        assert_eq!(config.graph_results_per_entity, 20);
        assert_eq!(config.rag_top_k, 5);
    }

    #[test]
    fn test_management_config_defaults() {
        let config = ManagementConfig::default();
        assert_eq!(config.forgetting_cron, "0 0 2 * * *");
        assert_eq!(config.consolidation_temperature, 0.5);
    }

    #[test]
    fn test_embedding_config_defaults() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.model, "text-embedding-3-small");
        assert_eq!(config.dimensions, 1536);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.cache_ttl_secs, 86_400);
    }

    #[test]
    fn test_default_config_validates() {
        let config = MnemoConfig::default();
        assert!(config.validate().is_ok());
    }

    // ── TOML tests ─────────────────────────────────────────────

    #[test]
    fn test_config_toml_roundtrip() {
        let config = MnemoConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored: MnemoConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.stm.window_size, config.stm.window_size);
        assert_eq!(restored.reflection.threshold, config.reflection.threshold);
        assert_eq!(restored.management.forgetting_cron, config.management.forgetting_cron);
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let toml_str = r#"
[stm]
window_size = 25

[reflection]
threshold = 80
"#;
        let config: MnemoConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.stm.window_size, 25);
        assert_eq!(config.reflection.threshold, 80);
        assert_eq!(config.stm.ttl_secs, 3600);
        assert_eq!(config.retrieval.top_k, 10);
        assert_eq!(config.embedding.provider, "openai");
    }

    #[test]
    fn test_weights_table_deserialize() {
        let toml_str = r#"
[episodic.weights]
recency = 0.5
importance = 0.2
relevance = 0.3
"#;
        let config: MnemoConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.episodic.weights.recency, 0.5);
        assert!((config.episodic.weights.sum() - 1.0).abs() < 1e-6);
    }

    // ── Validation tests ───────────────────────────────────────

    #[test]
    fn test_validate_rejects_window_out_of_range() {
        let mut config = MnemoConfig::default();
        config.stm.window_size = 0;
        assert!(config.validate().is_err());
        config.stm.window_size = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_cron() {
        let mut config = MnemoConfig::default();
        config.management.forgetting_cron = "every night".into();
        let err = config.validate().unwrap_err();
        assert!(err.contains("management.forgetting_cron"));
    }

    #[test]
    fn test_validate_rejects_unknown_embedding_provider() {
        let mut config = MnemoConfig::default();
        config.embedding.provider = "word2vec".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_positive_threshold() {
        let mut config = MnemoConfig::default();
        config.reflection.threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_warns_on_unbalanced_weights() {
        let mut config = MnemoConfig::default();
        config.llm.api_key = Some("sk-test".into());
        config.episodic.weights = WeightsConfig {
            recency: 0.5,
            importance: 0.5,
            relevance: 0.5,
        };
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.field == "episodic.weights"
            && w.severity == WarningSeverity::Warning));
    }

    #[test]
    fn test_validate_rejects_weight_above_one() {
        let mut config = MnemoConfig::default();
        config.retrieval.graph_weight = 1.5;
        assert!(config.validate().is_err());
    }

    // ── ConfigLoader tests ─────────────────────────────────────

    #[test]
    fn test_config_loader_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("mnemo.toml");
        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(
            f,
            r#"
[stm]
window_size = 5

[episodic]
top_k = 7
"#
        )
        .unwrap();

        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        let config = loader.get();
        assert_eq!(config.stm.window_size, 5);
        assert_eq!(config.episodic.top_k, 7);
        assert_eq!(loader.path(), config_path.as_path());
    }

    #[test]
    fn test_config_loader_missing_file_uses_defaults() {
        let loader = ConfigLoader::load(Some(std::path::Path::new("/nonexistent/mnemo.toml"))).unwrap();
        assert_eq!(loader.get().stm.ttl_secs, 3600);
    }

    #[test]
    fn test_config_loader_invalid_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("mnemo.toml");
        std::fs::write(&config_path, "[stm]\nwindow_size = 500\n").unwrap();
        assert!(ConfigLoader::load(Some(config_path.as_path())).is_err());
    }

    #[test]
    fn test_config_loader_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("mnemo.toml");
        std::fs::write(&config_path, "[retrieval]\ntop_k = 4\n").unwrap();

        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        assert_eq!(loader.get().retrieval.top_k, 4);

        std::fs::write(&config_path, "[retrieval]\ntop_k = 12\n").unwrap();
        loader.reload().unwrap();
        assert_eq!(loader.get().retrieval.top_k, 12);
        assert_eq!(loader.shared().read().retrieval.top_k, 12);
    }

    #[test]
    fn test_config_loader_reload_keeps_config_on_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("mnemo.toml");
        std::fs::write(&config_path, "[stm]\nwindow_size = 8\n").unwrap();
        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();

        std::fs::write(&config_path, "[stm]\nwindow_size = 0\n").unwrap();
        assert!(loader.reload().is_err());
        assert_eq!(loader.get().stm.window_size, 8);
    }
}
