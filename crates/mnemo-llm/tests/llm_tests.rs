#[cfg(test)]
mod tests {
    use mnemo_core::Cache;
    use mnemo_llm::*;
    use mnemo_store::MemoryCache;
    use std::sync::Arc;
    use std::time::Duration;

    // ── Retry tests ────────────────────────────────────────────

    #[test]
    fn test_backoff_doubles() {
        let b = Backoff::new(4, Duration::from_millis(100));
        assert_eq!(b.delay_for(0), Duration::from_millis(100));
        assert_eq!(b.delay_for(1), Duration::from_millis(200));
        assert_eq!(b.delay_for(3), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_retrying_provider_recovers_from_transient_error() {
        let mock = MockProvider::new("mock")
            .with_error("HTTP 503: overloaded")
            .with_response("recovered");
        let requests = Arc::clone(&mock.requests);
        let provider = RetryingProvider::new(Arc::new(mock), Backoff::new(3, Duration::from_millis(1)));

        let resp = provider.complete(&LlmRequest::new("m", "hello")).await.unwrap();
        assert_eq!(resp.text, "recovered");
        assert_eq!(requests.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_retrying_provider_does_not_retry_auth_errors() {
        let mock = MockProvider::new("mock")
            .with_error("HTTP 401: bad key")
            .with_response("never reached");
        let requests = Arc::clone(&mock.requests);
        let provider = RetryingProvider::new(Arc::new(mock), Backoff::new(3, Duration::from_millis(1)));

        assert!(provider.complete(&LlmRequest::new("m", "hello")).await.is_err());
        assert_eq!(requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_retrying_provider_gives_up_after_max_attempts() {
        let mock = MockProvider::new("mock")
            .with_error("HTTP 500: a")
            .with_error("HTTP 500: b")
            .with_response("too late");
        let requests = Arc::clone(&mock.requests);
        let provider = RetryingProvider::new(Arc::new(mock), Backoff::new(2, Duration::from_millis(1)));

        assert!(provider.complete(&LlmRequest::new("m", "hello")).await.is_err());
        assert_eq!(requests.lock().len(), 2);
    }

    // ── Embedding cache tests ──────────────────────────────────

    #[tokio::test]
    async fn test_cached_embedding_hits_cache_second_time() {
        let inner = Arc::new(MockEmbedding::new(32));
        let cache = Arc::new(MemoryCache::new());
        let cached = CachedEmbedding::new(inner.clone(), cache.clone());

        let first = cached.embed_one("remember the milk").await.unwrap();
        let second = cached.embed_one("remember the milk").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(inner.calls(), 1);

        let key = cached.cache_key("remember the milk");
        assert!(key.starts_with("embedding:mock-embedding:"));
        assert!(cache.exists(&key).await.unwrap());
        let ttl = cache.ttl(&key).await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(86_400));
    }

    #[tokio::test]
    async fn test_cached_embedding_only_embeds_misses() {
        let inner = Arc::new(MockEmbedding::new(32));
        let cache = Arc::new(MemoryCache::new());
        let cached = CachedEmbedding::new(inner.clone(), cache);

        cached.embed_one("alpha").await.unwrap();
        let vectors = cached.embed(&["alpha", "beta", "gamma"]).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[1], inner.vector_for("beta"));
        assert_eq!(inner.calls(), 2);
    }

    // ── Batch processor tests ──────────────────────────────────

    #[tokio::test]
    async fn test_batch_job_completes_in_chunks() {
        let inner = Arc::new(MockEmbedding::new(8));
        let processor = BatchProcessor::spawn(inner.clone(), 2);
        let texts: Vec<String> = (0..5).map(|i| format!("text {i}")).collect();

        let id = processor.submit(texts).unwrap();
        let job = processor.wait_for(id, Duration::from_secs(5)).await.unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.embeddings.as_ref().unwrap().len(), 5);
        assert!(job.completed_at.is_some());
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn test_batch_job_failure_recorded() {
        let inner = Arc::new(MockEmbedding::new(8).fail_on("bad"));
        let processor = BatchProcessor::spawn(inner, 10);

        let id = processor.submit(vec!["good".into(), "bad".into()]).unwrap();
        let job = processor.wait_for(id, Duration::from_secs(5)).await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("bad"));
        assert!(job.embeddings.is_none());
    }

    #[tokio::test]
    async fn test_batch_jobs_run_in_fifo_order() {
        let processor = BatchProcessor::spawn(Arc::new(MockEmbedding::new(8)), 100);
        let a = processor.submit(vec!["a".into()]).unwrap();
        let b = processor.submit(vec!["b".into()]).unwrap();

        let job_b = processor.wait_for(b, Duration::from_secs(5)).await.unwrap();
        let job_a = processor.job(a).unwrap();
        assert_eq!(job_a.status, JobStatus::Completed);
        assert!(job_a.completed_at.unwrap() <= job_b.completed_at.unwrap());

        let jobs = processor.jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, a);
    }

    #[tokio::test]
    async fn test_batch_stats_and_clear() {
        let processor = BatchProcessor::spawn(Arc::new(MockEmbedding::new(8)), 100);
        let id = processor.submit(vec!["x".into()]).unwrap();
        processor.wait_for(id, Duration::from_secs(5)).await.unwrap();

        let stats = processor.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.completed, 1);

        assert_eq!(processor.clear_old_jobs(Duration::from_secs(3600)), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(processor.clear_old_jobs(Duration::from_millis(1)), 1);
        assert!(processor.job(id).is_none());
    }

    #[tokio::test]
    async fn test_batch_empty_job_completes() {
        let processor = BatchProcessor::spawn(Arc::new(MockEmbedding::new(8)), 10);
        let id = processor.submit(vec![]).unwrap();
        let job = processor.wait_for(id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.embeddings.unwrap().len(), 0);
    }
}
