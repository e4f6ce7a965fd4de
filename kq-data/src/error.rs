#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("cache write failed: {0}")]
    Cache(#[from] kq_cache::CacheError),

    #[error("component is degraded and refuses further writes until operator reset")]
    Degraded,
}
