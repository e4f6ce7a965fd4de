#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("cache write failed: {0}")]
    Cache(#[from] kq_cache::CacheError),
}
