#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache key not found")]
    NotFound,

    #[error("cache unreachable at startup")]
    Unreachable,
}
