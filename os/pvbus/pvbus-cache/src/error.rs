/// Why a [`Cache::get`](crate::Cache::get) produced no object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Exhaustion {
    #[error("backing allocation failed")]
    Allocation,
    #[error("object constructor failed")]
    Construction,
    #[error("injected fault")]
    Injected,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The cache could not allocate its own bookkeeping.
    #[error("out of memory")]
    OutOfMemory,
    /// Empty names and names longer than
    /// [`MAXIMUM_NAME_LENGTH`](crate::MAXIMUM_NAME_LENGTH) are rejected.
    #[error("invalid cache name")]
    InvalidName,
    /// No object could be handed out. Callers are expected to back off and
    /// retry, or fail the request that needed the object.
    #[error("cache exhausted: {0}")]
    Exhausted(#[from] Exhaustion),
}
