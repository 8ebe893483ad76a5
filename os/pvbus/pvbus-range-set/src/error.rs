#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeSetError {
    /// A range node could not be allocated. The set is left as it was.
    #[error("out of memory")]
    OutOfMemory,
}
