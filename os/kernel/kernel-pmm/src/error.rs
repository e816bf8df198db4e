#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PmmError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid arguments")]
    InvalidArgs,
    #[error("invalid node layout: {0}")]
    InvalidLayout(&'static str),
}
