use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("empty template pattern")]
    Empty,

    #[error("pattern expects {expected} parameters, got {got}")]
    ParamCount { expected: usize, got: usize },
}
