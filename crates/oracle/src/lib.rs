pub mod fewshot;
pub mod generator;
pub mod providers;
pub mod retry;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use fewshot::{Demonstration, FewShotSet};
pub use generator::{GenerationParams, Generator, Message, OracleError, Role};
pub use providers::{build_oracle, create_generator};
pub use retry::{Limited, Retrying};
