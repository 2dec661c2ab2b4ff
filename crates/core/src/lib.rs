pub mod case;
pub mod config;
pub mod diagnosis;
pub mod error;
pub mod sample;
pub mod template;
pub mod verdict;

pub use case::*;
pub use config::Config;
pub use diagnosis::*;
pub use error::*;
pub use sample::*;
pub use template::*;
pub use verdict::*;
