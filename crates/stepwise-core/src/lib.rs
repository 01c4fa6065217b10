pub mod config;
pub mod error;
pub mod event;
pub mod provider;
pub mod stream;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{ErrorKind, Result, StepwiseError};
pub use event::EventBus;
pub use types::*;
