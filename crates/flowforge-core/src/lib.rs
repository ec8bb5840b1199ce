pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use context::ExecutionContext;
pub use error::{FlowError, Result};
pub use event::{ExecutionEvent, RunObserver};
pub use types::*;
