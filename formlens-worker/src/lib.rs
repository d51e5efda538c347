pub mod error;
pub mod models;
pub mod processor;
pub mod settings;
pub mod storage;
pub mod store;

pub use error::ProcessError;
pub use processor::{ProcessOptions, ProcessOutcome, Processor};
pub use storage::{HttpStorage, LocalStorage, Storage, StorageError};
pub use store::{Store, StoreError};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Set up the process-wide subscriber. `LOG_LEVEL` overrides the default
/// filter; `debug` bumps the crate-local default to debug.
pub fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "formlens_worker=debug,formlens_core=debug,formlens_cli=debug"
    } else {
        "formlens_worker=info,formlens_core=info,formlens_cli=info"
    };
    let env_filter =
        EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new(default_filter));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_line_number(true)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
