//! # agora-client
//!
//! Client-side session management for a single chat room: the live
//! transport session, a bounded transcript, message validation and the
//! attachment draft.

pub mod attachment;
pub mod composer;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod state;
pub mod window;

use tracing_subscriber::{fmt, EnvFilter};

pub use composer::{AttachmentSummary, Composer, DraftToken};
pub use config::ClientConfig;
pub use error::{AttachError, SendError, ValidationError};
pub use events::ChatEvent;
pub use manager::ChatSessionManager;
pub use state::{RetryInfo, SessionSnapshot};
pub use window::{InsertOutcome, MessageWindow};

/// Install the global tracing subscriber. Respects `RUST_LOG`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("agora_client=debug,agora_net=debug,warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
