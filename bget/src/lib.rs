//! Download pipeline: resolve an asset, negotiate playback, fetch the
//! elementary streams, and mux them into a deliverable file.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod muxer;
pub mod orchestrator;
pub mod probe;
pub mod process;
pub mod progress;
pub mod session;
pub mod task;
pub mod utils;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use fetcher::StreamFetcher;
pub use muxer::{Container, Muxer};
pub use orchestrator::{
    BiliSource, DeliveryKind, DirectLinks, DownloadRequest, MediaDescription, MediaSource,
    NamingPolicy, Orchestrator, TaskOutput,
};
pub use probe::{MetadataProbe, ProbedInfo};
pub use session::{MemorySessionStore, SessionStore};
pub use task::{TaskSnapshot, TaskStatus};
