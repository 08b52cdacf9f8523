pub mod catalog;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod imdb;
pub mod indexer;
mod metrics;
pub mod persist;
pub mod scan;
pub mod search;
mod server;
pub mod snapshot;
pub mod text_index;
pub mod utils;

pub use config::Opts;
pub use error::StoreError;
pub use imdb::{IMDB, IMDBBuilder, RebuildStats, Statistics};
pub use snapshot::{IndexItem, Snapshot};
pub use text_index::OcrPayload;
