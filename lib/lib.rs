pub mod backend;
pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod logger;
pub mod manager;
pub mod meta;
pub mod store;
pub mod utils;

pub use config::Config;
pub use directory::{Directory, DirectoryLock, IndexInput, IndexOutput};
pub use error::{Error, Result};
pub use manager::{IndexManager, IndexWriter, MutationKind, WriteHandle};
