//! devsync: incremental source push into development containers.
//!
//! A size/mtime file index decides what changed since the last push; the
//! changes are streamed as a tar archive into `tar xf -` running inside the
//! container, after removing files that were deleted locally.

pub mod archive;
pub mod config;
pub mod error;
pub mod ignore_rules;
pub mod index;
pub mod registry;
pub mod sync;
pub mod tasks;
pub mod transport;

pub use archive::{ArchiveBuilder, ArchiveStats, ArchiveStream, RemoteFileMap};
pub use config::{DevsyncConfig, Preferences, Project};
pub use error::{Result, SyncError};
pub use ignore_rules::IgnoreRules;
pub use index::{run_indexer, FileData, FileIndex, IndexerResult};
pub use registry::{DevfileStack, DirectoryCatalog, Registry, RegistryClient, StackFilter};
pub use sync::{SyncCoordinator, SyncParameters};
pub use tasks::ConcurrentTasks;
pub use transport::{Backend, ComponentInfo, ExecOutput, ProcessExecutor, RemoteExecutor, Transport};
