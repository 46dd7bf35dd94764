//! Streamed tar archives of a source tree.
//!
//! ```text
//! +-----------------+   PipeWriter    +---------------+   stdin   +-----------+
//! | ArchiveBuilder  | --------------> | ArchiveStream | --------> | tar xf -  |
//! | (blocking task) |  bounded chunks | (async)       |           | (remote)  |
//! +-----------------+                 +---------------+           +-----------+
//! ```
//!
//! Construction and transmission run concurrently; memory use is bounded by
//! the pipe capacity regardless of archive size.

pub mod builder;
pub mod pipe;

pub use builder::{to_slash, ArchiveBuilder, ArchiveStats, RemoteFileMap};
pub use pipe::{archive_pipe, ArchiveStream, PipeWriter, CHUNK_SIZE, PIPE_CAPACITY};
