//! File index and change detection.
//!
//! [`FileIndex`] is the persisted size/mtime snapshot of a synced root;
//! [`indexer`] walks the tree and diffs it against that snapshot.

pub mod file_index;
pub mod indexer;

pub use file_index::{
    delete_index_file, ensure_ignore_entry, index_path_relative_to_root, resolve_index_path,
    write_file_map, FileData, FileIndex, FileMap, INDEX_DIR, INDEX_FILE_NAME,
};
pub use indexer::{
    diff_tree, file_key, key_path, run_indexer, scan, update_index_with_watch_changes, IndexerResult,
    TreeDiff, VCS_DIR,
};
