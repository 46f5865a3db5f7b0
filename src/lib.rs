//! Journal-based file tree mirroring: scan a content tree, combine
//! journals into a net change set, and replay that change set onto
//! another tree.

pub mod combiner;
pub mod config;
pub mod error;
pub mod filter;
pub mod hash;
pub mod hint;
pub mod io;
pub mod journal;
pub mod mirrorset;
pub mod pathcontent;
pub mod replay;
pub mod scanner;
pub mod signing;
pub mod transport;
pub mod tree;

pub use combiner::Combiner;
pub use error::{EngineError, Result};
pub use hash::{hash_bytes, hash_file, FileDigest, Hasher};
pub use hint::ChangeHints;
pub use journal::{Action, Journal, Payload};
pub use mirrorset::{HttpMirrorSet, LocalMirrorSet, SourceMirrorSet};
pub use pathcontent::PathContent;
pub use replay::{generate_with_bodies, ReplayEntry, ReplayGenerator, Replayer};
pub use scanner::{scan, ScanOptions};
pub use transport::{HttpTransport, LocalTransport, Transport};
pub use tree::Tree;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
