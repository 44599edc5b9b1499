//! lexitree Core - Document and Tree Types
//!
//! Data structures shared by every lexitree crate, plus the two pure
//! algorithms that need no I/O: temporal version resolution and tree
//! truncation. Nothing in this crate performs I/O.

mod config;
mod document;
mod enums;
mod error;
mod identity;
mod tree;

pub mod truncate;
pub mod version;

pub use config::*;
pub use document::*;
pub use enums::*;
pub use error::*;
pub use identity::*;
pub use tree::*;
pub use truncate::{truncate, truncate_tree, TruncateRequest};
pub use version::{TieBreak, VersionPolicy, VersionResolver};
