//! nodeclass - hierarchical configuration compiler
//!
//! Nodes declare ancestor classes; classes declare further ancestors plus
//! parameter trees. The compiler merges every ancestor in inheritance
//! order, resolves the embedded `${…}` reference and `$[…]` inventory
//! query language, and emits a fully rendered node view or a fleet-wide
//! inventory.

pub mod cli;
pub mod compile;
pub mod config;
pub mod core;
pub mod node;
pub mod output;
pub mod path;
pub mod storage;
pub mod value;

pub use crate::compile::Compiler;
pub use crate::core::error::{Error, Result};
pub use crate::core::settings::Settings;
pub use crate::node::entity::Entity;
pub use crate::path::DictPath;
pub use crate::storage::{MemoryStorage, NodeStorage, YamlFsStorage};
