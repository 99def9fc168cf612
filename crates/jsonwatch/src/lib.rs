//! jsonwatch - live synchronization core for line-delimited JSON telemetry.
//!
//! A device streams one JSON object per line. Each line is a partial update
//! of a nested state tree: nested objects are nodes, scalars are typed items.
//! This crate keeps a local mirror of that tree, tracks which values the
//! device is still reporting, and turns local edits back into wire lines.
//!
//! - [`tree`]    - the live tree: nodes, items, metadata, identity
//! - [`codec`]   - protocol lines to deltas and back, scale factors
//! - [`merge`]   - applying deltas as cycles, staleness
//! - [`command`] - validating and encoding local edits
//! - [`ingest`]  - reader thread and line framing
//! - [`session`] - the single mutator context tying it together
//! - [`config`]  - persisted tree shape and item metadata
//!
//! ```
//! use jsonwatch::session::Session;
//!
//! let mut session = Session::new();
//! session.apply_line(r#"{"temp": 235, "pid": {"kp": 55}}"#).unwrap();
//! assert_eq!(session.tree().view()["pid"]["kp"], 55);
//! ```

pub mod tree;
pub mod codec;
pub mod events;
pub mod merge;
pub mod command;
pub mod ingest;
pub mod config;
pub mod session;
pub mod cli;

pub use command::{EditError, PreparedEdit};
pub use events::{Event, EventQueue, Origin};
pub use merge::{MergeError, MergeReport};
pub use session::{Session, SessionError};
pub use tree::{Entry, EntryId, Item, ItemType, ItemValue, Node, Tree, TreeError};
