//! The session: the single mutator context around a live tree.
//!
//! A [`Session`] owns the tree, its pending notifications and, while
//! connected, the device transport: a [`ReaderHandle`] for the read half and
//! a sink for the write half. Inbound lines are merged only from
//! [`Session::poll`] and local edits only from [`Session::edit`], both on
//! `&mut self`, so no lock guards the tree.
//!
//! Wire traffic is logged on the `jsonwatch::traffic` target with a
//! `direction` field (`in` or `out`).

use std::io::{self, Read, Write};
use std::path::Path as FsPath;

use jsonwatch_path::ToPath;
use serde_json::Value;
use thiserror::Error;

use crate::codec::encode_command;
use crate::command::{apply_edit, prepare_edit, EditError, PreparedEdit};
use crate::config::{self, ConfigError, TreeConfig};
use crate::events::{Event, EventQueue};
use crate::ingest::{Disconnect, Reader, ReaderEvent, ReaderHandle, ReaderOptions};
use crate::merge::{self, MergeError, MergeReport};
use crate::tree::{ItemValue, Tree};

const TRAFFIC: &str = "jsonwatch::traffic";

/// Control message that resets the device's controller state.
pub const RESET_COMMAND: &str = "resetpid";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection lost: {0}")]
    ConnectionLost(Disconnect),
    #[error("not connected")]
    NotConnected,
    #[error("already connected")]
    AlreadyConnected,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Outcome of one [`Session::poll`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Lines merged as complete cycles.
    pub applied: usize,
    /// Lines dropped as malformed or conflicting.
    pub rejected: usize,
}

struct Connection {
    reader: ReaderHandle,
    sink: Box<dyn Write + Send>,
}

pub struct Session {
    tree: Tree,
    events: EventQueue,
    options: ReaderOptions,
    connection: Option<Connection>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_options(ReaderOptions::default())
    }

    pub fn with_options(options: ReaderOptions) -> Self {
        Self { tree: Tree::new(), events: EventQueue::new(), options, connection: None }
    }

    /// Start a session over an existing tree, e.g. one built from a
    /// configuration.
    pub fn with_tree(tree: Tree) -> Self {
        let mut session = Self::new();
        session.tree = tree;
        session
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Structural edits (rename, insert, remove) go through the tree directly.
    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    // ── Connection ────────────────────────────────────────────────────────

    /// Attach a device transport. `source` must return from `read`
    /// periodically (read timeout or `WouldBlock`) so a disconnect can stop
    /// the reader.
    pub fn connect<R, W>(&mut self, source: R, sink: W) -> Result<(), SessionError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        if self.connection.is_some() {
            return Err(SessionError::AlreadyConnected);
        }
        let reader = Reader::spawn(source, self.options.clone())?;
        self.connection = Some(Connection { reader, sink: Box::new(sink) });
        tracing::info!("connected");
        Ok(())
    }

    /// Stop the reader and drop the transport. Queued lines are discarded;
    /// the tree keeps its last state. Returns whether a connection was open.
    pub fn disconnect(&mut self) -> bool {
        match self.connection.take() {
            Some(connection) => {
                connection.reader.stop();
                tracing::info!("disconnected");
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    // ── Inbound ───────────────────────────────────────────────────────────

    /// Merge every line queued by the reader, in arrival order, without
    /// blocking. Each line is its own cycle; a bad line is logged and
    /// skipped.
    ///
    /// # Errors
    ///
    /// [`SessionError::ConnectionLost`] once the reader reports that the
    /// transport is gone. Lines received before that are still merged and
    /// the session is left disconnected.
    pub fn poll(&mut self) -> Result<PollReport, SessionError> {
        let mut report = PollReport::default();
        let queued = match &self.connection {
            Some(connection) => connection.reader.drain(),
            None => return Ok(report),
        };
        let mut lost = None;
        for event in queued {
            match event {
                ReaderEvent::Line(line) => match self.merge_line(&line) {
                    Ok(_) => report.applied += 1,
                    Err(_) => report.rejected += 1,
                },
                ReaderEvent::Disconnected(reason) => {
                    lost = Some(reason);
                    break;
                }
            }
        }
        if let Some(reason) = lost {
            self.connection = None;
            tracing::warn!(%reason, "connection lost");
            return Err(SessionError::ConnectionLost(reason));
        }
        Ok(report)
    }

    /// Merge one line as if it had arrived from the device.
    pub fn apply_line(&mut self, line: &str) -> Result<MergeReport, MergeError> {
        self.merge_line(line)
    }

    fn merge_line(&mut self, line: &str) -> Result<MergeReport, MergeError> {
        tracing::debug!(target: TRAFFIC, direction = "in", line);
        merge::apply_line(&mut self.tree, line, &mut self.events).map_err(|e| {
            tracing::warn!(error = %e, line, "rejected device line");
            e
        })
    }

    // ── Outbound ──────────────────────────────────────────────────────────

    /// Validate an edit, send it to the device and mirror it locally.
    ///
    /// Nothing is sent unless the edit is valid.
    ///
    /// # Errors
    ///
    /// [`EditError::NotConnected`] without a transport, the validation
    /// errors of [`prepare_edit`], and [`EditError::ConnectionLost`] if the
    /// write fails (the session is disconnected in that case).
    pub fn edit<P: ToPath + ?Sized>(
        &mut self,
        path: &P,
        value: impl Into<ItemValue>,
    ) -> Result<PreparedEdit, EditError> {
        if self.connection.is_none() {
            return Err(EditError::NotConnected);
        }
        let edit = prepare_edit(&self.tree, path, value)?;
        self.send_line(&edit.line).map_err(|_| EditError::ConnectionLost)?;
        apply_edit(&mut self.tree, &edit, &mut self.events)?;
        Ok(edit)
    }

    /// Send a single-member control message.
    pub fn send_command(&mut self, key: &str, value: impl Into<Value>) -> Result<(), SessionError> {
        if self.connection.is_none() {
            return Err(SessionError::NotConnected);
        }
        let line = encode_command(key, value);
        self.send_line(&line)
    }

    /// Ask the device to reset its controller state.
    pub fn send_reset(&mut self) -> Result<(), SessionError> {
        self.send_command(RESET_COMMAND, 1)
    }

    fn send_line(&mut self, line: &str) -> Result<(), SessionError> {
        let connection = self.connection.as_mut().ok_or(SessionError::NotConnected)?;
        let written = connection
            .sink
            .write_all(line.as_bytes())
            .and_then(|()| connection.sink.write_all(b"\n"))
            .and_then(|()| connection.sink.flush());
        match written {
            Ok(()) => {
                tracing::debug!(target: TRAFFIC, direction = "out", line);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "device write failed");
                self.disconnect();
                Err(SessionError::ConnectionLost(Disconnect::Error {
                    kind: e.kind(),
                    message: e.to_string(),
                }))
            }
        }
    }

    // ── Notifications ─────────────────────────────────────────────────────

    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain().collect()
    }

    pub fn events_mut(&mut self) -> &mut EventQueue {
        &mut self.events
    }

    // ── Configuration ─────────────────────────────────────────────────────

    /// Replace the tree with the one described by a configuration document.
    /// On error the current tree is kept.
    pub fn load_config_str(&mut self, text: &str) -> Result<(), ConfigError> {
        self.replace_tree(config::load_str(text)?);
        Ok(())
    }

    pub fn load_config_file(&mut self, path: impl AsRef<FsPath>) -> Result<(), ConfigError> {
        self.replace_tree(config::load_file(path)?);
        Ok(())
    }

    pub fn dump_config(&self) -> TreeConfig {
        config::dump(&self.tree)
    }

    /// Start over with an empty tree.
    pub fn clear(&mut self) {
        self.tree.clear();
        self.events.clear();
    }

    fn replace_tree(&mut self, tree: Tree) {
        tracing::info!(entries = tree.len(), "loaded configuration");
        self.tree = tree;
        self.events.clear();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("entries", &self.tree.len())
            .field("pending_events", &self.events.len())
            .field("connected", &self.is_connected())
            .finish()
    }
}
