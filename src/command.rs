//! Operator command channel.
//!
//! A dedicated thread reads newline-delimited text and writes the resulting selection
//! into `SelectionState`. The thread is never joined by the frame loop; it lives until
//! the input closes or the process exits.

use anyhow::{Context, Result};
use std::io::{BufRead, ErrorKind};
use std::thread::JoinHandle;

use crate::selection::{Selection, SelectionState};

/// Handles one operator line. Never rejects input.
pub fn apply_command(state: &SelectionState, line: &str) -> Selection {
    let selection = Selection::from_command(line);
    match &selection {
        Selection::None => log::info!("tracking stopped"),
        Selection::Target(id) => log::info!("now tracking object: {}", id),
    }
    state.replace(selection.clone());
    selection
}

/// Handle to the detached reader thread.
pub struct CommandChannel {
    handle: JoinHandle<u64>,
}

impl CommandChannel {
    /// Spawns the reader thread on `reader` (usually locked stdin).
    pub fn spawn<R>(reader: R, state: SelectionState) -> Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let handle = std::thread::Builder::new()
            .name("command-channel".to_string())
            .spawn(move || read_commands(reader, &state))
            .context("spawn command channel thread")?;
        Ok(Self { handle })
    }

    /// Blocks until the input closes and returns the number of lines handled.
    ///
    /// The daemon never calls this; it exists for finite inputs such as scripted sessions.
    pub fn wait_closed(self) -> Result<u64> {
        self.handle
            .join()
            .map_err(|_| anyhow::anyhow!("command channel thread panicked"))
    }
}

fn read_commands<R: BufRead>(reader: R, state: &SelectionState) -> u64 {
    let mut handled = 0u64;
    for line in reader.lines() {
        match line {
            Ok(line) => {
                apply_command(state, &line);
                handled += 1;
            }
            Err(err) if err.kind() == ErrorKind::InvalidData => {
                log::warn!("ignoring non UTF-8 operator input: {}", err);
            }
            Err(err) => {
                log::warn!("operator input failed: {}", err);
                break;
            }
        }
    }
    log::debug!("command channel closed after {} lines", handled);
    handled
}
