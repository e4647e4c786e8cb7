//! Window state machine
//!
//! ```text
//!            on_window_close()
//!   ┌──────┐ ───────────────► ┌──────────┐
//!   │ Open │                  │ Flushing │
//!   └──────┘ ◄─────────────── └──────────┘
//!      │        slots drained
//!      │ shutdown()
//!      ▼
//!   ┌────────┐
//!   │ Closed │  (terminal)
//!   └────────┘
//! ```

use std::fmt;

use crate::error::{Error, Result};

/// Window controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    /// Accepting merges
    Open,
    /// Draining slots; no merges accepted
    Flushing,
    /// Shut down; nothing accepted
    Closed,
}

impl fmt::Display for WindowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WindowState::Open => "open",
            WindowState::Flushing => "flushing",
            WindowState::Closed => "closed",
        })
    }
}

/// Tracks the window lifecycle and the current window id
#[derive(Debug, Clone)]
pub struct WindowController {
    state: WindowState,
    window_id: u64,
    windows_flushed: u64,
}

impl WindowController {
    /// Start in `Open` with window id 0
    pub fn new() -> Self {
        Self {
            state: WindowState::Open,
            window_id: 0,
            windows_flushed: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> WindowState {
        self.state
    }

    /// Id of the window currently accumulating
    pub fn window_id(&self) -> u64 {
        self.window_id
    }

    /// Number of completed flushes
    pub fn windows_flushed(&self) -> u64 {
        self.windows_flushed
    }

    /// Fail unless merges are currently accepted
    pub fn ensure_open(&self, operation: &'static str) -> Result<()> {
        match self.state {
            WindowState::Open => Ok(()),
            state => Err(Error::InvalidState {
                operation,
                state: state.to_string(),
            }),
        }
    }

    /// Begin the next window and return its id
    pub fn open(&mut self) -> Result<u64> {
        self.ensure_open("open window")?;
        self.window_id += 1;
        Ok(self.window_id)
    }

    /// `Open → Flushing`
    pub fn begin_flush(&mut self) -> Result<()> {
        self.ensure_open("close window")?;
        self.state = WindowState::Flushing;
        Ok(())
    }

    /// `Flushing → Open`
    pub fn end_flush(&mut self) {
        if self.state == WindowState::Flushing {
            self.state = WindowState::Open;
            self.windows_flushed += 1;
        }
    }

    /// Move to `Closed`; returns false if already closed
    pub fn close(&mut self) -> bool {
        let was_closed = self.state == WindowState::Closed;
        self.state = WindowState::Closed;
        !was_closed
    }
}

impl Default for WindowController {
    fn default() -> Self {
        Self::new()
    }
}
