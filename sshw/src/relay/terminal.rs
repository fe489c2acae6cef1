//! Local controlling terminal.

use std::io;
use std::sync::Arc;

use log::warn;

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSize {
    pub cols: u32,
    pub rows: u32,
}

impl TermSize {
    pub fn new(cols: u32, rows: u32) -> Self {
        Self { cols, rows }
    }
}

impl std::fmt::Display for TermSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// The terminal the relay runs in.
pub trait LocalTerminal: Send + Sync + 'static {
    /// Disable line buffering and echo, remembering the prior mode.
    fn enter_raw_mode(&self) -> io::Result<()>;

    /// Return to the mode recorded by `enter_raw_mode`.
    fn restore_mode(&self) -> io::Result<()>;

    /// Current dimensions.
    fn size(&self) -> io::Result<TermSize>;
}

/// The process's controlling terminal, driven through crossterm.
#[derive(Debug, Default, Clone, Copy)]
pub struct ControllingTerminal;

impl LocalTerminal for ControllingTerminal {
    fn enter_raw_mode(&self) -> io::Result<()> {
        crossterm::terminal::enable_raw_mode()
    }

    fn restore_mode(&self) -> io::Result<()> {
        crossterm::terminal::disable_raw_mode()
    }

    fn size(&self) -> io::Result<TermSize> {
        let (cols, rows) = crossterm::terminal::size()?;
        Ok(TermSize::new(u32::from(cols), u32::from(rows)))
    }
}

/// Holds the terminal in raw mode; the prior mode comes back exactly once,
/// either through [`RawModeGuard::restore`] or on drop.
pub struct RawModeGuard<T: LocalTerminal> {
    terminal: Arc<T>,
    restored: bool,
}

impl<T: LocalTerminal> RawModeGuard<T> {
    pub fn engage(terminal: Arc<T>) -> io::Result<Self> {
        terminal.enter_raw_mode()?;
        Ok(Self {
            terminal,
            restored: false,
        })
    }

    pub fn restore(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        if let Err(e) = self.terminal.restore_mode() {
            warn!("Failed to restore terminal mode: {}", e);
        }
    }
}

impl<T: LocalTerminal> Drop for RawModeGuard<T> {
    fn drop(&mut self) {
        self.restore();
    }
}
