//! Host terminal handling for interactive sessions

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing::{debug, warn};

/// Keeps the host terminal in raw mode while alive
///
/// Keystrokes (Ctrl-C included) then go to the container's tty instead of
/// being interpreted by the host line discipline.
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    /// Enter raw mode when `enabled`; failure leaves the terminal untouched
    pub fn enter(enabled: bool) -> Self {
        if !enabled {
            return Self { active: false };
        }
        match enable_raw_mode() {
            Ok(()) => {
                debug!("Terminal switched to raw mode");
                Self { active: true }
            }
            Err(e) => {
                warn!("Cannot switch terminal to raw mode: {}", e);
                Self { active: false }
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = disable_raw_mode() {
                warn!("Failed to restore terminal mode: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_guard_is_inert() {
        let guard = RawModeGuard::enter(false);
        assert!(!guard.is_active());
    }
}
