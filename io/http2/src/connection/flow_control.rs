//! Credit-based flow control (RFC 9113 Section 5.2).
//!
//! Send and receive credit are tracked separately: the peer grants us
//! send credit with WINDOW_UPDATE, and we grant it receive credit the
//! same way once it has used enough of what we advertised.

use crate::frame::MAX_WINDOW_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FlowControlError {
    #[error("window update overflows the maximum window size")]
    Overflow,
    #[error("peer sent {len} bytes with only {available} bytes of window")]
    Exceeded { len: u32, available: i64 },
}

/// Credit available for sending DATA.
///
/// The window may go negative when the peer shrinks
/// SETTINGS_INITIAL_WINDOW_SIZE while data is in flight.
#[derive(Debug, Clone, Copy)]
pub struct SendWindow {
    window: i64,
}

impl SendWindow {
    pub fn new(initial: u32) -> Self {
        Self {
            window: initial as i64,
        }
    }

    /// Bytes that may be sent right now.
    pub fn available(&self) -> u32 {
        self.window.clamp(0, MAX_WINDOW_SIZE as i64) as u32
    }

    pub fn consume(&mut self, len: u32) {
        self.window -= len as i64;
    }

    /// Apply a WINDOW_UPDATE increment.
    pub fn increase(&mut self, increment: u32) -> Result<(), FlowControlError> {
        self.adjust(increment as i64)
    }

    /// Apply the difference between an old and new initial window size.
    pub fn adjust(&mut self, delta: i64) -> Result<(), FlowControlError> {
        let window = self.window + delta;
        if window > MAX_WINDOW_SIZE as i64 {
            return Err(FlowControlError::Overflow);
        }
        self.window = window;
        Ok(())
    }
}

/// Credit we have granted the peer for sending DATA.
#[derive(Debug, Clone, Copy)]
pub struct RecvWindow {
    window: i64,
    target: u32,
    unacked: u32,
}

impl RecvWindow {
    pub fn new(target: u32) -> Self {
        Self {
            window: target as i64,
            target,
            unacked: 0,
        }
    }

    pub fn available(&self) -> i64 {
        self.window
    }

    /// Account for a received DATA frame (including padding).
    pub fn consume(&mut self, len: u32) -> Result<(), FlowControlError> {
        if len as i64 > self.window {
            return Err(FlowControlError::Exceeded {
                len,
                available: self.window,
            });
        }
        self.window -= len as i64;
        self.unacked += len;
        Ok(())
    }

    /// Returns the increment to advertise once at least half of the target
    /// window has been consumed, restoring the window to its target.
    pub fn take_update(&mut self) -> Option<u32> {
        if self.unacked == 0 || self.unacked < self.target / 2 {
            return None;
        }
        let increment = self.unacked;
        self.window += increment as i64;
        self.unacked = 0;
        Some(increment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_window_consume_and_increase() {
        let mut window = SendWindow::new(100);
        window.consume(60);
        assert_eq!(window.available(), 40);
        window.increase(10).unwrap();
        assert_eq!(window.available(), 50);
    }

    #[test]
    fn test_send_window_negative_after_shrink() {
        let mut window = SendWindow::new(100);
        window.consume(80);
        window.adjust(-50).unwrap();
        assert_eq!(window.available(), 0);
        window.increase(40).unwrap();
        assert_eq!(window.available(), 10);
    }

    #[test]
    fn test_send_window_overflow() {
        let mut window = SendWindow::new(MAX_WINDOW_SIZE);
        assert_eq!(window.increase(1), Err(FlowControlError::Overflow));
        assert_eq!(window.available(), MAX_WINDOW_SIZE);
    }

    #[test]
    fn test_recv_window_update_at_half() {
        let mut window = RecvWindow::new(100);
        window.consume(49).unwrap();
        assert_eq!(window.take_update(), None);
        window.consume(1).unwrap();
        assert_eq!(window.take_update(), Some(50));
        assert_eq!(window.available(), 100);
        assert_eq!(window.take_update(), None);
    }

    #[test]
    fn test_recv_window_rejects_overrun() {
        let mut window = RecvWindow::new(10);
        window.consume(8).unwrap();
        assert_eq!(
            window.consume(3),
            Err(FlowControlError::Exceeded { len: 3, available: 2 })
        );
    }
}
