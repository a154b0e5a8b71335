//! HTTP/2 flow control
//!
//! Flow control as defined in RFC 9113 Section 5.2. Every DATA frame is
//! charged against two windows, the connection window and the window of the
//! stream it belongs to, in each direction.
//!
//! Send windows may legitimately become negative when the peer lowers
//! SETTINGS_INITIAL_WINDOW_SIZE while data is in flight (Section 6.9.2);
//! [`FlowControlWindow::available`] reports zero until WINDOW_UPDATE frames
//! restore credit. DATA accounting alone never drives a window below zero:
//! the sender reserves at most what is available and the receiver rejects
//! frames that overdraw its window.

use super::error::{Error, Result};
use super::{DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE};

/// One flow-control window
#[derive(Debug, Clone)]
pub struct FlowControlWindow {
    initial_size: u32,
    current_size: i64,
}

impl FlowControlWindow {
    pub fn new() -> Self {
        Self::with_initial_size(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    pub fn with_initial_size(initial_size: u32) -> Self {
        FlowControlWindow {
            initial_size,
            current_size: initial_size as i64,
        }
    }

    /// Current window size (negative after a SETTINGS reduction)
    pub fn size(&self) -> i64 {
        self.current_size
    }

    pub fn initial_size(&self) -> u32 {
        self.initial_size
    }

    /// Credit that may be spent right now
    pub fn available(&self) -> usize {
        self.current_size.max(0) as usize
    }

    /// Reserve up to `amount` bytes of credit
    ///
    /// Returns the number of bytes actually reserved, which is zero when the
    /// window is exhausted.
    pub fn reserve(&mut self, amount: usize) -> usize {
        let granted = amount.min(self.available());
        self.current_size -= granted as i64;
        granted
    }

    /// Apply a WINDOW_UPDATE increment
    ///
    /// A zero increment is a PROTOCOL_ERROR; growing past 2^31-1 is a
    /// FLOW_CONTROL_ERROR.
    pub fn increase(&mut self, increment: u32) -> Result<i64> {
        if increment == 0 {
            return Err(Error::Protocol(
                "WINDOW_UPDATE increment must be non-zero".to_string(),
            ));
        }

        let new_size = self.current_size + increment as i64;
        if new_size > MAX_WINDOW_SIZE as i64 {
            return Err(Error::FlowControl(format!(
                "window size {} exceeds maximum (2^31-1)",
                new_size
            )));
        }

        self.current_size = new_size;
        Ok(self.current_size)
    }

    /// Charge received DATA against this window
    pub fn consume(&mut self, amount: usize) -> Result<()> {
        if amount as i64 > self.current_size {
            return Err(Error::FlowControl(format!(
                "received {} bytes with only {} bytes of window",
                amount, self.current_size
            )));
        }
        self.current_size -= amount as i64;
        Ok(())
    }

    /// Apply a new SETTINGS_INITIAL_WINDOW_SIZE
    ///
    /// The difference between the new and the old initial size is added to
    /// the current size, which may leave the window negative.
    pub fn update_initial_size(&mut self, new_initial_size: u32) -> Result<()> {
        let diff = new_initial_size as i64 - self.initial_size as i64;
        let new_current = self.current_size + diff;

        if new_current > MAX_WINDOW_SIZE as i64 {
            return Err(Error::FlowControl(format!(
                "new window size {} exceeds maximum (2^31-1)",
                new_current
            )));
        }

        self.initial_size = new_initial_size;
        self.current_size = new_current;
        Ok(())
    }

    /// Increment to announce once less than half of the initial window is
    /// left; the window is credited immediately.
    pub fn take_update(&mut self) -> Option<u32> {
        let initial = self.initial_size as i64;
        if self.current_size >= initial / 2 {
            return None;
        }
        let increment = initial - self.current_size;
        self.current_size = initial;
        Some(increment as u32)
    }
}

impl Default for FlowControlWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Send and receive windows of one scope (the connection or a single stream)
#[derive(Debug, Clone, Default)]
pub struct FlowControl {
    send: FlowControlWindow,
    recv: FlowControlWindow,
}

impl FlowControl {
    pub fn new(send_size: u32, recv_size: u32) -> Self {
        FlowControl {
            send: FlowControlWindow::with_initial_size(send_size),
            recv: FlowControlWindow::with_initial_size(recv_size),
        }
    }

    pub fn send_window(&self) -> &FlowControlWindow {
        &self.send
    }

    pub fn send_window_mut(&mut self) -> &mut FlowControlWindow {
        &mut self.send
    }

    pub fn recv_window(&self) -> &FlowControlWindow {
        &self.recv
    }

    pub fn recv_window_mut(&mut self) -> &mut FlowControlWindow {
        &mut self.recv
    }
}
