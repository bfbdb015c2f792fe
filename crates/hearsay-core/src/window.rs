//! Sliding replay window over incoming connection numbers.
//!
//! A window covers `[centre - W/2, centre + W/2)` where `W` is
//! [`CONNECTION_WINDOW_SIZE`]. Each slot records whether that incoming
//! connection number has been consumed. Windows are values: every operation
//! returns a new window and leaves the input untouched, so the store can
//! persist the result atomically with the decision.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, WindowError};

/// Size of every connection window, in bits. Changing this requires
/// migrating every stored window.
pub const CONNECTION_WINDOW_SIZE: u64 = 32;

/// Length of the stored bitmap in bytes.
pub const CONNECTION_WINDOW_BYTES: usize = (CONNECTION_WINDOW_SIZE / 8) as usize;

const HALF: u64 = CONNECTION_WINDOW_SIZE / 2;

/// Outcome of checking a connection number against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCheck {
    /// Below the lower bound.
    TooOld,
    /// Inside the window and already consumed.
    Duplicate,
    /// Inside the window and not yet consumed.
    Accept,
    /// Above the upper bound; accepting moves the centre to the number.
    Advance,
}

/// A connection window: a centre plus a bitmap of consumed slots.
///
/// Bit `i` of the bitmap (most significant bit of byte 0 first) records
/// connection number `lower() + i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionWindow {
    centre: u64,
    bitmap: [u8; CONNECTION_WINDOW_BYTES],
}

impl ConnectionWindow {
    /// A fresh window centred on zero with no slots consumed.
    pub const fn new() -> Self {
        Self {
            centre: 0,
            bitmap: [0u8; CONNECTION_WINDOW_BYTES],
        }
    }

    /// Rebuild a window from its stored parts.
    pub fn from_parts(centre: u64, bitmap: &[u8]) -> Result<Self, CoreError> {
        let bitmap: [u8; CONNECTION_WINDOW_BYTES] = bitmap.try_into().map_err(|_| {
            CoreError::InvalidWindow(format!(
                "bitmap is {} bytes, expected {}",
                bitmap.len(),
                CONNECTION_WINDOW_BYTES
            ))
        })?;
        Ok(Self { centre, bitmap })
    }

    pub fn centre(&self) -> u64 {
        self.centre
    }

    pub fn bitmap(&self) -> &[u8; CONNECTION_WINDOW_BYTES] {
        &self.bitmap
    }

    /// Lowest connection number inside the window.
    pub fn lower(&self) -> u64 {
        self.centre.saturating_sub(HALF)
    }

    /// One past the highest connection number inside the window.
    pub fn upper(&self) -> u64 {
        self.centre.saturating_add(HALF)
    }

    /// Classify `n` without changing the window.
    pub fn check(&self, n: u64) -> WindowCheck {
        if n < self.lower() {
            WindowCheck::TooOld
        } else if n >= self.upper() {
            WindowCheck::Advance
        } else if self.bit(n - self.lower()) {
            WindowCheck::Duplicate
        } else {
            WindowCheck::Accept
        }
    }

    /// Whether `n` is inside the window and consumed.
    pub fn is_seen(&self, n: u64) -> bool {
        self.check(n) == WindowCheck::Duplicate
    }

    /// Connection numbers inside the window that have not been consumed.
    pub fn unseen(&self) -> Vec<u64> {
        let lower = self.lower();
        (lower..self.upper())
            .filter(|&n| !self.bit(n - lower))
            .collect()
    }

    /// Move the centre forward to `new_centre`.
    ///
    /// Slots that leave the window are dropped, slots that enter it are
    /// clear. A window never moves backwards, so sliding to a smaller centre
    /// returns the window unchanged.
    pub fn slide(self, new_centre: u64) -> Self {
        if new_centre <= self.centre {
            return self;
        }
        let mut slid = Self {
            centre: new_centre,
            bitmap: [0u8; CONNECTION_WINDOW_BYTES],
        };
        // Near zero the window is narrower than its bitmap; slots past
        // `upper()` carry no meaning and must not be shifted in.
        let span = self.upper() - self.lower();
        let delta = slid.lower() - self.lower();
        for i in 0..span.saturating_sub(delta) {
            if self.bit(i + delta) {
                slid.set_bit(i);
            }
        }
        slid
    }

    /// Consume connection number `n`.
    ///
    /// Returns the updated window, or an error if `n` is too old or has
    /// already been consumed.
    pub fn accept(self, n: u64) -> Result<Self, WindowError> {
        let mut window = match self.check(n) {
            WindowCheck::TooOld => {
                return Err(WindowError::TooOld {
                    number: n,
                    lower: self.lower(),
                })
            }
            WindowCheck::Duplicate => return Err(WindowError::Duplicate(n)),
            WindowCheck::Accept => self,
            WindowCheck::Advance => self.slide(n),
        };
        let index = n - window.lower();
        window.set_bit(index);
        Ok(window)
    }

    fn bit(&self, index: u64) -> bool {
        let index = index as usize;
        self.bitmap[index / 8] & (0x80 >> (index % 8)) != 0
    }

    fn set_bit(&mut self, index: u64) {
        let index = index as usize;
        self.bitmap[index / 8] |= 0x80 >> (index % 8);
    }
}

impl Default for ConnectionWindow {
    fn default() -> Self {
        Self::new()
    }
}
