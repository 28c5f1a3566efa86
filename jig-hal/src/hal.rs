//! External-collaborator traits.
//!
//! These are deliberately thin: the WiFi/HTTP status UI, the SPIFFS-backed
//! firmware store, the circular RAM log, the serial-number journal and the
//! simulator harness that would sit behind real implementations of these
//! traits are all out of scope for this crate (see spec §1). Only the
//! interfaces are defined here.

/// GPIO pin configuration, mirroring the handful of modes the SWD/NRST
/// lines actually need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
    InputPullUp,
    InputPullDown,
}

/// A monotonic millisecond clock.
///
/// Kept separate from [`PinDriver`] (which also exposes `millis`) so that
/// collaborators with no GPIO access of their own --- the RS-485 transport,
/// the flash-controller status poller --- can depend on timing without
/// pulling in pin control.
pub trait Clock {
    /// Milliseconds since an arbitrary epoch fixed at startup. Must not wrap
    /// in any single polling loop's lifetime (callers use wrapping
    /// subtraction to be safe against the eventual `u32` rollover).
    fn millis(&self) -> u32;
}

/// Host-side GPIO primitives for the three jig pins (SWCLK, SWDIO, NRST).
pub trait PinDriver: Clock {
    fn pin_mode(&mut self, pin: u32, mode: PinMode);
    fn digital_write(&mut self, pin: u32, level: bool);
    fn digital_read(&mut self, pin: u32) -> bool;
    fn delay_us(&mut self, us: u32);
    fn delay_ms(&mut self, ms: u32);
}

/// A byte-oriented firmware-image source.
///
/// Short reads are only permitted at end-of-file; callers (the
/// `Programmer`) pad the tail of the final doubleword with `0xFF`.
pub trait Reader {
    /// Total image size in bytes.
    fn size(&self) -> u32;

    /// Read up to `buf.len()` bytes starting at `offset`, returning the
    /// number of bytes actually written into `buf`. A return value shorter
    /// than `buf.len()` is only valid when `offset + buf.len() > size()`.
    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> u32;
}

/// A byte-oriented half-duplex UART, as used for the RS-485 link.
///
/// Implementations must provide at least 256 bytes of TX buffering and
/// enough RX buffering for one maximum-size packet (0xFFFF bytes); those
/// buffers live on the collaborator's side of this trait, not here.
pub trait UartPort: Clock {
    fn write(&mut self, bytes: &[u8]);

    /// Number of bytes currently available to [`UartPort::read_byte`].
    fn available(&mut self) -> usize;

    /// Pop one received byte. Only valid to call when `available() > 0`.
    fn read_byte(&mut self) -> u8;

    /// Block until all previously-written bytes have left the wire.
    fn flush(&mut self);
}
