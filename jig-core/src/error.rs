//! Flat per-layer error enums (spec §7). Each layer names its own errors;
//! upper layers wrap lower ones with `From` rather than swallowing them,
//! mirroring the way the teacher's `dap.rs` threads `swd::Error` up through
//! `CheckResult` without ever discarding the original variant.

use core::fmt;

/// Errors raised by the SWD DP/AP transaction layer (L2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwdError {
    /// ACK==WAIT was returned after exhausting the retry budget.
    AckWait,
    /// ACK==FAULT. Caller should clear DP.ABORT before the next transaction.
    AckFault,
    /// Parity mismatch on a read; treated as a transport fault.
    Parity,
    /// ACK field held a value outside {OK, WAIT, FAULT}.
    AckProtocol(u8),
}

impl fmt::Display for SwdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwdError::AckWait => write!(f, "SWD ACK=WAIT (retry budget exhausted)"),
            SwdError::AckFault => write!(f, "SWD ACK=FAULT"),
            SwdError::Parity => write!(f, "SWD read parity mismatch"),
            SwdError::AckProtocol(ack) => write!(f, "SWD ACK=invalid (0b{:03b})", ack),
        }
    }
}

/// Errors raised by the STM32G0 flash controller driver (L5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// FLASH_SR.BSY did not clear within the allotted deadline.
    Busy,
    /// FLASH_SR reported one or more error flags; bits are as read.
    Error(u32),
    /// FLASH_CR.LOCK could not be cleared by the unlock sequence.
    UnlockFailed,
    /// Program payload length was not a multiple of 8 bytes.
    UnalignedProgram,
    Swd(SwdError),
}

impl From<SwdError> for FlashError {
    fn from(e: SwdError) -> Self {
        FlashError::Swd(e)
    }
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashError::Busy => write!(f, "flash controller busy timeout"),
            FlashError::Error(bits) => write!(f, "flash controller error flags: 0x{:08x}", bits),
            FlashError::UnlockFailed => write!(f, "flash unlock failed (LOCK still set)"),
            FlashError::UnalignedProgram => {
                write!(f, "program payload length not a multiple of 8 bytes")
            }
            FlashError::Swd(e) => write!(f, "{}", e),
        }
    }
}

/// Errors raised by the Programmer state machine (L6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgrammerError {
    Swd(SwdError),
    Flash(FlashError),
    /// `count` words differed between flash and the source image.
    VerifyMismatch(u32),
    /// Connect-under-reset could not reach a halted core.
    AttachFailed,
}

impl From<SwdError> for ProgrammerError {
    fn from(e: SwdError) -> Self {
        ProgrammerError::Swd(e)
    }
}

impl From<FlashError> for ProgrammerError {
    fn from(e: FlashError) -> Self {
        ProgrammerError::Flash(e)
    }
}

impl fmt::Display for ProgrammerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgrammerError::Swd(e) => write!(f, "{}", e),
            ProgrammerError::Flash(e) => write!(f, "{}", e),
            ProgrammerError::VerifyMismatch(count) => {
                write!(f, "verify failed: {} word(s) mismatched", count)
            }
            ProgrammerError::AttachFailed => write!(f, "failed to attach/halt target"),
        }
    }
}

/// Errors raised by the RS-485 frame/transport layer (L1'/L2').
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rs485Error {
    Timeout,
    BadFirstByte,
    BadResponseChar,
    PacketTooSmall,
    DataWrongSize,
    /// Caller's buffer could not hold the payload; bytes were drained.
    BufferTooSmall,
    CrcMismatch,
    /// Non-zero remote error code reported by the responding device.
    RemoteError(u8),
    /// Encoded packet would exceed the 16-bit extended-size field. The
    /// original silently drops the send; this surfaces it instead.
    PacketTooLarge,
}

impl fmt::Display for Rs485Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rs485Error::Timeout => write!(f, "RS-485 response timeout"),
            Rs485Error::BadFirstByte => write!(f, "RS-485 first byte LSB was not 1"),
            Rs485Error::BadResponseChar => write!(f, "RS-485 unrecognised response character"),
            Rs485Error::PacketTooSmall => write!(f, "RS-485 declared packet size too small"),
            Rs485Error::DataWrongSize => write!(f, "RS-485 response payload size mismatch"),
            Rs485Error::BufferTooSmall => write!(f, "RS-485 caller buffer too small for payload"),
            Rs485Error::CrcMismatch => write!(f, "RS-485 CRC32 mismatch"),
            Rs485Error::RemoteError(code) => write!(f, "RS-485 remote error code {}", code),
            Rs485Error::PacketTooLarge => write!(f, "RS-485 packet too large to encode"),
        }
    }
}
