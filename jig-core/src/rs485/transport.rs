//! L2': half-duplex send/receive over a [`UartPort`], with TX pacing and a
//! deadline-bounded, drain-on-error receive path (spec §4.6, §7).

use jig_hal::crc32::Crc32;
use jig_hal::hal::UartPort;

use crate::error::Rs485Error;

use super::frame::{self, Address};

/// Pacing and timing knobs for one transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// How long to wait for the next response byte before giving up.
    pub response_timeout_ms: u32,
    /// Largest contiguous write handed to [`UartPort::write`] at once.
    pub tx_pace_chunk_bytes: u16,
    /// Delay inserted between chunks; `0` disables pacing delay entirely.
    pub tx_pace_delay_ms: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            response_timeout_ms: 1000,
            tx_pace_chunk_bytes: 256,
            tx_pace_delay_ms: 0,
        }
    }
}

/// Owns the UART and drives the request/response exchange described by
/// [`crate::rs485::frame`].
pub struct Transport<U: UartPort> {
    uart: U,
    config: TransportConfig,
}

impl<U: UartPort> Transport<U> {
    pub fn new(uart: U, config: TransportConfig) -> Self {
        Transport { uart, config }
    }

    pub fn uart(&mut self) -> &mut U {
        &mut self.uart
    }

    pub fn into_uart(self) -> U {
        self.uart
    }

    /// Encodes and sends one request packet, paced in chunks per
    /// [`TransportConfig::tx_pace_chunk_bytes`].
    pub fn send_command(
        &mut self,
        address: Address,
        command: u8,
        payload: &[u8],
        crc_enabled: bool,
    ) -> Result<(), Rs485Error> {
        let encoded = frame::encode_packet(address, command, payload, crc_enabled)?;
        self.write_paced(encoded.header_bytes());
        self.write_paced(payload);
        self.write_paced(encoded.trailer_bytes());
        self.uart.flush();
        Ok(())
    }

    fn write_paced(&mut self, bytes: &[u8]) {
        let chunk = self.config.tx_pace_chunk_bytes as usize;
        if chunk == 0 || bytes.len() <= chunk {
            if !bytes.is_empty() {
                self.uart.write(bytes);
            }
            return;
        }
        let mut offset = 0;
        while offset < bytes.len() {
            let take = (bytes.len() - offset).min(chunk);
            self.uart.write(&bytes[offset..offset + take]);
            offset += take;
            if self.config.tx_pace_delay_ms > 0 && offset < bytes.len() {
                self.busy_delay(self.config.tx_pace_delay_ms as u32);
            }
        }
    }

    fn busy_delay(&mut self, ms: u32) {
        let start = self.uart.millis();
        while self.uart.millis().wrapping_sub(start) < ms {}
    }

    /// Receives one response, following the response-char/CRC/remote-error
    /// framing from [`crate::rs485::frame`]. On success returns the number
    /// of payload bytes written into `payload_out`. Any declared-but-not-yet-
    /// read bytes are drained (best-effort, same deadline) before an error
    /// is returned, so the link starts the next transaction clean.
    pub fn receive_response(&mut self, payload_out: &mut [u8]) -> Result<usize, Rs485Error> {
        let deadline_start = self.uart.millis();
        let timeout = self.config.response_timeout_ms;

        let first = self.read_byte(deadline_start, timeout)?;
        if first & 1 == 0 {
            return Err(Rs485Error::BadFirstByte);
        }
        let mut crc = Crc32::new();
        crc.update(&[first]);

        let mut size_bytes_consumed = 1usize;
        let decoded = frame::decode_size_byte(first);
        let total_size: usize = if decoded == frame::DECODED_FIRST_BYTE_EXTENDED_SIZE {
            let lo = self.read_byte(deadline_start, timeout)?;
            let hi = self.read_byte(deadline_start, timeout)?;
            crc.update(&[lo, hi]);
            size_bytes_consumed += 2;
            u16::from_le_bytes([lo, hi]) as usize
        } else {
            decoded as usize
        };

        let after_size = match total_size.checked_sub(size_bytes_consumed) {
            Some(v) if v >= 1 => v,
            _ => return Err(Rs485Error::PacketTooSmall),
        };

        let response_char = self.read_byte(deadline_start, timeout)?;
        crc.update(&[response_char]);
        let mut remaining = after_size - 1;

        let crc_enabled = match frame::response_char_crc_enabled(response_char) {
            Some(enabled) => enabled,
            None => {
                self.drain(remaining, deadline_start, timeout);
                return Err(Rs485Error::BadResponseChar);
            }
        };

        if crc_enabled {
            if remaining < 4 {
                self.drain(remaining, deadline_start, timeout);
                return Err(Rs485Error::PacketTooSmall);
            }
            remaining -= 4;
        }

        if remaining == 0 {
            if !payload_out.is_empty() {
                if crc_enabled {
                    self.drain(4, deadline_start, timeout);
                }
                return Err(Rs485Error::DataWrongSize);
            }
            if crc_enabled {
                self.verify_trailing_crc(&crc, deadline_start, timeout)?;
            }
            return Ok(0);
        }

        let remote_error = self.read_byte(deadline_start, timeout)?;
        crc.update(&[remote_error]);
        remaining -= 1;

        if remote_error != 0 {
            self.drain(remaining, deadline_start, timeout);
            if crc_enabled {
                self.drain(4, deadline_start, timeout);
            }
            return Err(Rs485Error::RemoteError(remote_error));
        }

        let payload_len = remaining;
        if payload_out.len() < payload_len {
            self.drain(payload_len, deadline_start, timeout);
            if crc_enabled {
                self.drain(4, deadline_start, timeout);
            }
            return Err(Rs485Error::BufferTooSmall);
        }
        for slot in payload_out.iter_mut().take(payload_len) {
            *slot = self.read_byte(deadline_start, timeout)?;
        }
        crc.update(&payload_out[..payload_len]);

        if crc_enabled {
            self.verify_trailing_crc(&crc, deadline_start, timeout)?;
        }
        Ok(payload_len)
    }

    fn verify_trailing_crc(
        &mut self,
        crc: &Crc32,
        deadline_start: u32,
        timeout: u32,
    ) -> Result<(), Rs485Error> {
        let mut trailer = [0u8; 4];
        for b in trailer.iter_mut() {
            *b = self.read_byte(deadline_start, timeout)?;
        }
        let received = u32::from_le_bytes(trailer);
        if crc.finalize() != received {
            return Err(Rs485Error::CrcMismatch);
        }
        Ok(())
    }

    fn read_byte(&mut self, deadline_start: u32, timeout_ms: u32) -> Result<u8, Rs485Error> {
        loop {
            if self.uart.available() > 0 {
                return Ok(self.uart.read_byte());
            }
            if self.uart.millis().wrapping_sub(deadline_start) >= timeout_ms {
                return Err(Rs485Error::Timeout);
            }
        }
    }

    fn drain(&mut self, mut n: usize, deadline_start: u32, timeout_ms: u32) {
        while n > 0 {
            match self.read_byte(deadline_start, timeout_ms) {
                Ok(_) => n -= 1,
                Err(_) => break,
            }
        }
    }
}
