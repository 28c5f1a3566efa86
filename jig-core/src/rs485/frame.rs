//! L1': request/response packet shape for the RS-485 link (spec §4.6).
//!
//! A request packet on the wire is:
//! `size_byte(s) | address | command | payload | [crc32 LE]`.
//! A response is: `size_byte(s) | response_char | remote_error | payload | [crc32 LE]`.
//! The size field uses the encoding from the original firmware: the low bit
//! of the first byte is always 1 (so a stuck-at-zero line is never mistaken
//! for a valid frame start), and a decoded value of `0x7F` is a sentinel
//! meaning "read 2 more bytes as a little-endian u16 total size" rather than
//! the literal value 127.

use jig_hal::crc32::Crc32;

use crate::error::Rs485Error;

/// Decoded size-byte value that means "extended size follows as a u16 LE".
pub const DECODED_FIRST_BYTE_EXTENDED_SIZE: u8 = 0x7F;

/// Address-field marker: a unique ID (8 bytes LE) follows rather than a
/// single alias byte.
pub const EXTENDED_ADDRESSING_MARKER: u8 = 0xFF;

/// Response character meaning "payload is followed by a 4-byte CRC32".
///
/// The original header defining these two byte values was not present in
/// this port's reference material; `b'C'`/`b'N'` are this port's own choice
/// (recorded as a resolved open question), not values recovered from the
/// original firmware.
pub const RESPONSE_CRC32_ENABLED: u8 = b'C';
/// Response character meaning "payload has no trailing CRC32".
pub const RESPONSE_CRC32_DISABLED: u8 = b'N';

/// Longest possible request header: 1 size byte + 2 extended-size bytes +
/// 9 address bytes (marker + 8-byte unique ID) + 1 command byte.
pub const MAX_HEADER_LEN: usize = 13;

/// Target address: either a short bus alias or an 8-byte unique ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address {
    Alias(u8),
    UniqueId(u64),
}

impl Address {
    fn wire_len(self) -> usize {
        match self {
            Address::Alias(_) => 1,
            Address::UniqueId(_) => 9,
        }
    }

    /// Writes this address into `out`, returning the number of bytes used.
    fn write_into(self, out: &mut [u8]) -> usize {
        match self {
            Address::Alias(a) => {
                out[0] = a;
                1
            }
            Address::UniqueId(id) => {
                out[0] = EXTENDED_ADDRESSING_MARKER;
                out[1..9].copy_from_slice(&id.to_le_bytes());
                9
            }
        }
    }
}

/// `decoded << 1 | 1`: the wire encoding of a size byte.
pub fn encode_size_byte(decoded: u8) -> u8 {
    (decoded << 1) | 1
}

/// `encoded >> 1`: the decoded value of a size byte (ignores the LSB, which
/// is only a framing marker and never carries data).
pub fn decode_size_byte(encoded: u8) -> u8 {
    encoded >> 1
}

/// A request packet's header and CRC trailer, ready to be written to the
/// wire back-to-back with the caller's payload slice in between. Kept as
/// fixed-size arrays (no heap) so this builds under `no_std`.
pub struct EncodedPacket {
    pub header: [u8; MAX_HEADER_LEN],
    pub header_len: usize,
    pub trailer: [u8; 4],
    pub trailer_len: usize,
}

impl EncodedPacket {
    pub fn header_bytes(&self) -> &[u8] {
        &self.header[..self.header_len]
    }

    pub fn trailer_bytes(&self) -> &[u8] {
        &self.trailer[..self.trailer_len]
    }
}

/// Builds the header + CRC trailer for `address`/`command`/`payload`.
///
/// `total` is the full wire size of the packet (size field, address,
/// command, payload, and CRC if enabled). When it fits in the non-extended
/// range (`<= DECODED_FIRST_BYTE_EXTENDED_SIZE`), a single size byte carries
/// it; otherwise the sentinel is used and the total --- now including the 2
/// extra bytes the u16 field itself occupies --- follows as a little-endian
/// u16. Packets whose extended total would not fit in a u16 are rejected
/// rather than silently dropped.
pub fn encode_packet(
    address: Address,
    command: u8,
    payload: &[u8],
    crc_enabled: bool,
) -> Result<EncodedPacket, Rs485Error> {
    let addr_len = address.wire_len();
    let crc_len = if crc_enabled { 4 } else { 0 };
    let total = 1 + addr_len + 1 + payload.len() + crc_len;

    let mut header = [0u8; MAX_HEADER_LEN];
    let mut header_len;
    if total <= DECODED_FIRST_BYTE_EXTENDED_SIZE as usize {
        header[0] = encode_size_byte(total as u8);
        header_len = 1;
    } else {
        header[0] = encode_size_byte(DECODED_FIRST_BYTE_EXTENDED_SIZE);
        let extended_total = total + 2;
        if extended_total > 0xFFFF {
            return Err(Rs485Error::PacketTooLarge);
        }
        header[1..3].copy_from_slice(&(extended_total as u16).to_le_bytes());
        header_len = 3;
    }

    header_len += address.write_into(&mut header[header_len..]);
    header[header_len] = command;
    header_len += 1;

    let mut trailer = [0u8; 4];
    let trailer_len = if crc_enabled {
        let mut crc = Crc32::new();
        crc.update(&header[..header_len]);
        crc.update(payload);
        trailer.copy_from_slice(&crc.finalize().to_le_bytes());
        4
    } else {
        0
    };

    Ok(EncodedPacket {
        header,
        header_len,
        trailer,
        trailer_len,
    })
}

/// Whether `c` is a recognised response character, and if so whether it
/// commits the response to a trailing CRC32.
pub fn response_char_crc_enabled(c: u8) -> Option<bool> {
    if c == RESPONSE_CRC32_ENABLED {
        Some(true)
    } else if c == RESPONSE_CRC32_DISABLED {
        Some(false)
    } else {
        None
    }
}
