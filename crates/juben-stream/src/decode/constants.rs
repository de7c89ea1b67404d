//! Byte-level constants for the frame decoder.

/// Newline byte (frame delimiter).
pub(crate) const LF: u8 = b'\n';
/// Carriage return byte, stripped from CRLF-terminated lines.
pub(crate) const CR: u8 = b'\r';

/// Byte Order Mark as char
const BOM_CHAR: char = '\u{FEFF}';
const BOM_LEN: usize = BOM_CHAR.len_utf8();
/// Byte representation of the BOM [`char`]
pub(crate) const BOM: &[u8; BOM_LEN] = &{
    let mut buf = [0u8; BOM_LEN];
    BOM_CHAR.encode_utf8(&mut buf);
    buf
};

/// Prefix every forwarded line must carry.
pub const DATA_PREFIX: &[u8] = b"data: ";
/// Payload that terminates a stream.
pub const DONE_SENTINEL: &str = "[DONE]";
