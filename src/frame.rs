// SPDX-License-Identifier: BSD-3-Clause

//! The outer packet framing: a 1 byte flags field, a 4 byte big-endian
//! length, and a payload. This layer never inspects the payload; it is used
//! both for the raw GSSAPI tokens exchanged during the handshake and for the
//! wrapped message payloads exchanged afterwards.

use std::io::{self, Read, Write};

const HEADER_LEN: usize = 5;

/// `TOKEN_NOOP`
pub const FLAG_NOOP: u8 = 0x01;
/// `TOKEN_CONTEXT`
pub const FLAG_CONTEXT: u8 = 0x02;
/// `TOKEN_DATA`
pub const FLAG_DATA: u8 = 0x04;
/// `TOKEN_CONTEXT_NEXT`
pub const FLAG_CONTEXT_NEXT: u8 = 0x10;
/// `TOKEN_PROTOCOL`
pub const FLAG_PROTOCOL: u8 = 0x40;

/// Encode a packet: `{flags, length, payload}`.
///
/// `payload.len()` must fit in a `u32`; the message codec and command
/// segmenter both enforce the 64 KiB limit well below that, so this can only
/// fail if a caller hands it something absurd.
pub fn encode_packet(flags: u8, payload: &[u8]) -> io::Result<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload too large for packet"))?;

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.push(flags);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Write a packet directly to `w`, without an intermediate allocation for the
/// header.
pub fn write_packet<W: Write>(w: &mut W, flags: u8, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload too large for packet"))?;

    w.write_all(&[flags])?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(payload)?;
    Ok(())
}

/// Read one packet from `r`.
///
/// Returns `Ok(None)` if the peer closed the connection cleanly before any
/// header byte arrived. An EOF that occurs mid-header or mid-payload is a
/// protocol-level surprise, not an orderly close, and is surfaced as an
/// `UnexpectedEof` error instead.
pub fn read_packet<R: Read>(r: &mut R) -> io::Result<Option<(u8, Vec<u8>)>> {
    let mut header = [0u8; HEADER_LEN];
    if !read_exact_or_eof(r, &mut header)? {
        return Ok(None);
    }

    let flags = header[0];
    let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;

    let mut payload = vec![0u8; length];
    r.read_exact(&mut payload)?;

    Ok(Some((flags, payload)))
}

/// Like `Read::read_exact`, but returns `Ok(false)` instead of an
/// `UnexpectedEof` error if the stream is closed before the first byte of
/// `buf` is read, and still returns an error for any other partial read.
fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-header",
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_flags_and_payload() {
        let encoded = encode_packet(FLAG_DATA | FLAG_PROTOCOL, b"hello").unwrap();
        let mut cursor = Cursor::new(encoded);
        let (flags, payload) = read_packet(&mut cursor).unwrap().unwrap();
        assert_eq!(flags, FLAG_DATA | FLAG_PROTOCOL);
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn empty_payload_round_trips() {
        let encoded = encode_packet(FLAG_NOOP | FLAG_CONTEXT_NEXT | FLAG_PROTOCOL, b"").unwrap();
        let mut cursor = Cursor::new(encoded);
        let (flags, payload) = read_packet(&mut cursor).unwrap().unwrap();
        assert_eq!(flags, FLAG_NOOP | FLAG_CONTEXT_NEXT | FLAG_PROTOCOL);
        assert!(payload.is_empty());
    }

    #[test]
    fn clean_close_before_header_is_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(read_packet(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn close_mid_header_is_an_error() {
        let mut cursor = Cursor::new(vec![FLAG_DATA, 0, 0]);
        let err = read_packet(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn close_mid_payload_is_an_error() {
        let mut buf = encode_packet(FLAG_DATA, b"hello world").unwrap();
        buf.truncate(buf.len() - 3);
        let mut cursor = Cursor::new(buf);
        let err = read_packet(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn write_packet_matches_encode_packet() {
        let mut written = Vec::new();
        write_packet(&mut written, FLAG_CONTEXT, b"token").unwrap();
        assert_eq!(written, encode_packet(FLAG_CONTEXT, b"token").unwrap());
    }

    #[test]
    fn reads_multiple_packets_back_to_back() {
        let mut buf = encode_packet(FLAG_DATA, b"one").unwrap();
        buf.extend(encode_packet(FLAG_DATA, b"two").unwrap());
        let mut cursor = Cursor::new(buf);

        let (_, first) = read_packet(&mut cursor).unwrap().unwrap();
        let (_, second) = read_packet(&mut cursor).unwrap().unwrap();
        assert_eq!(first, b"one");
        assert_eq!(second, b"two");
        assert!(read_packet(&mut cursor).unwrap().is_none());
    }
}
