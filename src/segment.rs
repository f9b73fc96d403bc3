// SPDX-License-Identifier: BSD-3-Clause

//! Splits an ordered list of command arguments into one or more COMMAND
//! message bodies, each of which (including its own header) fits within
//! [`MESSAGE_SIZE_LIMIT`].

/// `MESSAGE_SIZE_LIMIT`: the largest an unwrapped outgoing payload may be.
pub const MESSAGE_SIZE_LIMIT: usize = 65_536;

/// `continue_status` values.
mod continue_status {
    pub const SINGLE: u8 = 0;
    pub const FIRST: u8 = 1;
    pub const MIDDLE: u8 = 2;
    pub const LAST: u8 = 3;
}

/// The largest a segment's header can be: `{keepalive, continue_status,
/// argc}` on the first segment. Reserving this much room for every segment
/// (even the later 2-byte-header ones) guarantees the invariant that no
/// fully-headered segment body ever exceeds [`MESSAGE_SIZE_LIMIT`].
const MAX_HEADER_LEN: usize = 6;

/// Segment `args` into one or more COMMAND bodies, each already prefixed
/// with its `{keepalive, continue_status, argc?}` header and ready to be
/// wrapped and sent as the payload of a single message.
///
/// `args` must be non-empty; callers (the session state machine) reject an
/// empty command before calling this.
pub fn segment_command(args: &[impl AsRef<[u8]>], keepalive: bool) -> Vec<Vec<u8>> {
    let ka_flag: u8 = if keepalive { 1 } else { 0 };
    let argc = u32::try_from(args.len()).expect("command argument count must fit in u32");
    let blob_limit = MESSAGE_SIZE_LIMIT - MAX_HEADER_LEN;

    let mut arg_segments: Vec<Vec<u8>> = vec![Vec::new()];
    for arg in args {
        let arg = arg.as_ref();
        let record_len = 4 + arg.len();
        let current = arg_segments.last_mut().expect("at least one segment");
        if !current.is_empty() && current.len() + record_len > blob_limit {
            arg_segments.push(Vec::new());
        }
        let current = arg_segments.last_mut().expect("at least one segment");
        current.extend_from_slice(&(arg.len() as u32).to_be_bytes());
        current.extend_from_slice(arg);
    }

    if arg_segments.len() == 1 {
        let mut body = Vec::with_capacity(6 + arg_segments[0].len());
        body.push(ka_flag);
        body.push(continue_status::SINGLE);
        body.extend_from_slice(&argc.to_be_bytes());
        body.extend_from_slice(&arg_segments[0]);
        return vec![body];
    }

    let mut segments = Vec::with_capacity(arg_segments.len());
    let last_index = arg_segments.len() - 1;
    for (i, argdata) in arg_segments.into_iter().enumerate() {
        let mut body = Vec::new();
        body.push(ka_flag);
        if i == 0 {
            body.push(continue_status::FIRST);
            body.extend_from_slice(&argc.to_be_bytes());
        } else if i == last_index {
            body.push(continue_status::LAST);
        } else {
            body.push(continue_status::MIDDLE);
        }
        body.extend_from_slice(&argdata);
        segments.push(body);
    }
    segments
}

/// Reassembles the argument list encoded by [`segment_command`], by
/// concatenating the argument blobs of each segment (stripping their
/// per-segment headers) and reading `argc` records off the front.
///
/// Used by this crate's own round-trip tests; not part of the public
/// client API since the real decoding side is the server.
#[cfg(test)]
pub(crate) fn decode_segments_for_test(segments: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let mut blob = Vec::new();
    let mut argc = None;
    for (i, segment) in segments.iter().enumerate() {
        if i == 0 {
            let continue_status = segment[1];
            if continue_status == continue_status::SINGLE || continue_status == continue_status::FIRST {
                argc = Some(u32::from_be_bytes([segment[2], segment[3], segment[4], segment[5]]));
                blob.extend_from_slice(&segment[6..]);
            } else {
                panic!("first segment must be SINGLE or FIRST");
            }
        } else {
            blob.extend_from_slice(&segment[2..]);
        }
    }

    let argc = argc.expect("argc recovered from first segment") as usize;
    let mut args = Vec::with_capacity(argc);
    let mut rest = blob.as_slice();
    for _ in 0..argc {
        let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let (arg, tail) = rest[4..].split_at(len);
        args.push(arg.to_vec());
        rest = tail;
    }
    args
}
