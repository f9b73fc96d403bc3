// SPDX-License-Identifier: BSD-3-Clause

//! A synchronous one-shot façade: open a session, run one command, collect
//! its output, close. Everything below this is the `Session` state
//! machine; this module just drives it the way every caller that doesn't
//! need a long-lived session wants it driven.

use std::io::{Read, Write};

use libgssapi::credential::Cred;

use crate::config::{ConnectOptions, TargetName};
use crate::error::ProtocolError;
use crate::gssapi::SecurityContext;
use crate::message::{STREAM_STDERR, STREAM_STDOUT};
use crate::session::{self, Output, Session};

/// The default remctl TCP port.
pub const DEFAULT_PORT: u16 = 4373;

/// The collected result of a single command run through [`remctl`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemctlResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: u8,
}

/// Open a session to `host:port`, run `command`, and collect its output.
///
/// `principal` overrides the default `host@<hostname>` target name.
/// Any lower-level [`crate::error::Error`] (transport, negotiation,
/// protocol) is wrapped into a [`ProtocolError`] with its `cause` set; a
/// server-reported `ERROR` message surfaces as a `ProtocolError` carrying
/// that error's `code`.
pub fn remctl(
    host: &str,
    port: u16,
    principal: Option<&TargetName>,
    command: &[impl AsRef<[u8]>],
) -> Result<RemctlResult, ProtocolError> {
    remctl_with_options(host, port, principal, None, &ConnectOptions::new(), command)
}

/// As [`remctl`], but exposing the full connection configuration surface
/// (credential, source IP, connect timeout) that the CLI binary needs and
/// a one-shot caller without those requirements doesn't.
pub fn remctl_with_options(
    host: &str,
    port: u16,
    principal: Option<&TargetName>,
    credential: Option<&Cred>,
    options: &ConnectOptions,
    command: &[impl AsRef<[u8]>],
) -> Result<RemctlResult, ProtocolError> {
    let default_target = TargetName::Default;
    let target = principal.unwrap_or(&default_target);

    let mut session = session::open(host, port, target, credential, options)?;

    let result = run(&mut session, command);
    session.close();
    result
}

/// Drive an already-open session through a single command and collect its
/// output. Generic over the transport and security context (like
/// [`Session`] itself) so this, the one piece of actual façade logic, can be
/// exercised against [`crate::gssapi::mock::MockContext`] over a
/// `socketpair(2)` duplex instead of a real GSSAPI mechanism and a live
/// server.
fn run<S, C>(
    session: &mut Session<S, C>,
    command: &[impl AsRef<[u8]>],
) -> Result<RemctlResult, ProtocolError>
where
    S: Read + Write,
    C: SecurityContext,
{
    session.command(command)?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    loop {
        match session.output()? {
            Output::Output { stream, chunk } if stream == STREAM_STDOUT => stdout.extend_from_slice(&chunk),
            Output::Output { stream, chunk } if stream == STREAM_STDERR => stderr.extend_from_slice(&chunk),
            Output::Output { stream, .. } => {
                return Err(ProtocolError::new(format!("server sent unknown output stream {stream}")));
            }
            Output::Status { code } => return Ok(RemctlResult { stdout, stderr, status: code }),
            Output::Error { code, message } => return Err(ProtocolError::server(code, message)),
            Output::Done => {
                return Err(ProtocolError::new(
                    "server closed the command without a status or error reply",
                ));
            }
        }
    }
}
