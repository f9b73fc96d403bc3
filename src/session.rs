// SPDX-License-Identifier: BSD-3-Clause

//! The client's top-level state machine: owns the connection and the
//! established security context, and sequences commands and their
//! responses.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::config::{ConnectOptions, TargetName};
use crate::error::Error;
use crate::frame::{self, FLAG_DATA, FLAG_PROTOCOL};
use crate::gssapi::{self, LibGssapiContext, SecurityContext};
use crate::message::{Message, STREAM_STDERR, STREAM_STDOUT};
use crate::segment::segment_command;

use libgssapi::credential::{Cred, CredUsage};

/// One event returned by [`Session::output`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// A chunk of the remote command's stdout or stderr.
    Output { stream: u8, chunk: Vec<u8> },
    /// The command completed; no more output will follow for it.
    Status { code: u8 },
    /// The server reported an error for the current command.
    Error { code: u32, message: Vec<u8> },
    /// There is nothing outstanding; `output()` did no I/O.
    Done,
}

#[derive(Debug, PartialEq, Eq)]
enum SessionState {
    Disconnected,
    Handshaking,
    Ready,
    AwaitingResponses(u32),
    Closed,
}

/// A remctl client session, generic over its transport and security
/// context so it can be driven against an in-memory duplex and
/// [`gssapi::mock::MockContext`] in tests, without a socket or a KDC.
pub struct Session<S, C> {
    stream: Option<S>,
    ctx: Option<C>,
    state: SessionState,
    outstanding: u32,
    last_error: Option<Vec<u8>>,
    credential: Option<Cred>,
    connect_options: ConnectOptions,
}

impl<S, C> Session<S, C>
where
    S: Read + Write,
    C: SecurityContext,
{
    fn new_disconnected() -> Self {
        Self {
            stream: None,
            ctx: None,
            state: SessionState::Disconnected,
            outstanding: 0,
            last_error: None,
            credential: None,
            connect_options: ConnectOptions::new(),
        }
    }

    /// Valid only before the first `open()`: a credential with initiate
    /// usage, used in place of the process's default credentials.
    pub fn set_credential(&mut self, credential: Cred) -> Result<(), Error> {
        self.require_disconnected()?;

        let usage = credential
            .info()
            .map_err(|e| Error::Validation(format!("could not inspect credential usage: {e}")))?
            .usage;
        if usage == CredUsage::Accept {
            return Err(Error::Validation(
                "credential usage must be initiate-capable, not accept-only".into(),
            ));
        }

        self.credential = Some(credential);
        Ok(())
    }

    /// Valid only before the first `open()`.
    pub fn set_source_ip(&mut self, source: std::net::IpAddr) -> Result<(), Error> {
        self.require_disconnected()?;
        self.connect_options.source = Some(source);
        Ok(())
    }

    /// Valid only before the first `open()`.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        self.require_disconnected()?;
        self.connect_options.timeout = Some(timeout);
        Ok(())
    }

    fn require_disconnected(&self) -> Result<(), Error> {
        if self.state != SessionState::Disconnected {
            return Err(Error::Validation(
                "credential, source IP, and timeout may only be set before open()".into(),
            ));
        }
        Ok(())
    }

    /// Send a command. The session must be `Ready` or `AwaitingResponses`;
    /// `args` must be non-empty.
    pub fn command(&mut self, args: &[impl AsRef<[u8]>]) -> Result<(), Error> {
        if args.is_empty() {
            return Err(Error::Validation("command must have at least one argument".into()));
        }
        self.require_open()?;

        let segments = segment_command(args, true);
        debug!("sending command in {} segment(s)", segments.len());

        for segment in segments {
            if let Err(e) = self.send_message(&Message::Command(segment)) {
                self.fail_and_close();
                return Err(e);
            }
        }

        self.outstanding += 1;
        self.state = SessionState::AwaitingResponses(self.outstanding);
        Ok(())
    }

    /// Read the next output event. Returns [`Output::Done`] without
    /// touching the network if nothing is outstanding.
    pub fn output(&mut self) -> Result<Output, Error> {
        if self.outstanding == 0 {
            return Ok(Output::Done);
        }
        self.require_open()?;

        let buf = match self.read_message_bytes() {
            Ok(Some(buf)) => buf,
            Ok(None) => {
                self.fail_and_close();
                return Err(Error::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed connection",
                )));
            }
            Err(e) => {
                self.fail_and_close();
                return Err(e);
            }
        };

        match Message::decode(&buf) {
            Ok(Message::Output { stream, chunk }) => {
                if stream != STREAM_STDOUT && stream != STREAM_STDERR {
                    self.fail_and_close();
                    return Err(Error::Protocol(format!("unknown output stream {stream}")));
                }
                trace!("received {} bytes on stream {stream}", chunk.len());
                Ok(Output::Output { stream, chunk })
            }
            Ok(Message::Status { code }) => {
                self.outstanding -= 1;
                self.state = if self.outstanding == 0 {
                    SessionState::Ready
                } else {
                    SessionState::AwaitingResponses(self.outstanding)
                };
                Ok(Output::Status { code })
            }
            Ok(Message::Error { code, message }) => {
                self.outstanding -= 1;
                self.last_error = Some(message.clone());
                self.state = if self.outstanding == 0 {
                    SessionState::Ready
                } else {
                    SessionState::AwaitingResponses(self.outstanding)
                };
                warn!("server reported error {code}");
                Ok(Output::Error { code, message })
            }
            Ok(other) => {
                self.fail_and_close();
                Err(Error::Protocol(format!("unexpected message on output path: {other:?}")))
            }
            Err(e) => {
                self.fail_and_close();
                Err(e)
            }
        }
    }

    /// Ping the server without issuing a command. Requires a strict
    /// `{version=3, type=NOOP}` reply; anything else is a fatal
    /// `Negotiation` error (servers old enough to lack NOOP report this as
    /// "does not support noop", which is the same failure mode).
    pub fn noop(&mut self) -> Result<(), Error> {
        self.require_open()?;

        if let Err(e) = self.send_message(&Message::Noop) {
            self.fail_and_close();
            return Err(e);
        }

        let buf = match self.read_message_bytes() {
            Ok(Some(buf)) => buf,
            Ok(None) => {
                self.fail_and_close();
                return Err(Error::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed connection",
                )));
            }
            Err(e) => {
                self.fail_and_close();
                return Err(e);
            }
        };

        if !Message::is_noop_reply(&buf) {
            self.fail_and_close();
            return Err(Error::Negotiation("server does not support noop".into()));
        }
        Ok(())
    }

    /// Best-effort close: attempt to notify the server, then release the
    /// socket and security context regardless of whether that succeeded.
    /// Idempotent.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if self.stream.is_some() {
            let _ = self.send_message(&Message::Quit);
        }
        if let Some(mut ctx) = self.ctx.take() {
            ctx.delete();
        }
        self.stream = None;
        self.state = SessionState::Closed;
    }

    fn fail_and_close(&mut self) {
        self.close();
    }

    fn require_open(&self) -> Result<(), Error> {
        match self.state {
            SessionState::Ready | SessionState::AwaitingResponses(_) => Ok(()),
            _ => Err(Error::NotOpened),
        }
    }

    fn send_message(&mut self, msg: &Message) -> Result<(), Error> {
        let ctx = self.ctx.as_mut().ok_or(Error::NotOpened)?;
        let stream = self.stream.as_mut().ok_or(Error::NotOpened)?;
        let wrapped = ctx.wrap(&msg.encode())?;
        frame::write_packet(stream, FLAG_DATA | FLAG_PROTOCOL, &wrapped)?;
        Ok(())
    }

    fn read_message_bytes(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let stream = self.stream.as_mut().ok_or(Error::NotOpened)?;
        let ctx = self.ctx.as_mut().ok_or(Error::NotOpened)?;

        let Some((flags, payload)) = frame::read_packet(stream)? else {
            return Ok(None);
        };
        if flags & FLAG_PROTOCOL == 0 {
            return Err(Error::Protocol("peer dropped the PROTOCOL flag after handshake".into()));
        }
        let unwrapped = ctx.unwrap(&payload)?;
        Ok(Some(unwrapped))
    }
}

impl<S, C> Drop for Session<S, C> {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            if let Some(mut ctx) = self.ctx.take() {
                ctx.delete();
            }
        }
    }
}

/// Open a session over an already-connected stream, taking ownership of
/// both the stream and a security context to drive the handshake with.
/// This is the generic entry point every transport (real socket, or an
/// in-memory test duplex) funnels through.
pub fn open_with<S, C>(mut stream: S, mut ctx: C) -> Result<Session<S, C>, Error>
where
    S: Read + Write,
    C: SecurityContext,
{
    gssapi::drive_handshake(&mut stream, &mut ctx)?;

    let mut session = Session::new_disconnected();
    session.stream = Some(stream);
    session.ctx = Some(ctx);
    session.state = SessionState::Ready;
    Ok(session)
}

/// The session type used by the façade and the CLI: a real TCP connection
/// authenticated through the real `libgssapi` crate.
pub type RemctlSession = Session<TcpStream, LibGssapiContext>;

fn connect_tcp(host: &str, port: u16, options: &ConnectOptions) -> Result<TcpStream, Error> {
    use std::net::SocketAddr;
    use std::net::ToSocketAddrs;

    use socket2::{Domain, Socket, Type};

    debug!("connecting to {host}:{port}");

    let addr: SocketAddr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::Transport(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("could not resolve {host}:{port}"),
        )))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    if let Some(source) = options.source {
        socket.bind(&SocketAddr::new(source, 0).into())?;
    }
    match options.timeout {
        Some(timeout) => socket.connect_timeout(&addr.into(), timeout)?,
        None => socket.connect(&addr.into())?,
    }
    Ok(socket.into())
}

/// Connect to `host:port` and run the handshake in §4.4 against it,
/// producing a `Ready` session in one shot. This is the entry point the
/// simple façade uses; callers that want to configure a credential, source
/// IP, or timeout before connecting should build a [`RemctlSession`] with
/// [`Session::new`] and its `set_*` methods, then call
/// [`Session::open`].
pub fn open(
    host: &str,
    port: u16,
    principal: &TargetName,
    credential: Option<&Cred>,
    options: &ConnectOptions,
) -> Result<RemctlSession, Error> {
    let stream = connect_tcp(host, port, options)?;
    let ctx = LibGssapiContext::new(host, principal, credential)?;
    open_with(stream, ctx)
}

impl RemctlSession {
    /// A fresh `Disconnected` session. Configure it with `set_credential`,
    /// `set_source_ip`, and `set_timeout`, then call [`Session::open`].
    pub fn new() -> Self {
        Self::new_disconnected()
    }

    /// Connect to `host:port` and run the handshake in §4.4, using
    /// whatever credential, source IP, and timeout were set before this
    /// call. Valid only in `Disconnected`.
    pub fn open(&mut self, host: &str, port: u16, principal: &TargetName) -> Result<(), Error> {
        if self.state != SessionState::Disconnected {
            return Err(Error::Validation("open() is only valid on a disconnected session".into()));
        }
        self.state = SessionState::Handshaking;

        let stream = connect_tcp(host, port, &self.connect_options)?;
        let ctx = LibGssapiContext::new(host, principal, self.credential.as_ref())?;

        match open_with(stream, ctx) {
            Ok(opened) => {
                *self = opened;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }
}

impl Default for RemctlSession {
    fn default() -> Self {
        Self::new()
    }
}

/// A `socketpair(2)`-backed duplex endpoint, so the full
/// open/command/output/noop/close cycle can be driven against a real
/// (if local) socket instead of an in-memory `Cursor`, without a KDC or
/// the network.
#[cfg(test)]
pub(crate) mod pipe {
    use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

    pub struct Endpoint {
        fd: std::os::fd::OwnedFd,
    }

    pub fn pipe() -> std::io::Result<(Endpoint, Endpoint)> {
        let (a, b) = socketpair(AddressFamily::Unix, SockType::Stream, None, SockFlag::empty())?;
        Ok((Endpoint { fd: a }, Endpoint { fd: b }))
    }

    impl std::io::Read for Endpoint {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(nix::unistd::read(&self.fd, buf)?)
        }
    }

    impl std::io::Write for Endpoint {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(nix::unistd::write(&self.fd, buf)?)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::pipe::{self, Endpoint};
    use super::*;
    use crate::gssapi::mock::MockContext;
    use std::thread;

    type TestSession = Session<Endpoint, MockContext>;

    fn opened_pair() -> (TestSession, Endpoint) {
        let (client_end, server_end) = pipe::pipe().unwrap();
        let ctx = MockContext::new(0);
        let session = open_with(client_end, ctx).unwrap();
        (session, server_end)
    }

    fn send_wrapped(end: &mut Endpoint, msg: &Message) {
        let mut wrapped = b"WRAP:".to_vec();
        wrapped.extend_from_slice(&msg.encode());
        frame::write_packet(end, FLAG_DATA | FLAG_PROTOCOL, &wrapped).unwrap();
    }

    #[test]
    fn open_with_zero_round_handshake_reaches_ready() {
        let (client_end, server_end) = pipe::pipe().unwrap();
        let ctx = MockContext::new(0);
        let session = open_with(client_end, ctx).unwrap();
        assert_eq!(session.state, SessionState::Ready);
        drop(server_end);
    }

    #[test]
    fn end_to_end_command_cycle_over_socketpair() {
        let (mut session, mut server_end) = opened_pair();

        let server = thread::spawn(move || {
            // Drain the bootstrap packet from the (already-completed) handshake.
            frame::read_packet(&mut server_end).unwrap();
            // Drain the single COMMAND segment.
            frame::read_packet(&mut server_end).unwrap();

            send_wrapped(&mut server_end, &Message::Output {
                stream: STREAM_STDOUT,
                chunk: b"foobar".to_vec(),
            });
            send_wrapped(&mut server_end, &Message::Status { code: 0 });
        });

        session.command(&[b"testshell".as_slice(), b"-c", b"echo -n foobar"]).unwrap();

        let mut stdout = Vec::new();
        loop {
            match session.output().unwrap() {
                Output::Output { stream, chunk } => {
                    assert_eq!(stream, STREAM_STDOUT);
                    stdout.extend_from_slice(&chunk);
                }
                Output::Status { code } => {
                    assert_eq!(code, 0);
                    break;
                }
                other => panic!("unexpected output event: {other:?}"),
            }
        }

        assert_eq!(stdout, b"foobar");
        server.join().unwrap();
        session.close();
    }

    #[test]
    fn server_error_reply_decrements_outstanding_and_keeps_session_open() {
        let (mut session, mut server_end) = opened_pair();

        let server = thread::spawn(move || {
            frame::read_packet(&mut server_end).unwrap();
            frame::read_packet(&mut server_end).unwrap();
            send_wrapped(&mut server_end, &Message::Error {
                code: 5,
                message: b"access denied".to_vec(),
            });
        });

        session.command(&[b"denied".as_slice()]).unwrap();
        match session.output().unwrap() {
            Output::Error { code, message } => {
                assert_eq!(code, 5);
                assert_eq!(message, b"access denied");
            }
            other => panic!("expected an error reply, got {other:?}"),
        }

        assert_eq!(session.state, SessionState::Ready);
        server.join().unwrap();
        session.close();
    }

    #[test]
    fn noop_against_a_v3_responder_succeeds() {
        let (mut session, mut server_end) = opened_pair();

        let server = thread::spawn(move || {
            frame::read_packet(&mut server_end).unwrap();
            frame::read_packet(&mut server_end).unwrap();
            send_wrapped(&mut server_end, &Message::Noop);
        });

        session.noop().unwrap();
        server.join().unwrap();
        session.close();
    }

    #[test]
    fn noop_with_non_v3_reply_is_a_negotiation_error() {
        let (mut session, mut server_end) = opened_pair();

        let server = thread::spawn(move || {
            frame::read_packet(&mut server_end).unwrap();
            frame::read_packet(&mut server_end).unwrap();
            // Status instead of a NOOP reply: a server that doesn't
            // understand NOOP at all.
            send_wrapped(&mut server_end, &Message::Status { code: 0 });
        });

        let err = session.noop().unwrap_err();
        assert!(matches!(err, Error::Negotiation(_)));
        // A fatal negotiation failure during noop() must close the session,
        // same as a fatal protocol error during output().
        assert!(matches!(session.noop(), Err(Error::NotOpened)));
        server.join().unwrap();
    }

    #[test]
    fn noop_fails_and_closes_session_on_server_eof() {
        let (mut session, server_end) = opened_pair();
        drop(server_end);

        let err = session.noop().unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(matches!(session.noop(), Err(Error::NotOpened)));
    }

    #[test]
    fn output_with_nothing_outstanding_does_no_io() {
        let (mut session, server_end) = opened_pair();
        assert_eq!(session.output().unwrap(), Output::Done);
        drop(server_end);
        session.close();
    }

    #[test]
    fn empty_command_is_a_validation_error() {
        let (mut session, server_end) = opened_pair();
        let args: Vec<&[u8]> = vec![];
        assert!(matches!(session.command(&args), Err(Error::Validation(_))));
        drop(server_end);
        session.close();
    }

    #[test]
    fn command_fails_and_closes_session_on_send_error() {
        let (mut session, server_end) = opened_pair();
        drop(server_end);

        let err = session.command(&[b"whoami".as_slice()]).unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(matches!(session.noop(), Err(Error::NotOpened)));
    }

    #[test]
    fn close_is_idempotent_and_forbids_further_operations() {
        let (mut session, server_end) = opened_pair();
        drop(server_end);
        session.close();
        session.close();

        assert!(matches!(session.noop(), Err(Error::NotOpened)));
        assert!(matches!(session.output(), Err(Error::NotOpened) | Ok(Output::Done)));
        let args: Vec<&[u8]> = vec![b"x"];
        assert!(matches!(session.command(&args), Err(Error::NotOpened)));
    }

    #[test]
    fn set_timeout_and_source_ip_are_rejected_once_connected() {
        let (mut session, server_end) = opened_pair();
        drop(server_end);
        assert!(matches!(
            session.set_timeout(Duration::from_secs(5)),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            session.set_source_ip("127.0.0.1".parse().unwrap()),
            Err(Error::Validation(_))
        ));
        session.close();
    }

    #[test]
    fn unknown_output_stream_is_a_fatal_protocol_error() {
        let (mut session, mut server_end) = opened_pair();

        let server = thread::spawn(move || {
            frame::read_packet(&mut server_end).unwrap();
            frame::read_packet(&mut server_end).unwrap();
            send_wrapped(&mut server_end, &Message::Output {
                stream: 9,
                chunk: b"x".to_vec(),
            });
        });

        session.command(&[b"whoami".as_slice()]).unwrap();
        let err = session.output().unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        // The session closes itself on a fatal protocol error.
        assert!(matches!(session.noop(), Err(Error::NotOpened)));

        server.join().unwrap();
    }
}
