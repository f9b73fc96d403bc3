// SPDX-License-Identifier: BSD-3-Clause

//! Connection-time configuration: which service principal to authenticate
//! to, and how to reach it.

use std::net::IpAddr;
use std::time::Duration;

use libgssapi::name::Name;

/// The GSSAPI target principal to authenticate to.
///
/// `Default` asks [`crate::gssapi::LibGssapiContext`] to build the
/// conventional `host@<hostname>` service name from the hostname the
/// session is opened against. `HostBased` overrides the service half of
/// that name (e.g. `"remctl@other-host"`) while still resolving it as
/// `GSS_C_NT_HOSTBASED_SERVICE`. `Raw` hands over an already-resolved
/// [`Name`] for callers with more exotic naming needs than this crate
/// wants to model.
#[derive(Debug, Clone)]
pub enum TargetName {
    Default,
    HostBased(String),
    Raw(Name),
}

impl Default for TargetName {
    fn default() -> Self {
        Self::Default
    }
}

/// Options that govern how a [`crate::session::Session`] connects, separate
/// from the GSSAPI target it authenticates to.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// How long to wait for the TCP handshake to complete. `None` means use
    /// the platform default (i.e. block indefinitely).
    pub timeout: Option<Duration>,

    /// The local address to bind the client socket to before connecting,
    /// for hosts with more than one network interface.
    pub source: Option<IpAddr>,
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_source(mut self, source: IpAddr) -> Self {
        self.source = Some(source);
        self
    }
}
