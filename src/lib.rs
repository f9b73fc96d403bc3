// SPDX-License-Identifier: BSD-3-Clause

//! A client implementation of the remctl remote command execution
//! protocol: a GSSAPI-authenticated request/response protocol over TCP
//! used to invoke remote commands and stream their output.
//!
//! Most callers want [`client::remctl`], a one-shot façade that opens a
//! session, runs a single command, and returns its collected stdout,
//! stderr, and exit status. Callers that need to issue more than one
//! command over the same authenticated connection should drive
//! [`session::Session`] directly.

pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod gssapi;
pub mod message;
pub mod segment;
pub mod session;

pub use client::{remctl, remctl_with_options, RemctlResult, DEFAULT_PORT};
pub use config::{ConnectOptions, TargetName};
pub use error::{Error, ProtocolError};
pub use session::{Output, RemctlSession, Session};
