// SPDX-License-Identifier: BSD-3-Clause

//! Command-line front end over the simple client façade: connect, run one
//! command, print its stdout/stderr, and exit with its status.

use std::net::IpAddr;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;

use remctl::config::{ConnectOptions, TargetName};
use remctl::{client, DEFAULT_PORT};

#[derive(Debug, Parser)]
#[command(name = "remctl", about = "Run a command on a remctl server")]
struct Cli {
    /// Host to connect to.
    hostname: String,

    /// Port the remctl server is listening on.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Service principal to authenticate to (default: host@<hostname>).
    #[arg(long)]
    principal: Option<String>,

    /// Connect timeout, in seconds (0 disables the timeout).
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Local address to use as the TCP source endpoint.
    #[arg(long = "source-ip")]
    source_ip: Option<IpAddr>,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Command and arguments to run on the remote host.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    let target = cli.principal.as_ref().map(|p| TargetName::HostBased(p.clone()));

    let mut options = ConnectOptions::new();
    if let Some(timeout) = cli.timeout {
        if timeout > 0 {
            options = options.with_timeout(Duration::from_secs(timeout));
        }
    }
    if let Some(source) = cli.source_ip {
        options = options.with_source(source);
    }

    let result = client::remctl_with_options(
        &cli.hostname,
        cli.port,
        target.as_ref(),
        None,
        &options,
        &cli.command,
    );

    match result {
        Ok(output) => {
            use std::io::Write;
            let _ = std::io::stdout().write_all(&output.stdout);
            let _ = std::io::stderr().write_all(&output.stderr);
            ExitCode::from(output.status)
        }
        Err(e) => {
            eprintln!("remctl: {e}");
            ExitCode::from(2)
        }
    }
}
