//! Devlink CLI - command-line client for the device-control service.
//!
//! Connects to the service, runs one payment command or listens for events,
//! prints what came back and exits non-zero on any failure.

mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use devlink::{
    CancellationToken, ClientConfig, DeviceClient, Endpoint, Framing, LinkError, ListenOutcome,
    Response,
};
use std::future::Future;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "devlink")]
#[command(about = "Command-line client for the device-control service")]
struct Args {
    /// Service endpoint (\\.\pipe\NAME, pipe:NAME, unix://PATH or tcp://HOST:PORT)
    #[arg(long, value_parser = parse_endpoint)]
    endpoint: Option<Endpoint>,

    /// Message framing on the connection
    #[arg(long, default_value = "json", value_parser = parse_framing)]
    framing: Framing,

    /// Seconds to wait for a command response
    #[arg(long, default_value = "10")]
    timeout: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Show the payment terminal state
    Status,
    /// Start a payment
    Start {
        /// Amount in the smallest currency unit
        #[arg(allow_hyphen_values = true)]
        amount: i64,
    },
    /// Cancel the running payment
    Cancel,
    /// Reset the payment terminal
    Reset,
    /// Probe the payment terminal hardware
    Check,
    /// Print events until the timeout elapses
    Listen {
        /// Seconds to listen
        #[arg(default_value = "30")]
        timeout: u64,
    },
}

fn parse_endpoint(s: &str) -> std::result::Result<Endpoint, String> {
    Endpoint::parse(s).ok_or_else(|| format!("invalid endpoint '{}'", s))
}

fn parse_framing(s: &str) -> std::result::Result<Framing, String> {
    Framing::from_str(s).ok_or_else(|| format!("unknown framing '{}'", s))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            // Usage errors exit 1 like every other failure.
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command succeeded.
async fn run(args: Args) -> Result<bool> {
    let mut config = ClientConfig::new().with_framing(args.framing);
    if let Some(endpoint) = args.endpoint {
        config = config.with_endpoint(endpoint);
    }
    let timeout = Duration::from_secs(args.timeout);

    let mut client = DeviceClient::new(config);
    client
        .connect()
        .await
        .with_context(|| format!("cannot reach service at {}", client.config().endpoint))?;
    debug!("Connected: {:?}", client);

    // Ctrl-C ends a command wait or a listener.
    let token = CancellationToken::new();
    let ctrl_c = {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        })
    };

    let result = dispatch(&client, args.command, timeout, &token).await;
    ctrl_c.abort();
    client.disconnect().await;
    result
}

/// Await a command response unless Ctrl-C comes first.
async fn interruptible(
    token: &CancellationToken,
    command: impl Future<Output = devlink::Result<Response>>,
) -> Result<Response> {
    let response = token
        .run_until_cancelled(command)
        .await
        .map_err(LinkError::from)??;
    Ok(response)
}

async fn dispatch(
    client: &DeviceClient,
    command: CliCommand,
    timeout: Duration,
    token: &CancellationToken,
) -> Result<bool> {
    match command {
        CliCommand::Status => {
            println!("Checking payment terminal status...");
            let response = interruptible(token, client.payment_status_check(timeout)).await?;
            Ok(report(&response, true))
        }
        CliCommand::Start { amount } => {
            println!("Starting payment: {}", amount);
            let response = interruptible(token, client.payment_start(amount, timeout)).await?;
            let ok = report(&response, true);
            if ok {
                println!("\nThe payment result arrives as an event; run `devlink listen` to see it.");
            }
            Ok(ok)
        }
        CliCommand::Cancel => {
            println!("Cancelling payment...");
            let response = interruptible(token, client.payment_cancel(timeout)).await?;
            Ok(report(&response, false))
        }
        CliCommand::Reset => {
            println!("Resetting payment terminal...");
            let response = interruptible(token, client.payment_reset(timeout)).await?;
            Ok(report(&response, false))
        }
        CliCommand::Check => {
            println!("Checking payment device...");
            let response = interruptible(token, client.payment_device_check(timeout)).await?;
            Ok(report(&response, false))
        }
        CliCommand::Listen { timeout } => {
            listen(client, Duration::from_secs(timeout), token.clone()).await
        }
    }
}

/// Print a response; with `show_state`, also the state name.
fn report(response: &Response, show_state: bool) -> bool {
    output::print_response(response);
    if show_state && response.is_ok() {
        if let Some(state) = response.state() {
            println!("\nState: {}", state);
        }
    }
    response.is_ok()
}

async fn listen(
    client: &DeviceClient,
    window: Duration,
    token: CancellationToken,
) -> Result<bool> {
    let mut listener = client.listen_with_cancel(window, token)?;

    println!("Listening for events for {} seconds...", window.as_secs());
    while let Some(event) = listener.next().await {
        output::print_event(&event);
    }

    match listener.outcome() {
        Some(ListenOutcome::ConnectionClosed) => {
            println!("Connection closed");
            Ok(false)
        }
        Some(ListenOutcome::Cancelled) => {
            println!("\nStopped by user");
            Ok(true)
        }
        _ => {
            info!("Received {} events", listener.delivered());
            Ok(true)
        }
    }
}
