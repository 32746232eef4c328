// gsmlink-cli -- command-line tool for exercising a cellular modem through
// gsmlink against real hardware or a scripted mock transport.
//
// Usage:
//   gsmlink-cli list
//   gsmlink-cli --port /dev/ttyUSB2 info
//   gsmlink-cli --port /dev/ttyUSB2 ussd "*101#"
//   gsmlink-cli --port /dev/ttyUSB2 at AT+CSQ --key +CSQ
//   gsmlink-cli --port /dev/ttyUSB2 at AT+CMGF=1
//   gsmlink-cli --port /dev/ttyUSB2 --artifact-dir ./out download record
//   gsmlink-cli --port /dev/ttyUSB2 --artifact-dir ./out listen --download-after-call
//   gsmlink-cli --mock info
//
// Logging goes to stderr. RUST_LOG overrides the default `info` filter and
// --verbose selects `debug`.

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gsmlink::serial::{available_ports, port_basename, SerialTransport};
use gsmlink::{FsArtifactSink, ModemEvent, ResponseKey, Session, SessionBuilder, Transport};
use gsmlink_test_harness::MockTransport;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// gsmlink test application -- exercises a modem from the command line.
#[derive(Parser)]
#[command(name = "gsmlink-cli", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyUSB2, COM5).
    /// Required for all commands except `list` unless --mock is used.
    #[arg(long)]
    port: Option<String>,

    /// Baud rate for the serial link.
    #[arg(long, default_value_t = 115_200)]
    baud: u32,

    /// Directory that receives SMS bodies and downloaded recordings.
    #[arg(long, default_value = ".")]
    artifact_dir: PathBuf,

    /// Use a scripted mock modem instead of real hardware.
    #[arg(long)]
    mock: bool,

    /// Skip the open-time initialization sequence.
    #[arg(long)]
    no_init: bool,

    /// Balance USSD code to use instead of the carrier default.
    #[arg(long)]
    balance_code: Option<String>,

    /// Log at debug level.
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports present on this machine.
    List,
    /// Open the modem and print what it reported during initialization.
    Info,
    /// Run a USSD code and print the reply.
    Ussd {
        /// USSD code, e.g. "*101#".
        code: String,
    },
    /// Send a raw AT command.
    At {
        /// The command line, without terminator (e.g. AT+CSQ).
        command: String,
        /// Response key to wait for (+CCID, +COPS, +CSQ, +CLCC).
        /// Without it the command waits for OK.
        #[arg(long)]
        key: Option<ResponseKey>,
    },
    /// Download a recording from modem storage into the artifact directory.
    Download {
        /// File name on the modem, without the .wav extension.
        name: String,
    },
    /// Stream session events until Ctrl+C.
    Listen {
        /// Download the call recording after each call ends.
        #[arg(long)]
        download_after_call: bool,
        /// Poll signal strength every N seconds.
        #[arg(long)]
        signal_poll: Option<u64>,
    },
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn init_tracing(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_new("debug")?
    } else {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();
    Ok(())
}

fn session_builder(cli: &Cli) -> SessionBuilder {
    let mut builder = SessionBuilder::new()
        .artifact_sink(FsArtifactSink::new(&cli.artifact_dir))
        .initialize(!cli.no_init);

    if let Some(port) = &cli.port {
        builder = builder.artifact_name(port_basename(port));
    }
    if let Some(code) = &cli.balance_code {
        builder = builder.balance_ussd(code);
    }
    if let Command::Listen {
        download_after_call,
        signal_poll,
    } = &cli.command
    {
        builder = builder
            .download_after_call(*download_after_call)
            .signal_poll_interval(signal_poll.map(Duration::from_secs));
    }
    builder
}

/// A mock modem that answers the initialization sequence like a Viettel
/// SIM, then one signal query.
fn mock_transport() -> MockTransport {
    let mut mock = MockTransport::lenient();
    mock.expect(b"AT+CMEE=2\r\n", b"AT+CMEE=2\r\r\nOK\r\n");
    mock.expect(b"AT+CMGF=1\r\n", b"AT+CMGF=1\r\r\nOK\r\n");
    mock.expect(b"AT+CNMI=2,2,0,0,0\r\n", b"AT+CNMI=2,2,0,0,0\r\r\nOK\r\n");
    mock.expect(b"AT+CLIP=1\r\n", b"AT+CLIP=1\r\r\nOK\r\n");
    mock.expect(
        b"AT+CCID\r\n",
        b"AT+CCID\r\r\n+CCID: 89840480001234567890\r\n\r\nOK\r\n",
    );
    mock.expect(
        b"AT+COPS?\r\n",
        b"AT+COPS?\r\r\n+COPS: 0,0,\"Viettel\",7\r\n\r\nOK\r\n",
    );
    mock.expect(
        b"AT+CUSD=1,\"*101#\",15\r\n",
        b"\r\nOK\r\n\r\n+CUSD: 1,\"So TB 0987654321. TKG: 15000d\",15\r\n",
    );
    mock.expect(b"AT+CSQ\r\n", b"AT+CSQ\r\r\n+CSQ: 24,99\r\n\r\nOK\r\n");
    mock
}

async fn open_session(cli: &Cli) -> Result<Session> {
    let transport: Box<dyn Transport> = if cli.mock {
        println!("Connected (mock transport)");
        Box::new(mock_transport())
    } else {
        let port = cli
            .port
            .as_deref()
            .context("--port is required when not using --mock")?;
        let serial = SerialTransport::open(port, cli.baud)
            .await
            .with_context(|| format!("failed to open {port} at {} baud", cli.baud))?;
        println!("Connected -- {port} at {} baud", cli.baud);
        Box::new(serial)
    };

    session_builder(cli)
        .build_with_transport(transport)
        .await
        .context("failed to start modem session")
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_list() -> Result<()> {
    let ports = available_ports().context("failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found.");
        return Ok(());
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

async fn cmd_info(session: &Session) -> Result<()> {
    let signal = session.query_signal().await.ok().flatten();
    let info = session.info();

    let show = |value: Option<&str>| value.unwrap_or("-").to_string();
    println!("ICCID:    {}", show(info.iccid.as_deref()));
    println!("Operator: {}", show(info.operator.as_deref()));
    println!(
        "Carrier:  {}",
        info.carrier.map_or_else(|| "-".to_string(), |c| c.to_string())
    );
    println!("Phone:    {}", show(info.phone.as_deref()));
    match signal.or(info.signal) {
        Some(bars) => println!("Signal:   {bars}/5"),
        None => println!("Signal:   -"),
    }
    Ok(())
}

async fn cmd_ussd(session: &Session, code: &str) -> Result<()> {
    let reply = session
        .send_ussd(code)
        .await
        .with_context(|| format!("USSD {code} failed"))?;
    println!("{reply}");
    Ok(())
}

async fn cmd_at(session: &Session, command: &str, key: Option<ResponseKey>) -> Result<()> {
    match key {
        Some(key) => {
            let timeout = session.config().data_timeout;
            let reply = session
                .send_and_get_data(key, command, timeout)
                .await
                .with_context(|| format!("{command} did not produce a {key} reply"))?;
            println!("{reply}");
        }
        None => {
            session
                .send_and_wait_ok(command)
                .await
                .with_context(|| format!("{command} was not acknowledged"))?;
            println!("OK");
        }
    }
    Ok(())
}

async fn cmd_download(session: &Session, name: &str) -> Result<()> {
    let mut events = session.subscribe();
    session
        .download_recording(name)
        .await
        .with_context(|| format!("failed to request {name}.wav"))?;

    let wait = async {
        loop {
            match events.recv().await {
                Ok(ModemEvent::RecordingSaved { name, bytes }) => return Some((name, bytes)),
                Ok(ModemEvent::Disconnected) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    };
    match tokio::time::timeout(Duration::from_secs(120), wait).await {
        Ok(Some((saved, bytes))) => {
            println!("Saved {saved} ({bytes} bytes)");
            Ok(())
        }
        Ok(None) => anyhow::bail!("modem disconnected during download"),
        Err(_) => anyhow::bail!("timed out waiting for {name}.wav"),
    }
}

async fn cmd_listen(session: &Session) -> Result<()> {
    let mut events = session.subscribe();
    println!("Listening for modem events. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            event = events.recv() => match event {
                Ok(ModemEvent::Disconnected) => {
                    println!("Modem disconnected.");
                    break;
                }
                Ok(ModemEvent::SmsReceived(sms)) => {
                    println!("SMS from {} at {}: {}", sms.sender, sms.timestamp, sms.body);
                }
                Ok(event) => println!("{event:?}"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(missed = n, "event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    // The `list` command does not require a modem connection.
    if matches!(cli.command, Command::List) {
        return cmd_list();
    }

    let session = open_session(&cli).await?;

    let result = match &cli.command {
        Command::Info => cmd_info(&session).await,
        Command::Ussd { code } => cmd_ussd(&session, code).await,
        Command::At { command, key } => cmd_at(&session, command, *key).await,
        Command::Download { name } => cmd_download(&session, name).await,
        Command::Listen { .. } => cmd_listen(&session).await,
        Command::List => unreachable!("list handled above"),
    };

    session.close().await.ok();
    result
}
