use clap::{Parser, Subcommand};
use futures::StreamExt;
use serial_binding::config::{Config, ConfigLoader, LogFormat, LoggingConfig};
use serial_binding::{
    Binding, BindingError, DuplexStream, HostPort, NativeSerial, OpenOptions, StreamBinding,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::{interval, Interval};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Drive serial ports through the binding or duplex stream adapters.",
    long_about = "Lists serial ports and monitors a port through one of the two adapters. Received data goes to stdout, logs go to stderr."
)]
struct Args {
    /// Configuration file to use instead of the standard locations.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the serial ports the OS reports.
    List {
        /// Print the list as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Open a port and print everything it receives.
    Monitor {
        /// Port path or configured alias.
        port: String,

        /// Baud rate (defaults to `serial.default_baud`).
        #[arg(short, long)]
        baud: Option<u32>,

        /// Use the duplex stream adapter instead of the binding.
        #[arg(long)]
        duplex: bool,

        /// Text to write periodically, e.g. "HELLO\r\n".
        #[arg(long)]
        send: Option<String>,

        /// Interval between periodic writes.
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let loader = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    let config = loader.into_config();
    init_tracing(&config.logging);

    let native = NativeSerial::new(config.native.settings());

    match args.command {
        Command::List { json } => list_ports(&native, json).await?,
        Command::Monitor {
            port,
            baud,
            duplex,
            send,
            interval_ms,
        } => {
            let name = config.serial.resolve_port(&port);
            let options = config.serial.open_options(baud);
            let send = send.map(|text| (unescape(&text), Duration::from_millis(interval_ms)));
            if duplex {
                monitor_duplex(&config, &native, &name, &options, send).await?;
            } else {
                monitor_binding(&native, &name, options, send).await?;
            }
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.to_lowercase()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

async fn list_ports(native: &NativeSerial, json: bool) -> Result<(), BindingError> {
    let ports = StreamBinding::list(native).await?;

    if json {
        let entries: Vec<serde_json::Value> = ports
            .iter()
            .map(|port| {
                serde_json::json!({
                    "path": port.name,
                    "vendorId": port.vendor_id,
                    "productId": port.product_id,
                })
            })
            .collect();
        println!("{}", serde_json::Value::Array(entries));
        return Ok(());
    }

    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in &ports {
        match (&port.vendor_id, &port.product_id) {
            (Some(vid), Some(pid)) => println!("{}  {}:{}", port.name, vid, pid),
            _ => println!("{}", port.name),
        }
    }
    Ok(())
}

/// Wait for the next tick, or forever when nothing is scheduled.
async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn print_chunk(chunk: &[u8]) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(chunk);
    let _ = stdout.flush();
}

/// Expand `\r`, `\n`, `\t` and `\\` so line endings can be passed on the
/// command line.
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

async fn monitor_binding(
    native: &NativeSerial,
    name: &str,
    options: OpenOptions,
    send: Option<(String, Duration)>,
) -> Result<(), BindingError> {
    let binding = Arc::new(StreamBinding::new());
    let port: Arc<dyn HostPort> = Arc::new(native.port(name));
    binding.open(port, options).await?;

    let mut reader = {
        let binding = Arc::clone(&binding);
        tokio::spawn(async move {
            let mut buffer = vec![0u8; 1024];
            let length = buffer.len();
            loop {
                match binding.read(&mut buffer, 0, length).await {
                    Ok(0) => {
                        info!("Stream ended");
                        break;
                    }
                    Ok(n) => print_chunk(&buffer[..n]),
                    Err(e) if e.is_cancelled() => break,
                    Err(e) => {
                        error!("Read failed: {}", e);
                        break;
                    }
                }
            }
        })
    };

    let writer = send.map(|(text, period)| {
        let binding = Arc::clone(&binding);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                match binding.write(text.as_bytes()).await {
                    Ok(()) => {}
                    Err(e) if e.is_cancelled() || matches!(e, BindingError::NotOpen) => break,
                    Err(e) => {
                        warn!("Write failed: {}", e);
                        break;
                    }
                }
            }
        })
    });

    tokio::select! {
        _ = signal::ctrl_c() => info!("Interrupted, closing port"),
        _ = &mut reader => {}
    }

    if let Some(writer) = writer {
        writer.abort();
    }
    if binding.is_open() {
        binding.close().await?;
    }
    let _ = reader.await;
    Ok(())
}

async fn monitor_duplex(
    config: &Config,
    native: &NativeSerial,
    name: &str,
    options: &OpenOptions,
    send: Option<(String, Duration)>,
) -> Result<(), BindingError> {
    let port = native.port(name);
    port.open(&options.to_host()?).await?;
    info!("Opened {} at {} baud (duplex)", name, options.baud_rate);

    let mut stream = DuplexStream::with_settings(&port, config.duplex.settings())?;
    let mut ticker = send.as_ref().map(|(_, period)| interval(*period));

    loop {
        tokio::select! {
            chunk = stream.next() => match chunk {
                Some(Ok(chunk)) => print_chunk(&chunk),
                Some(Err(e)) => {
                    error!("Read failed: {}", e);
                    break;
                }
                None => {
                    info!("Stream ended");
                    break;
                }
            },
            _ = tick(&mut ticker) => {
                if let Some((text, _)) = &send {
                    if let Err(e) = stream.write(text.as_bytes()).await {
                        warn!("Write failed: {}", e);
                    }
                }
            }
            _ = signal::ctrl_c() => {
                info!("Interrupted, closing port");
                break;
            }
        }
    }

    stream.close().await;
    port.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape_line_endings() {
        assert_eq!(unescape("HELLO\\r\\n"), "HELLO\r\n");
        assert_eq!(unescape("a\\tb"), "a\tb");
        assert_eq!(unescape("back\\\\slash"), "back\\slash");
        assert_eq!(unescape("keep\\x"), "keep\\x");
        assert_eq!(unescape("trailing\\"), "trailing\\");
    }

    #[test]
    fn test_args_parse_monitor() {
        let args = Args::parse_from([
            "serial-binding",
            "monitor",
            "/dev/ttyUSB0",
            "--baud",
            "115200",
            "--duplex",
            "--send",
            "HELLO\\r\\n",
        ]);
        match args.command {
            Command::Monitor {
                port,
                baud,
                duplex,
                send,
                interval_ms,
            } => {
                assert_eq!(port, "/dev/ttyUSB0");
                assert_eq!(baud, Some(115200));
                assert!(duplex);
                assert_eq!(send.as_deref(), Some("HELLO\\r\\n"));
                assert_eq!(interval_ms, 100);
            }
            other => panic!("Expected monitor, got {:?}", other),
        }
    }
}
