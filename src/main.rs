//! `serial-bridge` command line tool.
//!
//! ```bash
//! serial-bridge list --json
//! serial-bridge info /dev/ttyUSB0
//! serial-bridge monitor /dev/ttyUSB0 --baud 115200 --hex
//! serial-bridge send /dev/ttyUSB0 "AT\r\n"
//! serial-bridge --mock monitor MOCK0
//! ```

use clap::{Parser, Subcommand};
use futures::StreamExt;
use serial_bridge::config::{Config, ConfigLoader};
use serial_bridge::native::{self, MockDevice, MockDriver, SerialDriver, SP_ERR_FAIL};
use serial_bridge::{
    logging, OpenMode, PortInfo, ReaderOptions, SerialError, SerialPort, SerialPortReader,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Inspect, monitor and write to serial ports.",
    long_about = "Lists serial ports and their USB/Bluetooth attributes, streams incoming bytes through a background reader, and performs single-shot writes."
)]
struct Args {
    /// Use a simulated device named MOCK0 instead of real hardware.
    #[arg(long, global = true)]
    mock: bool,

    /// Configuration file (overrides the standard search path).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available ports.
    List {
        /// Print port details as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show attributes and current line settings of one port.
    Info { port: String },
    /// Print everything received on a port until Ctrl+C.
    Monitor {
        port: String,
        /// Print bytes as hex instead of text.
        #[arg(long)]
        hex: bool,
        /// Baud rate (defaults to serial.default_baud).
        #[arg(long)]
        baud: Option<u32>,
    },
    /// Write data to a port.
    Send {
        port: String,
        /// Text to send; `\r`, `\n` and `\t` escapes are expanded.
        data: String,
        /// Interpret DATA as hex bytes, e.g. "01 02 ff".
        #[arg(long)]
        hex: bool,
        /// Blocking write timeout (defaults to serial.default_timeout_ms; 0 waits forever).
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Baud rate (defaults to serial.default_baud).
        #[arg(long)]
        baud: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?.into_config(),
        None => match ConfigLoader::load() {
            Ok(loader) => loader.into_config(),
            Err(e) => {
                eprintln!("Warning: Failed to load config, using defaults: {}", e);
                ConfigLoader::with_defaults().into_config()
            }
        },
    };
    if let Err(e) = logging::init(&config.logging) {
        eprintln!("Warning: logging already initialised: {}", e);
    }

    let driver = if args.mock {
        demo_driver()
    } else {
        native::default_driver()
    };
    debug!(mock = args.mock, "driver selected");

    match args.command {
        Command::List { json } => list(driver, json),
        Command::Info { port } => show_info(driver, &config, &port),
        Command::Monitor { port, hex, baud } => monitor(driver, &config, &port, hex, baud).await,
        Command::Send {
            port,
            data,
            hex,
            timeout_ms,
            baud,
        } => {
            let bytes = if hex {
                parse_hex(&data)?
            } else {
                unescape(&data).into_bytes()
            };
            send(driver, &config, &port, &bytes, timeout_ms, baud).await
        }
    }
}

/// A single simulated USB device that says hello twice and then unplugs.
fn demo_driver() -> Arc<dyn SerialDriver> {
    let driver = MockDriver::new();
    driver.add_device(
        MockDevice::new("MOCK0")
            .description("Simulated USB serial adapter")
            .usb(0x0403, 0x6001, 1, 4)
            .usb_strings("FTDI", "FT232R USB UART", "MOCK0001"),
    );
    let first = b"Hello from MOCK0\r\n";
    let second = b"Goodbye from MOCK0\r\n";
    driver.enqueue_read("MOCK0", first);
    driver.enqueue_read("MOCK0", second);
    driver.script_input_waiting(
        "MOCK0",
        [0, first.len() as i32, 0, 0, second.len() as i32, SP_ERR_FAIL],
    );
    Arc::new(driver)
}

fn open_port(
    driver: Arc<dyn SerialDriver>,
    config: &Config,
    name: &str,
    mode: OpenMode,
    baud: Option<u32>,
) -> serial_bridge::Result<SerialPort> {
    let name = config.serial.resolve_port(name);
    let mut port = SerialPort::with_driver(driver, &name)?;
    port.open(mode)?;

    let baud = baud.unwrap_or(config.serial.default_baud);
    let settings = port.config()?.with_baud_rate(baud);
    port.set_config(&settings)?;
    info!(port = %name, baud, ?mode, "port opened");
    Ok(port)
}

fn list(driver: Arc<dyn SerialDriver>, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let names = SerialPort::available_ports_with(driver.as_ref())?;
    let mut infos: Vec<PortInfo> = Vec::with_capacity(names.len());
    for name in &names {
        match SerialPort::with_driver(Arc::clone(&driver), name).and_then(|p| p.info()) {
            Ok(info) => infos.push(info),
            Err(e) => warn!(port = %name, error = %e, "skipping port"),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }
    if infos.is_empty() {
        println!("No serial ports found.");
    }
    for info in &infos {
        let ids = match (info.vendor_id, info.product_id) {
            (Some(vid), Some(pid)) => format!(" [{vid:04x}:{pid:04x}]"),
            _ => String::new(),
        };
        println!(
            "{:<20} {:<10} {}{}",
            info.name,
            format!("{:?}", info.transport),
            info.description.as_deref().unwrap_or("-"),
            ids
        );
    }
    Ok(())
}

fn show_info(
    driver: Arc<dyn SerialDriver>,
    config: &Config,
    name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let name = config.serial.resolve_port(name);
    let mut port = SerialPort::with_driver(driver, &name)?;
    let info = port.info()?;
    println!("{}", serde_json::to_string_pretty(&info)?);

    // Line settings and modem lines need an open port; not every port can be opened.
    match port.open(OpenMode::Read) {
        Ok(()) => {
            println!("{}", serde_json::to_string_pretty(&port.config()?)?);
            match port.signals() {
                Ok(signals) => println!("signals: {:?}", signals),
                Err(SerialError::NotSupported(_)) => {}
                Err(e) => return Err(e.into()),
            }
            port.close()?;
        }
        Err(e) => warn!(port = %name, error = %e, "could not open port for settings"),
    }
    port.dispose()?;
    Ok(())
}

async fn monitor(
    driver: Arc<dyn SerialDriver>,
    config: &Config,
    name: &str,
    hex: bool,
    baud: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let port = open_port(driver, config, name, OpenMode::Read, baud)?;
    let reader = SerialPortReader::new(&port, ReaderOptions::from(&config.reader))?;
    let mut chunks = reader.stream()?;
    eprintln!("Monitoring {} (Ctrl+C to stop)", name);

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            chunk = chunks.next() => match chunk {
                Some(bytes) => {
                    if hex {
                        writeln!(stdout, "{}", format_hex(&bytes))?;
                    } else {
                        stdout.write_all(&bytes)?;
                    }
                    stdout.flush()?;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Stopping.");
                break;
            }
        }
    }

    drop(chunks);
    reader.shutdown().await?;
    if let Some(reason) = reader.termination() {
        eprintln!("{}", reason);
    }
    Ok(())
}

async fn send(
    driver: Arc<dyn SerialDriver>,
    config: &Config,
    name: &str,
    data: &[u8],
    timeout_ms: Option<u64>,
    baud: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    use serial_bridge::AsyncPortIo;

    let port = open_port(driver, config, name, OpenMode::Write, baud)?;
    let timeout = timeout_ms.map_or_else(|| config.serial.default_timeout(), Duration::from_millis);

    let written = port.write_async(data, Some(timeout)).await?;
    if written < data.len() {
        eprintln!("Short write: {} of {} bytes", written, data.len());
    }
    println!("{}", written);
    Ok(())
}

fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_hex(text: &str) -> Result<Vec<u8>, String> {
    let digits: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in '{text}'"));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| format!("invalid hex byte '{}'", &digits[i..i + 2]))
        })
        .collect()
}

fn unescape(text: &str) -> String {
    text.replace("\\r", "\r")
        .replace("\\n", "\n")
        .replace("\\t", "\t")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("01 02 ff").unwrap(), vec![1, 2, 0xff]);
        assert_eq!(parse_hex("0x4142").unwrap(), b"AB".to_vec());
        assert!(parse_hex("123").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0x41, 0x0a]), "41 0a");
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("AT\\r\\n"), "AT\r\n");
    }

    #[test]
    fn test_cli_parses_monitor() {
        let args = Args::try_parse_from(["serial-bridge", "--mock", "monitor", "MOCK0", "--hex"])
            .unwrap();
        assert!(args.mock);
        assert!(matches!(
            args.command,
            Command::Monitor { hex: true, baud: None, .. }
        ));
    }

    #[test]
    fn test_demo_driver_lists_mock_port() {
        let driver = demo_driver();
        let names = SerialPort::available_ports_with(driver.as_ref()).unwrap();
        assert_eq!(names, vec!["MOCK0".to_string()]);
    }
}
