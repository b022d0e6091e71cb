//! RFID tags reported as text lines (`#RFID: 0xA1B2C3D4`) by a reader on a serial port.

use crate::error::UrResult;
use chrono::{DateTime, Local};
use log::{debug, info};
use regex::Regex;
use std::sync::OnceLock;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

#[derive(Debug, Clone, PartialEq)]
pub struct RfidEvent {
    pub uid: String,
    /// The line the tag was found in, without line terminator.
    pub raw: String,
    pub received_at: DateTime<Local>,
}

fn tag_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"#RFID:\s*(\S+)").ok()).as_ref()
}

/// Tag UID in `line`, if it carries one.
pub fn parse_line(line: &str) -> Option<String> {
    tag_pattern()?.captures(line).map(|caps| caps[1].to_string())
}

pub fn open_port(path: &str, baud_rate: u32) -> UrResult<SerialStream> {
    let port = tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .stop_bits(tokio_serial::StopBits::One)
        .parity(tokio_serial::Parity::None)
        .open_native_async()?;
    info!("Opened RFID reader on {} at {} baud", path, baud_rate);
    Ok(port)
}

/// Reads lines from `reader` in the background and sends one event per tag line.
///
/// The channel is unbounded so a slow consumer never stalls the serial port. The task ends
/// when the stream closes or the receiver is dropped.
pub fn spawn_reader<R>(
    reader: R,
) -> (mpsc::UnboundedReceiver<RfidEvent>, JoinHandle<UrResult<()>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    (rx, tokio::spawn(read_events(reader, tx)))
}

async fn read_events<R>(reader: R, tx: mpsc::UnboundedSender<RfidEvent>) -> UrResult<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer).await? == 0 {
            debug!("RFID stream closed");
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buffer);
        let line = line.trim_end();
        let Some(uid) = parse_line(line) else {
            debug!("Ignoring line {:?}", line);
            continue;
        };
        let event = RfidEvent { uid, raw: line.to_string(), received_at: Local::now() };
        if tx.send(event).is_err() {
            debug!("RFID receiver dropped");
            return Ok(());
        }
    }
}
