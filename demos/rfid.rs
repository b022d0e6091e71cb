use clap::Parser;
use ur_lab::config::RfidConfig;
use ur_lab::rfid::{open_port, spawn_reader};
use ur_lab::{init_logging, LabConfig, UrResult};

/// Prints RFID tags reported by the ESP32 reader.
#[derive(Parser)]
struct Args {
    #[arg(long)]
    config: Option<String>,
    /// Serial port, e.g. /dev/ttyUSB0 or COM4.
    #[arg(long)]
    port: Option<String>,
    #[arg(long)]
    baud: Option<u32>,
}

async fn run(args: Args) -> UrResult<()> {
    let RfidConfig { port, baud_rate } = match &args.config {
        Some(path) => LabConfig::load(path)?.rfid,
        None => RfidConfig::default(),
    };
    let port = args.port.unwrap_or(port);
    let serial = open_port(&port, args.baud.unwrap_or(baud_rate))?;

    let (mut events, reader) = spawn_reader(serial);
    while let Some(event) = events.recv().await {
        println!("{}  tag {}  ({})", event.received_at.format("%H:%M:%S"), event.uid, event.raw);
    }
    reader.await.map_err(|e| ur_lab::UrError::Connection(e.to_string()))?
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_logging();
    if let Err(e) = run(Args::parse()).await {
        log::error!("{}", e);
    }
}
