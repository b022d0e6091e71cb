use clap::Parser;
use tokio::time::Duration;
use ur_lab::init_logging;
use ur_lab::rtde::RTDE_PORT;
use ur_lab::rtde_receive::{RTDEReceive, DEFAULT_FREQUENCY};
use ur_lab::robot_state::DEFAULT_OUTPUT_FIELDS;
use ur_lab::UrResult;

/// Prints TCP pose and force read from the RTDE stream.
#[derive(Parser)]
struct Args {
    #[arg(long, default_value = "192.168.0.3")]
    host: String,
    #[arg(long, default_value_t = DEFAULT_FREQUENCY)]
    frequency: f64,
    /// Number of samples, 0 runs until interrupted.
    #[arg(long, default_value_t = 0)]
    samples: usize,
}

async fn receive(args: Args) -> UrResult<()> {
    let rtde =
        RTDEReceive::connect(&args.host, RTDE_PORT, args.frequency, DEFAULT_OUTPUT_FIELDS).await?;

    let mut count = 0;
    while args.samples == 0 || count < args.samples {
        let pose = rtde.get_actual_tcp_pose().await?;
        let force = rtde.get_actual_tcp_force().await?;
        println!("{}  F={:?}  steady={}", pose, force.force, rtde.is_steady().await?);
        count += 1;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    rtde.disconnect().await
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_logging();
    if let Err(e) = receive(Args::parse()).await {
        log::error!("{}", e);
    }
}
