use clap::Parser;
use ur_lab::insertion::SpiralInsertion;
use ur_lab::{init_logging, LabConfig, Robot, UrResult, UrRobot};

/// Contact search, then a spiral under constant downward force until the part sinks in.
#[derive(Parser)]
struct Args {
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    host: Option<String>,
    /// Push force, N (positive pushes down).
    #[arg(long)]
    force: Option<f64>,
}

async fn run(args: Args) -> UrResult<()> {
    let mut config = match &args.config {
        Some(path) => LabConfig::load(path)?,
        None => LabConfig::default(),
    };
    if let Some(host) = args.host {
        config.robot.host = host;
    }
    let insertion = SpiralInsertion {
        force_z: args.force.map(|f| -f.abs()).unwrap_or(config.insertion.force_z),
        ..config.insertion
    };

    let robot = UrRobot::connect_with_frequency(&config.robot.host, config.robot.frequency).await?;
    let report = insertion.run(&robot).await?;
    log::info!(
        "{} spiral points, z travel {:.2} mm{}",
        report.points_executed,
        report.z_travel * 1000.0,
        if report.z_limit_reached { ", z limit reached" } else { "" }
    );

    robot.stop_script().await?;
    robot.disconnect().await
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_logging();
    if let Err(e) = run(Args::parse()).await {
        log::error!("{}", e);
    }
}
