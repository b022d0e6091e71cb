use clap::Parser;
use ur_lab::insertion::ForcePush;
use ur_lab::{init_logging, LabConfig, Pose, Robot, Twist, UrError, UrResult, UrRobot};

/// Force-mode push tests: alternating wrenches at 500 Hz, or a spiral montage in force mode.
#[derive(Parser)]
struct Args {
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    host: Option<String>,
    /// Joint positions (rad) to start from, comma separated.
    #[arg(long, value_delimiter = ',', num_args = 6, allow_negative_numbers = true)]
    start_q: Option<Vec<f64>>,
    /// Run the spiral montage at this target pose (x,y,z,rx,ry,rz) instead of the push test.
    #[arg(long, value_delimiter = ',', num_args = 6, allow_negative_numbers = true)]
    montage: Option<Vec<f64>>,
}

async fn run(args: Args) -> UrResult<()> {
    let mut config = match &args.config {
        Some(path) => LabConfig::load(path)?,
        None => LabConfig::default(),
    };
    if let Some(host) = args.host {
        config.robot.host = host;
    }

    let robot = UrRobot::connect_with_frequency(&config.robot.host, config.robot.frequency).await?;
    if let Some(q) = &args.start_q {
        let q = <[f64; 6]>::try_from(q.as_slice())
            .map_err(|_| UrError::InvalidArgument("start_q needs 6 joint values".to_string()))?;
        robot.move_j(&q, 0.3, 0.5).await?;
    }

    match &args.montage {
        Some(target) => {
            let target = Pose::from_slice(target)?;
            let points = config.montage.run(&robot, &target).await?;
            log::info!("Montage finished after {} points", points);
        }
        None => {
            robot.move_until_contact(&Twist::from_array([0.0, 0.0, -0.05, 0.0, 0.0, 0.0])).await?;
            ForcePush::default().run(&robot).await?;
            let pose = robot.actual_tcp_pose().await?;
            robot.move_l(&pose.translated(0.0, 0.0, 0.05), 0.3, 0.1).await?;
        }
    }

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
