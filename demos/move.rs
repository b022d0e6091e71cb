use clap::Parser;
use ur_lab::{init_logging, Robot, UrError, UrResult, UrRobot};

/// Moves the tool back and forth along y, as the pose GUI's buttons do.
#[derive(Parser)]
struct Args {
    #[arg(long, default_value = "192.168.0.3")]
    host: String,
    /// Travel along y, m.
    #[arg(long, default_value_t = 0.1)]
    distance: f64,
    #[arg(long, default_value_t = 0.3)]
    speed: f64,
    #[arg(long, default_value_t = 0.1)]
    acceleration: f64,
    /// Joint positions (rad) to start from, comma separated.
    #[arg(long, value_delimiter = ',', num_args = 6, allow_negative_numbers = true)]
    start_q: Option<Vec<f64>>,
}

async fn move_robot(args: Args) -> UrResult<()> {
    let robot = UrRobot::connect(&args.host).await?;

    if let Some(q) = &args.start_q {
        let q = <[f64; 6]>::try_from(q.as_slice())
            .map_err(|_| UrError::InvalidArgument("start_q needs 6 joint values".to_string()))?;
        robot.move_j(&q, 0.3, 0.5).await?;
    }

    let start = robot.actual_tcp_pose().await?;
    log::info!("Start pose {}", start);
    robot.move_l(&start.translated(0.0, -args.distance, 0.0), args.speed, args.acceleration).await?;
    log::info!("Reached {}", robot.actual_tcp_pose().await?);
    robot.move_l(&start, args.speed, args.acceleration).await?;

    robot.stop_script().await?;
    robot.disconnect().await
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_logging();
    if let Err(e) = move_robot(Args::parse()).await {
        log::error!("{}", e);
    }
}
