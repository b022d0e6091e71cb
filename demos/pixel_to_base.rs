use clap::Parser;
use ur_lab::transform::{approach_pose, format_matrix, pixel_to_base, pixel_to_camera};
use ur_lab::{init_logging, LabConfig, Robot, UrResult, UrRobot};

/// Maps a pixel with known depth into the robot base frame and optionally moves above it.
#[derive(Parser)]
struct Args {
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    host: Option<String>,
    u: f64,
    v: f64,
    /// Depth along the optical axis, m.
    depth: f64,
    /// Move the tool to the approach pose above the point.
    #[arg(long)]
    go: bool,
}

async fn run(args: Args) -> UrResult<()> {
    let mut config = match &args.config {
        Some(path) => LabConfig::load(path)?,
        None => LabConfig::default(),
    };
    if let Some(host) = args.host {
        config.robot.host = host;
    }
    let camera = config.camera;

    let p_cam = pixel_to_camera(args.u, args.v, args.depth, &camera.intrinsics)?;
    let p_base = pixel_to_base(args.u, args.v, args.depth, &camera.intrinsics, &camera.extrinsics)?;
    println!("T_base_cam =\n{}", format_matrix(&camera.extrinsics.base_from_camera()));
    println!("p_cam  = [{:.4}, {:.4}, {:.4}] m", p_cam.x, p_cam.y, p_cam.z);
    println!("p_base = [{:.4}, {:.4}, {:.4}] m", p_base.x, p_base.y, p_base.z);

    if args.go {
        let robot =
            UrRobot::connect_with_frequency(&config.robot.host, config.robot.frequency).await?;
        let current = robot.actual_tcp_pose().await?;
        let target = approach_pose(current, &p_base, camera.approach_offset);
        log::info!("Approaching {}", target);
        robot.move_l(&target, config.jog.move_speed, config.jog.move_acceleration).await?;
        robot.stop_script().await?;
        robot.disconnect().await?;
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_logging();
    if let Err(e) = run(Args::parse()).await {
        log::error!("{}", e);
    }
}
