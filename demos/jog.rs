use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use ur_lab::jog::DEFAULT_TICK_PERIOD;
use ur_lab::teach::TeachPoints;
use ur_lab::{
    init_logging, Axis, Direction, JogController, LabConfig, Robot, UrError, UrResult, UrRobot,
};

const HELP: &str = "\
commands:
  x+ | x- | y+ | ... | rz-   start jogging along an axis
  s                          stop jogging
  e                          stop jogging and holding
  teach [name]               store the current pose
  list                       show taught poses
  go <n>                     moveL to taught pose n
  del <n>                    delete taught pose n
  hold [n]                   hold taught pose n, or the current pose
  free                       stop holding
  save <file> | load <file>  teach points as CSV
  q                          quit";

/// Console jogging with teach points and pose hold.
#[derive(Parser)]
struct Args {
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    host: Option<String>,
}

fn parse_jog(word: &str) -> Option<(Axis, Direction)> {
    if let Some(axis) = word.strip_suffix('+') {
        return Some((axis.parse().ok()?, Direction::Positive));
    }
    let axis = word.strip_suffix('-')?;
    Some((axis.parse().ok()?, Direction::Negative))
}

fn index(arg: Option<&str>) -> UrResult<usize> {
    let n: usize = arg
        .and_then(|a| a.parse().ok())
        .ok_or_else(|| UrError::InvalidArgument("expected a teach point number".to_string()))?;
    n.checked_sub(1)
        .ok_or_else(|| UrError::InvalidArgument("teach points count from 1".to_string()))
}

async fn handle(
    line: &str,
    jog: &JogController<UrRobot>,
    points: &mut TeachPoints,
) -> UrResult<bool> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(true);
    };
    let arg = words.next();

    if let Some((axis, direction)) = parse_jog(command) {
        jog.start_jog(axis, direction).await?;
        return Ok(true);
    }

    match command {
        "s" => jog.stop_jog().await,
        "e" => jog.estop().await,
        "teach" => {
            let pose = jog.robot().actual_tcp_pose().await?;
            println!("{}", points.teach(arg.unwrap_or(""), pose).display_line());
        }
        "list" => {
            for (i, line) in points.display_lines().iter().enumerate() {
                println!("{:>3} {}", i + 1, line);
            }
        }
        "go" => {
            let target = points
                .get(index(arg)?)
                .ok_or_else(|| UrError::InvalidArgument("no such teach point".to_string()))?
                .pose;
            jog.move_to(&target).await?;
        }
        "del" => {
            points.remove(index(arg)?)?;
        }
        "hold" => {
            match arg {
                Some(_) => {
                    let target = points
                        .get(index(arg)?)
                        .ok_or_else(|| UrError::InvalidArgument("no such teach point".to_string()))?
                        .pose;
                    jog.set_hold_target(target).await;
                }
                None => {
                    jog.hold_current_pose().await?;
                }
            }
            jog.enable_hold().await?;
        }
        "free" => jog.disable_hold().await,
        "save" => points.save(arg.unwrap_or("teach_points.csv"))?,
        "load" => points.load(arg.unwrap_or("teach_points.csv"))?,
        "q" => return Ok(false),
        _ => println!("{}", HELP),
    }
    Ok(true)
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
    let robot = Arc::new(robot);
    let jog = JogController::new(robot.clone(), config.jog);
    let timer = jog.spawn(DEFAULT_TICK_PERIOD);

    let mut telemetry = jog.telemetry();
    let mut status = jog.status();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = telemetry.changed() => {
                    if changed.is_err() { break; }
                    if let Some(pose) = *telemetry.borrow_and_update() {
                        log::debug!("TCP {}", pose);
                    }
                }
                changed = status.changed() => {
                    if changed.is_err() { break; }
                    println!("status: {}", *status.borrow_and_update());
                }
            }
        }
    });

    println!("{}", HELP);
    let mut points = TeachPoints::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match handle(&line, &jog, &mut points).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("error: {}", e),
        }
    }

    timer.shutdown().await;
    robot.disconnect().await
}

#[tokio::main]
async fn main() {
    init_logging();
    if let Err(e) = run(Args::parse()).await {
        log::error!("{}", e);
    }
}
