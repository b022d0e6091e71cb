//! Force-mode assembly routines: contact search followed by a spiral under constant push.

use crate::error::{UrError, UrResult};
use crate::robot::Robot;
use crate::types::{Pose, Twist, Wrench};
use crate::ur_script::ForceModeParams;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tokio::time::{Duration, MissedTickBehavior};

/// Points of a flat or rising spiral around `center`, `steps` per revolution.
///
/// The radius grows linearly from 0 to `radius` over all points and z rises by `height_step`
/// in total. The orientation is the center's.
pub fn spiral_points(
    center: &Pose,
    radius: f64,
    steps: usize,
    revolutions: usize,
    height_step: f64,
) -> Vec<Pose> {
    let total = steps * revolutions;
    (0..total)
        .map(|i| {
            let theta = 2.0 * PI * i as f64 / steps as f64;
            let fraction = i as f64 / total as f64;
            let r = radius * fraction;
            center.with_position(
                center.x + r * theta.cos(),
                center.y + r * theta.sin(),
                center.z + height_step * fraction,
            )
        })
        .collect()
}

/// Spiral with r = `radius_step`·θ, sampled every `angle_step` up to `max_angle` (radians).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchimedeanSpiral {
    pub radius_step: f64,
    pub angle_step: f64,
    pub max_angle: f64,
}

impl Default for ArchimedeanSpiral {
    fn default() -> Self {
        Self { radius_step: 0.00002, angle_step: 0.0008, max_angle: 50.0 * 2.0 * PI }
    }
}

impl ArchimedeanSpiral {
    pub fn validate(&self) -> UrResult<()> {
        if !(self.angle_step > 0.0) || !self.max_angle.is_finite() || !self.radius_step.is_finite()
        {
            return Err(UrError::InvalidArgument(format!("Invalid spiral: {:?}", self)));
        }
        Ok(())
    }

    /// Targets at constant height. Call `validate` first, a zero angle step never ends.
    pub fn points(&self, center: Pose) -> impl Iterator<Item = Pose> + '_ {
        (0u64..)
            .map(move |i| i as f64 * self.angle_step)
            .take_while(move |angle| *angle < self.max_angle)
            .map(move |angle| {
                let r = self.radius_step * angle;
                center.with_position(
                    center.x + r * angle.cos(),
                    center.y + r * angle.sin(),
                    center.z,
                )
            })
    }
}

/// Parameters of the `servoj` calls that follow a path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoParams {
    pub speed: f64,
    pub acceleration: f64,
    pub time: f64,
    pub lookahead_time: f64,
    pub gain: f64,
}

impl Default for ServoParams {
    fn default() -> Self {
        Self { speed: 0.1, acceleration: 0.1, time: 0.15, lookahead_time: 0.15, gain: 100.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InsertionReport {
    pub points_executed: usize,
    /// z of the last pose read minus z at contact.
    pub z_travel: f64,
    pub z_limit_reached: bool,
}

async fn stop_after_error<R: Robot + ?Sized>(robot: &R, error: UrError) -> UrError {
    warn!("Force-mode routine failed: {}", error);
    if let Err(e) = robot.stop_script().await {
        warn!("stopScript failed: {}", e);
    }
    error
}

fn control_interval(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Pushes a part down with constant force while wiggling it along a spiral until it sinks in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiralInsertion {
    /// z speed of the contact search, m/s.
    pub contact_speed: f64,
    /// N, negative pushes down.
    pub force_z: f64,
    pub limits: [f64; 6],
    pub spiral: ArchimedeanSpiral,
    pub servo: ServoParams,
    /// Stop once the tool has moved this far in z from the contact height, m.
    pub z_limit: f64,
    pub retract_height: f64,
    pub retract_speed: f64,
    pub retract_acceleration: f64,
    pub servo_stop_deceleration: f64,
    pub period_ms: u64,
}

impl Default for SpiralInsertion {
    fn default() -> Self {
        Self {
            contact_speed: -0.05,
            force_z: -20.0,
            limits: [0.02, 0.02, 0.02, 0.2, 0.2, 0.2],
            spiral: ArchimedeanSpiral::default(),
            servo: ServoParams::default(),
            z_limit: 0.005,
            retract_height: 0.05,
            retract_speed: 0.3,
            retract_acceleration: 0.1,
            servo_stop_deceleration: 2.0,
            period_ms: 2,
        }
    }
}

impl SpiralInsertion {
    /// Runs the whole routine. On any error the program is stopped before the error is returned.
    pub async fn run<R: Robot + ?Sized>(&self, robot: &R) -> UrResult<InsertionReport> {
        match self.execute(robot).await {
            Ok(report) => Ok(report),
            Err(e) => Err(stop_after_error(robot, e).await),
        }
    }

    async fn execute<R: Robot + ?Sized>(&self, robot: &R) -> UrResult<InsertionReport> {
        self.spiral.validate()?;

        info!("Searching contact at {} m/s", self.contact_speed);
        robot
            .move_until_contact(&Twist::from_array([0.0, 0.0, self.contact_speed, 0.0, 0.0, 0.0]))
            .await?;

        robot.force_mode(&ForceModeParams::push_z(self.force_z, self.limits)).await?;
        let center = robot.actual_tcp_pose().await?;
        info!("Contact at z={:.4} m, starting spiral", center.z);

        let mut interval = control_interval(Duration::from_millis(self.period_ms.max(1)));
        let mut report =
            InsertionReport { points_executed: 0, z_travel: 0.0, z_limit_reached: false };
        for target in self.spiral.points(center) {
            interval.tick().await;
            let s = &self.servo;
            robot
                .servo_l(&target, s.speed, s.acceleration, s.time, s.lookahead_time, s.gain)
                .await?;
            report.points_executed += 1;

            report.z_travel = robot.actual_tcp_pose().await?.z - center.z;
            debug!("moved z = {:.5}", report.z_travel);
            if report.z_travel.abs() > self.z_limit {
                info!("z limit reached after {} points", report.points_executed);
                report.z_limit_reached = true;
                break;
            }
        }

        robot.servo_stop(self.servo_stop_deceleration).await?;
        robot.force_mode_stop().await?;

        let pose = robot.actual_tcp_pose().await?;
        robot
            .move_l(
                &pose.translated(0.0, 0.0, self.retract_height),
                self.retract_speed,
                self.retract_acceleration,
            )
            .await?;
        Ok(report)
    }
}

/// Alternates two wrenches at a fixed control rate: `wrench_down` for cycles up to and including
/// `switch_at`, `wrench_up` afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForcePush {
    pub task_frame: Pose,
    pub selection: [u8; 6],
    pub wrench_down: Wrench,
    pub wrench_up: Wrench,
    pub force_type: u8,
    pub limits: [f64; 6],
    pub cycles: usize,
    pub switch_at: usize,
    pub period: Duration,
}

impl Default for ForcePush {
    fn default() -> Self {
        Self {
            task_frame: Pose::default(),
            selection: [1, 1, 1, 0, 0, 0],
            wrench_down: Wrench::from_array([1.0, 1.0, -10.0, 0.0, 0.0, 0.0]),
            wrench_up: Wrench::from_array([-1.0, -1.0, -10.0, 0.0, 0.0, 0.0]),
            force_type: 2,
            limits: [1.0; 6],
            cycles: 200,
            switch_at: 75,
            period: Duration::from_millis(2),
        }
    }
}

impl ForcePush {
    pub fn params_for_cycle(&self, cycle: usize) -> ForceModeParams {
        ForceModeParams {
            task_frame: self.task_frame,
            selection: self.selection,
            wrench: if cycle > self.switch_at { self.wrench_up } else { self.wrench_down },
            force_type: self.force_type,
            limits: self.limits,
        }
    }

    pub async fn run<R: Robot + ?Sized>(&self, robot: &R) -> UrResult<()> {
        match self.execute(robot).await {
            Ok(()) => Ok(()),
            Err(e) => Err(stop_after_error(robot, e).await),
        }
    }

    async fn execute<R: Robot + ?Sized>(&self, robot: &R) -> UrResult<()> {
        let mut interval = control_interval(self.period);
        for cycle in 0..self.cycles {
            interval.tick().await;
            robot.force_mode(&self.params_for_cycle(cycle)).await?;
        }
        robot.force_mode_stop().await
    }
}

/// Force mode in the target's frame while stepping through a spiral with blocking moves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiralMontage {
    /// Downward force, N.
    pub force: f64,
    pub radius: f64,
    pub steps: usize,
    pub revolutions: usize,
    pub height_step: f64,
    pub limits: [f64; 6],
    pub move_speed: f64,
    pub move_acceleration: f64,
    pub pause_ms: u64,
}

impl Default for SpiralMontage {
    fn default() -> Self {
        Self {
            force: 30.0,
            radius: 0.01,
            steps: 36,
            revolutions: 3,
            height_step: 0.0,
            limits: [10.0, 10.0, 5.0, 1.0, 1.0, 1.0],
            move_speed: 0.05,
            move_acceleration: 0.1,
            pause_ms: 100,
        }
    }
}

impl SpiralMontage {
    /// Returns the number of spiral points visited.
    pub async fn run<R: Robot + ?Sized>(&self, robot: &R, target: &Pose) -> UrResult<usize> {
        match self.execute(robot, target).await {
            Ok(points) => Ok(points),
            Err(e) => Err(stop_after_error(robot, e).await),
        }
    }

    async fn execute<R: Robot + ?Sized>(&self, robot: &R, target: &Pose) -> UrResult<usize> {
        let points =
            spiral_points(target, self.radius, self.steps, self.revolutions, self.height_step);
        let params = ForceModeParams {
            task_frame: *target,
            ..ForceModeParams::push_z(-self.force, self.limits)
        };
        robot.force_mode(&params).await?;
        for point in &points {
            robot.move_l(point, self.move_speed, self.move_acceleration).await?;
            tokio::time::sleep(Duration::from_millis(self.pause_ms)).await;
        }
        robot.force_mode_stop().await?;
        Ok(points.len())
    }
}
