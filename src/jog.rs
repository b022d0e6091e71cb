//! Periodic velocity refresh for jogging and pose holding.
//!
//! Streaming commands (`speedl`, `servoj`) only stay active for their time argument, so a timer
//! re-sends the current jog twist or hold target every period. The same tick publishes the TCP
//! pose for display.

use crate::error::{UrError, UrResult};
use crate::robot::Robot;
use crate::rtde_control::DEFAULT_STOP_DECELERATION;
use crate::types::{Axis, Direction, Pose, Twist};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(100);
/// Time argument of the streamed commands, matching the tick period.
const COMMAND_TIME: f64 = 0.1;

const LINEAR_SPEED_RANGE: RangeInclusive<f64> = 0.0..=0.5;
const ANGULAR_SPEED_RANGE: RangeInclusive<f64> = 0.0..=2.0;
const JOG_ACCELERATION_RANGE: RangeInclusive<f64> = 0.1..=5.0;
const MOVE_SPEED_RANGE: RangeInclusive<f64> = 0.001..=0.5;
const MOVE_ACCELERATION_RANGE: RangeInclusive<f64> = 0.1..=5.0;
const SERVO_ACCELERATION_RANGE: RangeInclusive<f64> = 0.1..=10.0;
const SERVO_SPEED_RANGE: RangeInclusive<f64> = 0.01..=1.0;
const LOOKAHEAD_RANGE: RangeInclusive<f64> = 0.01..=0.2;
const GAIN_RANGE: RangeInclusive<f64> = 1.0..=3000.0;

fn clamp(value: f64, range: &RangeInclusive<f64>) -> f64 {
    if value.is_nan() {
        return *range.start();
    }
    value.clamp(*range.start(), *range.end())
}

/// Operator-adjustable speeds, accelerations and servo tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JogParams {
    /// m/s
    pub linear_speed: f64,
    /// rad/s
    pub angular_speed: f64,
    pub jog_acceleration: f64,
    pub move_speed: f64,
    pub move_acceleration: f64,
    pub servo_acceleration: f64,
    pub servo_speed: f64,
    /// s
    pub lookahead_time: f64,
    pub gain: f64,
}

impl Default for JogParams {
    fn default() -> Self {
        Self {
            linear_speed: 0.05,
            angular_speed: 0.2,
            jog_acceleration: 0.5,
            move_speed: 0.05,
            move_acceleration: 0.5,
            servo_acceleration: 1.2,
            servo_speed: 0.25,
            lookahead_time: 0.1,
            gain: 300.0,
        }
    }
}

impl JogParams {
    /// Every value pulled into its allowed range. NaN becomes the lower bound.
    pub fn clamped(self) -> Self {
        Self {
            linear_speed: clamp(self.linear_speed, &LINEAR_SPEED_RANGE),
            angular_speed: clamp(self.angular_speed, &ANGULAR_SPEED_RANGE),
            jog_acceleration: clamp(self.jog_acceleration, &JOG_ACCELERATION_RANGE),
            move_speed: clamp(self.move_speed, &MOVE_SPEED_RANGE),
            move_acceleration: clamp(self.move_acceleration, &MOVE_ACCELERATION_RANGE),
            servo_acceleration: clamp(self.servo_acceleration, &SERVO_ACCELERATION_RANGE),
            servo_speed: clamp(self.servo_speed, &SERVO_SPEED_RANGE),
            lookahead_time: clamp(self.lookahead_time, &LOOKAHEAD_RANGE),
            gain: clamp(self.gain, &GAIN_RANGE),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JogState {
    pub twist: Twist,
    pub jog_active: bool,
    pub hold_target: Option<Pose>,
    pub hold_active: bool,
}

pub struct JogController<R: Robot> {
    robot: Arc<R>,
    state: Mutex<JogState>,
    params: Mutex<JogParams>,
    telemetry: watch::Sender<Option<Pose>>,
    status: watch::Sender<String>,
}

impl<R: Robot + 'static> JogController<R> {
    pub fn new(robot: Arc<R>, params: JogParams) -> Arc<Self> {
        let (telemetry, _) = watch::channel(None);
        let (status, _) = watch::channel(String::new());
        Arc::new(Self {
            robot,
            state: Mutex::new(JogState::default()),
            params: Mutex::new(params.clamped()),
            telemetry,
            status,
        })
    }

    pub fn robot(&self) -> &Arc<R> {
        &self.robot
    }

    /// Latest TCP pose read by the tick.
    pub fn telemetry(&self) -> watch::Receiver<Option<Pose>> {
        self.telemetry.subscribe()
    }

    /// Last error reported by the tick.
    pub fn status(&self) -> watch::Receiver<String> {
        self.status.subscribe()
    }

    pub async fn state(&self) -> JogState {
        *self.state.lock().await
    }

    pub async fn params(&self) -> JogParams {
        *self.params.lock().await
    }

    pub async fn set_params(&self, params: JogParams) {
        *self.params.lock().await = params.clamped();
    }

    pub async fn start_jog(&self, axis: Axis, direction: Direction) -> UrResult<()> {
        if !self.robot.is_connected().await {
            return Err(UrError::State("Cannot jog: robot not connected".to_string()));
        }
        let params = self.params().await;
        let mut state = self.state.lock().await;
        state.hold_active = false;
        state.twist = Twist::along(axis, direction, params.linear_speed, params.angular_speed);
        state.jog_active = true;
        debug!("Jog {:?} {:?}", axis, direction);
        Ok(())
    }

    pub async fn stop_jog(&self) {
        let mut state = self.state.lock().await;
        self.halt_jog(&mut state).await;
    }

    /// Clears the jog and sends `speed_stop`. Callers hold the state lock, so no tick can
    /// send a `speed_l` after the stop.
    async fn halt_jog(&self, state: &mut JogState) {
        state.jog_active = false;
        state.twist = Twist::zero();
        if let Err(e) = self.robot.speed_stop(DEFAULT_STOP_DECELERATION).await {
            warn!("speedStop failed: {}", e);
        }
    }

    /// Software stop: ends jogging and holding.
    pub async fn estop(&self) {
        self.stop_jog().await;
        self.disable_hold().await;
    }

    pub async fn set_hold_target(&self, pose: Pose) {
        self.state.lock().await.hold_target = Some(pose);
    }

    /// Uses the current TCP pose as hold target.
    pub async fn hold_current_pose(&self) -> UrResult<Pose> {
        let pose = self.robot.actual_tcp_pose().await?;
        self.set_hold_target(pose).await;
        Ok(pose)
    }

    pub async fn enable_hold(&self) -> UrResult<()> {
        if self.state.lock().await.hold_target.is_none() {
            return Err(UrError::State("No hold target set".to_string()));
        }
        self.stop_jog().await;
        self.state.lock().await.hold_active = true;
        Ok(())
    }

    pub async fn disable_hold(&self) {
        self.state.lock().await.hold_active = false;
    }

    /// Blocking linear move with the current move parameters. Jogging and holding are
    /// switched off first.
    pub async fn move_to(&self, pose: &Pose) -> UrResult<()> {
        self.stop_jog().await;
        self.disable_hold().await;
        let params = self.params().await;
        self.robot.move_l(pose, params.move_speed, params.move_acceleration).await
    }

    fn report(&self, message: String) {
        warn!("{}", message);
        self.status.send_replace(message);
    }

    /// One period: refresh the jog twist, refresh the hold target, publish the pose.
    pub async fn tick(&self) {
        let params = self.params().await;
        // Held until the streamed commands are out, so stop requests wait for them.
        let mut state = self.state.lock().await;

        if state.jog_active {
            if let Err(e) =
                self.robot.speed_l(&state.twist, params.jog_acceleration, COMMAND_TIME).await
            {
                self.halt_jog(&mut state).await;
                self.report(format!("Jog failed: {}", e));
            }
        }

        if let (true, Some(target)) = (state.hold_active, state.hold_target) {
            let result = self
                .robot
                .servo_l(
                    &target,
                    params.servo_speed,
                    params.servo_acceleration,
                    COMMAND_TIME,
                    params.lookahead_time,
                    params.gain,
                )
                .await;
            if let Err(e) = result {
                state.hold_active = false;
                self.report(format!("Hold failed: {}", e));
            }
        }
        drop(state);

        if let Ok(pose) = self.robot.actual_tcp_pose().await {
            self.telemetry.send_replace(Some(pose));
        }
    }

    /// Runs `tick` every `period` until the returned timer is shut down.
    pub fn spawn(self: &Arc<Self>, period: Duration) -> JogTimer<R> {
        let controller = self.clone();
        let stop = Arc::new(Notify::new());
        let stop_task = stop.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            debug!("STARTED jog timer");
            loop {
                tokio::select! {
                    _ = stop_task.notified() => break,
                    _ = interval.tick() => controller.tick().await,
                }
            }
            debug!("STOPPED jog timer");
        });

        JogTimer { controller: self.clone(), stop, handle }
    }
}

pub struct JogTimer<R: Robot> {
    controller: Arc<JogController<R>>,
    stop: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl<R: Robot + 'static> JogTimer<R> {
    /// Stops the timer, then jogging and holding, and brings the arm to rest.
    pub async fn shutdown(self) {
        self.stop.notify_one();
        self.handle.await.ok();
        self.controller.stop_jog().await;
        self.controller.disable_hold().await;
        if let Err(e) = self.controller.robot.speed_stop(DEFAULT_STOP_DECELERATION).await {
            warn!("speedStop during shutdown failed: {}", e);
        }
    }
}
