//! The motion-control seam the lab routines are written against.

use crate::error::UrResult;
use crate::rtde_control::{RTDEControl, DEFAULT_CONTACT_ACCELERATION};
use crate::rtde_receive::{RTDEReceive, DEFAULT_FREQUENCY};
use crate::robot_state::DEFAULT_OUTPUT_FIELDS;
use crate::rtde::RTDE_PORT;
use crate::types::{Pose, Twist, Wrench};
use crate::ur_script::ForceModeParams;
use async_trait::async_trait;
use log::{info, warn};

/// Operations the jog loop and the force-mode routines sequence.
///
/// `move_l`, `move_j` and `move_until_contact` return once the motion has finished. The
/// streaming commands `speed_l` and `servo_l` return as soon as they are sent and are expected
/// to be refreshed periodically.
#[async_trait]
pub trait Robot: Send + Sync {
    async fn is_connected(&self) -> bool;
    async fn actual_tcp_pose(&self) -> UrResult<Pose>;
    async fn actual_tcp_force(&self) -> UrResult<Wrench>;
    async fn move_l(&self, pose: &Pose, speed: f64, acceleration: f64) -> UrResult<()>;
    async fn move_j(&self, q: &[f64; 6], speed: f64, acceleration: f64) -> UrResult<()>;
    async fn speed_l(&self, twist: &Twist, acceleration: f64, time: f64) -> UrResult<()>;
    async fn speed_stop(&self, deceleration: f64) -> UrResult<()>;
    async fn servo_l(
        &self,
        pose: &Pose,
        speed: f64,
        acceleration: f64,
        time: f64,
        lookahead_time: f64,
        gain: f64,
    ) -> UrResult<()>;
    async fn servo_stop(&self, deceleration: f64) -> UrResult<()>;
    async fn force_mode(&self, params: &ForceModeParams) -> UrResult<()>;
    async fn force_mode_stop(&self) -> UrResult<()>;
    async fn move_until_contact(&self, speed: &Twist) -> UrResult<()>;
    async fn stop_script(&self) -> UrResult<()>;
    async fn disconnect(&self) -> UrResult<()>;
}

/// A UR arm reached over RTDE (state), the script interface (motion) and the dashboard.
pub struct UrRobot {
    receive: RTDEReceive,
    control: RTDEControl,
}

impl UrRobot {
    pub async fn connect(hostname: &str) -> UrResult<Self> {
        Self::connect_with_frequency(hostname, DEFAULT_FREQUENCY).await
    }

    pub async fn connect_with_frequency(hostname: &str, frequency: f64) -> UrResult<Self> {
        let receive =
            RTDEReceive::connect(hostname, RTDE_PORT, frequency, DEFAULT_OUTPUT_FIELDS).await?;
        let control = RTDEControl::new(hostname, receive.state_handle()).await?;
        info!("Connected to robot {}", hostname);
        Ok(Self { receive, control })
    }

    pub fn receive(&self) -> &RTDEReceive {
        &self.receive
    }

    pub fn control(&self) -> &RTDEControl {
        &self.control
    }
}

#[async_trait]
impl Robot for UrRobot {
    async fn is_connected(&self) -> bool {
        self.receive.is_connected() && self.control.is_connected().await
    }

    async fn actual_tcp_pose(&self) -> UrResult<Pose> {
        self.receive.get_actual_tcp_pose().await
    }

    async fn actual_tcp_force(&self) -> UrResult<Wrench> {
        self.receive.get_actual_tcp_force().await
    }

    async fn move_l(&self, pose: &Pose, speed: f64, acceleration: f64) -> UrResult<()> {
        self.control.move_l(pose, speed, acceleration).await
    }

    async fn move_j(&self, q: &[f64; 6], speed: f64, acceleration: f64) -> UrResult<()> {
        self.control.move_j(q, speed, acceleration).await
    }

    async fn speed_l(&self, twist: &Twist, acceleration: f64, time: f64) -> UrResult<()> {
        self.control.speed_l(twist, acceleration, time).await
    }

    async fn speed_stop(&self, deceleration: f64) -> UrResult<()> {
        self.control.speed_stop(deceleration).await
    }

    async fn servo_l(
        &self,
        pose: &Pose,
        speed: f64,
        acceleration: f64,
        time: f64,
        lookahead_time: f64,
        gain: f64,
    ) -> UrResult<()> {
        self.control.servo_l(pose, speed, acceleration, time, lookahead_time, gain).await
    }

    async fn servo_stop(&self, deceleration: f64) -> UrResult<()> {
        self.control.servo_stop(deceleration).await
    }

    async fn force_mode(&self, params: &ForceModeParams) -> UrResult<()> {
        self.control.force_mode(params).await
    }

    async fn force_mode_stop(&self) -> UrResult<()> {
        self.control.force_mode_stop().await
    }

    async fn move_until_contact(&self, speed: &Twist) -> UrResult<()> {
        self.control.move_until_contact(speed, DEFAULT_CONTACT_ACCELERATION).await
    }

    async fn stop_script(&self) -> UrResult<()> {
        self.control.stop_script().await
    }

    async fn disconnect(&self) -> UrResult<()> {
        if let Err(e) = self.control.disconnect().await {
            warn!("Failed to disconnect control interface: {}", e);
        }
        self.receive.disconnect().await
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use crate::error::UrError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum RobotCall {
        MoveL(Pose),
        MoveJ([f64; 6]),
        SpeedL(Twist),
        SpeedStop,
        ServoL(Pose),
        ServoStop,
        ForceMode(ForceModeParams),
        ForceModeStop,
        MoveUntilContact(Twist),
        StopScript,
        Disconnect,
    }

    /// Records every command. Motions move the reported pose to their target at once.
    pub(crate) struct FakeRobot {
        pub pose: Mutex<Pose>,
        pub force: Mutex<Wrench>,
        pub calls: Mutex<Vec<RobotCall>>,
        pub connected: AtomicBool,
        pub fail_speed_l: AtomicBool,
        pub fail_servo_l: AtomicBool,
        pub fail_pose: AtomicBool,
        /// Contact search ends this far below the start pose.
        pub contact_depth: f64,
        /// Each servo call sinks the tool this much further below its commanded target.
        pub sink_per_servo: f64,
        pub sunk: Mutex<f64>,
        /// Time `speed_l` takes before the command counts as sent.
        pub speed_l_delay: Option<Duration>,
    }

    impl FakeRobot {
        pub(crate) fn new(pose: Pose) -> Self {
            Self {
                pose: Mutex::new(pose),
                force: Mutex::new(Wrench::default()),
                calls: Mutex::new(Vec::new()),
                connected: AtomicBool::new(true),
                fail_speed_l: AtomicBool::new(false),
                fail_servo_l: AtomicBool::new(false),
                fail_pose: AtomicBool::new(false),
                contact_depth: 0.01,
                sink_per_servo: 0.0,
                sunk: Mutex::new(0.0),
                speed_l_delay: None,
            }
        }

        pub(crate) fn calls(&self) -> Vec<RobotCall> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn count(&self, matches: impl Fn(&RobotCall) -> bool) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| matches(c)).count()
        }

        fn record(&self, call: RobotCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl Robot for FakeRobot {
        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn actual_tcp_pose(&self) -> UrResult<Pose> {
            if self.fail_pose.load(Ordering::SeqCst) {
                return Err(UrError::Connection("fake pose unavailable".into()));
            }
            Ok(*self.pose.lock().unwrap())
        }

        async fn actual_tcp_force(&self) -> UrResult<Wrench> {
            Ok(*self.force.lock().unwrap())
        }

        async fn move_l(&self, pose: &Pose, _speed: f64, _acceleration: f64) -> UrResult<()> {
            self.record(RobotCall::MoveL(*pose));
            *self.pose.lock().unwrap() = *pose;
            Ok(())
        }

        async fn move_j(&self, q: &[f64; 6], _speed: f64, _acceleration: f64) -> UrResult<()> {
            self.record(RobotCall::MoveJ(*q));
            Ok(())
        }

        async fn speed_l(&self, twist: &Twist, _acceleration: f64, _time: f64) -> UrResult<()> {
            if let Some(delay) = self.speed_l_delay {
                tokio::time::sleep(delay).await;
            }
            self.record(RobotCall::SpeedL(*twist));
            if self.fail_speed_l.load(Ordering::SeqCst) {
                return Err(UrError::ScriptClient("fake speedl failure".into()));
            }
            Ok(())
        }

        async fn speed_stop(&self, _deceleration: f64) -> UrResult<()> {
            self.record(RobotCall::SpeedStop);
            Ok(())
        }

        async fn servo_l(
            &self,
            pose: &Pose,
            _speed: f64,
            _acceleration: f64,
            _time: f64,
            _lookahead_time: f64,
            _gain: f64,
        ) -> UrResult<()> {
            self.record(RobotCall::ServoL(*pose));
            if self.fail_servo_l.load(Ordering::SeqCst) {
                return Err(UrError::ScriptClient("fake servol failure".into()));
            }
            let mut sunk = self.sunk.lock().unwrap();
            *sunk += self.sink_per_servo;
            *self.pose.lock().unwrap() = pose.translated(0.0, 0.0, -*sunk);
            Ok(())
        }

        async fn servo_stop(&self, _deceleration: f64) -> UrResult<()> {
            self.record(RobotCall::ServoStop);
            Ok(())
        }

        async fn force_mode(&self, params: &ForceModeParams) -> UrResult<()> {
            params.validate()?;
            self.record(RobotCall::ForceMode(*params));
            Ok(())
        }

        async fn force_mode_stop(&self) -> UrResult<()> {
            self.record(RobotCall::ForceModeStop);
            Ok(())
        }

        async fn move_until_contact(&self, speed: &Twist) -> UrResult<()> {
            self.record(RobotCall::MoveUntilContact(*speed));
            let mut current = self.pose.lock().unwrap();
            *current = current.translated(0.0, 0.0, -self.contact_depth);
            Ok(())
        }

        async fn stop_script(&self) -> UrResult<()> {
            self.record(RobotCall::StopScript);
            Ok(())
        }

        async fn disconnect(&self) -> UrResult<()> {
            self.record(RobotCall::Disconnect);
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }
    }
}
