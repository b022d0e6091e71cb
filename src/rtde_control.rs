/* Motion commands as URScript programs, observed through the RTDE state stream */

use crate::dashboard::{DashboardClient, DASHBOARD_PORT};
use crate::error::{UrError, UrResult};
use crate::robot_state::{RobotState, RuntimeState, SafetyStatusBits};
use crate::rtde_receive::is_steady;
use crate::script_client::{ScriptClient, SCRIPT_PORT};
use crate::types::{Pose, Twist};
use crate::ur_script::{self, ForceModeParams};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

const UR_EXECUTION_TIMEOUT: Duration = Duration::from_secs(300);
const PROGRAM_START_TIMEOUT: Duration = Duration::from_secs(5);
const STATE_POLL_INTERVAL: Duration = Duration::from_millis(2);

pub const DEFAULT_STOP_DECELERATION: f64 = 10.0;
pub const DEFAULT_CONTACT_ACCELERATION: f64 = 0.5;
const STOP_SCRIPT_DECELERATION: f64 = 2.0;

const MOTION_PROGRAM: &str = "ur_lab_motion";
const STOP_PROGRAM: &str = "ur_lab_stop";

pub struct RTDEControl {
    hostname: String,
    robot_state: Arc<Mutex<RobotState>>,
    script_client: Mutex<ScriptClient>,
    db_client: Mutex<DashboardClient>,
    active_force_mode: Mutex<Option<ForceModeParams>>,
}

impl RTDEControl {
    /// `robot_state` must be kept current by a running `RTDEReceive`.
    pub async fn new(hostname: &str, robot_state: Arc<Mutex<RobotState>>) -> UrResult<Self> {
        Self::connect(hostname, SCRIPT_PORT, DASHBOARD_PORT, robot_state).await
    }

    pub async fn connect(
        hostname: &str,
        script_port: u16,
        dashboard_port: u16,
        robot_state: Arc<Mutex<RobotState>>,
    ) -> UrResult<Self> {
        let mut db_client = DashboardClient::with_port(hostname, dashboard_port);
        debug!("Connecting to dashboard");
        db_client.connect().await?;
        if !db_client.is_in_remote_control().await? {
            return Err(UrError::State(format!("Robot not in remote control: {}", hostname)));
        }

        let mut script_client = ScriptClient::with_port(hostname, script_port);
        debug!("Connecting to script interface");
        script_client.connect().await?;

        info!("Control interface connected to {}", hostname);
        Ok(Self {
            hostname: hostname.to_string(),
            robot_state,
            script_client: Mutex::new(script_client),
            db_client: Mutex::new(db_client),
            active_force_mode: Mutex::new(None),
        })
    }

    pub async fn is_connected(&self) -> bool {
        self.script_client.lock().await.is_connected() && self.db_client.lock().await.is_connected()
    }

    /// Sends `lines` as one program, preceded by the active force mode if there is one.
    async fn send_motion(&self, lines: Vec<String>) -> UrResult<()> {
        let mut body = Vec::with_capacity(lines.len() + 1);
        if let Some(params) = self.active_force_mode.lock().await.as_ref() {
            body.push(ur_script::force_mode(params)?);
        }
        body.extend(lines);
        let script = ur_script::program(MOTION_PROGRAM, &body);
        self.script_client.lock().await.send_script(&script).await
    }

    async fn send_stop(&self, line: String) -> UrResult<()> {
        let script = ur_script::program(STOP_PROGRAM, &[line]);
        self.script_client.lock().await.send_script(&script).await
    }

    pub async fn runtime_state(&self) -> UrResult<RuntimeState> {
        self.robot_state.lock().await.runtime_state()
    }

    pub async fn is_program_running(&self) -> UrResult<bool> {
        Ok(self.runtime_state().await? == RuntimeState::Playing)
    }

    async fn check_safety(&self) -> UrResult<()> {
        let state = self.robot_state.lock().await;
        if state.safety_status_bit(SafetyStatusBits::IsProtectiveStopped)? {
            return Err(UrError::SafetyStop(format!("{} is protective stopped", self.hostname)));
        }
        if state.safety_status_bit(SafetyStatusBits::IsEmergencyStopped)? {
            return Err(UrError::SafetyStop(format!("{} is emergency stopped", self.hostname)));
        }
        Ok(())
    }

    async fn is_steady(&self) -> UrResult<bool> {
        let speed = self.robot_state.lock().await.vector6("actual_TCP_speed")?;
        Ok(is_steady(&Twist::from_array(speed)))
    }

    /// Waits for the program just sent to start and then to finish.
    async fn wait_for_program(&self) -> UrResult<()> {
        let start_time = Instant::now();
        loop {
            self.check_safety().await?;
            if self.is_program_running().await? {
                break;
            }
            if start_time.elapsed() >= PROGRAM_START_TIMEOUT {
                // Short programs can start and end between two state packages.
                if self.is_steady().await? {
                    return Ok(());
                }
                return Err(UrError::Timeout(format!(
                    "Program did not start within {:?}",
                    PROGRAM_START_TIMEOUT
                )));
            }
            tokio::time::sleep(STATE_POLL_INTERVAL).await;
        }

        while self.is_program_running().await? {
            self.check_safety().await?;
            if start_time.elapsed() >= UR_EXECUTION_TIMEOUT {
                return Err(UrError::Timeout(format!(
                    "Program still running after {:?}",
                    UR_EXECUTION_TIMEOUT
                )));
            }
            tokio::time::sleep(STATE_POLL_INTERVAL).await;
        }
        debug!("Program finished after {:?}", start_time.elapsed());
        Ok(())
    }

    pub async fn move_l(&self, pose: &Pose, speed: f64, acceleration: f64) -> UrResult<()> {
        debug!("moveL to {}", pose);
        self.send_motion(vec![ur_script::movel(pose, acceleration, speed)?]).await?;
        self.wait_for_program().await
    }

    pub async fn move_j(&self, q: &[f64; 6], speed: f64, acceleration: f64) -> UrResult<()> {
        debug!("moveJ to {:?}", q);
        self.send_motion(vec![ur_script::movej(q, acceleration, speed)?]).await?;
        self.wait_for_program().await
    }

    /// Moves with `speed` until the tool detects contact, then stops.
    pub async fn move_until_contact(&self, speed: &Twist, acceleration: f64) -> UrResult<()> {
        debug!("Contact search with {:?}", speed.to_array());
        self.send_motion(ur_script::move_until_contact(speed, acceleration)?).await?;
        self.wait_for_program().await
    }

    pub async fn speed_l(&self, twist: &Twist, acceleration: f64, time: f64) -> UrResult<()> {
        self.send_motion(vec![ur_script::speedl(twist, acceleration, time)?]).await
    }

    pub async fn speed_stop(&self, deceleration: f64) -> UrResult<()> {
        self.send_stop(ur_script::stopl(deceleration)).await
    }

    pub async fn servo_l(
        &self,
        pose: &Pose,
        speed: f64,
        acceleration: f64,
        time: f64,
        lookahead_time: f64,
        gain: f64,
    ) -> UrResult<()> {
        let line = ur_script::servol(pose, speed, acceleration, time, lookahead_time, gain)?;
        self.send_motion(vec![line]).await
    }

    pub async fn servo_stop(&self, deceleration: f64) -> UrResult<()> {
        self.send_stop(ur_script::stopj(deceleration)).await
    }

    /// Enters force mode. The program idles in force mode until the next command replaces it.
    pub async fn force_mode(&self, params: &ForceModeParams) -> UrResult<()> {
        params.validate()?;
        *self.active_force_mode.lock().await = Some(*params);
        self.send_motion(vec!["while True:".to_string(), "  sync()".to_string(), "end".to_string()])
            .await
    }

    pub async fn force_mode_stop(&self) -> UrResult<()> {
        *self.active_force_mode.lock().await = None;
        self.send_stop(ur_script::end_force_mode()).await
    }

    pub async fn zero_ft_sensor(&self) -> UrResult<()> {
        self.send_motion(vec![ur_script::zero_ftsensor()]).await
    }

    pub async fn stop_script(&self) -> UrResult<()> {
        *self.active_force_mode.lock().await = None;
        self.send_stop(ur_script::stopl(STOP_SCRIPT_DECELERATION)).await?;
        self.db_client.lock().await.stop().await
    }

    pub async fn disconnect(&self) -> UrResult<()> {
        if let Err(e) = self.script_client.lock().await.disconnect().await {
            warn!("Failed to close script interface: {}", e);
        }
        self.db_client.lock().await.disconnect().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dashboard::tests::spawn_dashboard;
    use crate::robot_state::DEFAULT_OUTPUT_FIELDS;
    use crate::rtde_receive::tests::fields_body;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Script interface that collects everything it receives until the client disconnects.
    pub(crate) async fn spawn_script_sink() -> (u16, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut received = String::new();
            sock.read_to_string(&mut received).await.unwrap();
            received
        });
        (port, handle)
    }

    const POSE: [f64; 6] = [0.3, 0.0, 0.2, 0.0, 3.14, 0.0];

    async fn set_state(state: &Mutex<RobotState>, runtime_state: u32, safety_bits: u32) {
        let body = fields_body(POSE, [0.0; 6], runtime_state, safety_bits);
        state.lock().await.update_from_package(&body[1..]).unwrap();
    }

    async fn set_moving_state(state: &Mutex<RobotState>, runtime_state: u32, speed: [f64; 6]) {
        let body = fields_body(POSE, speed, runtime_state, 1);
        state.lock().await.update_from_package(&body[1..]).unwrap();
    }

    async fn connect_control() -> (RTDEControl, Arc<Mutex<RobotState>>, JoinHandle<String>) {
        let (script_port, sink) = spawn_script_sink().await;
        let dashboard_port =
            spawn_dashboard(vec![("is in remote control", "true"), ("stop", "Stopped")]).await;
        let state = Arc::new(Mutex::new(RobotState::new(DEFAULT_OUTPUT_FIELDS).unwrap()));
        set_state(&state, RuntimeState::Stopped as u32, 1).await;
        let control = RTDEControl::connect("127.0.0.1", script_port, dashboard_port, state.clone())
            .await
            .unwrap();
        (control, state, sink)
    }

    #[tokio::test]
    async fn move_l_waits_for_program_to_finish() {
        let (control, state, sink) = connect_control().await;

        let program = state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            set_state(&program, RuntimeState::Playing as u32, 1).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            set_state(&program, RuntimeState::Stopped as u32, 1).await;
        });

        let start = Instant::now();
        control.move_l(&Pose::new(0.3, 0.0, 0.1, 0.0, 3.14, 0.0), 0.05, 0.5).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(70));

        control.disconnect().await.unwrap();
        let sent = sink.await.unwrap();
        assert!(sent.starts_with("def ur_lab_motion():\n"));
        assert!(sent.contains("movel(p[0.3, 0, 0.1, 0, 3.14, 0], a=0.5, v=0.05)"));
    }

    #[tokio::test]
    async fn protective_stop_aborts_move() {
        let (control, state, _sink) = connect_control().await;
        set_state(&state, RuntimeState::Playing as u32, 1 | 1 << 2).await;

        let err = control.move_j(&[0.0; 6], 0.5, 0.5).await.unwrap_err();
        assert!(matches!(err, UrError::SafetyStop(_)));
    }

    #[tokio::test]
    async fn emergency_stop_aborts_move() {
        let (control, state, _sink) = connect_control().await;
        set_state(&state, RuntimeState::Stopped as u32, 1 | 1 << 7).await;

        let err = control.move_l(&Pose::default(), 0.05, 0.5).await.unwrap_err();
        assert!(matches!(err, UrError::SafetyStop(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn unseen_program_counts_as_done_when_steady() {
        let (control, _state, _sink) = connect_control().await;

        let start = Instant::now();
        control.move_j(&[0.0; 6], 0.5, 0.5).await.unwrap();
        assert!(start.elapsed() >= PROGRAM_START_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn unseen_program_while_moving_times_out() {
        let (control, state, _sink) = connect_control().await;
        set_moving_state(&state, RuntimeState::Stopped as u32, [0.02, 0.0, 0.0, 0.0, 0.0, 0.0])
            .await;

        let start = Instant::now();
        let err = control.move_j(&[0.0; 6], 0.5, 0.5).await.unwrap_err();
        assert!(matches!(err, UrError::Timeout(_)));
        assert!(start.elapsed() >= PROGRAM_START_TIMEOUT);
        assert!(start.elapsed() < UR_EXECUTION_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn program_running_too_long_times_out() {
        let (control, state, _sink) = connect_control().await;
        set_state(&state, RuntimeState::Playing as u32, 1).await;

        let start = Instant::now();
        let err = control.move_l(&Pose::default(), 0.05, 0.5).await.unwrap_err();
        assert!(matches!(err, UrError::Timeout(_)));
        assert!(start.elapsed() >= UR_EXECUTION_TIMEOUT);
    }

    #[tokio::test]
    async fn force_mode_is_prepended_until_stopped() {
        let (control, _state, sink) = connect_control().await;

        let params = ForceModeParams::push_z(-20.0, [0.02, 0.02, 0.02, 0.2, 0.2, 0.2]);
        control.force_mode(&params).await.unwrap();
        control.servo_l(&Pose::default(), 0.1, 0.1, 0.15, 0.15, 100.0).await.unwrap();
        control.force_mode_stop().await.unwrap();
        control.speed_l(&Twist::zero(), 0.5, 0.1).await.unwrap();
        control.stop_script().await.unwrap();
        control.disconnect().await.unwrap();

        let sent = sink.await.unwrap();
        let programs: Vec<&str> = sent.split("def ").filter(|p| !p.is_empty()).collect();
        assert_eq!(programs.len(), 5);
        assert!(programs[0].contains("force_mode(") && programs[0].contains("sync()"));
        assert!(programs[1].contains("force_mode(") && programs[1].contains("servoj("));
        assert!(programs[2].contains("end_force_mode()"));
        assert!(!programs[3].contains("force_mode(") && programs[3].contains("speedl("));
        assert!(programs[4].contains("stopl(2)"));
    }

    #[tokio::test]
    async fn invalid_force_mode_is_not_sent() {
        let (control, _state, _sink) = connect_control().await;
        let params = ForceModeParams { force_type: 0, ..ForceModeParams::push_z(-10.0, [1.0; 6]) };
        assert!(matches!(
            control.force_mode(&params).await.unwrap_err(),
            UrError::InvalidArgument(_)
        ));
        assert!(control.active_force_mode.lock().await.is_none());
    }

    #[tokio::test]
    async fn local_mode_is_rejected() {
        let (script_port, _sink) = spawn_script_sink().await;
        let dashboard_port = spawn_dashboard(vec![("is in remote control", "false")]).await;
        let state = Arc::new(Mutex::new(RobotState::new(DEFAULT_OUTPUT_FIELDS).unwrap()));
        let err = RTDEControl::connect("127.0.0.1", script_port, dashboard_port, state)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, UrError::State(_)));
    }
}
