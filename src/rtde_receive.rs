/* RTDE Receive Interface for reading data from UR robot */

use crate::error::{UrError, UrResult};
use crate::robot_state::{
    RobotMode, RobotState, RuntimeState, SafetyStatusBits, DEFAULT_OUTPUT_FIELDS,
};
use crate::rtde::{RTDEReader, RTDE, RTDE_PORT};
use crate::types::{Pose, Twist, Wrench};
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

pub const DEFAULT_FREQUENCY: f64 = 125.0;
const FIRST_STATE_TIMEOUT: Duration = Duration::from_secs(5);
/// Linear (m/s) and angular (rad/s) TCP speed below which the arm counts as standing still.
const STEADY_SPEED_TOLERANCE: f64 = 0.0005;

pub struct RTDEReceive {
    hostname: String,
    rtde: Mutex<RTDE>,
    robot_state: Arc<Mutex<RobotState>>,
    connected: Arc<AtomicBool>,
    stop_receive_thread: Arc<Notify>,
    receive_thread: Mutex<Option<JoinHandle<()>>>,
}

impl RTDEReceive {
    pub async fn new(hostname: &str) -> UrResult<Self> {
        Self::connect(hostname, RTDE_PORT, DEFAULT_FREQUENCY, DEFAULT_OUTPUT_FIELDS).await
    }

    pub async fn connect(
        hostname: &str,
        port: u16,
        frequency: f64,
        fields: &[&str],
    ) -> UrResult<Self> {
        let robot_state = RobotState::new(fields)?;

        let mut rtde = RTDE::with_port(hostname, port);
        rtde.connect().await?;
        rtde.negotiate_protocol_version().await?;
        let version = rtde.get_controller_version().await?;
        info!(
            "Controller {} runs software {}.{}.{}.{}",
            hostname, version.major, version.minor, version.bugfix, version.build
        );
        rtde.send_output_setup(&robot_state, frequency).await?;
        let reader = rtde.send_start().await?;

        let mut interface = Self {
            hostname: hostname.to_string(),
            rtde: Mutex::new(rtde),
            robot_state: Arc::new(Mutex::new(robot_state)),
            connected: Arc::new(AtomicBool::new(true)),
            stop_receive_thread: Arc::new(Notify::new()),
            receive_thread: Mutex::new(None),
        };
        interface.start_receive_thread(reader);
        interface.wait_for_first_state().await?;
        Ok(interface)
    }

    fn start_receive_thread(&mut self, mut reader: RTDEReader) {
        let robot_state = self.robot_state.clone();
        let connected = self.connected.clone();
        let stop = self.stop_receive_thread.clone();

        *self.receive_thread.get_mut() = Some(tokio::spawn(async move {
            debug!("STARTED receive thread");
            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    result = reader.receive_data(&robot_state) => {
                        if let Err(e) = result {
                            error!("RTDE receive failed, stopping receive thread: {}", e);
                            break;
                        }
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
            debug!("STOPPED receive thread");
        }));
    }

    async fn wait_for_first_state(&self) -> UrResult<()> {
        let start_time = Instant::now();
        while !self.robot_state.lock().await.first_state_received() {
            if !self.is_connected() {
                return Err(UrError::Connection(format!(
                    "RTDE stream from {} closed before the first state arrived",
                    self.hostname
                )));
            }
            if start_time.elapsed() >= FIRST_STATE_TIMEOUT {
                return Err(UrError::Timeout(format!(
                    "No robot state received from {} within {:?}",
                    self.hostname, FIRST_STATE_TIMEOUT
                )));
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Shared state, kept current by the receive thread.
    pub fn state_handle(&self) -> Arc<Mutex<RobotState>> {
        self.robot_state.clone()
    }

    async fn state(&self) -> UrResult<tokio::sync::MutexGuard<'_, RobotState>> {
        if !self.is_connected() {
            return Err(UrError::Connection(format!("Not receiving data from {}", self.hostname)));
        }
        Ok(self.robot_state.lock().await)
    }

    pub async fn get_actual_q(&self) -> UrResult<[f64; 6]> {
        self.state().await?.vector6("actual_q")
    }

    pub async fn get_actual_tcp_pose(&self) -> UrResult<Pose> {
        Ok(Pose::from_array(self.state().await?.vector6("actual_TCP_pose")?))
    }

    pub async fn get_actual_tcp_speed(&self) -> UrResult<Twist> {
        Ok(Twist::from_array(self.state().await?.vector6("actual_TCP_speed")?))
    }

    pub async fn get_actual_tcp_force(&self) -> UrResult<Wrench> {
        Ok(Wrench::from_array(self.state().await?.vector6("actual_TCP_force")?))
    }

    pub async fn get_robot_mode(&self) -> UrResult<RobotMode> {
        self.state().await?.robot_mode()
    }

    pub async fn get_runtime_state(&self) -> UrResult<RuntimeState> {
        self.state().await?.runtime_state()
    }

    pub async fn is_protective_stopped(&self) -> UrResult<bool> {
        self.state().await?.safety_status_bit(SafetyStatusBits::IsProtectiveStopped)
    }

    pub async fn is_emergency_stopped(&self) -> UrResult<bool> {
        self.state().await?.safety_status_bit(SafetyStatusBits::IsEmergencyStopped)
    }

    pub async fn is_steady(&self) -> UrResult<bool> {
        let speed = self.get_actual_tcp_speed().await?;
        Ok(is_steady(&speed))
    }

    pub async fn disconnect(&self) -> UrResult<()> {
        self.stop_receive_thread.notify_one();
        if let Some(handle) = self.receive_thread.lock().await.take() {
            handle.await.ok();
        }
        self.rtde.lock().await.disconnect(true).await
    }
}

pub(crate) fn is_steady(speed: &Twist) -> bool {
    let norm = |v: &[f64; 3]| v.iter().map(|x| x * x).sum::<f64>().sqrt();
    norm(&speed.linear) < STEADY_SPEED_TOLERANCE && norm(&speed.angular) < STEADY_SPEED_TOLERANCE
}

impl Drop for RTDEReceive {
    fn drop(&mut self) {
        if let Some(handle) = self.receive_thread.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::robot_state::OUTPUT_FIELD_TYPES;
    use crate::rtde::read_package;
    use crate::utils::{pack_rtde_package, pack_vector_n_double};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    /// Body of a data package for `DEFAULT_OUTPUT_FIELDS`, recipe id included.
    pub(crate) fn fields_body(
        pose: [f64; 6],
        tcp_speed: [f64; 6],
        runtime_state: u32,
        safety_bits: u32,
    ) -> Vec<u8> {
        let mut body = vec![1u8];
        body.extend(pack_vector_n_double(&[1.0])); // timestamp
        body.extend(pack_vector_n_double(&[0.0; 6])); // actual_q
        body.extend(pack_vector_n_double(&[0.0; 6])); // actual_qd
        body.extend(pack_vector_n_double(&pose));
        body.extend(pack_vector_n_double(&tcp_speed));
        body.extend(pack_vector_n_double(&[0.0, 0.0, -4.0, 0.0, 0.0, 0.0]));
        body.extend(7i32.to_be_bytes()); // robot_mode
        body.extend(1i32.to_be_bytes()); // safety_mode
        body.extend(runtime_state.to_be_bytes());
        body.extend(0u32.to_be_bytes()); // robot_status_bits
        body.extend(safety_bits.to_be_bytes());
        body.extend(pack_vector_n_double(&[1.0])); // speed_scaling
        body
    }

    fn text_message(message: &str, source: &str, level: u8) -> Vec<u8> {
        let mut payload = vec![message.len() as u8];
        payload.extend(message.as_bytes());
        payload.push(source.len() as u8);
        payload.extend(source.as_bytes());
        payload.push(level);
        payload
    }

    /// Minimal RTDE server: answers the setup handshake, then streams `body` every 8 ms.
    pub(crate) async fn spawn_fake_rtde(pose: [f64; 6]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            loop {
                let (cmd, payload) = read_package(&mut sock).await.unwrap();
                let reply = match cmd {
                    b'V' => vec![1u8],
                    b'v' => [5u32, 11, 0, 0].iter().flat_map(|v| v.to_be_bytes()).collect(),
                    b'O' => {
                        let names = String::from_utf8(payload[8..].to_vec()).unwrap();
                        let types: Vec<&str> = names
                            .split(',')
                            .map(|n| {
                                OUTPUT_FIELD_TYPES.get(n).map(|t| t.name()).unwrap_or("NOT_FOUND")
                            })
                            .collect();
                        let mut reply = vec![1u8];
                        reply.extend(types.join(",").as_bytes());
                        reply
                    }
                    b'S' => vec![1u8],
                    other => panic!("unexpected command {}", other),
                };
                sock.write_all(&pack_rtde_package(cmd, &reply).unwrap()).await.unwrap();
                if cmd == b'S' {
                    break;
                }
            }

            let msg = text_message("hello", "fake", 3);
            sock.write_all(&pack_rtde_package(b'M', &msg).unwrap()).await.unwrap();
            let data = pack_rtde_package(b'U', &fields_body(pose, [0.0; 6], 2, 1)).unwrap();
            while sock.write_all(&data).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(8)).await;
            }
        });

        port
    }

    #[tokio::test]
    async fn receives_pose_from_stream() {
        let port = spawn_fake_rtde([0.3, -0.1, 0.2, 0.0, 3.14, 0.0]).await;
        let receive =
            RTDEReceive::connect("127.0.0.1", port, DEFAULT_FREQUENCY, DEFAULT_OUTPUT_FIELDS)
                .await
                .unwrap();

        let pose = receive.get_actual_tcp_pose().await.unwrap();
        assert_eq!(pose, Pose::new(0.3, -0.1, 0.2, 0.0, 3.14, 0.0));
        assert_eq!(receive.get_actual_tcp_force().await.unwrap().force[2], -4.0);
        assert_eq!(receive.get_runtime_state().await.unwrap(), RuntimeState::Playing);
        assert_eq!(receive.get_robot_mode().await.unwrap(), RobotMode::Running);
        assert!(!receive.is_protective_stopped().await.unwrap());
        assert!(receive.is_steady().await.unwrap());

        receive.disconnect().await.unwrap();
        assert!(!receive.is_connected());
        assert!(receive.get_actual_tcp_pose().await.is_err());
    }

    #[tokio::test]
    async fn connection_refused_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = RTDEReceive::connect("127.0.0.1", port, DEFAULT_FREQUENCY, DEFAULT_OUTPUT_FIELDS)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, UrError::Connection(_)));
    }

    #[test]
    fn steady_threshold() {
        assert!(is_steady(&Twist::zero()));
        assert!(!is_steady(&Twist::from_array([0.0, 0.01, 0.0, 0.0, 0.0, 0.0])));
    }
}
