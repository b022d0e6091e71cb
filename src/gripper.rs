/* Robotiq gripper through the URCap socket on the controller */

use crate::error::{UrError, UrResult};
use log::{debug, info};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{Duration, Instant};

pub const GRIPPER_PORT: u16 = 63352;
/// Positions below this count as open.
pub const OPEN_THRESHOLD: u8 = 10;
const ACTIVATION_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// STA value once activation has completed.
const STATUS_ACTIVE: i32 = 3;

pub struct RobotiqGripper {
    hostname: String,
    port: u16,
    reader: Option<BufReader<TcpStream>>,
}

impl RobotiqGripper {
    pub fn new(hostname: &str) -> Self {
        Self::with_port(hostname, GRIPPER_PORT)
    }

    pub fn with_port(hostname: &str, port: u16) -> Self {
        Self { hostname: hostname.to_string(), port, reader: None }
    }

    pub async fn connect(&mut self) -> UrResult<()> {
        let stream = TcpStream::connect((self.hostname.as_str(), self.port)).await.map_err(|e| {
            UrError::Connection(format!("Gripper {}:{}: {}", self.hostname, self.port, e))
        })?;
        stream.set_nodelay(true)?;
        self.reader = Some(BufReader::new(stream));
        debug!("Connected to gripper at {}:{}", self.hostname, self.port);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.reader.is_some()
    }

    pub async fn disconnect(&mut self) -> UrResult<()> {
        if let Some(reader) = self.reader.take() {
            reader.into_inner().shutdown().await?;
        }
        Ok(())
    }

    async fn request(&mut self, command: &str) -> UrResult<String> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| UrError::Connection("Gripper is not connected".to_string()))?;
        reader.get_mut().write_all(format!("{}\n", command).as_bytes()).await?;

        let mut reply = String::new();
        if reader.read_line(&mut reply).await? == 0 {
            self.reader = None;
            return Err(UrError::Connection("Gripper closed the connection".to_string()));
        }
        Ok(reply.trim_end().to_string())
    }

    /// `SET <VAR> <value> ...`, acknowledged with `ack`.
    async fn set(&mut self, vars: &[(&str, i32)]) -> UrResult<()> {
        let assignments: Vec<String> =
            vars.iter().map(|(name, value)| format!("{} {}", name, value)).collect();
        let command = format!("SET {}", assignments.join(" "));
        let reply = self.request(&command).await?;
        if reply == "ack" {
            Ok(())
        } else {
            Err(UrError::Gripper(format!("{} not acknowledged: {}", command, reply)))
        }
    }

    /// `GET <VAR>`, answered with `<VAR> <value>`.
    async fn get(&mut self, var: &str) -> UrResult<i32> {
        let reply = self.request(&format!("GET {}", var)).await?;
        reply
            .strip_prefix(var)
            .and_then(|value| value.trim().parse().ok())
            .ok_or_else(|| UrError::Gripper(format!("Unexpected reply to GET {}: {}", var, reply)))
    }

    /// Resets and activates the gripper, waiting until it reports itself active.
    pub async fn activate(&mut self) -> UrResult<()> {
        self.set(&[("ACT", 0)]).await?;
        self.set(&[("ATR", 0)]).await?;
        self.set(&[("ACT", 1)]).await?;

        let start_time = Instant::now();
        while self.get("STA").await? != STATUS_ACTIVE {
            if start_time.elapsed() >= ACTIVATION_TIMEOUT {
                return Err(UrError::Timeout(format!(
                    "Gripper not active after {:?}",
                    ACTIVATION_TIMEOUT
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        info!("Gripper activated");
        Ok(())
    }

    pub async fn is_active(&mut self) -> UrResult<bool> {
        Ok(self.get("STA").await? == STATUS_ACTIVE)
    }

    /// 0 is fully open, 255 fully closed.
    pub async fn position(&mut self) -> UrResult<u8> {
        let raw = self.get("POS").await?;
        Ok(raw.clamp(0, 255) as u8)
    }

    pub async fn is_open(&mut self) -> UrResult<bool> {
        Ok(self.position().await? < OPEN_THRESHOLD)
    }

    /// Starts a move. Values outside 0..=255 are clamped.
    pub async fn move_to(&mut self, position: i32, speed: i32, force: i32) -> UrResult<()> {
        let clamp = |v: i32| v.clamp(0, 255);
        self.set(&[
            ("POS", clamp(position)),
            ("SPE", clamp(speed)),
            ("FOR", clamp(force)),
            ("GTO", 1),
        ])
        .await
    }

    pub async fn open(&mut self, speed: i32, force: i32) -> UrResult<()> {
        self.move_to(0, speed, force).await
    }

    pub async fn close(&mut self, speed: i32, force: i32) -> UrResult<()> {
        self.move_to(255, speed, force).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    /// URCap socket double. Activation completes on the second status poll.
    async fn spawn_fake_gripper() -> (u16, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let log = Arc::new(Mutex::new(Vec::new()));
        let requests = log.clone();

        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let mut sock = BufReader::new(sock);
            let mut vars: HashMap<String, i32> = HashMap::new();
            let mut status_polls = 0;
            let mut line = String::new();
            while sock.read_line(&mut line).await.unwrap() > 0 {
                let request = line.trim_end().to_string();
                requests.lock().unwrap().push(request.clone());
                let words: Vec<&str> = request.split_whitespace().collect();
                let reply = match words.as_slice() {
                    ["SET", rest @ ..] => {
                        for pair in rest.chunks(2) {
                            vars.insert(pair[0].to_string(), pair[1].parse().unwrap());
                        }
                        "ack".to_string()
                    }
                    ["GET", "STA"] => {
                        status_polls += 1;
                        let active = vars.get("ACT") == Some(&1) && status_polls > 1;
                        format!("STA {}", if active { 3 } else { 1 })
                    }
                    ["GET", var] => format!("{} {}", var, vars.get(*var).copied().unwrap_or(0)),
                    _ => "?".to_string(),
                };
                sock.get_mut().write_all(format!("{}\n", reply).as_bytes()).await.unwrap();
                line.clear();
            }
        });
        (port, log)
    }

    #[tokio::test]
    async fn activation_and_moves() {
        let (port, requests) = spawn_fake_gripper().await;
        let mut gripper = RobotiqGripper::with_port("127.0.0.1", port);
        gripper.connect().await.unwrap();

        gripper.activate().await.unwrap();
        assert!(gripper.is_active().await.unwrap());
        assert!(gripper.is_open().await.unwrap());

        gripper.move_to(300, -5, 100).await.unwrap();
        assert_eq!(gripper.position().await.unwrap(), 255);
        assert!(!gripper.is_open().await.unwrap());

        gripper.open(255, 50).await.unwrap();
        assert_eq!(gripper.position().await.unwrap(), 0);
        gripper.disconnect().await.unwrap();

        let requests = requests.lock().unwrap();
        assert_eq!(requests[..3], ["SET ACT 0", "SET ATR 0", "SET ACT 1"]);
        assert!(requests.contains(&"SET POS 255 SPE 0 FOR 100 GTO 1".to_string()));
    }

    #[tokio::test]
    async fn commands_need_connection() {
        let mut gripper = RobotiqGripper::new("127.0.0.1");
        assert!(matches!(gripper.position().await.unwrap_err(), UrError::Connection(_)));
    }
}
