use crate::error::{UrError, UrResult};
use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

pub const DASHBOARD_PORT: u16 = 29999;

#[derive(Debug, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connected,
}

pub struct DashboardClient {
    hostname: String,
    port: u16,
    conn_state: ConnectionState,
    reader: Option<BufReader<TcpStream>>,
}

impl DashboardClient {
    pub fn new(hostname: &str) -> Self {
        Self::with_port(hostname, DASHBOARD_PORT)
    }

    pub fn with_port(hostname: &str, port: u16) -> Self {
        Self {
            hostname: hostname.to_string(),
            port,
            conn_state: ConnectionState::Disconnected,
            reader: None,
        }
    }

    pub async fn connect(&mut self) -> UrResult<()> {
        let stream = TcpStream::connect((self.hostname.as_str(), self.port)).await.map_err(|e| {
            UrError::Connection(format!("Dashboard {}:{}: {}", self.hostname, self.port, e))
        })?;
        stream.set_nodelay(true)?;

        self.conn_state = ConnectionState::Connected;
        self.reader = Some(BufReader::new(stream));

        let intro_msg = self.receive().await?;
        debug!("Intro msg {:?}", intro_msg);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.conn_state == ConnectionState::Connected
    }

    pub async fn disconnect(&mut self) -> UrResult<()> {
        if let Some(reader) = self.reader.take() {
            let mut stream = reader.into_inner();
            stream.shutdown().await?;
        }
        self.conn_state = ConnectionState::Disconnected;
        Ok(())
    }

    pub async fn send(&mut self, command: &str) -> UrResult<()> {
        if let Some(reader) = &mut self.reader {
            let stream = reader.get_mut();
            stream.write_all(format!("{}\n", command).as_bytes()).await?;
            return Ok(());
        }
        Err(UrError::Connection("Dashboard stream is not connected".into()))
    }

    /// Reads one reply line without its line terminator.
    pub async fn receive(&mut self) -> UrResult<String> {
        if let Some(reader) = &mut self.reader {
            let mut buffer = Vec::new();
            let n = reader.read_until(b'\n', &mut buffer).await?;
            if n == 0 {
                self.conn_state = ConnectionState::Disconnected;
                return Err(UrError::Connection("Dashboard closed the connection".into()));
            }
            return Ok(String::from_utf8_lossy(&buffer).trim_end().to_string());
        }
        Err(UrError::Connection("Dashboard stream is not connected".into()))
    }

    async fn request(&mut self, command: &str) -> UrResult<String> {
        self.send(command).await?;
        let reply = self.receive().await?;
        debug!("dashboard {:?} -> {:?}", command, reply);
        Ok(reply)
    }

    /// Sends `command` and fails unless the reply starts with `expected`.
    async fn request_expect(&mut self, command: &str, expected: &str) -> UrResult<()> {
        let reply = self.request(command).await?;
        if reply.starts_with(expected) {
            Ok(())
        } else {
            Err(UrError::Dashboard(format!("{} failed: {}", command, reply)))
        }
    }

    // Dashboard commands

    pub async fn stop(&mut self) -> UrResult<()> {
        self.request_expect("stop", "Stopped").await
    }

    pub async fn play(&mut self) -> UrResult<()> {
        self.request_expect("play", "Starting program").await
    }

    pub async fn power_on(&mut self) -> UrResult<()> {
        self.request_expect("power on", "Powering on").await
    }

    pub async fn power_off(&mut self) -> UrResult<()> {
        self.request_expect("power off", "Powering off").await
    }

    pub async fn brake_release(&mut self) -> UrResult<()> {
        self.request_expect("brake release", "Brake releasing").await
    }

    pub async fn unlock_protective_stop(&mut self) -> UrResult<()> {
        self.request_expect("unlock protective stop", "Protective stop releasing").await
    }

    pub async fn close_popup(&mut self) -> UrResult<()> {
        self.request_expect("close popup", "closing popup").await
    }

    pub async fn is_in_remote_control(&mut self) -> UrResult<bool> {
        let reply = self.request("is in remote control").await?;
        Ok(reply == "true")
    }

    /// e.g. `RUNNING`, `POWER_OFF`, `IDLE`.
    pub async fn robot_mode(&mut self) -> UrResult<String> {
        let reply = self.request("robotmode").await?;
        Ok(reply.trim_start_matches("Robotmode: ").to_string())
    }

    /// e.g. `NORMAL`, `PROTECTIVE_STOP`.
    pub async fn safety_status(&mut self) -> UrResult<String> {
        let reply = self.request("safetystatus").await?;
        Ok(reply.trim_start_matches("Safetystatus: ").to_string())
    }

    /// e.g. `PLAYING <program>`, `STOPPED <program>`.
    pub async fn program_state(&mut self) -> UrResult<String> {
        self.request("programState").await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Dashboard server answering each request line from `replies`.
    pub(crate) async fn spawn_dashboard(replies: Vec<(&'static str, &'static str)>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let mut sock = BufReader::new(sock);
            sock.get_mut()
                .write_all(b"Connected: Universal Robots Dashboard Server\n")
                .await
                .unwrap();
            let mut line = String::new();
            while sock.read_line(&mut line).await.unwrap() > 0 {
                let request = line.trim_end().to_string();
                let reply = replies
                    .iter()
                    .find(|(req, _)| *req == request)
                    .map(|(_, rep)| *rep)
                    .unwrap_or("could not understand");
                sock.get_mut().write_all(format!("{}\n", reply).as_bytes()).await.unwrap();
                line.clear();
            }
        });
        port
    }

    #[tokio::test]
    async fn parses_replies() {
        let port = spawn_dashboard(vec![
            ("stop", "Stopped"),
            ("is in remote control", "true"),
            ("robotmode", "Robotmode: RUNNING"),
            ("safetystatus", "Safetystatus: NORMAL"),
        ])
        .await;

        let mut db = DashboardClient::with_port("127.0.0.1", port);
        db.connect().await.unwrap();
        assert!(db.is_connected());
        db.stop().await.unwrap();
        assert!(db.is_in_remote_control().await.unwrap());
        assert_eq!(db.robot_mode().await.unwrap(), "RUNNING");
        assert_eq!(db.safety_status().await.unwrap(), "NORMAL");
        db.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn unexpected_reply_is_dashboard_error() {
        let port = spawn_dashboard(vec![("stop", "Failed to execute: stop")]).await;
        let mut db = DashboardClient::with_port("127.0.0.1", port);
        db.connect().await.unwrap();
        let err = db.stop().await.unwrap_err();
        assert!(matches!(err, UrError::Dashboard(_)));
        assert!(matches!(db.play().await.unwrap_err(), UrError::Dashboard(_)));
    }

    #[tokio::test]
    async fn commands_fail_when_not_connected() {
        let mut db = DashboardClient::new("127.0.0.1");
        assert!(matches!(db.stop().await.unwrap_err(), UrError::Connection(_)));
    }
}
