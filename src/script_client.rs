use crate::error::{UrError, UrResult};
use log::{debug, error};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

pub const SCRIPT_PORT: u16 = 30003;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ScriptInjectItem {
    search_string: String,
    inject_string: String,
}

/// Sends URScript programs to the controller's script interface.
pub struct ScriptClient {
    hostname: String,
    port: u16,
    conn_state: ConnectionState,
    stream: Option<TcpStream>,
    script_injections: Vec<ScriptInjectItem>,
}

impl ScriptClient {
    pub fn new(hostname: &str) -> Self {
        Self::with_port(hostname, SCRIPT_PORT)
    }

    pub fn with_port(hostname: &str, port: u16) -> Self {
        Self {
            hostname: hostname.to_string(),
            port,
            conn_state: ConnectionState::Disconnected,
            stream: None,
            script_injections: Vec::new(),
        }
    }

    pub async fn connect(&mut self) -> UrResult<()> {
        let stream = TcpStream::connect((self.hostname.as_str(), self.port)).await.map_err(|e| {
            UrError::Connection(format!("Script interface {}:{}: {}", self.hostname, self.port, e))
        })?;
        stream.set_nodelay(true)?;

        self.stream = Some(stream);
        self.conn_state = ConnectionState::Connected;

        debug!("Connected to script interface at {}:{}", self.hostname, self.port);
        Ok(())
    }

    pub async fn disconnect(&mut self) -> UrResult<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        self.conn_state = ConnectionState::Disconnected;
        debug!("Disconnected from script interface");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.conn_state == ConnectionState::Connected
    }

    /// Sends a complete program (`def ...: ... end`). It replaces whatever program is running.
    pub async fn send_script(&mut self, script: &str) -> UrResult<()> {
        let mut ur_script = script.to_string();
        self.scan_and_inject_additional_script_code(&mut ur_script);
        if !ur_script.ends_with('\n') {
            ur_script.push('\n');
        }

        let stream = match self.stream.as_mut() {
            Some(stream) if self.conn_state == ConnectionState::Connected => stream,
            _ => {
                return Err(UrError::ScriptClient(
                    "Failed to send script: not connected".to_string(),
                ))
            }
        };

        debug!("Sending script:\n{}", ur_script);
        if let Err(e) = stream.write_all(ur_script.as_bytes()).await {
            self.conn_state = ConnectionState::Disconnected;
            return Err(UrError::ScriptClient(format!("Failed to send script: {}", e)));
        }
        Ok(())
    }

    /// Sends a single top-level command such as `stopl(2.0)`.
    pub async fn send_script_command(&mut self, cmd_str: &str) -> UrResult<()> {
        let line = format!("{}\n", cmd_str.trim_end());
        self.send_script(&line).await
    }

    pub fn set_script_injection(&mut self, search_string: &str, inject_string: &str) {
        if let Some(item) =
            self.script_injections.iter_mut().find(|item| item.search_string == search_string)
        {
            item.inject_string = inject_string.to_string();
        } else {
            self.script_injections.push(ScriptInjectItem {
                search_string: search_string.to_string(),
                inject_string: inject_string.to_string(),
            });
        }
    }

    fn scan_and_inject_additional_script_code(&self, ur_script: &mut String) {
        for item in self.script_injections.iter() {
            match ur_script.find(&item.search_string) {
                Some(n) => {
                    ur_script.insert_str(n + item.search_string.len(), item.inject_string.as_str())
                }
                None => error!("script_injection [{}] not found in script", item.search_string),
            }
        }
    }
}
