/* RTDE Protocol (output stream only) */

use crate::error::{UrError, UrResult};
use crate::robot_state::RobotState;
use crate::utils::{
    get_u32, get_u8, pack_double, pack_rtde_package, read_rtde_header, RTDE_HEADER_SIZE,
};
use log::{debug, error, info, warn};
use num_enum::TryFromPrimitive;
use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

pub const RTDE_PROTOCOL_VERSION: u16 = 2;
pub const RTDE_PORT: u16 = 30004;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum RTDECommand {
    RequestProtocolVersion = 86,
    GetUrcontrolVersion = 118,
    TextMessage = 77,
    DataPackage = 85,
    ControlPackageSetupOutputs = 79,
    ControlPackageSetupInputs = 73,
    ControlPackageStart = 83,
    ControlPackagePause = 80,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Started,
}

/// Software version reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerVersion {
    pub major: u32,
    pub minor: u32,
    pub bugfix: u32,
    pub build: u32,
}

/// Reads one complete package and returns its command byte and payload.
pub async fn read_package<R: AsyncRead + Unpin>(reader: &mut R) -> UrResult<(u8, Vec<u8>)> {
    let mut header = [0u8; RTDE_HEADER_SIZE];
    reader.read_exact(&mut header).await?;
    let header = read_rtde_header(&header)?;

    let size = header.msg_size as usize;
    if size < RTDE_HEADER_SIZE {
        return Err(UrError::Protocol(format!("Invalid package size: {}", size)));
    }
    let mut payload = vec![0u8; size - RTDE_HEADER_SIZE];
    reader.read_exact(&mut payload).await?;
    Ok((header.msg_cmd, payload))
}

fn read_prefixed_string(data: &[u8], offset: &mut usize) -> UrResult<String> {
    let len = get_u8(data, offset)? as usize;
    let bytes = data
        .get(*offset..*offset + len)
        .ok_or_else(|| UrError::Protocol("Text message truncated".to_string()))?;
    *offset += len;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// Logs a controller text message at the level it was sent with.
pub fn log_text_message(payload: &[u8]) -> UrResult<()> {
    let mut offset = 0;
    let message = read_prefixed_string(payload, &mut offset)?;
    let source = read_prefixed_string(payload, &mut offset)?;
    let level = get_u8(payload, &mut offset)?;
    match level {
        0 | 1 => error!("{}: {}", source, message),
        2 => warn!("{}: {}", source, message),
        _ => info!("{}: {}", source, message),
    }
    Ok(())
}

pub struct RTDE {
    hostname: String,
    port: u16,
    conn_state: ConnectionState,
    stream: Option<TcpStream>,
    writer: Option<OwnedWriteHalf>,
    output_recipe_id: Option<u8>,
}

impl RTDE {
    pub fn new(hostname: &str) -> Self {
        Self::with_port(hostname, RTDE_PORT)
    }

    pub fn with_port(hostname: &str, port: u16) -> Self {
        Self {
            hostname: hostname.to_string(),
            port,
            conn_state: ConnectionState::Disconnected,
            stream: None,
            writer: None,
            output_recipe_id: None,
        }
    }

    pub async fn connect(&mut self) -> UrResult<()> {
        let stream = TcpStream::connect((self.hostname.as_str(), self.port)).await.map_err(|e| {
            UrError::Connection(format!("RTDE {}:{}: {}", self.hostname, self.port, e))
        })?;
        stream.set_nodelay(true)?;
        SockRef::from(&stream).set_keepalive(true)?;

        self.stream = Some(stream);
        self.conn_state = ConnectionState::Connected;
        debug!("Connected to RTDE interface at {}:{}", self.hostname, self.port);
        Ok(())
    }

    pub async fn disconnect(&mut self, send_pause: bool) -> UrResult<()> {
        if send_pause && self.conn_state == ConnectionState::Started {
            // The reply arrives on the read half owned by the receive task, it is not awaited.
            if let Err(e) = self.send_all(RTDECommand::ControlPackagePause, &[]).await {
                warn!("Failed to send RTDE pause: {}", e);
            }
        }

        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await.ok();
        }
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await.ok();
        }

        self.conn_state = ConnectionState::Disconnected;
        debug!("Disconnected from RTDE interface");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.conn_state != ConnectionState::Disconnected
    }

    pub fn is_started(&self) -> bool {
        self.conn_state == ConnectionState::Started
    }

    async fn send_all(&mut self, command: RTDECommand, payload: &[u8]) -> UrResult<()> {
        let package = pack_rtde_package(command as u8, payload)?;
        if let Some(stream) = self.stream.as_mut() {
            stream.write_all(&package).await?;
        } else if let Some(writer) = self.writer.as_mut() {
            writer.write_all(&package).await?;
        } else {
            return Err(UrError::Connection("RTDE stream is not connected".to_string()));
        }
        Ok(())
    }

    /// Waits for the reply to `expected`, logging any text messages that arrive first.
    async fn receive_reply(&mut self, expected: RTDECommand) -> UrResult<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            UrError::Connection("RTDE stream is not connected or already started".to_string())
        })?;

        loop {
            let (cmd, payload) = read_package(stream).await?;
            match RTDECommand::try_from(cmd) {
                Ok(c) if c == expected => return Ok(payload),
                Ok(RTDECommand::TextMessage) => log_text_message(&payload)?,
                Ok(RTDECommand::DataPackage) => debug!("Skipping data package during setup"),
                _ => {
                    return Err(UrError::Protocol(format!(
                        "Expected reply {:?}, got command {}",
                        expected, cmd
                    )))
                }
            }
        }
    }

    pub async fn negotiate_protocol_version(&mut self) -> UrResult<()> {
        self.send_all(RTDECommand::RequestProtocolVersion, &RTDE_PROTOCOL_VERSION.to_be_bytes())
            .await?;
        debug!("Done sending RTDE_REQUEST_PROTOCOL_VERSION");
        let reply = self.receive_reply(RTDECommand::RequestProtocolVersion).await?;
        if get_u8(&reply, &mut 0)? != 1 {
            return Err(UrError::Protocol(format!(
                "Controller refused RTDE protocol version {}",
                RTDE_PROTOCOL_VERSION
            )));
        }
        Ok(())
    }

    pub async fn get_controller_version(&mut self) -> UrResult<ControllerVersion> {
        self.send_all(RTDECommand::GetUrcontrolVersion, &[]).await?;
        let reply = self.receive_reply(RTDECommand::GetUrcontrolVersion).await?;
        let mut offset = 0;
        Ok(ControllerVersion {
            major: get_u32(&reply, &mut offset)?,
            minor: get_u32(&reply, &mut offset)?,
            bugfix: get_u32(&reply, &mut offset)?,
            build: get_u32(&reply, &mut offset)?,
        })
    }

    /// Sets up the output recipe and checks the reported types against `robot_state`.
    pub async fn send_output_setup(
        &mut self,
        robot_state: &RobotState,
        frequency: f64,
    ) -> UrResult<u8> {
        let mut payload = pack_double(frequency).to_vec();
        payload.extend_from_slice(robot_state.field_names().join(",").as_bytes());
        self.send_all(RTDECommand::ControlPackageSetupOutputs, &payload).await?;
        debug!("Done sending RTDE_CONTROL_PACKAGE_SETUP_OUTPUTS");

        let reply = self.receive_reply(RTDECommand::ControlPackageSetupOutputs).await?;
        let recipe_id = get_u8(&reply, &mut 0)?;
        let types = String::from_utf8_lossy(&reply[1..]).into_owned();
        let types: Vec<&str> = types.split(',').collect();
        robot_state.verify_output_types(&types)?;

        self.output_recipe_id = Some(recipe_id);
        Ok(recipe_id)
    }

    /// Starts the data stream and hands the read half over to the caller.
    pub async fn send_start(&mut self) -> UrResult<RTDEReader> {
        let recipe_id = self.output_recipe_id.ok_or_else(|| {
            UrError::State("Output recipe must be set up before start".to_string())
        })?;

        self.send_all(RTDECommand::ControlPackageStart, &[]).await?;
        debug!("Done sending RTDE_CONTROL_PACKAGE_START");
        let reply = self.receive_reply(RTDECommand::ControlPackageStart).await?;
        if get_u8(&reply, &mut 0)? != 1 {
            return Err(UrError::Protocol("Controller refused to start data stream".to_string()));
        }

        let stream = self
            .stream
            .take()
            .ok_or_else(|| UrError::Connection("RTDE stream is not connected".to_string()))?;
        let (reader, writer) = stream.into_split();
        self.writer = Some(writer);
        self.conn_state = ConnectionState::Started;
        Ok(RTDEReader { reader, recipe_id })
    }
}

/// Read half of a started RTDE connection.
pub struct RTDEReader {
    reader: OwnedReadHalf,
    recipe_id: u8,
}

impl RTDEReader {
    /// Receives one package. Returns true if it was a data package applied to `robot_state`.
    pub async fn receive_data(&mut self, robot_state: &Mutex<RobotState>) -> UrResult<bool> {
        let (cmd, payload) = read_package(&mut self.reader).await?;
        match RTDECommand::try_from(cmd) {
            Ok(RTDECommand::DataPackage) => {
                let recipe_id = get_u8(&payload, &mut 0)?;
                if recipe_id != self.recipe_id {
                    return Err(UrError::Protocol(format!(
                        "Data package for recipe {}, expected {}",
                        recipe_id, self.recipe_id
                    )));
                }
                robot_state.lock().await.update_from_package(&payload[1..])?;
                Ok(true)
            }
            Ok(RTDECommand::TextMessage) => {
                log_text_message(&payload)?;
                Ok(false)
            }
            _ => {
                debug!("Ignoring RTDE package with command {}", cmd);
                Ok(false)
            }
        }
    }
}
