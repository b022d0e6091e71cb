//! Lab settings loaded from a TOML file. Every section and field is optional.

use crate::error::{UrError, UrResult};
use crate::gripper::GRIPPER_PORT;
use crate::insertion::{SpiralInsertion, SpiralMontage};
use crate::jog::JogParams;
use crate::rfid::DEFAULT_BAUD_RATE;
use crate::rtde_receive::DEFAULT_FREQUENCY;
use crate::transform::{CameraExtrinsics, CameraIntrinsics};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub host: String,
    /// RTDE output frequency, Hz.
    pub frequency: f64,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self { host: "192.168.0.3".to_string(), frequency: DEFAULT_FREQUENCY }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub intrinsics: CameraIntrinsics,
    pub extrinsics: CameraExtrinsics,
    /// Height above the detected object the tool approaches to, m.
    pub approach_offset: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            intrinsics: CameraIntrinsics::default(),
            extrinsics: CameraExtrinsics::default(),
            approach_offset: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GripperConfig {
    pub port: u16,
    pub speed: i32,
    pub force: i32,
}

impl Default for GripperConfig {
    fn default() -> Self {
        Self { port: GRIPPER_PORT, speed: 255, force: 255 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RfidConfig {
    pub port: String,
    pub baud_rate: u32,
}

impl Default for RfidConfig {
    fn default() -> Self {
        Self { port: "/dev/ttyUSB0".to_string(), baud_rate: DEFAULT_BAUD_RATE }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    pub robot: RobotConfig,
    pub jog: JogParams,
    pub camera: CameraConfig,
    pub insertion: SpiralInsertion,
    pub montage: SpiralMontage,
    pub gripper: GripperConfig,
    pub rfid: RfidConfig,
}

impl LabConfig {
    pub fn from_toml_str(text: &str) -> UrResult<Self> {
        let mut config: LabConfig =
            toml::from_str(text).map_err(|e| UrError::Config(e.to_string()))?;
        config.jog = config.jog.clamped();
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> UrResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| UrError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> UrResult<String> {
        toml::to_string_pretty(self).map_err(|e| UrError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = LabConfig::from_toml_str("").unwrap();
        assert_eq!(config, LabConfig::default());
        assert_eq!(config.robot.frequency, 125.0);
        assert_eq!(config.insertion.force_z, -20.0);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = LabConfig::from_toml_str(
            r#"
            [robot]
            host = "10.0.0.7"

            [jog]
            linear_speed = 3.0

            [camera.extrinsics]
            translation = [0.4, 0.1, 0.5]
            "#,
        )
        .unwrap();
        assert_eq!(config.robot.host, "10.0.0.7");
        assert_eq!(config.robot.frequency, 125.0);
        assert_eq!(config.jog.linear_speed, 0.5);
        assert_eq!(config.jog.gain, 300.0);
        assert_eq!(config.camera.extrinsics.translation, [0.4, 0.1, 0.5]);
        assert_eq!(config.camera.extrinsics.roll_deg, 180.0);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        assert!(matches!(LabConfig::from_toml_str("[robot\n"), Err(UrError::Config(_))));
        assert!(matches!(
            LabConfig::from_toml_str("[robot]\nfrequency = \"fast\""),
            Err(UrError::Config(_))
        ));
    }

    #[test]
    fn written_file_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lab.toml");
        let mut config = LabConfig::default();
        config.rfid.port = "/dev/ttyACM0".to_string();
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
        assert_eq!(LabConfig::load(&path).unwrap(), config);
        assert!(LabConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
