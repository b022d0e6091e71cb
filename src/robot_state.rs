// Shared Robot State

use log::debug;
use num_enum::TryFromPrimitive;
use phf::phf_map;
use std::collections::HashMap;

use crate::error::{UrError, UrResult};
use crate::utils::{
    get_bool, get_double, get_i32, get_u32, get_u64, get_u8, unpack_vector3d, unpack_vector6_i32,
    unpack_vector6_u32, unpack_vector6d,
};

/// Wire types of the RTDE output variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtdeType {
    Vector6D,
    Vector3D,
    Vector6Int32,
    Vector6Uint32,
    Double,
    Uint64,
    Uint32,
    Int32,
    Bool,
    Uint8,
}

impl RtdeType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "VECTOR6D" => Some(Self::Vector6D),
            "VECTOR3D" => Some(Self::Vector3D),
            "VECTOR6INT32" => Some(Self::Vector6Int32),
            "VECTOR6UINT32" => Some(Self::Vector6Uint32),
            "DOUBLE" => Some(Self::Double),
            "UINT64" => Some(Self::Uint64),
            "UINT32" => Some(Self::Uint32),
            "INT32" => Some(Self::Int32),
            "BOOL" => Some(Self::Bool),
            "UINT8" => Some(Self::Uint8),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Vector6D => "VECTOR6D",
            Self::Vector3D => "VECTOR3D",
            Self::Vector6Int32 => "VECTOR6INT32",
            Self::Vector6Uint32 => "VECTOR6UINT32",
            Self::Double => "DOUBLE",
            Self::Uint64 => "UINT64",
            Self::Uint32 => "UINT32",
            Self::Int32 => "INT32",
            Self::Bool => "BOOL",
            Self::Uint8 => "UINT8",
        }
    }

    fn decode(self, data: &[u8], offset: &mut usize) -> UrResult<StateDataTypes> {
        Ok(match self {
            Self::Vector6D => StateDataTypes::VectorDouble(unpack_vector6d(data, offset)?),
            Self::Vector3D => StateDataTypes::VectorDouble(unpack_vector3d(data, offset)?),
            Self::Vector6Int32 => StateDataTypes::VectorInt(unpack_vector6_i32(data, offset)?),
            Self::Vector6Uint32 => StateDataTypes::VectorUint(unpack_vector6_u32(data, offset)?),
            Self::Double => StateDataTypes::Double(get_double(data, offset)?),
            Self::Uint64 => StateDataTypes::Uint64(get_u64(data, offset)?),
            Self::Uint32 => StateDataTypes::Uint32(get_u32(data, offset)?),
            Self::Int32 => StateDataTypes::Int32(get_i32(data, offset)?),
            Self::Bool => StateDataTypes::Boolean(get_bool(data, offset)?),
            Self::Uint8 => StateDataTypes::Uint8(get_u8(data, offset)?),
        })
    }
}

// State data types to store in RobotState.
#[derive(Debug, Clone, PartialEq)]
pub enum StateDataTypes {
    VectorDouble(Vec<f64>),
    VectorInt(Vec<i32>),
    VectorUint(Vec<u32>),
    Boolean(bool),
    Uint8(u8),
    Uint32(u32),
    Double(f64),
    Uint64(u64),
    Int32(i32),
}

impl StateDataTypes {
    pub fn as_vec_double(&self) -> Option<&[f64]> {
        match self {
            StateDataTypes::VectorDouble(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StateDataTypes::Boolean(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_uint32(&self) -> Option<u32> {
        match self {
            StateDataTypes::Uint32(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            StateDataTypes::Double(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_int32(&self) -> Option<i32> {
        match self {
            StateDataTypes::Int32(x) => Some(*x),
            _ => None,
        }
    }
}

/// Output variables this crate knows how to subscribe to.
pub static OUTPUT_FIELD_TYPES: phf::Map<&'static str, RtdeType> = phf_map! {
    "timestamp" => RtdeType::Double,
    "target_q" => RtdeType::Vector6D,
    "actual_q" => RtdeType::Vector6D,
    "actual_qd" => RtdeType::Vector6D,
    "actual_current" => RtdeType::Vector6D,
    "actual_TCP_pose" => RtdeType::Vector6D,
    "actual_TCP_speed" => RtdeType::Vector6D,
    "actual_TCP_force" => RtdeType::Vector6D,
    "target_TCP_pose" => RtdeType::Vector6D,
    "target_TCP_speed" => RtdeType::Vector6D,
    "joint_temperatures" => RtdeType::Vector6D,
    "ft_raw_wrench" => RtdeType::Vector6D,
    "actual_tool_accelerometer" => RtdeType::Vector3D,
    "payload_cog" => RtdeType::Vector3D,
    "joint_mode" => RtdeType::Vector6Int32,
    "actual_digital_input_bits" => RtdeType::Uint64,
    "actual_digital_output_bits" => RtdeType::Uint64,
    "robot_mode" => RtdeType::Int32,
    "safety_mode" => RtdeType::Int32,
    "runtime_state" => RtdeType::Uint32,
    "robot_status_bits" => RtdeType::Uint32,
    "safety_status_bits" => RtdeType::Uint32,
    "speed_scaling" => RtdeType::Double,
    "target_speed_fraction" => RtdeType::Double,
    "payload" => RtdeType::Double,
    "output_int_register_0" => RtdeType::Int32,
    "output_double_register_0" => RtdeType::Double,
    "output_bit_register_64" => RtdeType::Bool,
    "tool_output_voltage" => RtdeType::Int32,
};

/// Output recipe used by the receive interface.
pub const DEFAULT_OUTPUT_FIELDS: &[&str] = &[
    "timestamp",
    "actual_q",
    "actual_qd",
    "actual_TCP_pose",
    "actual_TCP_speed",
    "actual_TCP_force",
    "robot_mode",
    "safety_mode",
    "runtime_state",
    "robot_status_bits",
    "safety_status_bits",
    "speed_scaling",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum RuntimeState {
    Stopping = 0,
    Stopped = 1,
    Playing = 2,
    Pausing = 3,
    Paused = 4,
    Resuming = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(i32)]
pub enum RobotMode {
    NoController = -1,
    Disconnected = 0,
    ConfirmSafety = 1,
    Booting = 2,
    PowerOff = 3,
    PowerOn = 4,
    Idle = 5,
    Backdrive = 6,
    Running = 7,
    UpdatingFirmware = 8,
}

/// Bit positions inside `safety_status_bits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SafetyStatusBits {
    IsNormalMode = 0,
    IsReducedMode = 1,
    IsProtectiveStopped = 2,
    IsRecoveryMode = 3,
    IsSafeguardStopped = 4,
    IsSystemEmergencyStopped = 5,
    IsRobotEmergencyStopped = 6,
    IsEmergencyStopped = 7,
    IsViolation = 8,
    IsFault = 9,
    IsStoppedDueToSafety = 10,
}

#[derive(Debug)]
pub struct RobotState {
    recipe: Vec<(String, RtdeType)>,
    state_data: HashMap<String, StateDataTypes>,
    first_state_received: bool,
}

impl RobotState {
    pub fn new(fields: &[&str]) -> UrResult<Self> {
        let recipe = fields
            .iter()
            .map(|field| {
                OUTPUT_FIELD_TYPES
                    .get(*field)
                    .map(|t| (field.to_string(), *t))
                    .ok_or_else(|| UrError::State(format!("Unknown output field: {}", field)))
            })
            .collect::<UrResult<Vec<_>>>()?;

        Ok(Self { recipe, state_data: HashMap::new(), first_state_received: false })
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.recipe.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Checks the types the controller reported for the output setup against the recipe.
    pub fn verify_output_types(&self, types: &[&str]) -> UrResult<()> {
        if types.len() != self.recipe.len() {
            return Err(UrError::Protocol(format!(
                "Controller returned {} output types for {} fields",
                types.len(),
                self.recipe.len()
            )));
        }
        for ((name, expected), reported) in self.recipe.iter().zip(types) {
            if *reported == "NOT_FOUND" {
                return Err(UrError::Protocol(format!("Output field not found: {}", name)));
            }
            if RtdeType::from_name(reported) != Some(*expected) {
                return Err(UrError::Protocol(format!(
                    "Output field {} has type {}, expected {}",
                    name,
                    reported,
                    expected.name()
                )));
            }
        }
        Ok(())
    }

    /// Applies one data package body (the bytes after the recipe id).
    pub fn update_from_package(&mut self, data: &[u8]) -> UrResult<()> {
        let mut offset = 0;
        let mut values = Vec::with_capacity(self.recipe.len());
        for (name, rtde_type) in &self.recipe {
            values.push((name.clone(), rtde_type.decode(data, &mut offset)?));
        }
        if offset != data.len() {
            debug!("Ignoring {} trailing bytes in data package", data.len() - offset);
        }
        self.state_data.extend(values);
        self.first_state_received = true;
        Ok(())
    }

    pub fn first_state_received(&self) -> bool {
        self.first_state_received
    }

    pub fn get_state_data(&self, name: &str) -> UrResult<&StateDataTypes> {
        self.state_data
            .get(name)
            .ok_or_else(|| UrError::NoDataAvailable(format!("State data not found: {}", name)))
    }

    fn typed<T>(&self, name: &str, f: impl Fn(&StateDataTypes) -> Option<T>) -> UrResult<T> {
        let value = self.get_state_data(name)?;
        f(value).ok_or_else(|| UrError::State(format!("Unexpected type for {}: {:?}", name, value)))
    }

    pub fn vector6(&self, name: &str) -> UrResult<[f64; 6]> {
        let values = self.typed(name, |v| v.as_vec_double().map(|s| s.to_vec()))?;
        <[f64; 6]>::try_from(values.as_slice())
            .map_err(|_| UrError::State(format!("{} is not a 6-vector", name)))
    }

    pub fn double(&self, name: &str) -> UrResult<f64> {
        self.typed(name, StateDataTypes::as_double)
    }

    pub fn runtime_state(&self) -> UrResult<RuntimeState> {
        let raw = self.typed("runtime_state", StateDataTypes::as_uint32)?;
        RuntimeState::try_from(raw)
            .map_err(|_| UrError::State(format!("Unknown runtime state: {}", raw)))
    }

    pub fn robot_mode(&self) -> UrResult<RobotMode> {
        let raw = self.typed("robot_mode", StateDataTypes::as_int32)?;
        RobotMode::try_from(raw).map_err(|_| UrError::State(format!("Unknown robot mode: {}", raw)))
    }

    pub fn safety_status_bit(&self, bit: SafetyStatusBits) -> UrResult<bool> {
        let bits = self.typed("safety_status_bits", StateDataTypes::as_uint32)?;
        Ok(bits & (1 << bit as u32) != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::pack_vector_n_double;

    #[test]
    fn unknown_field_is_rejected() {
        let err = RobotState::new(&["actual_TCP_pose", "no_such_field"]).unwrap_err();
        assert!(matches!(err, UrError::State(_)));
    }

    #[test]
    fn decodes_package_in_recipe_order() {
        let fields = ["actual_TCP_pose", "runtime_state", "safety_status_bits", "robot_mode"];
        let mut state = RobotState::new(&fields).unwrap();
        assert!(!state.first_state_received());

        let mut body = pack_vector_n_double(&[0.3, 0.1, 0.2, 0.0, 3.14, 0.0]);
        body.extend_from_slice(&2u32.to_be_bytes());
        body.extend_from_slice(&(1u32 << 2).to_be_bytes());
        body.extend_from_slice(&7i32.to_be_bytes());
        state.update_from_package(&body).unwrap();

        assert!(state.first_state_received());
        assert_eq!(state.vector6("actual_TCP_pose").unwrap()[4], 3.14);
        assert_eq!(state.runtime_state().unwrap(), RuntimeState::Playing);
        assert_eq!(state.robot_mode().unwrap(), RobotMode::Running);
        assert!(state.safety_status_bit(SafetyStatusBits::IsProtectiveStopped).unwrap());
        assert!(!state.safety_status_bit(SafetyStatusBits::IsEmergencyStopped).unwrap());
    }

    #[test]
    fn truncated_package_keeps_previous_state() {
        let mut state = RobotState::new(&["timestamp", "actual_TCP_pose"]).unwrap();
        let mut body = 1.5f64.to_be_bytes().to_vec();
        body.extend(pack_vector_n_double(&[0.0; 6]));
        state.update_from_package(&body).unwrap();

        let short = 2.5f64.to_be_bytes().to_vec();
        assert!(state.update_from_package(&short).is_err());
        assert_eq!(state.double("timestamp").unwrap(), 1.5);
    }

    #[test]
    fn output_type_check_reports_missing_fields() {
        let state = RobotState::new(&["actual_TCP_pose", "runtime_state"]).unwrap();
        assert!(state.verify_output_types(&["VECTOR6D", "UINT32"]).is_ok());
        assert!(state.verify_output_types(&["VECTOR6D", "NOT_FOUND"]).is_err());
        assert!(state.verify_output_types(&["VECTOR6D", "INT32"]).is_err());
        assert!(state.verify_output_types(&["VECTOR6D"]).is_err());
    }
}
