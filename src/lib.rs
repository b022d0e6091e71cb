pub mod config;
pub mod dashboard;
pub mod error;
pub mod gripper;
pub mod insertion;
pub mod jog;
pub mod rfid;
pub mod robot;
pub mod robot_state;
pub mod rtde;
pub mod rtde_control;
pub mod rtde_receive;
pub mod script_client;
pub mod teach;
pub mod transform;
pub mod types;
pub mod ur_script;
mod utils;

pub use config::LabConfig;
pub use error::{UrError, UrResult};
pub use jog::{JogController, JogParams};
pub use robot::{Robot, UrRobot};
pub use types::{Axis, Direction, Pose, Twist, Wrench};

pub use log;

pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }

    env_logger::builder().try_init().ok();
}
