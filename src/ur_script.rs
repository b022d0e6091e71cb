//! URScript text for the commands sent over the script interface.

use crate::error::{UrError, UrResult};
use crate::types::{Pose, Twist, Wrench};

/// Parameters of a `force_mode(...)` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceModeParams {
    /// Task frame the selection, wrench and limits are expressed in.
    pub task_frame: Pose,
    /// 1 marks a compliant axis, 0 a rigid one.
    pub selection: [u8; 6],
    pub wrench: Wrench,
    /// 1: frame points towards the TCP, 2: frame not transformed, 3: frame projected on the
    /// TCP velocity.
    pub force_type: u8,
    /// Max speed along compliant axes, max deviation along rigid ones.
    pub limits: [f64; 6],
}

impl ForceModeParams {
    /// Compliant in z only, pushing with `fz` in the base frame.
    pub fn push_z(fz: f64, limits: [f64; 6]) -> Self {
        Self {
            task_frame: Pose::default(),
            selection: [0, 0, 1, 0, 0, 0],
            wrench: Wrench::force_z(fz),
            force_type: 2,
            limits,
        }
    }

    pub fn validate(&self) -> UrResult<()> {
        if !(1..=3).contains(&self.force_type) {
            return Err(UrError::InvalidArgument(format!(
                "Force mode type must be 1, 2 or 3, got {}",
                self.force_type
            )));
        }
        if self.selection.iter().any(|s| *s > 1) {
            return Err(UrError::InvalidArgument(format!(
                "Selection vector must contain 0 or 1: {:?}",
                self.selection
            )));
        }
        if self.limits.iter().any(|l| !l.is_finite() || *l <= 0.0) {
            return Err(UrError::InvalidArgument(format!(
                "Force mode limits must be positive: {:?}",
                self.limits
            )));
        }
        check_finite(&self.task_frame.to_array(), "task frame")?;
        check_finite(&self.wrench.to_array(), "wrench")
    }
}

fn check_finite(values: &[f64], what: &str) -> UrResult<()> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(UrError::InvalidArgument(format!("{} contains non-finite values: {:?}", what, values)))
    }
}

fn list(values: &[f64]) -> String {
    let items: Vec<String> = values.iter().map(|v| format!("{}", v)).collect();
    format!("[{}]", items.join(", "))
}

fn pose(p: &Pose) -> String {
    format!("p{}", list(&p.to_array()))
}

pub fn movel(target: &Pose, acceleration: f64, speed: f64) -> UrResult<String> {
    check_finite(&target.to_array(), "pose")?;
    Ok(format!("movel({}, a={}, v={})", pose(target), acceleration, speed))
}

pub fn movej(q: &[f64; 6], acceleration: f64, speed: f64) -> UrResult<String> {
    check_finite(q, "joint positions")?;
    Ok(format!("movej({}, a={}, v={})", list(q), acceleration, speed))
}

pub fn speedl(twist: &Twist, acceleration: f64, time: f64) -> UrResult<String> {
    check_finite(&twist.to_array(), "twist")?;
    Ok(format!("speedl({}, a={}, t={})", list(&twist.to_array()), acceleration, time))
}

pub fn stopl(deceleration: f64) -> String {
    format!("stopl({})", deceleration)
}

pub fn stopj(deceleration: f64) -> String {
    format!("stopj({})", deceleration)
}

/// Cartesian servoing through the controller's inverse kinematics. `servoj` currently ignores
/// its speed and acceleration arguments.
pub fn servol(
    target: &Pose,
    speed: f64,
    acceleration: f64,
    time: f64,
    lookahead_time: f64,
    gain: f64,
) -> UrResult<String> {
    check_finite(&target.to_array(), "pose")?;
    // Controller limits for servoj.
    let lookahead_time = lookahead_time.clamp(0.03, 0.2);
    let gain = gain.clamp(100.0, 2000.0);
    Ok(format!(
        "servoj(get_inverse_kin({}), a={}, v={}, t={}, lookahead_time={}, gain={})",
        pose(target),
        acceleration,
        speed,
        time,
        lookahead_time,
        gain
    ))
}

pub fn force_mode(params: &ForceModeParams) -> UrResult<String> {
    params.validate()?;
    let selection: Vec<String> = params.selection.iter().map(|s| s.to_string()).collect();
    Ok(format!(
        "force_mode({}, [{}], {}, {}, {})",
        pose(&params.task_frame),
        selection.join(", "),
        list(&params.wrench.to_array()),
        params.force_type,
        list(&params.limits)
    ))
}

pub fn end_force_mode() -> String {
    "end_force_mode()".to_string()
}

pub fn zero_ftsensor() -> String {
    "zero_ftsensor()".to_string()
}

/// Lines of a loop that moves with `speed` until the tool reports contact.
pub fn move_until_contact(speed: &Twist, acceleration: f64) -> UrResult<Vec<String>> {
    check_finite(&speed.to_array(), "twist")?;
    if speed.is_zero() {
        return Err(UrError::InvalidArgument("Contact search needs a non-zero speed".to_string()));
    }
    let xd = list(&speed.to_array());
    Ok(vec![
        format!("while tool_contact(direction={}) <= 0:", xd),
        format!("  speedl({}, a={}, t=get_steptime())", xd, acceleration),
        "end".to_string(),
        stopl(3.0),
    ])
}

/// Wraps `lines` in a program definition. Each script sent replaces the running program.
pub fn program(name: &str, lines: &[String]) -> String {
    let mut script = format!("def {}():\n", name);
    for line in lines {
        script.push_str("  ");
        script.push_str(line);
        script.push('\n');
    }
    script.push_str("end\n");
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movel_uses_pose_literal() {
        let cmd = movel(&Pose::new(0.3, 0.0, 0.1, 0.0, 3.14, 0.0), 0.5, 0.05).unwrap();
        assert_eq!(cmd, "movel(p[0.3, 0, 0.1, 0, 3.14, 0], a=0.5, v=0.05)");
    }

    #[test]
    fn speedl_keeps_sign() {
        let cmd = speedl(&Twist::from_array([0.0, -0.05, 0.0, 0.0, 0.0, 0.0]), 0.5, 0.1).unwrap();
        assert_eq!(cmd, "speedl([0, -0.05, 0, 0, 0, 0], a=0.5, t=0.1)");
    }

    #[test]
    fn non_finite_values_are_rejected() {
        assert!(movel(&Pose::new(f64::NAN, 0.0, 0.0, 0.0, 0.0, 0.0), 0.5, 0.05).is_err());
    }

    #[test]
    fn servol_goes_through_inverse_kinematics() {
        let target = Pose::new(0.3, 0.0, 0.1, 0.0, 3.14, 0.0);
        let cmd = servol(&target, 0.25, 1.2, 0.1, 0.1, 300.0).unwrap();
        assert!(cmd.starts_with("servoj(get_inverse_kin(p[0.3, 0, 0.1, 0, 3.14, 0])"));
        assert!(cmd.ends_with("t=0.1, lookahead_time=0.1, gain=300)"));
        let clamped = servol(&Pose::default(), 0.25, 1.2, 0.1, 0.01, 3000.0).unwrap();
        assert!(clamped.ends_with("lookahead_time=0.03, gain=2000)"));
    }

    #[test]
    fn force_mode_text_and_validation() {
        let params = ForceModeParams::push_z(-20.0, [0.02, 0.02, 0.02, 0.2, 0.2, 0.2]);
        assert_eq!(
            force_mode(&params).unwrap(),
            "force_mode(p[0, 0, 0, 0, 0, 0], [0, 0, 1, 0, 0, 0], [0, 0, -20, 0, 0, 0], 2, \
             [0.02, 0.02, 0.02, 0.2, 0.2, 0.2])"
        );

        let bad_type = ForceModeParams { force_type: 4, ..params };
        assert!(force_mode(&bad_type).is_err());
        let bad_limits = ForceModeParams { limits: [0.0; 6], ..params };
        assert!(force_mode(&bad_limits).is_err());
        let bad_selection = ForceModeParams { selection: [0, 0, 2, 0, 0, 0], ..params };
        assert!(force_mode(&bad_selection).is_err());
    }

    #[test]
    fn program_indents_body() {
        let script = program("jog", &["speedl([0, 0, 0, 0, 0, 0], a=0.5, t=0.1)".to_string()]);
        assert_eq!(script, "def jog():\n  speedl([0, 0, 0, 0, 0, 0], a=0.5, t=0.1)\nend\n");
    }

    #[test]
    fn contact_search_needs_motion() {
        assert!(move_until_contact(&Twist::zero(), 0.5).is_err());
        let lines =
            move_until_contact(&Twist::from_array([0.0, 0.0, -0.05, 0.0, 0.0, 0.0]), 0.5).unwrap();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("while tool_contact(direction=[0, 0, -0.05, 0, 0, 0])"));
    }
}
