//! 机型与控制器参数注册表
//!
//! 进程级只读配置：首次访问时构造，之后只做查表，调用方拿到共享的
//! 不可变句柄。新增机型只需在 [`robot_registry`] 中补一个条目。

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use nalgebra::Vector3;
use thiserror::Error;

use crate::protocol::MotorType;
use crate::types::VecDof;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown robot model: {0}. Currently available: X5, L5")]
    UnknownModel(String),

    #[error(
        "Unknown controller type: {0}. Currently available: joint_controller, cartesian_controller"
    )]
    UnknownControllerType(String),
}

/// 机型参数（构造后不可变）
#[derive(Debug, Clone)]
pub struct RobotConfig {
    pub model: String,

    pub joint_pos_min: VecDof,
    pub joint_pos_max: VecDof,
    /// rad/s
    pub joint_vel_max: VecDof,
    /// N·m
    pub joint_torque_max: VecDof,
    /// 末端速度上限：(x, y, z) m/s，(roll, pitch, yaw) rad/s
    pub ee_vel_max: VecDof,

    /// m/s
    pub gripper_vel_max: f64,
    /// N·m
    pub gripper_torque_max: f64,
    /// 全开 `gripper_width`，全闭 0（m）
    pub gripper_width: f64,
    /// 夹爪全开时电机的原始角度读数
    pub gripper_open_readout: f64,

    pub motor_id: [u16; 6],
    pub motor_type: [MotorType; 6],
    pub gripper_motor_id: u16,
    pub gripper_motor_type: MotorType,

    /// 逆动力学使用；机械臂不是正置安装时需要改
    pub gravity_vector: Vector3<f64>,

    /// FK/IK 链路的根与末端 link 名
    pub base_link_name: String,
    pub eef_link_name: String,
}

/// 控制器参数（构造后不可变）
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub controller_type: String,
    pub default_kp: VecDof,
    pub default_kd: VecDof,
    pub default_gripper_kp: f64,
    pub default_gripper_kd: f64,
    /// 连续过流计数阈值（按伺服周期计）
    pub over_current_cnt_max: u32,
    /// 伺服周期（s）
    pub controller_dt: f64,
}

fn robot_registry() -> &'static HashMap<&'static str, Arc<RobotConfig>> {
    static REGISTRY: OnceLock<HashMap<&'static str, Arc<RobotConfig>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert(
            "X5",
            Arc::new(RobotConfig {
                model: "X5".to_string(),
                joint_pos_min: VecDof::new(-3.14, -0.05, -0.1, -1.6, -1.57, -2.0),
                joint_pos_max: VecDof::new(2.618, 3.14, 3.24, 1.55, 1.57, 2.0),
                joint_vel_max: VecDof::new(3.0, 2.0, 2.0, 2.0, 3.0, 3.0),
                joint_torque_max: VecDof::new(30.0, 40.0, 30.0, 15.0, 10.0, 10.0),
                ee_vel_max: VecDof::new(0.6, 0.6, 0.6, 1.8, 1.8, 1.8),
                gripper_vel_max: 0.1,
                gripper_torque_max: 1.5,
                gripper_width: 0.085,
                gripper_open_readout: 4.8,
                motor_id: [1, 2, 4, 5, 6, 7],
                motor_type: [
                    MotorType::EcA4310,
                    MotorType::EcA4310,
                    MotorType::EcA4310,
                    MotorType::DmJ4310,
                    MotorType::DmJ4310,
                    MotorType::DmJ4310,
                ],
                gripper_motor_id: 8,
                gripper_motor_type: MotorType::DmJ4310,
                gravity_vector: Vector3::new(0.0, 0.0, -9.807),
                base_link_name: "base_link".to_string(),
                eef_link_name: "eef_link".to_string(),
            }),
        );
        m.insert(
            "L5",
            Arc::new(RobotConfig {
                model: "L5".to_string(),
                joint_pos_min: VecDof::new(-3.14, -0.05, -0.1, -1.6, -1.57, -2.0),
                joint_pos_max: VecDof::new(2.618, 3.14, 3.24, 1.55, 1.57, 2.0),
                joint_vel_max: VecDof::new(3.0, 2.0, 2.0, 2.0, 3.0, 3.0),
                joint_torque_max: VecDof::new(30.0, 40.0, 30.0, 15.0, 10.0, 10.0),
                ee_vel_max: VecDof::new(0.6, 0.6, 0.6, 1.8, 1.8, 1.8),
                gripper_vel_max: 0.1,
                gripper_torque_max: 1.5,
                gripper_width: 0.085,
                gripper_open_readout: 4.8,
                motor_id: [1, 2, 4, 5, 6, 7],
                motor_type: [
                    MotorType::DmJ4340,
                    MotorType::DmJ4340,
                    MotorType::DmJ4340,
                    MotorType::DmJ4310,
                    MotorType::DmJ4310,
                    MotorType::DmJ4310,
                ],
                gripper_motor_id: 8,
                gripper_motor_type: MotorType::DmJ4310,
                gravity_vector: Vector3::new(0.0, 0.0, -9.807),
                base_link_name: "base_link".to_string(),
                eef_link_name: "eef_link".to_string(),
            }),
        );
        m
    })
}

fn controller_registry() -> &'static HashMap<&'static str, Arc<ControllerConfig>> {
    static REGISTRY: OnceLock<HashMap<&'static str, Arc<ControllerConfig>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert(
            "joint_controller",
            Arc::new(ControllerConfig {
                controller_type: "joint_controller".to_string(),
                default_kp: VecDof::new(70.0, 70.0, 70.0, 30.0, 30.0, 20.0),
                default_kd: VecDof::new(2.0, 2.0, 2.0, 1.0, 1.0, 1.0),
                default_gripper_kp: 30.0,
                default_gripper_kd: 0.2,
                over_current_cnt_max: 20,
                controller_dt: 0.002,
            }),
        );
        m.insert(
            "cartesian_controller",
            Arc::new(ControllerConfig {
                controller_type: "cartesian_controller".to_string(),
                default_kp: VecDof::new(150.0, 150.0, 200.0, 60.0, 30.0, 30.0),
                default_kd: VecDof::new(5.0, 5.0, 5.0, 1.0, 1.0, 1.0),
                default_gripper_kp: 30.0,
                default_gripper_kd: 0.2,
                over_current_cnt_max: 20,
                controller_dt: 0.005,
            }),
        );
        m
    })
}

/// 按机型名取机型参数
pub fn robot_config(model: &str) -> Result<Arc<RobotConfig>, ConfigError> {
    robot_registry()
        .get(model)
        .cloned()
        .ok_or_else(|| ConfigError::UnknownModel(model.to_string()))
}

/// 按控制器类型名取控制器参数
pub fn controller_config(controller_type: &str) -> Result<Arc<ControllerConfig>, ConfigError> {
    controller_registry()
        .get(controller_type)
        .cloned()
        .ok_or_else(|| ConfigError::UnknownControllerType(controller_type.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_models() {
        let x5 = robot_config("X5").unwrap();
        assert_eq!(x5.model, "X5");
        assert_eq!(x5.motor_type[0], MotorType::EcA4310);
        let l5 = robot_config("L5").unwrap();
        assert_eq!(l5.motor_type[0], MotorType::DmJ4340);
        // 两机型共享限位表
        assert_eq!(x5.joint_pos_max, l5.joint_pos_max);
    }

    #[test]
    fn test_unknown_model() {
        match robot_config("X9") {
            Err(ConfigError::UnknownModel(m)) => assert_eq!(m, "X9"),
            other => panic!("expected UnknownModel, got {other:?}"),
        }
    }

    #[test]
    fn test_controller_types() {
        let joint = controller_config("joint_controller").unwrap();
        assert_eq!(joint.controller_dt, 0.002);
        let cart = controller_config("cartesian_controller").unwrap();
        assert_eq!(cart.controller_dt, 0.005);
        assert!(cart.default_kp[0] > joint.default_kp[0]);
        assert!(matches!(
            controller_config("velocity_controller"),
            Err(ConfigError::UnknownControllerType(_))
        ));
    }

    #[test]
    fn test_registry_returns_shared_handles() {
        let a = robot_config("X5").unwrap();
        let b = robot_config("X5").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
