//! 控制核心的值类型
//!
//! [`JointState`]、[`EEFState`] 与 [`Gain`] 是伺服循环在各层之间传递的
//! 纯数据结构。三者都实现了逐分量加法与标量乘法——仅用于两个设定点
//! 之间的线性插值（`reset_to_home`、末端命令插值器），不是通用代数。
//! 时间戳 `t` 不参与插值，运算结果中恒为 0。

use std::ops::{Add, Mul};

use nalgebra::Vector6;

/// 机械臂关节自由度（夹爪单独计）
pub const DOF: usize = 6;

/// 关节空间 6 维向量（位置 rad / 速度 rad·s⁻¹ / 力矩 N·m）
pub type VecDof = Vector6<f64>;

/// 末端位姿 (x, y, z, roll, pitch, yaw)，位置单位 m，姿态为基坐标系
/// 固定轴 XYZ 欧拉角（rad）
pub type Pose6d = Vector6<f64>;

/// 关节空间状态 / 命令
///
/// 同一结构既用作遥测状态（由伺服线程发布）也用作命令
/// （由外部调用方写入命令槽）。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointState {
    /// 控制器启动以来的秒数
    pub t: f64,
    pub pos: VecDof,
    pub vel: VecDof,
    pub torque: VecDof,
    /// 夹爪开度（m）；0 全闭，`gripper_width` 全开
    pub gripper_pos: f64,
    pub gripper_vel: f64,
    pub gripper_torque: f64,
}

impl Default for JointState {
    fn default() -> Self {
        Self {
            t: 0.0,
            pos: VecDof::zeros(),
            vel: VecDof::zeros(),
            torque: VecDof::zeros(),
            gripper_pos: 0.0,
            gripper_vel: 0.0,
            gripper_torque: 0.0,
        }
    }
}

impl Add for JointState {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            t: 0.0,
            pos: self.pos + rhs.pos,
            vel: self.vel + rhs.vel,
            torque: self.torque + rhs.torque,
            gripper_pos: self.gripper_pos + rhs.gripper_pos,
            gripper_vel: self.gripper_vel + rhs.gripper_vel,
            gripper_torque: self.gripper_torque + rhs.gripper_torque,
        }
    }
}

impl Mul<f64> for JointState {
    type Output = Self;

    fn mul(self, scalar: f64) -> Self {
        Self {
            t: 0.0,
            pos: self.pos * scalar,
            vel: self.vel * scalar,
            torque: self.torque * scalar,
            gripper_pos: self.gripper_pos * scalar,
            gripper_vel: self.gripper_vel * scalar,
            gripper_torque: self.gripper_torque * scalar,
        }
    }
}

/// 末端执行器状态 / 命令
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EEFState {
    /// 控制器启动以来的秒数；作为命令时，非零表示期望到达目标的时刻
    pub t: f64,
    pub pose6d: Pose6d,
    pub gripper_pos: f64,
    pub gripper_vel: f64,
    pub gripper_torque: f64,
}

impl Default for EEFState {
    fn default() -> Self {
        Self {
            t: 0.0,
            pose6d: Pose6d::zeros(),
            gripper_pos: 0.0,
            gripper_vel: 0.0,
            gripper_torque: 0.0,
        }
    }
}

impl Add for EEFState {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            t: 0.0,
            pose6d: self.pose6d + rhs.pose6d,
            gripper_pos: self.gripper_pos + rhs.gripper_pos,
            gripper_vel: self.gripper_vel + rhs.gripper_vel,
            gripper_torque: self.gripper_torque + rhs.gripper_torque,
        }
    }
}

impl Mul<f64> for EEFState {
    type Output = Self;

    fn mul(self, scalar: f64) -> Self {
        Self {
            t: 0.0,
            pose6d: self.pose6d * scalar,
            gripper_pos: self.gripper_pos * scalar,
            gripper_vel: self.gripper_vel * scalar,
            gripper_torque: self.gripper_torque * scalar,
        }
    }
}

/// 位置环增益（由电机板载 PD 执行）
///
/// `kp = 0` 且 `kd > 0` 即阻尼模式：电机阻抗运动但不保持设定点。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gain {
    pub kp: VecDof,
    pub kd: VecDof,
    pub gripper_kp: f64,
    pub gripper_kd: f64,
}

impl Default for Gain {
    fn default() -> Self {
        Self {
            kp: VecDof::zeros(),
            kd: VecDof::zeros(),
            gripper_kp: 0.0,
            gripper_kd: 0.0,
        }
    }
}

impl Gain {
    /// kp 是否全零（纯阻尼 / 零力矩状态的判据）
    pub fn kp_is_zero(&self) -> bool {
        self.kp.iter().all(|&k| k == 0.0) && self.gripper_kp == 0.0
    }
}

impl Add for Gain {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            kp: self.kp + rhs.kp,
            kd: self.kd + rhs.kd,
            gripper_kp: self.gripper_kp + rhs.gripper_kp,
            gripper_kd: self.gripper_kd + rhs.gripper_kd,
        }
    }
}

impl Mul<f64> for Gain {
    type Output = Self;

    fn mul(self, scalar: f64) -> Self {
        Self {
            kp: self.kp * scalar,
            kd: self.kd * scalar,
            gripper_kp: self.gripper_kp * scalar,
            gripper_kd: self.gripper_kd * scalar,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joint_state_interpolation() {
        let a = JointState {
            t: 1.0,
            pos: VecDof::from_element(0.0),
            gripper_pos: 0.0,
            ..Default::default()
        };
        let b = JointState {
            t: 2.0,
            pos: VecDof::from_element(1.0),
            gripper_pos: 0.08,
            ..Default::default()
        };
        // 中点插值
        let mid = a * 0.5 + b * 0.5;
        assert!((mid.pos[0] - 0.5).abs() < 1e-12);
        assert!((mid.gripper_pos - 0.04).abs() < 1e-12);
        // 时间戳不参与代数
        assert_eq!(mid.t, 0.0);
    }

    #[test]
    fn test_gain_kp_is_zero() {
        let mut g = Gain::default();
        g.kd = VecDof::from_element(1.0);
        assert!(g.kp_is_zero());
        g.kp[3] = 10.0;
        assert!(!g.kp_is_zero());
    }

    #[test]
    fn test_eef_state_scalar_mul() {
        let s = EEFState {
            t: 3.0,
            pose6d: Pose6d::from_element(2.0),
            gripper_pos: 0.05,
            ..Default::default()
        };
        let half = s * 0.5;
        assert!((half.pose6d[5] - 1.0).abs() < 1e-12);
        assert!((half.gripper_pos - 0.025).abs() < 1e-12);
    }
}
