//! 遥操作薄层
//!
//! 把调用方的即时末端命令改写成 `now + LOOK_AHEAD_TIME` 的未来目标，
//! 借笛卡尔控制器的插值器获得平滑轨迹——遥操作输入往往离散、抖动，
//! 直接下发会在每个采样点产生速度阶跃。

use tracing::warn;

use crate::config::{ControllerConfig, RobotConfig};
use crate::types::{EEFState, Gain, JointState, Pose6d};

use super::{CartesianController, ControllerError};

/// 前瞻平滑时间（s）
pub const LOOK_AHEAD_TIME: f64 = 0.1;

/// 高层遥操作接口
pub struct HighLevel {
    cartesian: CartesianController,
}

impl HighLevel {
    /// 连接真实机械臂（Linux / SocketCAN）
    #[cfg(target_os = "linux")]
    pub fn new(
        model: &str,
        interface: &str,
        urdf_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, ControllerError> {
        Ok(Self { cartesian: CartesianController::new(model, interface, urdf_path)? })
    }

    /// 包装一个已构造的笛卡尔控制器（测试 / 仿真）
    pub fn with_cartesian(cartesian: CartesianController) -> Self {
        Self { cartesian }
    }

    /// 下发末端命令，时间戳统一改写为 `now + LOOK_AHEAD_TIME`
    ///
    /// 调用方自带的非零时间戳暂不支持（未来目标调度尚未实现），
    /// 告警后同样改写。
    pub fn set_eef_cmd(&self, mut cmd: EEFState) {
        let now = self.cartesian.get_timestamp();
        if cmd.t != 0.0 {
            warn!(
                "scheduling future targets is not supported; timestamp {:.3} rewritten to now + {:.3}",
                cmd.t, LOOK_AHEAD_TIME
            );
        }
        cmd.t = now + LOOK_AHEAD_TIME;
        self.cartesian.set_eef_cmd(cmd);
    }

    pub fn get_eef_cmd(&self) -> (EEFState, EEFState) {
        self.cartesian.get_eef_cmd()
    }

    pub fn get_eef_state(&self) -> EEFState {
        self.cartesian.get_eef_state()
    }

    pub fn get_joint_state(&self) -> JointState {
        self.cartesian.get_joint_state()
    }

    pub fn get_joint_cmd(&self) -> (JointState, JointState) {
        self.cartesian.get_joint_cmd()
    }

    pub fn get_timestamp(&self) -> f64 {
        self.cartesian.get_timestamp()
    }

    pub fn set_gain(&self, new_gain: Gain) -> Result<(), ControllerError> {
        self.cartesian.set_gain(new_gain)
    }

    pub fn get_gain(&self) -> Gain {
        self.cartesian.get_gain()
    }

    pub fn get_home_pose(&self) -> Pose6d {
        self.cartesian.get_home_pose()
    }

    pub fn reset_to_home(&self) -> Result<(), ControllerError> {
        self.cartesian.reset_to_home()
    }

    pub fn set_to_damping(&self) -> Result<(), ControllerError> {
        self.cartesian.set_to_damping()
    }

    pub fn get_robot_config(&self) -> std::sync::Arc<RobotConfig> {
        self.cartesian.get_robot_config()
    }

    pub fn get_controller_config(&self) -> std::sync::Arc<ControllerConfig> {
        self.cartesian.get_controller_config()
    }

    /// 内层笛卡尔控制器
    pub fn cartesian(&self) -> &CartesianController {
        &self.cartesian
    }
}
