//! 控制器层
//!
//! - [`JointController`] — 关节空间伺服核心（后台固定周期环）
//! - [`CartesianController`] — 末端位姿命令 → 插值 → IK → 关节命令
//! - [`HighLevel`] — 遥操作用的前瞻平滑薄层
//!
//! 所有安全关键错误要么中止当前周期、要么暂停后台环、要么进入紧急
//! 阻尼态，绝不静默吞掉；纯信息性的裁剪事件只打 debug 日志。

use thiserror::Error;

use crate::can::CanError;
use crate::config::ConfigError;
use crate::solver::SolverError;

mod cartesian;
mod high_level;
mod joint;

pub use cartesian::CartesianController;
pub use high_level::HighLevel;
pub use joint::JointController;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("CAN error: {0}")]
    Can(#[from] CanError),

    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),

    /// 电机使能 / 热身失败，调用方不应继续使用控制器
    #[error("Initialization failed: {0}")]
    Init(String),

    /// kp 由零切到非零时命令与实际位置相差过远；后台环已暂停，
    /// 调用方必须先把命令调和到当前位置附近
    #[error(
        "Cannot set kp to non-zero when the joint pos cmd is far from the current pos \
         (max error {max_pos_error:.3} rad > threshold {threshold:.3} rad)"
    )]
    UnsafeGainTransition { max_pos_error: f64, threshold: f64 },
}
