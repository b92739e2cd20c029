//! X5/L5 机械臂 Rust SDK
//!
//! 面向 X5 / L5 系列 6 自由度机械臂（带 1 自由度平行夹爪）的实时控制核心：
//!
//! - **伺服层** (`controller`)：固定周期后台线程，关节/笛卡尔两级命令接口，
//!   速度/位置/力矩多重安全裁剪，过流保护与紧急阻尼态
//! - **运动学层** (`solver`)：URDF 模型上的正运动学、阻尼最小二乘逆运动学、
//!   递推牛顿-欧拉逆动力学（重力补偿）
//! - **硬件层** (`can` / `protocol` / `gateway`)：SocketCAN 后端与 MIT 协议
//!   电机帧编解码，后台接收线程维护无锁遥测快照
//!
//! # 架构层次
//!
//! 外部调用 → [`controller::CartesianController::set_eef_cmd`] → 插值器 →
//! IK → 关节命令槽 → 裁剪/安全检查 → CAN 网关 → 电机；
//! 电机遥测沿反方向回流，经 FK 以末端状态暴露。
//!
//! # 日志
//!
//! 全部日志通过 `tracing` 输出。每个控制器在自己的 span 内记录
//! `model` / `interface` 字段，可用 `tracing_subscriber::EnvFilter`
//! 针对单个控制器调整级别。

pub mod can;
pub mod config;
pub mod controller;
pub mod filter;
pub mod gateway;
pub mod protocol;
pub mod solver;
pub mod types;

// Re-export 核心类型（简化用户导入）
pub use config::{controller_config, robot_config, ConfigError, ControllerConfig, RobotConfig};
pub use controller::{CartesianController, ControllerError, HighLevel, JointController};
pub use solver::Solver;
pub use types::{EEFState, Gain, JointState, Pose6d, VecDof, DOF};
