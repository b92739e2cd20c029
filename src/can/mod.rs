//! CAN 适配层
//!
//! 提供统一的 [`CanAdapter`] 抽象：Linux 下的 SocketCAN 后端
//! （[`SocketCanAdapter`]），以及用于测试/CI/演示的确定性仿真后端
//! （[`mock::MockArmBus`]）。网关层（[`crate::gateway`]）只依赖这个
//! trait，不关心帧从哪里来。

use std::time::Duration;

use thiserror::Error;

pub mod mock;

#[cfg(target_os = "linux")]
pub mod socketcan;

pub use mock::{MockArmBus, MockArmHandle};

#[cfg(target_os = "linux")]
pub use socketcan::SocketCanAdapter;

/// SDK 通用 CAN 帧（只针对 CAN 2.0 标准帧）
///
/// 固定 8 字节数据区、`Copy`、无生命周期——适合高频收发路径。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    /// 标准帧 ID（11-bit）
    pub id: u32,
    /// 帧数据（未使用部分为 0）
    pub data: [u8; 8],
    /// 有效数据长度 (0-8)
    pub len: u8,
}

impl CanFrame {
    pub fn new(id: u32, data: &[u8]) -> Self {
        let mut fixed = [0u8; 8];
        let len = data.len().min(8);
        fixed[..len].copy_from_slice(&data[..len]);
        Self { id, data: fixed, len: len as u8 }
    }

    /// 有效数据切片
    pub fn data_slice(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// CAN 适配层统一错误类型
#[derive(Error, Debug)]
pub enum CanError {
    /// IO 底层错误
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// 设备相关错误（接口不存在、未启动、配置失败等）
    #[error("Device Error: {0}")]
    Device(String),

    /// 读取超时（非致命，可以重试）
    #[error("Read timeout")]
    Timeout,

    /// 适配器已关闭
    #[error("Adapter closed")]
    Closed,
}

/// CAN 收发抽象
///
/// 方法签名取 `&self`：底层 socket 是全双工的，发送路径与后台接收
/// 线程共享同一个 `Arc<dyn CanAdapter>`，各自持有读/写方向。
pub trait CanAdapter: Send + Sync {
    /// 发送一帧（非阻塞语义，驱动队列满视为 IO 错误）
    fn send(&self, frame: &CanFrame) -> Result<(), CanError>;

    /// 接收一帧，最多等待 `timeout`；超时返回 [`CanError::Timeout`]
    fn receive(&self, timeout: Duration) -> Result<CanFrame, CanError>;
}
