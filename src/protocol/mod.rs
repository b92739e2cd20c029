//! 电机线协议（MIT 模式帧编解码）
//!
//! 七颗智能电机共用同一种 MIT 风格的设定点帧：位置 + 速度 + Kp + Kd +
//! 前馈电流，各字段经 [`float_to_uint`] 线性量化后打包进 8 字节数据区。
//! 命令帧的量化范围按电机家族（EC / DM）取自厂商寄存器表；反馈帧对
//! 所有家族使用统一范围，电流到力矩的换算放在控制器层按型号处理。
//!
//! 反馈帧槽位映射：`槽位 = CAN ID − 1`。六个臂关节固定落在槽
//! `{0, 1, 3, 4, 5, 6}`，夹爪固定落在槽 `7`。

use thiserror::Error;

use crate::can::CanFrame;

/// 电机型号
///
/// 型号决定命令帧量化范围与电流↔力矩换算常数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorType {
    /// EC-A4310（行星减速一体关节）
    EcA4310,
    /// DM-J4310（达妙，小关节/夹爪）
    DmJ4310,
    /// DM-J4340（达妙，大关节）
    DmJ4340,
}

/// EC-A4310 力矩常数（N·m/A），命令方向：电流 = 力矩 / 常数
pub const TORQUE_CONSTANT_EC_A4310: f64 = 1.4;
/// DM-J4310 力矩常数（N·m/A）
pub const TORQUE_CONSTANT_DM_J4310: f64 = 0.424;
/// DM-J4340 力矩常数（N·m/A）
pub const TORQUE_CONSTANT_DM_J4340: f64 = 1.0;

/// EC-A4310 反馈解码系数：力矩 = 电流读数 × 1.4 × 1.4
///
/// 注意这里力矩常数被乘了**两次**。这是对整机实测值的经验修正，
/// 与电机文档不符但与实物一致；解码时必须原样保留。
pub const EC_A4310_TORQUE_DECODE: f64 = TORQUE_CONSTANT_EC_A4310 * TORQUE_CONSTANT_EC_A4310;

impl MotorType {
    /// 命令方向的力矩常数（电流 = 力矩 / 常数）
    pub fn torque_constant(self) -> f64 {
        match self {
            MotorType::EcA4310 => TORQUE_CONSTANT_EC_A4310,
            MotorType::DmJ4310 => TORQUE_CONSTANT_DM_J4310,
            MotorType::DmJ4340 => TORQUE_CONSTANT_DM_J4340,
        }
    }

    /// 反馈方向的解码系数（力矩 = 电流读数 × 系数）
    ///
    /// EC-A4310 使用 [`EC_A4310_TORQUE_DECODE`]（常数平方），其余型号
    /// 与命令方向一致。
    pub fn torque_decode_factor(self) -> f64 {
        match self {
            MotorType::EcA4310 => EC_A4310_TORQUE_DECODE,
            MotorType::DmJ4310 => TORQUE_CONSTANT_DM_J4310,
            MotorType::DmJ4340 => TORQUE_CONSTANT_DM_J4340,
        }
    }
}

// ============================================================================
// 量化范围（厂商寄存器表）
// ============================================================================

/// 一个物理量的量化区间
#[derive(Debug, Clone, Copy)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

/// 命令帧量化范围集合
#[derive(Debug, Clone, Copy)]
pub struct CommandRanges {
    pub pos: Range,
    pub vel: Range,
    pub kp: Range,
    pub kd: Range,
    pub current: Range,
}

/// EC 系列命令范围
pub const EC_COMMAND_RANGES: CommandRanges = CommandRanges {
    pos: Range { min: -12.5, max: 12.5 },
    vel: Range { min: -18.0, max: 18.0 },
    kp: Range { min: 0.0, max: 500.0 },
    kd: Range { min: 0.0, max: 5.0 },
    current: Range { min: -30.0, max: 30.0 },
};

/// DM 系列命令范围
pub const DM_COMMAND_RANGES: CommandRanges = CommandRanges {
    pos: Range { min: -12.5, max: 12.5 },
    vel: Range { min: -45.0, max: 45.0 },
    kp: Range { min: 0.0, max: 500.0 },
    kd: Range { min: 0.0, max: 5.0 },
    current: Range { min: -18.0, max: 18.0 },
};

/// 反馈帧量化范围（两家族统一）
pub const FEEDBACK_POS: Range = Range { min: -12.5, max: 12.5 };
pub const FEEDBACK_VEL: Range = Range { min: -45.0, max: 45.0 };
pub const FEEDBACK_CURRENT: Range = Range { min: -30.0, max: 30.0 };

impl MotorType {
    pub fn command_ranges(self) -> CommandRanges {
        match self {
            MotorType::EcA4310 => EC_COMMAND_RANGES,
            MotorType::DmJ4310 | MotorType::DmJ4340 => DM_COMMAND_RANGES,
        }
    }
}

// ============================================================================
// 量化辅助
// ============================================================================

/// 浮点线性量化到 `bits` 位无符号整数（越界取饱和值）
pub fn float_to_uint(x: f64, range: Range, bits: u32) -> u32 {
    let span = range.max - range.min;
    let x = x.clamp(range.min, range.max);
    let levels = ((1u64 << bits) - 1) as f64;
    ((x - range.min) * levels / span).round() as u32
}

/// [`float_to_uint`] 的逆映射
pub fn uint_to_float(x: u32, range: Range, bits: u32) -> f64 {
    let span = range.max - range.min;
    let levels = ((1u64 << bits) - 1) as f64;
    range.min + (x as f64) * span / levels
}

// ============================================================================
// 帧编解码
// ============================================================================

/// 遥测快照槽位总数（CAN ID 1..=10）
pub const MSG_SLOTS: usize = 10;
/// 六个臂关节的反馈槽位（电机 ID 1, 2, 4, 5, 6, 7）
pub const ARM_FEEDBACK_SLOTS: [usize; 6] = [0, 1, 3, 4, 5, 6];
/// 夹爪反馈槽位（电机 ID 8）
pub const GRIPPER_FEEDBACK_SLOT: usize = 7;

/// 反馈帧在快照数组中的槽位
pub fn feedback_slot(motor_id: u16) -> usize {
    (motor_id as usize).saturating_sub(1)
}

/// DM 电机使能握手数据区
pub const DM_ENABLE_DATA: [u8; 8] = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFC];
/// DM 电机失能数据区
pub const DM_DISABLE_DATA: [u8; 8] = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFD];
/// 当前位置设为零点的数据区
pub const ZERO_READOUT_DATA: [u8; 8] = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE];

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: u8, actual: u8 },

    #[error("Feedback frame id mismatch: CAN id {can_id}, payload id {payload_id}")]
    IdMismatch { can_id: u32, payload_id: u16 },
}

/// 一帧解码后的电机遥测
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotorMsg {
    pub motor_id: u16,
    /// 多圈角度（rad）；夹爪电机为原始读数（圈）
    pub angle_actual_rad: f64,
    /// 角速度（rad/s）
    pub speed_actual_rad: f64,
    /// 电流读数（A），换算力矩见 [`MotorType::torque_decode_factor`]
    pub current_actual_float: f64,
    /// 绕组温度（°C）
    pub temperature: u8,
}

/// 解码后的设定点命令（测试与仿真总线使用）
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotorCommand {
    pub kp: f64,
    pub kd: f64,
    pub pos: f64,
    pub vel: f64,
    pub current: f64,
}

/// 编码一帧设定点命令
///
/// 数据区布局（64 位恰好用满）：
///
/// ```text
/// d0 d1    : pos   u16
/// d2 d3[7:4]: vel  u12
/// d3[3:0] d4: kp   u12
/// d5 d6[7:4]: kd   u12
/// d6[3:0] d7: cur  u12
/// ```
pub fn encode_motor_command(
    motor_id: u16,
    motor_type: MotorType,
    cmd: MotorCommand,
) -> CanFrame {
    let r = motor_type.command_ranges();
    let pos = float_to_uint(cmd.pos, r.pos, 16);
    let vel = float_to_uint(cmd.vel, r.vel, 12);
    let kp = float_to_uint(cmd.kp, r.kp, 12);
    let kd = float_to_uint(cmd.kd, r.kd, 12);
    let cur = float_to_uint(cmd.current, r.current, 12);

    let data = [
        (pos >> 8) as u8,
        pos as u8,
        (vel >> 4) as u8,
        (((vel & 0xF) << 4) | (kp >> 8)) as u8,
        kp as u8,
        (kd >> 4) as u8,
        (((kd & 0xF) << 4) | (cur >> 8)) as u8,
        cur as u8,
    ];
    CanFrame::new(motor_id as u32, &data)
}

/// 解码一帧设定点命令（仿真总线的入口）
pub fn decode_motor_command(
    frame: &CanFrame,
    motor_type: MotorType,
) -> Result<MotorCommand, ProtocolError> {
    if frame.len != 8 {
        return Err(ProtocolError::InvalidLength { expected: 8, actual: frame.len });
    }
    let d = &frame.data;
    let pos = ((d[0] as u32) << 8) | d[1] as u32;
    let vel = ((d[2] as u32) << 4) | (d[3] as u32 >> 4);
    let kp = ((d[3] as u32 & 0xF) << 8) | d[4] as u32;
    let kd = ((d[5] as u32) << 4) | (d[6] as u32 >> 4);
    let cur = ((d[6] as u32 & 0xF) << 8) | d[7] as u32;

    let r = motor_type.command_ranges();
    Ok(MotorCommand {
        pos: uint_to_float(pos, r.pos, 16),
        vel: uint_to_float(vel, r.vel, 12),
        kp: uint_to_float(kp, r.kp, 12),
        kd: uint_to_float(kd, r.kd, 12),
        current: uint_to_float(cur, r.current, 12),
    })
}

/// 编码一帧反馈（电机侧 / 仿真总线使用）
///
/// 数据区布局：
///
/// ```text
/// d0        : motor id
/// d1 d2     : pos  u16
/// d3 d4[7:4]: vel  u12
/// d4[3:0] d5: cur  u12
/// d6        : 温度（°C）
/// d7        : 保留
/// ```
pub fn encode_feedback(
    motor_id: u16,
    pos: f64,
    vel: f64,
    current: f64,
    temperature: u8,
) -> CanFrame {
    let p = float_to_uint(pos, FEEDBACK_POS, 16);
    let v = float_to_uint(vel, FEEDBACK_VEL, 12);
    let c = float_to_uint(current, FEEDBACK_CURRENT, 12);
    let data = [
        motor_id as u8,
        (p >> 8) as u8,
        p as u8,
        (v >> 4) as u8,
        (((v & 0xF) << 4) | (c >> 8)) as u8,
        c as u8,
        temperature,
        0,
    ];
    CanFrame::new(motor_id as u32, &data)
}

/// 解码一帧反馈
pub fn decode_feedback(frame: &CanFrame) -> Result<MotorMsg, ProtocolError> {
    if frame.len != 8 {
        return Err(ProtocolError::InvalidLength { expected: 8, actual: frame.len });
    }
    let d = &frame.data;
    let payload_id = d[0] as u16;
    if payload_id as u32 != frame.id {
        return Err(ProtocolError::IdMismatch { can_id: frame.id, payload_id });
    }
    let p = ((d[1] as u32) << 8) | d[2] as u32;
    let v = ((d[3] as u32) << 4) | (d[4] as u32 >> 4);
    let c = ((d[4] as u32 & 0xF) << 8) | d[5] as u32;
    Ok(MotorMsg {
        motor_id: payload_id,
        angle_actual_rad: uint_to_float(p, FEEDBACK_POS, 16),
        speed_actual_rad: uint_to_float(v, FEEDBACK_VEL, 12),
        current_actual_float: uint_to_float(c, FEEDBACK_CURRENT, 12),
        temperature: d[6],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_uint_roundtrip() {
        let r = Range { min: -12.5, max: 12.5 };
        for &x in &[-12.5, -1.234, 0.0, 0.5, 12.5] {
            let q = float_to_uint(x, r, 16);
            let y = uint_to_float(q, r, 16);
            // 16 位量化在 25 rad 量程上的步长约 4e-4
            assert!((x - y).abs() < 4e-4, "x={x} y={y}");
        }
    }

    #[test]
    fn test_float_to_uint_saturates() {
        let r = Range { min: 0.0, max: 5.0 };
        assert_eq!(float_to_uint(-1.0, r, 12), 0);
        assert_eq!(float_to_uint(99.0, r, 12), 4095);
    }

    #[test]
    fn test_command_roundtrip_dm() {
        let cmd = MotorCommand { kp: 70.0, kd: 2.0, pos: -0.8, vel: 0.3, current: 1.5 };
        let frame = encode_motor_command(5, MotorType::DmJ4310, cmd);
        assert_eq!(frame.id, 5);
        let back = decode_motor_command(&frame, MotorType::DmJ4310).unwrap();
        assert!((back.kp - cmd.kp).abs() < 0.2);
        assert!((back.kd - cmd.kd).abs() < 0.01);
        assert!((back.pos - cmd.pos).abs() < 4e-4);
        assert!((back.vel - cmd.vel).abs() < 0.03);
        assert!((back.current - cmd.current).abs() < 0.01);
    }

    #[test]
    fn test_command_roundtrip_ec() {
        let cmd = MotorCommand { kp: 150.0, kd: 4.9, pos: 2.618, vel: -3.0, current: -20.0 };
        let frame = encode_motor_command(1, MotorType::EcA4310, cmd);
        let back = decode_motor_command(&frame, MotorType::EcA4310).unwrap();
        assert!((back.pos - cmd.pos).abs() < 4e-4);
        assert!((back.current - cmd.current).abs() < 0.02);
    }

    #[test]
    fn test_feedback_roundtrip() {
        let frame = encode_feedback(7, 1.234, -0.56, 3.2, 41);
        let msg = decode_feedback(&frame).unwrap();
        assert_eq!(msg.motor_id, 7);
        assert!((msg.angle_actual_rad - 1.234).abs() < 4e-4);
        assert!((msg.speed_actual_rad + 0.56).abs() < 0.03);
        assert!((msg.current_actual_float - 3.2).abs() < 0.02);
        assert_eq!(msg.temperature, 41);
    }

    #[test]
    fn test_feedback_rejects_bad_frames() {
        let mut frame = encode_feedback(3, 0.0, 0.0, 0.0, 0);
        frame.len = 6;
        assert!(matches!(
            decode_feedback(&frame),
            Err(ProtocolError::InvalidLength { expected: 8, actual: 6 })
        ));

        let mut frame = encode_feedback(3, 0.0, 0.0, 0.0, 0);
        frame.id = 4;
        assert!(matches!(decode_feedback(&frame), Err(ProtocolError::IdMismatch { .. })));
    }

    #[test]
    fn test_slot_mapping() {
        // 臂关节电机 ID {1,2,4,5,6,7} → 槽 {0,1,3,4,5,6}
        for (id, slot) in [1u16, 2, 4, 5, 6, 7].iter().zip(ARM_FEEDBACK_SLOTS) {
            assert_eq!(feedback_slot(*id), slot);
        }
        assert_eq!(feedback_slot(8), GRIPPER_FEEDBACK_SLOT);
    }

    #[test]
    fn test_ec_decode_factor_is_squared() {
        assert!((MotorType::EcA4310.torque_decode_factor() - 1.96).abs() < 1e-12);
        assert_eq!(
            MotorType::DmJ4310.torque_decode_factor(),
            MotorType::DmJ4310.torque_constant()
        );
    }
}
