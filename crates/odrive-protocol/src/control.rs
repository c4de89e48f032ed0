//! 控制帧结构体定义
//!
//! 包含所有控制指令帧的结构体，提供构建控制帧的方法
//! 和从 `OdriveFrame` 反向解析的方法（供模拟节点和测试使用）。

use crate::{
    NodeId, OdriveFrame, ProtocolError, expect_payload, ids::*, read_f32_le, read_i16_le,
    read_u32_le,
};
use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};
use std::str::FromStr;

// ============================================================================
// 状态/模式枚举
// ============================================================================

/// 轴状态（0x07 指令和 0x01 心跳共用）
///
/// 心跳里只有 1 字节，未知值通过 `Unknown` 原样保留，不视为错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum AxisState {
    Undefined = 0,
    Idle = 1,
    StartupSequence = 2,
    FullCalibrationSequence = 3,
    MotorCalibration = 4,
    EncoderIndexSearch = 6,
    EncoderOffsetCalibration = 7,
    /// 闭环控制：位置/速度/力矩指令只在此状态下生效
    ClosedLoopControl = 8,
    LockinSpin = 9,
    EncoderDirFind = 10,
    Homing = 11,
    EncoderHallPolarityCalibration = 12,
    EncoderHallPhaseCalibration = 13,
    AnticoggingCalibration = 14,
    /// 固件新增或未识别的状态码
    #[num_enum(catch_all)]
    Unknown(u8),
}

impl Default for AxisState {
    fn default() -> Self {
        AxisState::Undefined
    }
}

impl AxisState {
    /// 转换为线上的状态码
    pub fn as_u8(self) -> u8 {
        match self {
            AxisState::Undefined => 0,
            AxisState::Idle => 1,
            AxisState::StartupSequence => 2,
            AxisState::FullCalibrationSequence => 3,
            AxisState::MotorCalibration => 4,
            AxisState::EncoderIndexSearch => 6,
            AxisState::EncoderOffsetCalibration => 7,
            AxisState::ClosedLoopControl => 8,
            AxisState::LockinSpin => 9,
            AxisState::EncoderDirFind => 10,
            AxisState::Homing => 11,
            AxisState::EncoderHallPolarityCalibration => 12,
            AxisState::EncoderHallPhaseCalibration => 13,
            AxisState::AnticoggingCalibration => 14,
            AxisState::Unknown(value) => value,
        }
    }
}

impl FromStr for AxisState {
    type Err = ProtocolError;

    /// 按 ODrive 的 snake_case 名称解析，如 `"closed_loop_control"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s {
            "undefined" => AxisState::Undefined,
            "idle" => AxisState::Idle,
            "startup_sequence" => AxisState::StartupSequence,
            "full_calibration_sequence" => AxisState::FullCalibrationSequence,
            "motor_calibration" => AxisState::MotorCalibration,
            "encoder_index_search" => AxisState::EncoderIndexSearch,
            "encoder_offset_calibration" => AxisState::EncoderOffsetCalibration,
            "closed_loop_control" => AxisState::ClosedLoopControl,
            "lockin_spin" => AxisState::LockinSpin,
            "encoder_dir_find" => AxisState::EncoderDirFind,
            "homing" => AxisState::Homing,
            "encoder_hall_polarity_calibration" => AxisState::EncoderHallPolarityCalibration,
            "encoder_hall_phase_calibration" => AxisState::EncoderHallPhaseCalibration,
            "anticogging_calibration" => AxisState::AnticoggingCalibration,
            _ => {
                return Err(ProtocolError::InvalidName {
                    kind: "AxisState",
                    name: s.to_string(),
                });
            },
        };
        Ok(state)
    }
}

/// 控制模式（0x0B 指令）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u32)]
pub enum ControlMode {
    VoltageControl = 0,
    TorqueControl = 1,
    VelocityControl = 2,
    #[default]
    PositionControl = 3,
}

impl FromStr for ControlMode {
    type Err = ProtocolError;

    /// 接受 `"position_control"` / `"velocity_control"` / `"torque_control"` / `"voltage_control"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "voltage_control" => Ok(ControlMode::VoltageControl),
            "torque_control" => Ok(ControlMode::TorqueControl),
            "velocity_control" => Ok(ControlMode::VelocityControl),
            "position_control" => Ok(ControlMode::PositionControl),
            _ => Err(ProtocolError::InvalidName {
                kind: "ControlMode",
                name: s.to_string(),
            }),
        }
    }
}

/// 输入模式（0x0B 指令）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u32)]
pub enum InputMode {
    Inactive = 0,
    /// 指令直通（默认）
    #[default]
    Passthrough = 1,
    VelRamp = 2,
    PosFilter = 3,
    MixChannels = 4,
    TrapTraj = 5,
    TorqueRamp = 6,
    Mirror = 7,
    Tuning = 8,
}

// ============================================================================
// 控制帧 trait
// ============================================================================

/// 控制指令：固定命令码 + 小端载荷
///
/// 编码永远不会失败：节点地址已在 `NodeId` 构造时校验，载荷宽度由类型决定。
pub trait Command {
    /// 命令码（仲裁 ID 低 5 位）
    const CODE: u8;

    /// 写入载荷，返回有效长度
    fn encode(&self, buf: &mut [u8; 8]) -> usize;

    /// 转换为 CAN 帧
    fn to_frame(&self, node: NodeId) -> OdriveFrame {
        let mut buf = [0u8; 8];
        let len = self.encode(&mut buf);
        OdriveFrame::new(arbitration_id(node, Self::CODE), &buf[..len])
    }
}

// ============================================================================
// 控制帧结构体
// ============================================================================

/// 急停 (0x02)，空载荷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EstopCommand;

impl Command for EstopCommand {
    const CODE: u8 = CMD_ESTOP;

    fn encode(&self, _buf: &mut [u8; 8]) -> usize {
        0
    }
}

/// 重启 (0x16)，空载荷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebootCommand;

impl Command for RebootCommand {
    const CODE: u8 = CMD_REBOOT;

    fn encode(&self, _buf: &mut [u8; 8]) -> usize {
        0
    }
}

/// 设置轴状态 (0x07)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetAxisStateCommand {
    pub axis_state: AxisState, // Byte 0-3: u32
}

impl SetAxisStateCommand {
    pub fn new(axis_state: AxisState) -> Self {
        Self { axis_state }
    }

    /// 进入闭环控制
    pub fn closed_loop() -> Self {
        Self::new(AxisState::ClosedLoopControl)
    }
}

impl Command for SetAxisStateCommand {
    const CODE: u8 = CMD_SET_AXIS_STATE;

    fn encode(&self, buf: &mut [u8; 8]) -> usize {
        buf[0..4].copy_from_slice(&(self.axis_state.as_u8() as u32).to_le_bytes());
        4
    }
}

impl TryFrom<OdriveFrame> for SetAxisStateCommand {
    type Error = ProtocolError;

    fn try_from(frame: OdriveFrame) -> Result<Self, Self::Error> {
        let data = expect_payload(&frame, Self::CODE, 4)?;
        let raw = read_u32_le(data, 0);
        let state = u8::try_from(raw).map_err(|_| ProtocolError::InvalidValue {
            field: "AxisState".to_string(),
            value: raw,
        })?;
        Ok(Self::new(AxisState::from(state)))
    }
}

/// 设置控制器模式 (0x0B)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetControllerModeCommand {
    pub control_mode: ControlMode, // Byte 0-3
    pub input_mode: InputMode,     // Byte 4-7
}

impl SetControllerModeCommand {
    pub fn new(control_mode: ControlMode, input_mode: InputMode) -> Self {
        Self {
            control_mode,
            input_mode,
        }
    }
}

impl Command for SetControllerModeCommand {
    const CODE: u8 = CMD_SET_CONTROLLER_MODE;

    fn encode(&self, buf: &mut [u8; 8]) -> usize {
        buf[0..4].copy_from_slice(&u32::from(self.control_mode).to_le_bytes());
        buf[4..8].copy_from_slice(&u32::from(self.input_mode).to_le_bytes());
        8
    }
}

impl TryFrom<OdriveFrame> for SetControllerModeCommand {
    type Error = ProtocolError;

    fn try_from(frame: OdriveFrame) -> Result<Self, Self::Error> {
        let data = expect_payload(&frame, Self::CODE, 8)?;
        let control_raw = read_u32_le(data, 0);
        let input_raw = read_u32_le(data, 4);
        let control_mode =
            ControlMode::try_from(control_raw).map_err(|_| ProtocolError::InvalidValue {
                field: "ControlMode".to_string(),
                value: control_raw,
            })?;
        let input_mode =
            InputMode::try_from(input_raw).map_err(|_| ProtocolError::InvalidValue {
                field: "InputMode".to_string(),
                value: input_raw,
            })?;
        Ok(Self::new(control_mode, input_mode))
    }
}

/// 位置指令 (0x0C)
///
/// 前馈项是原始 i16，单位换算由节点固件配置决定，这里不做缩放。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SetInputPosCommand {
    pub position: f32,    // Byte 0-3: 圈数
    pub velocity_ff: i16, // Byte 4-5
    pub torque_ff: i16,   // Byte 6-7
}

impl SetInputPosCommand {
    pub fn new(position: f32) -> Self {
        Self {
            position,
            velocity_ff: 0,
            torque_ff: 0,
        }
    }

    pub fn with_feedforward(position: f32, velocity_ff: i16, torque_ff: i16) -> Self {
        Self {
            position,
            velocity_ff,
            torque_ff,
        }
    }
}

impl Command for SetInputPosCommand {
    const CODE: u8 = CMD_SET_INPUT_POS;

    fn encode(&self, buf: &mut [u8; 8]) -> usize {
        buf[0..4].copy_from_slice(&self.position.to_le_bytes());
        buf[4..6].copy_from_slice(&self.velocity_ff.to_le_bytes());
        buf[6..8].copy_from_slice(&self.torque_ff.to_le_bytes());
        8
    }
}

impl TryFrom<OdriveFrame> for SetInputPosCommand {
    type Error = ProtocolError;

    fn try_from(frame: OdriveFrame) -> Result<Self, Self::Error> {
        let data = expect_payload(&frame, Self::CODE, 8)?;
        Ok(Self {
            position: read_f32_le(data, 0),
            velocity_ff: read_i16_le(data, 4),
            torque_ff: read_i16_le(data, 6),
        })
    }
}

/// 速度指令 (0x0D)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SetInputVelCommand {
    pub velocity: f32,  // Byte 0-3: 圈/秒
    pub torque_ff: f32, // Byte 4-7: N·m
}

impl SetInputVelCommand {
    pub fn new(velocity: f32, torque_ff: f32) -> Self {
        Self {
            velocity,
            torque_ff,
        }
    }
}

impl Command for SetInputVelCommand {
    const CODE: u8 = CMD_SET_INPUT_VEL;

    fn encode(&self, buf: &mut [u8; 8]) -> usize {
        buf[0..4].copy_from_slice(&self.velocity.to_le_bytes());
        buf[4..8].copy_from_slice(&self.torque_ff.to_le_bytes());
        8
    }
}

impl TryFrom<OdriveFrame> for SetInputVelCommand {
    type Error = ProtocolError;

    fn try_from(frame: OdriveFrame) -> Result<Self, Self::Error> {
        let data = expect_payload(&frame, Self::CODE, 8)?;
        Ok(Self::new(read_f32_le(data, 0), read_f32_le(data, 4)))
    }
}

/// 力矩指令 (0x0E)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SetInputTorqueCommand {
    pub torque: f32, // Byte 0-3: N·m
}

impl SetInputTorqueCommand {
    pub fn new(torque: f32) -> Self {
        Self { torque }
    }
}

impl Command for SetInputTorqueCommand {
    const CODE: u8 = CMD_SET_INPUT_TORQUE;

    fn encode(&self, buf: &mut [u8; 8]) -> usize {
        buf[0..4].copy_from_slice(&self.torque.to_le_bytes());
        4
    }
}

impl TryFrom<OdriveFrame> for SetInputTorqueCommand {
    type Error = ProtocolError;

    fn try_from(frame: OdriveFrame) -> Result<Self, Self::Error> {
        let data = expect_payload(&frame, Self::CODE, 4)?;
        Ok(Self::new(read_f32_le(data, 0)))
    }
}

/// 速度/电流限制 (0x0F)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SetLimitsCommand {
    pub velocity_limit: f32, // Byte 0-3: 圈/秒
    pub current_limit: f32,  // Byte 4-7: A
}

impl SetLimitsCommand {
    pub fn new(velocity_limit: f32, current_limit: f32) -> Self {
        Self {
            velocity_limit,
            current_limit,
        }
    }
}

impl Command for SetLimitsCommand {
    const CODE: u8 = CMD_SET_LIMITS;

    fn encode(&self, buf: &mut [u8; 8]) -> usize {
        buf[0..4].copy_from_slice(&self.velocity_limit.to_le_bytes());
        buf[4..8].copy_from_slice(&self.current_limit.to_le_bytes());
        8
    }
}

/// 清除错误 (0x18)
///
/// `identify = true` 时节点在清错后闪烁 LED，便于在总线上辨认设备。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearErrorsCommand {
    pub identify: bool, // Byte 0
}

impl ClearErrorsCommand {
    pub fn new(identify: bool) -> Self {
        Self { identify }
    }
}

impl Command for ClearErrorsCommand {
    const CODE: u8 = CMD_CLEAR_ERRORS;

    fn encode(&self, buf: &mut [u8; 8]) -> usize {
        buf[0] = self.identify as u8;
        1
    }
}

impl TryFrom<OdriveFrame> for ClearErrorsCommand {
    type Error = ProtocolError;

    fn try_from(frame: OdriveFrame) -> Result<Self, Self::Error> {
        // 旧固件发空帧，同样视为不闪灯
        if frame.command_code() == Self::CODE && frame.data_slice().is_empty() {
            return Ok(Self::new(false));
        }
        let data = expect_payload(&frame, Self::CODE, 1)?;
        Ok(Self::new(data[0] != 0))
    }
}

/// 设置绝对位置 (0x19)
///
/// 把当前编码器读数重新定义为给定位置（常用于标定零点）。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SetAbsolutePositionCommand {
    pub position: f32, // Byte 0-3: 圈数
}

impl SetAbsolutePositionCommand {
    pub fn new(position: f32) -> Self {
        Self { position }
    }
}

impl Command for SetAbsolutePositionCommand {
    const CODE: u8 = CMD_SET_ABSOLUTE_POSITION;

    fn encode(&self, buf: &mut [u8; 8]) -> usize {
        buf[0..4].copy_from_slice(&self.position.to_le_bytes());
        4
    }
}

impl TryFrom<OdriveFrame> for SetAbsolutePositionCommand {
    type Error = ProtocolError;

    fn try_from(frame: OdriveFrame) -> Result<Self, Self::Error> {
        let data = expect_payload(&frame, Self::CODE, 4)?;
        Ok(Self::new(read_f32_le(data, 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u8) -> NodeId {
        NodeId::new(id).unwrap()
    }

    // ========================================================================
    // 枚举测试
    // ========================================================================

    #[test]
    fn test_axis_state_from_u8() {
        assert_eq!(AxisState::from(1), AxisState::Idle);
        assert_eq!(AxisState::from(8), AxisState::ClosedLoopControl);
        assert_eq!(AxisState::from(5), AxisState::Unknown(5));
        assert_eq!(AxisState::from(200), AxisState::Unknown(200));
    }

    #[test]
    fn test_axis_state_as_u8_roundtrip() {
        for value in 0..=20u8 {
            assert_eq!(AxisState::from(value).as_u8(), value);
        }
    }

    #[test]
    fn test_axis_state_from_name() {
        assert_eq!(
            "closed_loop_control".parse::<AxisState>().unwrap(),
            AxisState::ClosedLoopControl
        );
        assert_eq!("idle".parse::<AxisState>().unwrap(), AxisState::Idle);
        assert!("closed_loop".parse::<AxisState>().is_err());
    }

    #[test]
    fn test_control_mode_from_name() {
        assert_eq!(
            "torque_control".parse::<ControlMode>().unwrap(),
            ControlMode::TorqueControl
        );
        assert_eq!(
            "position_control".parse::<ControlMode>().unwrap(),
            ControlMode::PositionControl
        );
        assert!(matches!(
            "torque".parse::<ControlMode>(),
            Err(ProtocolError::InvalidName { kind: "ControlMode", .. })
        ));
    }

    #[test]
    fn test_control_mode_invalid_values() {
        assert!(ControlMode::try_from(4u32).is_err());
        assert!(InputMode::try_from(9u32).is_err());
    }

    // ========================================================================
    // 编码测试
    // ========================================================================

    #[test]
    fn test_set_torque_encoding() {
        let frame = SetInputTorqueCommand::new(0.10).to_frame(node(1));
        assert_eq!(frame.id, (1 << 5) | 0x0E);
        assert_eq!(frame.data_slice(), &0.10f32.to_le_bytes());
        assert!(!frame.is_remote);
    }

    #[test]
    fn test_set_axis_state_encoding() {
        let frame = SetAxisStateCommand::closed_loop().to_frame(node(0));
        assert_eq!(frame.id, 0x07);
        assert_eq!(frame.data_slice(), &[8, 0, 0, 0]);
    }

    #[test]
    fn test_set_position_default_feedforward() {
        let frame = SetInputPosCommand::new(100.0).to_frame(node(2));
        assert_eq!(frame.id, (2 << 5) | 0x0C);
        let data = frame.data_slice();
        assert_eq!(data.len(), 8);
        assert_eq!(&data[0..4], &100.0f32.to_le_bytes());
        assert_eq!(&data[4..8], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_set_velocity_encoding() {
        let frame = SetInputVelCommand::new(1.0, 0.0).to_frame(node(3));
        assert_eq!(frame.command_code(), CMD_SET_INPUT_VEL);
        assert_eq!(&frame.data_slice()[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&frame.data_slice()[4..8], &0.0f32.to_le_bytes());
    }

    #[test]
    fn test_empty_payload_commands() {
        let estop = EstopCommand.to_frame(node(4));
        assert_eq!(estop.id, (4 << 5) | 0x02);
        assert_eq!(estop.len, 0);

        let reboot = RebootCommand.to_frame(node(4));
        assert_eq!(reboot.command_code(), CMD_REBOOT);
        assert!(reboot.data_slice().is_empty());
    }

    #[test]
    fn test_clear_errors_identify_flag() {
        let frame = ClearErrorsCommand::new(true).to_frame(node(0));
        assert_eq!(frame.data_slice(), &[1]);
        let frame = ClearErrorsCommand::new(false).to_frame(node(0));
        assert_eq!(frame.data_slice(), &[0]);
    }

    #[test]
    fn test_clear_errors_accepts_empty_frame() {
        let frame = OdriveFrame::new(CMD_CLEAR_ERRORS as u16, &[]);
        assert_eq!(
            ClearErrorsCommand::try_from(frame).unwrap(),
            ClearErrorsCommand::new(false)
        );
    }

    #[test]
    fn test_controller_mode_encoding() {
        let cmd = SetControllerModeCommand::new(ControlMode::TorqueControl, InputMode::Passthrough);
        let frame = cmd.to_frame(node(0));
        assert_eq!(frame.data_slice(), &[1, 0, 0, 0, 1, 0, 0, 0]);
        assert_eq!(SetControllerModeCommand::try_from(frame).unwrap(), cmd);
    }

    #[test]
    fn test_set_limits_encoding() {
        let frame = SetLimitsCommand::new(10.0, 20.0).to_frame(node(0));
        assert_eq!(frame.command_code(), CMD_SET_LIMITS);
        assert_eq!(&frame.data_slice()[4..8], &20.0f32.to_le_bytes());
    }

    // ========================================================================
    // 解码错误测试
    // ========================================================================

    #[test]
    fn test_decode_wrong_command_code() {
        let frame = SetInputTorqueCommand::new(1.0).to_frame(node(0));
        assert_eq!(
            SetAbsolutePositionCommand::try_from(frame).unwrap_err(),
            ProtocolError::UnexpectedCommand {
                expected: CMD_SET_ABSOLUTE_POSITION,
                actual: CMD_SET_INPUT_TORQUE,
            }
        );
    }

    #[test]
    fn test_decode_wrong_length() {
        let frame = OdriveFrame::new(CMD_SET_INPUT_POS as u16, &[0, 0, 0, 0]);
        assert_eq!(
            SetInputPosCommand::try_from(frame).unwrap_err(),
            ProtocolError::MalformedFrame {
                code: CMD_SET_INPUT_POS,
                expected: 8,
                actual: 4,
            }
        );
    }

    #[test]
    fn test_set_axis_state_out_of_range() {
        let frame = OdriveFrame::new(CMD_SET_AXIS_STATE as u16, &[0x00, 0x01, 0, 0]);
        assert!(matches!(
            SetAxisStateCommand::try_from(frame),
            Err(ProtocolError::InvalidValue { value: 256, .. })
        ));
    }
}
