//! 命令码常量定义和仲裁 ID 组合
//!
//! CANSimple 没有固定的 CAN ID 表，而是把节点地址和命令码拼进同一个 11-bit ID。

use crate::NodeId;

/// 命令码占用的位数（仲裁 ID 低位）
pub const COMMAND_CODE_BITS: u32 = 5;

/// 命令码掩码
pub const COMMAND_CODE_MASK: u32 = 0x1F;

/// 节点地址最大值（11 - 5 = 6 位）
pub const MAX_NODE_ID: u8 = 0x3F;

// ============================================================================
// 控制命令码（主机 → 节点）
// ============================================================================

/// 急停
pub const CMD_ESTOP: u8 = 0x02;

/// 设置轴状态（u32 AxisState）
pub const CMD_SET_AXIS_STATE: u8 = 0x07;

/// 设置控制器模式（u32 ControlMode + u32 InputMode）
pub const CMD_SET_CONTROLLER_MODE: u8 = 0x0B;

/// 位置指令（f32 + i16 + i16）
pub const CMD_SET_INPUT_POS: u8 = 0x0C;

/// 速度指令（f32 + f32）
pub const CMD_SET_INPUT_VEL: u8 = 0x0D;

/// 力矩指令（f32）
pub const CMD_SET_INPUT_TORQUE: u8 = 0x0E;

/// 速度/电流限制（f32 + f32）
pub const CMD_SET_LIMITS: u8 = 0x0F;

/// 重启
pub const CMD_REBOOT: u8 = 0x16;

/// 清除错误（u8 identify）
pub const CMD_CLEAR_ERRORS: u8 = 0x18;

/// 设置绝对位置（f32）
pub const CMD_SET_ABSOLUTE_POSITION: u8 = 0x19;

// ============================================================================
// 遥测命令码（节点 → 主机，也可用 RTR 请求）
// ============================================================================

/// 心跳（u32 error + u8 state + u8 result + u8 traj_done）
pub const CMD_HEARTBEAT: u8 = 0x01;

/// 编码器估计（f32 pos + f32 vel）
pub const CMD_GET_ENCODER_ESTIMATES: u8 = 0x09;

/// Iq 设定/测量（f32 + f32）
pub const CMD_GET_IQ: u8 = 0x14;

/// 母线电压/电流（f32 + f32）
pub const CMD_GET_BUS_VOLTAGE_CURRENT: u8 = 0x17;

/// 力矩目标/估计（f32 + f32）
pub const CMD_GET_TORQUES: u8 = 0x1C;

/// 电功率/机械功率（f32 + f32）
pub const CMD_GET_POWERS: u8 = 0x1D;

/// 组合仲裁 ID：`node_id << 5 | command_code`
pub fn arbitration_id(node: NodeId, command_code: u8) -> u16 {
    ((node.get() as u16) << COMMAND_CODE_BITS) | (command_code as u16 & COMMAND_CODE_MASK as u16)
}

/// 拆分仲裁 ID，返回 `(node_id, command_code)`
pub fn split_arbitration_id(id: u32) -> (u8, u8) {
    let node = ((id & 0x7FF) >> COMMAND_CODE_BITS) as u8;
    let code = (id & COMMAND_CODE_MASK) as u8;
    (node, code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arbitration_id_layout() {
        let node = NodeId::new(1).unwrap();
        assert_eq!(arbitration_id(node, CMD_SET_INPUT_TORQUE), 0x02E);
        assert_eq!(arbitration_id(node, CMD_HEARTBEAT), 0x021);
    }

    #[test]
    fn test_arbitration_id_max_node_fits_11_bits() {
        let node = NodeId::new(MAX_NODE_ID).unwrap();
        let id = arbitration_id(node, 0x1F);
        assert_eq!(id, 0x7FF);
    }

    #[test]
    fn test_split_roundtrip() {
        for node in 0..=MAX_NODE_ID {
            for code in [CMD_HEARTBEAT, CMD_SET_AXIS_STATE, CMD_GET_POWERS] {
                let id = arbitration_id(NodeId::new(node).unwrap(), code);
                assert_eq!(split_arbitration_id(id as u32), (node, code));
            }
        }
    }
}
