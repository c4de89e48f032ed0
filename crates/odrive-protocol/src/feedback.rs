//! 遥测帧定义与解码表
//!
//! 节点周期性发送（或在收到 RTR 请求后回复）的遥测帧。
//! 解码按命令码查表分发：未知命令码直接忽略，已知命令码长度不符则返回
//! [`ProtocolError::MalformedFrame`]。

use crate::control::AxisState;
use crate::{NodeId, OdriveFrame, ProtocolError, ids::*, read_f32_le, read_u32_le};

// ============================================================================
// 遥测类别
// ============================================================================

/// 遥测类别（每个类别对应一个命令码）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TelemetryKind {
    Heartbeat,
    EncoderEstimates,
    Torques,
    BusVoltageCurrent,
    Iq,
    Powers,
}

/// 解码表：命令码 → 遥测类别
///
/// 新增遥测类别时只需要在这里登记，`decode_telemetry` 不需要改动。
pub const TELEMETRY_TABLE: [(u8, TelemetryKind); 6] = [
    (CMD_HEARTBEAT, TelemetryKind::Heartbeat),
    (CMD_GET_ENCODER_ESTIMATES, TelemetryKind::EncoderEstimates),
    (CMD_GET_TORQUES, TelemetryKind::Torques),
    (CMD_GET_BUS_VOLTAGE_CURRENT, TelemetryKind::BusVoltageCurrent),
    (CMD_GET_IQ, TelemetryKind::Iq),
    (CMD_GET_POWERS, TelemetryKind::Powers),
];

impl TelemetryKind {
    /// 按命令码查表
    pub fn from_code(code: u8) -> Option<Self> {
        TELEMETRY_TABLE
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, kind)| *kind)
    }

    /// 对应的命令码
    pub fn code(self) -> u8 {
        match self {
            TelemetryKind::Heartbeat => CMD_HEARTBEAT,
            TelemetryKind::EncoderEstimates => CMD_GET_ENCODER_ESTIMATES,
            TelemetryKind::Torques => CMD_GET_TORQUES,
            TelemetryKind::BusVoltageCurrent => CMD_GET_BUS_VOLTAGE_CURRENT,
            TelemetryKind::Iq => CMD_GET_IQ,
            TelemetryKind::Powers => CMD_GET_POWERS,
        }
    }

    /// 协议定义的载荷长度
    ///
    /// 心跳只有前 7 字节有意义，第 8 字节可有可无。
    pub fn payload_len(self) -> usize {
        match self {
            TelemetryKind::Heartbeat => 7,
            _ => 8,
        }
    }

    fn accepts_len(self, len: usize) -> bool {
        match self {
            TelemetryKind::Heartbeat => (7..=8).contains(&len),
            _ => len == 8,
        }
    }

    /// 构建 RTR 请求帧：请求节点回复此类遥测
    pub fn request_frame(self, node: NodeId) -> OdriveFrame {
        OdriveFrame::new_remote(arbitration_id(node, self.code()), 8)
    }
}

// ============================================================================
// 遥测数据
// ============================================================================

/// 心跳 (0x01)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Heartbeat {
    pub axis_error: u32,       // Byte 0-3
    pub axis_state: AxisState, // Byte 4
    pub procedure_result: u8,  // Byte 5
    pub trajectory_done: bool, // Byte 6
}

impl Heartbeat {
    /// 轴是否报错
    pub fn has_error(&self) -> bool {
        self.axis_error != 0
    }
}

/// 解码后的遥测值
///
/// 除心跳外，每个类别都是一对 f32，对应缓存中一对同时更新的字段。
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Telemetry {
    Heartbeat(Heartbeat),
    /// 位置（圈）、速度（圈/秒）
    EncoderEstimates { position: f32, velocity: f32 },
    /// 力矩目标、力矩估计（N·m）
    Torques { target: f32, estimate: f32 },
    /// 母线电压（V）、母线电流（A）
    BusVoltageCurrent { voltage: f32, current: f32 },
    /// Iq 设定值、Iq 测量值（A）
    Iq { setpoint: f32, measured: f32 },
    /// 电功率、机械功率（W）
    Powers { electrical: f32, mechanical: f32 },
}

impl Telemetry {
    pub fn kind(&self) -> TelemetryKind {
        match self {
            Telemetry::Heartbeat(_) => TelemetryKind::Heartbeat,
            Telemetry::EncoderEstimates { .. } => TelemetryKind::EncoderEstimates,
            Telemetry::Torques { .. } => TelemetryKind::Torques,
            Telemetry::BusVoltageCurrent { .. } => TelemetryKind::BusVoltageCurrent,
            Telemetry::Iq { .. } => TelemetryKind::Iq,
            Telemetry::Powers { .. } => TelemetryKind::Powers,
        }
    }

    /// 按节点视角编码为遥测帧
    ///
    /// 主机侧不会发送遥测帧，这个方向只给模拟节点和测试使用。
    pub fn to_frame(&self, node: NodeId) -> OdriveFrame {
        let id = arbitration_id(node, self.kind().code());
        match *self {
            Telemetry::Heartbeat(hb) => {
                let mut data = [0u8; 8];
                data[0..4].copy_from_slice(&hb.axis_error.to_le_bytes());
                data[4] = hb.axis_state.as_u8();
                data[5] = hb.procedure_result;
                data[6] = hb.trajectory_done as u8;
                OdriveFrame::new(id, &data)
            },
            Telemetry::EncoderEstimates {
                position: a,
                velocity: b,
            }
            | Telemetry::Torques {
                target: a,
                estimate: b,
            }
            | Telemetry::BusVoltageCurrent {
                voltage: a,
                current: b,
            }
            | Telemetry::Iq {
                setpoint: a,
                measured: b,
            }
            | Telemetry::Powers {
                electrical: a,
                mechanical: b,
            } => OdriveFrame::new(id, &pair_payload(a, b)),
        }
    }
}

fn pair_payload(a: f32, b: f32) -> [u8; 8] {
    let mut data = [0u8; 8];
    data[0..4].copy_from_slice(&a.to_le_bytes());
    data[4..8].copy_from_slice(&b.to_le_bytes());
    data
}

/// 带来源节点的遥测
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryFrame {
    /// 来源节点地址（仲裁 ID 高 6 位）
    pub node_id: u8,
    pub telemetry: Telemetry,
}

/// 解码遥测帧
///
/// # 返回值
/// - `Ok(Some(_))`: 已识别的遥测帧
/// - `Ok(None)`: 未知命令码或 RTR 请求帧（忽略，不是错误）
/// - `Err(ProtocolError::MalformedFrame)`: 已识别的命令码，但载荷长度不符
pub fn decode_telemetry(frame: &OdriveFrame) -> Result<Option<TelemetryFrame>, ProtocolError> {
    if frame.is_remote {
        return Ok(None);
    }

    let code = frame.command_code();
    let Some(kind) = TelemetryKind::from_code(code) else {
        return Ok(None);
    };

    let data = frame.data_slice();
    if !kind.accepts_len(data.len()) {
        return Err(ProtocolError::MalformedFrame {
            code,
            expected: kind.payload_len(),
            actual: data.len(),
        });
    }

    let a = || read_f32_le(data, 0);
    let b = || read_f32_le(data, 4);
    let telemetry = match kind {
        TelemetryKind::Heartbeat => Telemetry::Heartbeat(Heartbeat {
            axis_error: read_u32_le(data, 0),
            axis_state: AxisState::from(data[4]),
            procedure_result: data[5],
            trajectory_done: data[6] != 0,
        }),
        TelemetryKind::EncoderEstimates => Telemetry::EncoderEstimates {
            position: a(),
            velocity: b(),
        },
        TelemetryKind::Torques => Telemetry::Torques {
            target: a(),
            estimate: b(),
        },
        TelemetryKind::BusVoltageCurrent => Telemetry::BusVoltageCurrent {
            voltage: a(),
            current: b(),
        },
        TelemetryKind::Iq => Telemetry::Iq {
            setpoint: a(),
            measured: b(),
        },
        TelemetryKind::Powers => Telemetry::Powers {
            electrical: a(),
            mechanical: b(),
        },
    };

    Ok(Some(TelemetryFrame {
        node_id: frame.node_id(),
        telemetry,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u8) -> NodeId {
        NodeId::new(id).unwrap()
    }

    #[test]
    fn test_table_codes_match_kinds() {
        for (code, kind) in TELEMETRY_TABLE {
            assert_eq!(kind.code(), code);
            assert_eq!(TelemetryKind::from_code(code), Some(kind));
        }
    }

    #[test]
    fn test_decode_encoder_estimates() {
        let mut data = [0u8; 8];
        data[0..4].copy_from_slice(&1.5f32.to_le_bytes());
        data[4..8].copy_from_slice(&0.25f32.to_le_bytes());
        let frame = OdriveFrame::new((1 << 5) | 0x09, &data);

        let decoded = decode_telemetry(&frame).unwrap().unwrap();
        assert_eq!(decoded.node_id, 1);
        assert_eq!(
            decoded.telemetry,
            Telemetry::EncoderEstimates {
                position: 1.5,
                velocity: 0.25
            }
        );
    }

    #[test]
    fn test_decode_heartbeat_seven_bytes() {
        let mut data = [0u8; 7];
        data[0..4].copy_from_slice(&0x0000_0100u32.to_le_bytes());
        data[4] = 8;
        data[5] = 0;
        data[6] = 1;
        let frame = OdriveFrame::new(0x01, &data);

        let decoded = decode_telemetry(&frame).unwrap().unwrap();
        let Telemetry::Heartbeat(hb) = decoded.telemetry else {
            panic!("Expected heartbeat");
        };
        assert_eq!(hb.axis_error, 0x100);
        assert!(hb.has_error());
        assert_eq!(hb.axis_state, AxisState::ClosedLoopControl);
        assert!(hb.trajectory_done);
    }

    #[test]
    fn test_decode_heartbeat_ignores_eighth_byte() {
        let frame = OdriveFrame::new(0x21, &[0, 0, 0, 0, 1, 0, 0, 0xAA]);
        let decoded = decode_telemetry(&frame).unwrap().unwrap();
        assert_eq!(
            decoded.telemetry,
            Telemetry::Heartbeat(Heartbeat {
                axis_error: 0,
                axis_state: AxisState::Idle,
                procedure_result: 0,
                trajectory_done: false,
            })
        );
    }

    #[test]
    fn test_decode_malformed_pair() {
        let frame = OdriveFrame::new((2 << 5) | 0x1C, &[0, 0, 0, 0]);
        assert_eq!(
            decode_telemetry(&frame).unwrap_err(),
            ProtocolError::MalformedFrame {
                code: 0x1C,
                expected: 8,
                actual: 4,
            }
        );
    }

    #[test]
    fn test_decode_malformed_heartbeat() {
        let frame = OdriveFrame::new(0x01, &[0, 0, 0, 0, 8]);
        assert!(matches!(
            decode_telemetry(&frame),
            Err(ProtocolError::MalformedFrame { code: 0x01, .. })
        ));
    }

    #[test]
    fn test_unknown_code_is_ignored() {
        // 0x0E 是控制指令，不在遥测表中
        let frame = OdriveFrame::new((1 << 5) | 0x0E, &[0, 0, 0, 0]);
        assert_eq!(decode_telemetry(&frame).unwrap(), None);
    }

    #[test]
    fn test_remote_request_is_ignored() {
        let frame = TelemetryKind::EncoderEstimates.request_frame(node(1));
        assert!(frame.is_remote);
        assert_eq!(frame.id, (1 << 5) | 0x09);
        assert_eq!(decode_telemetry(&frame).unwrap(), None);
    }

    #[test]
    fn test_telemetry_to_frame_decodes_back() {
        let samples = [
            Telemetry::Torques {
                target: 0.1,
                estimate: 0.09,
            },
            Telemetry::BusVoltageCurrent {
                voltage: 24.0,
                current: 1.5,
            },
            Telemetry::Iq {
                setpoint: 3.3,
                measured: 3.25,
            },
            Telemetry::Powers {
                electrical: 120.0,
                mechanical: 110.0,
            },
            Telemetry::Heartbeat(Heartbeat {
                axis_error: 0,
                axis_state: AxisState::ClosedLoopControl,
                procedure_result: 0,
                trajectory_done: true,
            }),
        ];
        for telemetry in samples {
            let frame = telemetry.to_frame(node(5));
            let decoded = decode_telemetry(&frame).unwrap().unwrap();
            assert_eq!(decoded.node_id, 5);
            assert_eq!(decoded.telemetry, telemetry);
        }
    }
}
