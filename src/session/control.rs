use serde::Serialize;
use std::fmt;
use std::sync::mpsc::SyncSender;

use super::debug::DebugHandle;
use crate::nes::cpu::CpuRegisters;
use crate::nes::ppu::PpuRegisters;

/// Commands the frontend sends to a running clock. They are only consumed
/// between instruction bursts, never mid-instruction.
pub enum ControlCommand {
    Pause,
    Unpause,
    /// Run until the next completed frame, then pause.
    StepFrame,
    Turbo,
    NormalSpeed,
    SpeedUp,
    SpeedDown,
    ToggleDebug,
    RequestDebugHandle(SyncSender<DebugHandle>),
    RequestInfo(SyncSender<MachineInfo>),
}

impl fmt::Debug for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlCommand::Pause => "Pause",
            ControlCommand::Unpause => "Unpause",
            ControlCommand::StepFrame => "StepFrame",
            ControlCommand::Turbo => "Turbo",
            ControlCommand::NormalSpeed => "NormalSpeed",
            ControlCommand::SpeedUp => "SpeedUp",
            ControlCommand::SpeedDown => "SpeedDown",
            ControlCommand::ToggleDebug => "ToggleDebug",
            ControlCommand::RequestDebugHandle(_) => "RequestDebugHandle",
            ControlCommand::RequestInfo(_) => "RequestInfo",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClockState {
    Running,
    Paused,
    SingleStepping,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Speed {
    Multiplier(f64),
    /// No pacing: instructions run back to back.
    Unlimited,
}

impl Speed {
    const LADDER: [f64; 7] = [0.125, 0.25, 0.5, 1.0, 2.0, 4.0, 8.0];

    pub fn faster(self) -> Self {
        match self {
            Speed::Multiplier(m) => Self::LADDER
                .iter()
                .copied()
                .find(|&step| step > m)
                .map_or(Speed::Multiplier(m), Speed::Multiplier),
            Speed::Unlimited => Speed::Unlimited,
        }
    }

    pub fn slower(self) -> Self {
        match self {
            Speed::Multiplier(m) => Self::LADDER
                .iter()
                .rev()
                .copied()
                .find(|&step| step < m)
                .map_or(Speed::Multiplier(m), Speed::Multiplier),
            Speed::Unlimited => Speed::Multiplier(1.0),
        }
    }
}

/// How a run ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The configured cycle budget was used up.
    BudgetExhausted { cycles: u64 },
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HandoffStats {
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub audio_blocks_delivered: u64,
    pub audio_blocks_dropped: u64,
    pub listener_drops: u64,
}

/// Point-in-time view of a running machine, answered on request.
#[derive(Debug, Clone, Serialize)]
pub struct MachineInfo {
    pub description: String,
    pub state: ClockState,
    pub speed: Speed,
    pub cycles: u64,
    pub cpu: CpuRegisters,
    pub ppu: Option<PpuRegisters>,
    pub debug_overlay: bool,
    pub breakpoint_hit: Option<u16>,
    pub handoff: HandoffStats,
    pub recent_events: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_ladder_saturates() {
        let mut speed = Speed::Multiplier(1.0);
        for _ in 0..10 {
            speed = speed.faster();
        }
        assert_eq!(speed, Speed::Multiplier(8.0));
        speed = Speed::Multiplier(1.0).slower().slower();
        assert_eq!(speed, Speed::Multiplier(0.25));
        assert_eq!(Speed::Unlimited.slower(), Speed::Multiplier(1.0));
    }
}
