use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use super::cancel::CancelToken;
use super::control::{ClockState, ControlCommand, HandoffStats, MachineInfo, RunExit, Speed};
use super::debug::DebugHandle;
use super::handoff::{AudioProducer, FrameProducer, Listeners, MediaEvent};
use crate::config::EmulatorConfig;
use crate::nes::StepOutcome;
use crate::nes::apu::CPU_CLOCK_HZ;
use crate::nes::controller::InputPort;
use crate::nes::cpu::CpuRegisters;
use crate::nes::error::EmuError;
use crate::nes::ppu::PpuRegisters;
use crate::nes::screen::VirtualScreen;

/// CPU cycles in one NTSC frame, used to bound a frame step on machines
/// that never complete a frame.
const CYCLES_PER_FRAME: u64 = 29_781;
const RECENT_EVENTS_IN_INFO: usize = 16;

/// Anything the clock can drive one instruction at a time.
pub trait Machine: Send {
    fn step(&mut self, screen: Option<&mut VirtualScreen>) -> Result<StepOutcome, EmuError>;
    fn registers(&self) -> CpuRegisters;
    fn ppu_registers(&self) -> Option<PpuRegisters>;
    fn set_debug_overlay(&mut self, enabled: bool);
    fn debug_overlay(&self) -> bool;
    fn recent_events(&self, limit: usize) -> Vec<String>;
    fn description(&self) -> String;
    fn input_port(&self) -> InputPort;
    fn has_video(&self) -> bool;
}

/// The clock's connections to the outside world for one run.
pub struct ClockPorts {
    pub commands: Receiver<ControlCommand>,
    pub frames: FrameProducer,
    pub audio: AudioProducer,
    pub listeners: Listeners,
    pub cancel: CancelToken,
    pub debug: DebugHandle,
}

/// Paces a machine against host ticks and routes what it produces.
pub struct MasterClock {
    machine: Box<dyn Machine>,
    ports: ClockPorts,
    state: ClockState,
    speed: Speed,
    budget: u64,
    tick: Duration,
    quota_per_tick: f64,
    cap_ticks: f64,
    poll: Duration,
    pending: f64,
    cycles: u64,
    step_started_at: u64,
    breakpoints: BTreeSet<u16>,
    breakpoints_seen: u64,
    breakpoint_hit: Option<u16>,
    skip_breakpoint_once: bool,
    listener_drops: u64,
}

impl MasterClock {
    pub fn new(machine: Box<dyn Machine>, config: &EmulatorConfig, ports: ClockPorts) -> Self {
        let tick_hz = config.host_tick_hz.max(1) as f64;
        Self {
            machine,
            ports,
            state: ClockState::Running,
            speed: Speed::Multiplier(1.0),
            budget: config.max_cycles,
            tick: Duration::from_secs_f64(1.0 / tick_hz),
            quota_per_tick: CPU_CLOCK_HZ / tick_hz,
            cap_ticks: config.pending_cycle_cap_ticks.max(1) as f64,
            poll: Duration::from_millis(config.frame_wait_poll_ms.max(1)),
            pending: 0.0,
            cycles: 0,
            step_started_at: 0,
            breakpoints: BTreeSet::new(),
            breakpoints_seen: 0,
            breakpoint_hit: None,
            skip_breakpoint_once: false,
            listener_drops: 0,
        }
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn speed(&self) -> Speed {
        self.speed
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn machine(&self) -> &dyn Machine {
        self.machine.as_ref()
    }

    /// Runs until the budget is spent, the run is cancelled or the machine
    /// faults. The state is `Terminated` afterwards in every case.
    pub fn run(&mut self) -> Result<RunExit, EmuError> {
        info!(machine = %self.machine.description(), budget = self.budget, "clock started");
        let result = self.run_loop();
        self.state = ClockState::Terminated;
        self.ports.debug.publish(self.machine.registers());
        match &result {
            Ok(exit) => info!(?exit, cycles = self.cycles, "clock stopped"),
            Err(err) => error!(%err, cycles = self.cycles, "emulation terminated"),
        }
        result
    }

    fn budget_spent(&self) -> bool {
        self.budget > 0 && self.cycles >= self.budget
    }

    fn run_loop(&mut self) -> Result<RunExit, EmuError> {
        let mut next_tick = Instant::now() + self.tick;
        loop {
            if self.budget_spent() {
                return Ok(RunExit::BudgetExhausted {
                    cycles: self.cycles,
                });
            }
            if self.ports.cancel.is_cancelled() {
                return Ok(RunExit::Cancelled);
            }

            if !self.wait(&mut next_tick) {
                continue;
            }

            self.ports
                .debug
                .sync(&mut self.breakpoints_seen, &mut self.breakpoints);
            if let Some(exit) = self.run_pending()? {
                return Ok(exit);
            }
            self.ports.debug.publish(self.machine.registers());
        }
    }

    /// Blocks until a host tick, a command or cancellation. Returns true
    /// when cycles were granted.
    fn wait(&mut self, next_tick: &mut Instant) -> bool {
        if self.state == ClockState::Paused {
            match self.ports.commands.recv_timeout(self.poll) {
                Ok(command) => self.apply(command),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => std::thread::sleep(self.poll),
            }
            *next_tick = Instant::now() + self.tick;
            return false;
        }

        // A clock running behind never reaches the timed receive below.
        loop {
            match self.ports.commands.try_recv() {
                Ok(command) => self.apply(command),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        if self.state == ClockState::Paused {
            return false;
        }

        match self.speed {
            Speed::Unlimited => {
                self.pending = self.pending.max(0.0) + 1.0;
                true
            }
            Speed::Multiplier(multiplier) => {
                let now = Instant::now();
                if now < *next_tick {
                    match self.ports.commands.recv_timeout(*next_tick - now) {
                        Ok(command) => {
                            self.apply(command);
                            return false;
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => {
                            std::thread::sleep(next_tick.saturating_duration_since(Instant::now()));
                        }
                    }
                }
                *next_tick += self.tick;
                let now = Instant::now();
                if *next_tick < now {
                    // The host stalled; do not replay the missed ticks.
                    *next_tick = now + self.tick;
                }

                let grant = self.quota_per_tick * multiplier;
                self.pending = (self.pending + grant).min(grant * self.cap_ticks);
                true
            }
        }
    }

    /// Executes instructions while granted cycles remain.
    fn run_pending(&mut self) -> Result<Option<RunExit>, EmuError> {
        while self.pending > 0.0
            && matches!(self.state, ClockState::Running | ClockState::SingleStepping)
        {
            let pc = self.machine.registers().pc;
            if !self.breakpoints.is_empty()
                && !std::mem::take(&mut self.skip_breakpoint_once)
                && self.breakpoints.contains(&pc)
            {
                debug!(pc = format_args!("{pc:04X}"), "breakpoint hit");
                self.breakpoint_hit = Some(pc);
                self.state = ClockState::Paused;
                break;
            }
            self.skip_breakpoint_once = false;

            let outcome = if self.machine.has_video() {
                let Some(screen) = self.ports.frames.acquire(&self.ports.cancel, self.poll) else {
                    return Ok(Some(RunExit::Cancelled));
                };
                self.machine.step(Some(screen))?
            } else {
                self.machine.step(None)?
            };

            self.pending -= outcome.cycles as f64;
            self.cycles += outcome.cycles as u64;

            if outcome.frame_completed {
                self.deliver_frame();
                if self.state == ClockState::SingleStepping {
                    self.state = ClockState::Paused;
                }
            } else if self.state == ClockState::SingleStepping
                && !self.machine.has_video()
                && self.cycles - self.step_started_at >= CYCLES_PER_FRAME
            {
                self.state = ClockState::Paused;
            }
            for block in outcome.audio {
                self.deliver_audio(block);
            }

            if self.budget_spent() {
                return Ok(Some(RunExit::BudgetExhausted {
                    cycles: self.cycles,
                }));
            }
        }
        Ok(None)
    }

    fn deliver_frame(&mut self) {
        if !self.ports.listeners.is_empty() {
            if let Some(screen) = self.ports.frames.acquire(&self.ports.cancel, self.poll) {
                let event = MediaEvent::Frame {
                    number: screen.frame_number(),
                    pixels: Arc::from(screen.pixels()),
                };
                self.listener_drops += self.ports.listeners.publish(&event);
            }
        }
        self.ports.frames.offer();
    }

    fn deliver_audio(&mut self, block: Vec<f32>) {
        if !self.ports.listeners.is_empty() {
            let event = MediaEvent::Audio(Arc::from(block.as_slice()));
            self.listener_drops += self.ports.listeners.publish(&event);
        }
        self.ports.audio.push(block);
    }

    pub fn apply(&mut self, command: ControlCommand) {
        debug!(?command, state = ?self.state, "control command");
        match command {
            ControlCommand::Pause => self.state = ClockState::Paused,
            ControlCommand::Unpause => self.resume(ClockState::Running),
            ControlCommand::StepFrame => {
                self.step_started_at = self.cycles;
                self.resume(ClockState::SingleStepping);
            }
            ControlCommand::Turbo => self.speed = Speed::Unlimited,
            ControlCommand::NormalSpeed => self.speed = Speed::Multiplier(1.0),
            ControlCommand::SpeedUp => self.speed = self.speed.faster(),
            ControlCommand::SpeedDown => self.speed = self.speed.slower(),
            ControlCommand::ToggleDebug => {
                let enabled = !self.machine.debug_overlay();
                self.machine.set_debug_overlay(enabled);
            }
            ControlCommand::RequestDebugHandle(reply) => {
                self.ports.debug.publish(self.machine.registers());
                let _ = reply.try_send(self.ports.debug.clone());
            }
            ControlCommand::RequestInfo(reply) => {
                let _ = reply.try_send(self.info());
            }
        }
    }

    fn resume(&mut self, state: ClockState) {
        if self.state == ClockState::Terminated {
            return;
        }
        if self.breakpoint_hit.take().is_some() {
            self.skip_breakpoint_once = true;
        }
        self.state = state;
    }

    pub fn info(&self) -> MachineInfo {
        MachineInfo {
            description: self.machine.description(),
            state: self.state,
            speed: self.speed,
            cycles: self.cycles,
            cpu: self.machine.registers(),
            ppu: self.machine.ppu_registers(),
            debug_overlay: self.machine.debug_overlay(),
            breakpoint_hit: self.breakpoint_hit,
            handoff: HandoffStats {
                frames_delivered: self.ports.frames.delivered(),
                frames_dropped: self.ports.frames.dropped(),
                audio_blocks_delivered: self.ports.audio.delivered(),
                audio_blocks_dropped: self.ports.audio.dropped(),
                listener_drops: self.listener_drops,
            },
            recent_events: self.machine.recent_events(RECENT_EVENTS_IN_INFO),
        }
    }
}
