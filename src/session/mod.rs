pub mod cancel;
pub mod clock;
pub mod control;
pub mod debug;
pub mod handoff;

use anyhow::{Context, Result, anyhow};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use std::{fs, path::Path};
use tracing::{info, warn};

pub use cancel::CancelToken;
pub use clock::{ClockPorts, Machine, MasterClock};
pub use control::{ClockState, ControlCommand, HandoffStats, MachineInfo, RunExit, Speed};
pub use debug::DebugHandle;
pub use handoff::{AudioConsumer, FrameConsumer, Listeners, MediaEvent};

use crate::config::EmulatorConfig;
use crate::nes::Nes;
use crate::nes::cartridge::NesFile;
use crate::nes::controller::InputPort;
use crate::nes::error::EmuError;
use crate::nes::nsf::{NsfFile, NsfPlayer};
use handoff::{AUDIO_QUEUE_BLOCKS, audio_queue, frame_exchange};

const REPLY_TIMEOUT: Duration = Duration::from_millis(500);

/// What a session runs.
#[derive(Debug, Clone)]
pub enum Program {
    Cartridge(NesFile),
    /// `track` is 0-based.
    Music { nsf: NsfFile, track: u8 },
}

impl Program {
    /// Loads an NSF when the file carries the NSF magic, otherwise an iNES
    /// image. `track` only applies to NSF and defaults to the header's
    /// starting song.
    pub fn from_path(path: &Path, track: Option<u8>) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        if bytes.starts_with(b"NESM\x1A") {
            let nsf = NsfFile::from_bytes(&bytes)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            let track = track.unwrap_or(nsf.starting_song.saturating_sub(1));
            Ok(Program::Music { nsf, track })
        } else {
            let cart = NesFile::from_bytes(&bytes)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok(Program::Cartridge(cart))
        }
    }

    fn build(&self, config: &EmulatorConfig) -> Result<Box<dyn Machine>> {
        Ok(match self {
            Program::Cartridge(cart) => Box::new(
                Nes::from_nes_file(cart, config).context("failed to start cartridge")?,
            ),
            Program::Music { nsf, track } => Box::new(
                NsfPlayer::new(nsf, *track, config).context("failed to start NSF player")?,
            ),
        })
    }
}

struct Running {
    cancel: CancelToken,
    commands: Sender<ControlCommand>,
    frames: FrameConsumer,
    audio: AudioConsumer,
    input: InputPort,
    thread: JoinHandle<(Result<RunExit, EmuError>, MachineInfo)>,
}

/// Owns at most one emulation thread at a time. Loading a new program
/// cancels the previous run and waits for it to exit first.
pub struct Session {
    config: EmulatorConfig,
    root: CancelToken,
    listeners: Listeners,
    program: Option<Program>,
    running: Option<Running>,
    final_info: Option<MachineInfo>,
}

impl Session {
    pub fn new(config: EmulatorConfig) -> Self {
        Self {
            config,
            root: CancelToken::new(),
            listeners: Listeners::new(),
            program: None,
            running: None,
            final_info: None,
        }
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    /// Stops whatever is running and starts `program` on a fresh thread.
    /// Returns the previous run's outcome, if there was one. A fault in the
    /// previous run is part of that outcome and never blocks the new load.
    pub fn load(&mut self, program: Program) -> Result<Option<Result<RunExit, EmuError>>> {
        let previous = match self.running.take() {
            Some(run) => {
                run.cancel.cancel();
                let outcome = self.join(run)?;
                if let Err(err) = &outcome {
                    warn!(%err, "previous run ended with a fault");
                }
                Some(outcome)
            }
            None => None,
        };
        let machine = program.build(&self.config)?;
        let input = machine.input_port();

        let cancel = self.root.child();
        let (commands_tx, commands_rx) = mpsc::channel();
        let (frame_producer, frames) = frame_exchange();
        let (audio_producer, audio) = audio_queue(AUDIO_QUEUE_BLOCKS);
        let debug = DebugHandle::new();
        let ports = ClockPorts {
            commands: commands_rx,
            frames: frame_producer,
            audio: audio_producer,
            listeners: self.listeners.clone(),
            cancel: cancel.clone(),
            debug,
        };

        let mut clock = MasterClock::new(machine, &self.config, ports);
        let thread = thread::Builder::new()
            .name("nesclock-emu".to_string())
            .spawn(move || {
                let result = clock.run();
                (result, clock.info())
            })
            .context("failed to spawn emulation thread")?;

        self.program = Some(program);
        self.running = Some(Running {
            cancel,
            commands: commands_tx,
            frames,
            audio,
            input,
            thread,
        });
        Ok(previous)
    }

    /// Restarts the loaded NSF on another track.
    pub fn change_track(&mut self, track: u8) -> Result<()> {
        let Some(Program::Music { nsf, .. }) = self.program.clone() else {
            return Err(anyhow!("no NSF is loaded"));
        };
        info!(track = track + 1, "changing track");
        self.load(Program::Music { nsf, track })?;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|run| !run.thread.is_finished())
    }

    /// Cancels the current run and waits for its thread.
    pub fn stop(&mut self) -> Result<Option<RunExit>> {
        let Some(run) = self.running.take() else {
            return Ok(None);
        };
        run.cancel.cancel();
        Ok(Some(self.join(run)??))
    }

    /// Waits for the current run to end on its own (budget or fault).
    pub fn wait(&mut self) -> Result<RunExit> {
        let run = self.running.take().context("nothing is running")?;
        Ok(self.join(run)??)
    }

    /// The outer error is a panicked thread; the inner one is the run's fault.
    fn join(&mut self, run: Running) -> Result<Result<RunExit, EmuError>> {
        let Running {
            thread, commands, ..
        } = run;
        drop(commands);
        let (outcome, info) = thread
            .join()
            .map_err(|_| anyhow!("emulation thread panicked"))?;
        self.final_info = Some(info);
        Ok(outcome)
    }

    /// The info snapshot taken when the last finished run stopped.
    pub fn final_info(&self) -> Option<&MachineInfo> {
        self.final_info.as_ref()
    }

    /// Returns false when nothing is running to receive the command.
    pub fn send(&self, command: ControlCommand) -> bool {
        self.running
            .as_ref()
            .is_some_and(|run| run.commands.send(command).is_ok())
    }

    pub fn info(&self) -> Option<MachineInfo> {
        let (tx, rx) = mpsc::sync_channel(1);
        if !self.send(ControlCommand::RequestInfo(tx)) {
            return None;
        }
        rx.recv_timeout(REPLY_TIMEOUT).ok()
    }

    pub fn debug_handle(&self) -> Option<DebugHandle> {
        let (tx, rx) = mpsc::sync_channel(1);
        if !self.send(ControlCommand::RequestDebugHandle(tx)) {
            return None;
        }
        rx.recv_timeout(REPLY_TIMEOUT).ok()
    }

    pub fn input(&self) -> Option<InputPort> {
        self.running.as_ref().map(|run| run.input.clone())
    }

    pub fn frames(&self) -> Option<&FrameConsumer> {
        self.running.as_ref().map(|run| &run.frames)
    }

    pub fn pop_audio(&mut self) -> Option<Vec<f32>> {
        self.running.as_mut().and_then(|run| run.audio.pop())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.root.cancel();
        if let Some(run) = self.running.take() {
            let _ = run.thread.join();
        }
    }
}
