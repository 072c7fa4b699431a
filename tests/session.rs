use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use nesclock::nes::cartridge::NesFile;
use nesclock::nes::error::EmuError;
use nesclock::nes::nsf::NsfFile;
use nesclock::session::{ClockState, ControlCommand, MachineInfo, MediaEvent, RunExit, Speed};
use nesclock::{EmulatorConfig, Program, Session};

const TIMEOUT: Duration = Duration::from_secs(5);

/// 16 KB NROM image with `program` at $8000 and every vector pointing there.
fn nrom(program: &[u8]) -> Program {
    let mut prg = vec![0xEA; 0x4000];
    prg[..program.len()].copy_from_slice(program);
    for vector in [0x3FFA, 0x3FFC, 0x3FFE] {
        prg[vector..vector + 2].copy_from_slice(&0x8000u16.to_le_bytes());
    }
    let mut image = vec![b'N', b'E', b'S', 0x1A, 1, 1, 0x00, 0x00];
    image.resize(16, 0);
    image.extend_from_slice(&prg);
    image.extend(std::iter::repeat_n(0u8, 0x2000));
    Program::Cartridge(NesFile::from_bytes(&image).unwrap())
}

/// JMP $8000 forever.
fn spin() -> Program {
    nrom(&[0x4C, 0x00, 0x80])
}

/// Header of a two-song tune named "Sample" loading at $8000.
fn tune_header() -> Vec<u8> {
    let mut bytes = vec![0u8; 0x80];
    bytes[0..5].copy_from_slice(b"NESM\x1A");
    bytes[0x05] = 1;
    bytes[0x06] = 2;
    bytes[0x07] = 1;
    bytes[0x08..0x0A].copy_from_slice(&0x8000u16.to_le_bytes());
    bytes[0x0A..0x0C].copy_from_slice(&0x8000u16.to_le_bytes());
    bytes[0x0C..0x0E].copy_from_slice(&0x8003u16.to_le_bytes());
    bytes[0x0E..0x14].copy_from_slice(b"Sample");
    bytes[0x6E..0x70].copy_from_slice(&16_639u16.to_le_bytes());
    bytes
}

/// Two-song tune: init stores the song number at $00, play increments $01.
fn tune() -> NsfFile {
    let mut bytes = tune_header();
    bytes.extend_from_slice(&[0x85, 0x00, 0x60, 0xE6, 0x01, 0x60]);
    NsfFile::from_bytes(&bytes).unwrap()
}

fn poll_info(session: &Session, done: impl Fn(&MachineInfo) -> bool) -> MachineInfo {
    let started = Instant::now();
    loop {
        if let Some(info) = session.info() {
            if done(&info) {
                return info;
            }
        }
        assert!(started.elapsed() < TIMEOUT, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn budgeted_run_reports_exhaustion() {
    let mut session = Session::new(EmulatorConfig::default().with_max_cycles(100_000));
    session.load(spin()).unwrap();
    let exit = session.wait().unwrap();
    let RunExit::BudgetExhausted { cycles } = exit else {
        panic!("unexpected exit {exit:?}");
    };
    // The budget is checked between instructions.
    assert!((100_000..100_010).contains(&cycles));

    let info = session.final_info().unwrap();
    assert_eq!(info.state, ClockState::Terminated);
    assert_eq!(info.cycles, cycles);
    // Three frames fit in 100k cycles and nobody took them.
    assert!(info.handoff.frames_delivered >= 1);
    assert!(info.handoff.frames_delivered + info.handoff.frames_dropped >= 3);
}

#[test]
fn stop_cancels_an_unbounded_run() {
    let mut session = Session::new(EmulatorConfig::default());
    session.load(spin()).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert!(session.is_running());
    assert_eq!(session.stop().unwrap(), Some(RunExit::Cancelled));
    assert!(!session.is_running());
    assert_eq!(session.stop().unwrap(), None);
}

#[test]
fn unknown_opcode_surfaces_as_emu_error() {
    let mut session = Session::new(EmulatorConfig::default());
    session.load(nrom(&[0xEA, 0x02])).unwrap();
    let err = session.wait().unwrap_err();
    assert_eq!(
        err.downcast_ref::<EmuError>(),
        Some(&EmuError::UnknownOpcode {
            opcode: 0x02,
            pc: 0x8001
        })
    );
    assert_eq!(
        session.final_info().map(|info| info.state),
        Some(ClockState::Terminated)
    );
}

fn wait_until_finished(session: &Session) {
    let started = Instant::now();
    while session.is_running() {
        assert!(started.elapsed() < TIMEOUT, "run did not finish in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn load_after_a_fault_starts_the_new_program() {
    let mut session = Session::new(EmulatorConfig::default());
    assert!(session.load(nrom(&[0xEA, 0x02])).unwrap().is_none());
    wait_until_finished(&session);

    let previous = session.load(spin()).unwrap();
    assert_eq!(
        previous,
        Some(Err(EmuError::UnknownOpcode {
            opcode: 0x02,
            pc: 0x8001
        }))
    );
    assert!(session.is_running());
    let info = poll_info(&session, |info| info.cycles > 0);
    assert_eq!(info.state, ClockState::Running);
    assert_eq!(session.stop().unwrap(), Some(RunExit::Cancelled));
}

#[test]
fn change_track_after_a_fault_restarts_the_tune() {
    // Init returns at once; play hits an unknown opcode.
    let mut bytes = tune_header();
    bytes[0x0C..0x0E].copy_from_slice(&0x8001u16.to_le_bytes());
    bytes.extend_from_slice(&[0x60, 0x02]);
    let nsf = NsfFile::from_bytes(&bytes).unwrap();

    let mut session = Session::new(EmulatorConfig::default());
    session.load(Program::Music { nsf, track: 0 }).unwrap();
    wait_until_finished(&session);

    session.change_track(1).unwrap();
    let err = session.wait().unwrap_err();
    assert_eq!(
        err.downcast_ref::<EmuError>(),
        Some(&EmuError::UnknownOpcode {
            opcode: 0x02,
            pc: 0x8001
        })
    );
    assert_eq!(
        session.final_info().map(|info| info.description.as_str()),
        Some("Sample - track 2/2")
    );
}

#[test]
fn pause_holds_and_step_frame_runs_one_frame() {
    let mut session = Session::new(EmulatorConfig::default());
    session.load(spin()).unwrap();
    assert!(session.send(ControlCommand::Pause));
    let paused = poll_info(&session, |info| info.state == ClockState::Paused);
    std::thread::sleep(Duration::from_millis(30));
    let still = session.info().unwrap();
    assert_eq!(still.cycles, paused.cycles);

    let handed_off =
        |info: &MachineInfo| info.handoff.frames_delivered + info.handoff.frames_dropped;
    assert!(session.send(ControlCommand::StepFrame));
    let stepped = poll_info(&session, |info| {
        info.state == ClockState::Paused && info.cycles > paused.cycles
    });
    assert_eq!(handed_off(&stepped), handed_off(&paused) + 1);
    assert!(stepped.cycles - paused.cycles <= 29_781 + 600);
    assert!(stepped.ppu.is_some());

    session.stop().unwrap();
}

#[test]
fn breakpoint_pauses_and_resume_steps_past_it() {
    // LDX #$00; loop: INX; JMP loop
    let mut session = Session::new(EmulatorConfig::default());
    session.load(nrom(&[0xA2, 0x00, 0xE8, 0x4C, 0x02, 0x80])).unwrap();
    let debug = session.debug_handle().unwrap();
    debug.add_breakpoint(0x8002);

    let hit = poll_info(&session, |info| info.breakpoint_hit == Some(0x8002));
    assert_eq!(hit.state, ClockState::Paused);
    assert_eq!(hit.cpu.pc, 0x8002);

    assert!(session.send(ControlCommand::Unpause));
    let again = poll_info(&session, |info| {
        info.breakpoint_hit == Some(0x8002) && info.cpu.x != hit.cpu.x
    });
    assert_eq!(again.cpu.x, hit.cpu.x.wrapping_add(1));
    assert_eq!(debug.registers().map(|regs| regs.pc), Some(0x8002));

    debug.clear_breakpoints();
    session.stop().unwrap();
}

#[test]
fn turbo_and_speed_commands_show_in_info() {
    let mut session = Session::new(EmulatorConfig::default());
    session.load(spin()).unwrap();
    session.send(ControlCommand::SpeedUp);
    let info = poll_info(&session, |info| info.speed == Speed::Multiplier(2.0));
    assert_eq!(info.state, ClockState::Running);

    session.send(ControlCommand::Turbo);
    poll_info(&session, |info| info.speed == Speed::Unlimited);
    session.send(ControlCommand::ToggleDebug);
    poll_info(&session, |info| info.debug_overlay);
    session.stop().unwrap();
}

#[test]
fn listeners_receive_frames() {
    let mut session = Session::new(EmulatorConfig::default());
    let events = session.listeners().subscribe(8);
    session.load(spin()).unwrap();
    session.send(ControlCommand::Turbo);

    let deadline = Instant::now() + TIMEOUT;
    let number = loop {
        match events.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(MediaEvent::Frame { number, pixels }) => {
                assert_eq!(pixels.len(), 256 * 240);
                break number;
            }
            Ok(MediaEvent::Audio(_)) => continue,
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                panic!("no frame published")
            }
        }
    };
    assert!(number >= 1);
    session.stop().unwrap();
}

#[test]
fn nsf_run_plays_and_changes_track() {
    let nsf = tune();
    let mut session = Session::new(EmulatorConfig::default());
    session
        .load(Program::Music {
            nsf: nsf.clone(),
            track: 0,
        })
        .unwrap();
    session.send(ControlCommand::Turbo);
    let first = poll_info(&session, |info| info.cycles > 100_000);
    assert_eq!(first.description, "Sample - track 1/2");
    assert!(first.ppu.is_none());

    session.change_track(1).unwrap();
    let second = poll_info(&session, |_| true);
    assert_eq!(second.description, "Sample - track 2/2");

    let started = Instant::now();
    let mut samples = 0;
    while samples == 0 && started.elapsed() < TIMEOUT {
        match session.pop_audio() {
            Some(block) => samples += block.len(),
            None => std::thread::sleep(Duration::from_millis(5)),
        }
    }
    assert_eq!(samples, session.config().audio_block_size);
    session.stop().unwrap();
}

#[test]
fn change_track_needs_a_tune() {
    let mut session = Session::new(EmulatorConfig::default());
    session.load(spin()).unwrap();
    assert!(session.change_track(1).is_err());
}

#[test]
fn program_from_path_sniffs_the_format() {
    let dir = std::env::temp_dir().join(format!("nesclock-sniff-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let nsf_path = dir.join("tune.bin");
    let mut bytes = vec![0u8; 0x80];
    bytes[0..5].copy_from_slice(b"NESM\x1A");
    bytes[0x06] = 3;
    bytes[0x07] = 2;
    bytes[0x08..0x0A].copy_from_slice(&0x8000u16.to_le_bytes());
    bytes.push(0x60);
    std::fs::write(&nsf_path, &bytes).unwrap();
    match Program::from_path(&nsf_path, None).unwrap() {
        Program::Music { track, .. } => assert_eq!(track, 1),
        other => panic!("expected a tune, got {other:?}"),
    }

    let junk_path = dir.join("junk.nes");
    std::fs::write(&junk_path, b"not a rom").unwrap();
    assert!(Program::from_path(&junk_path, None).is_err());

    std::fs::remove_dir_all(&dir).unwrap();
}
