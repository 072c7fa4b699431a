use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use nesclock::nes::cartridge::hex;
use nesclock::nes::screen::VirtualScreen;
use nesclock::session::{ControlCommand, Program, RunExit, Session};
use nesclock::{EmulatorConfig, init_logging};
use sha1::{Digest, Sha1};
use tracing::info;

const POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
struct Config {
    rom: Option<PathBuf>,
    track: Option<u8>,
    cycles: u64,
    realtime: bool,
    dump: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rom: None,
            track: None,
            cycles: 2_000_000,
            realtime: false,
            dump: None,
        }
    }
}

fn parse_args() -> Result<Config> {
    let mut cfg = Config::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--cycles" => {
                let value = args
                    .next()
                    .context("--cycles requires an integer, e.g. --cycles 2000000")?;
                cfg.cycles = value
                    .parse::<u64>()
                    .with_context(|| format!("invalid --cycles value: {value}"))?;
            }
            "--track" => {
                let value = args
                    .next()
                    .context("--track requires a 1-based track number")?;
                let track = value
                    .parse::<u8>()
                    .with_context(|| format!("invalid --track value: {value}"))?;
                cfg.track = Some(track.saturating_sub(1));
            }
            "--dump" => {
                let value = args.next().context("--dump requires an output path")?;
                cfg.dump = Some(PathBuf::from(value));
            }
            "--realtime" => cfg.realtime = true,
            "--help" | "-h" => {
                println!(
                    "nesclock_preview\n\n\
Usage:\n\
  cargo run --release --bin nesclock_preview -- <rom> [options]\n\n\
Options:\n\
  --cycles <n>          CPU cycle budget (default 2000000)\n\
  --track <n>           NSF track, 1-based\n\
  --realtime            Run at 1x instead of unlimited speed\n\
  --dump <path>         Write the last frame as raw RGBA\n\
  -h, --help            Show this help\n"
                );
                std::process::exit(0);
            }
            other if other.starts_with("--") => bail!("unknown argument: {other}"),
            other => cfg.rom = Some(PathBuf::from(other)),
        }
    }

    if cfg.cycles == 0 {
        bail!("--cycles must be positive");
    }
    Ok(cfg)
}

fn main() -> Result<()> {
    init_logging();
    let cfg = parse_args()?;
    let rom = cfg.rom.clone().context("a ROM or NSF path is required")?;

    let config = EmulatorConfig::default().with_max_cycles(cfg.cycles);
    let overscan = config.overscan_rows;
    let program = Program::from_path(&rom, cfg.track)?;

    let started = Instant::now();
    let mut session = Session::new(config);
    session.load(program)?;
    if !cfg.realtime {
        session.send(ControlCommand::Turbo);
    }

    let mut last_frame = VirtualScreen::new();
    let mut frames = 0u64;
    let mut samples = 0usize;
    loop {
        let finished = !session.is_running();
        if let Some(consumer) = session.frames() {
            while consumer.copy_latest(&mut last_frame) {
                frames += 1;
            }
        }
        while let Some(block) = session.pop_audio() {
            samples += block.len();
        }
        if finished {
            break;
        }
        std::thread::sleep(POLL);
    }

    let exit = session.wait()?;
    let RunExit::BudgetExhausted { cycles } = exit else {
        bail!("run ended before its budget: {exit:?}");
    };

    let mut rgba = Vec::new();
    last_frame.write_rgba_bytes(overscan, &mut rgba);
    let digest = hex(&Sha1::digest(&rgba));
    info!(
        cycles,
        frames,
        samples,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "preview finished"
    );

    if let Some(path) = &cfg.dump {
        std::fs::write(path, &rgba)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    println!("frame {} sha1 {digest}", last_frame.frame_number());
    if let Some(snapshot) = session.final_info() {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
    }
    Ok(())
}
