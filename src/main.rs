use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use nesclock::session::{ControlCommand, MachineInfo, Program, RunExit, Session};
use nesclock::{EmulatorConfig, init_logging};
use tracing::{info, warn};

const FRAME_WAIT: Duration = Duration::from_millis(20);
const INFO_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Args {
    rom: PathBuf,
    track: Option<u8>,
    config: Option<PathBuf>,
    max_cycles: Option<u64>,
    seconds: Option<f64>,
    turbo: bool,
    print_info: bool,
}

fn usage() -> &'static str {
    "usage: nesclock <rom.nes|tune.nsf> [--track N] [--config cfg.json] \
     [--max-cycles N] [--seconds S] [--turbo] [--info]"
}

fn parse_args() -> Result<Args> {
    let mut parsed = Args::default();
    let mut rom = None;
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--track" => {
                let value = args.next().context("--track requires a 1-based track number")?;
                let track: u8 = value
                    .parse()
                    .with_context(|| format!("invalid --track value: {value}"))?;
                if track == 0 {
                    bail!("--track is 1-based");
                }
                parsed.track = Some(track - 1);
            }
            "--config" => {
                let value = args.next().context("--config requires a path")?;
                parsed.config = Some(PathBuf::from(value));
            }
            "--max-cycles" => {
                let value = args.next().context("--max-cycles requires a number")?;
                parsed.max_cycles = Some(
                    value
                        .parse()
                        .with_context(|| format!("invalid --max-cycles value: {value}"))?,
                );
            }
            "--seconds" => {
                let value = args.next().context("--seconds requires a number")?;
                parsed.seconds = Some(
                    value
                        .parse()
                        .with_context(|| format!("invalid --seconds value: {value}"))?,
                );
            }
            "--turbo" => parsed.turbo = true,
            "--info" => parsed.print_info = true,
            "--help" | "-h" => {
                println!("{}", usage());
                std::process::exit(0);
            }
            other if other.starts_with("--") => bail!("unknown option {other}\n{}", usage()),
            other => rom = Some(PathBuf::from(other)),
        }
    }

    parsed.rom = rom.with_context(usage)?;
    Ok(parsed)
}

fn main() -> Result<()> {
    init_logging();
    let args = parse_args()?;

    let mut config = match &args.config {
        Some(path) => EmulatorConfig::from_file(path)?,
        None => EmulatorConfig::default(),
    };
    if let Some(max_cycles) = args.max_cycles {
        config.max_cycles = max_cycles;
    }

    #[cfg(feature = "playback")]
    let mut output = match nesclock::audio::AudioOutput::new() {
        Ok(output) => {
            config.sample_rate = output.sample_rate();
            Some(output)
        }
        Err(err) => {
            warn!(%err, "audio output unavailable, running silent");
            None
        }
    };

    let program = Program::from_path(&args.rom, args.track)?;
    let mut session = Session::new(config);
    session.load(program)?;
    if args.turbo {
        session.send(ControlCommand::Turbo);
    }

    let started = Instant::now();
    let deadline = args.seconds.map(|s| started + Duration::from_secs_f64(s.max(0.0)));
    let mut last_info: Option<MachineInfo> = None;
    let mut last_report = started;
    let mut frames = 0u64;

    while session.is_running() {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }

        match session.frames() {
            Some(consumer) => {
                if let Some(buffer) = consumer.take_timeout(FRAME_WAIT) {
                    frames += 1;
                    consumer.give_back(buffer);
                }
            }
            None => std::thread::sleep(FRAME_WAIT),
        }

        while let Some(block) = session.pop_audio() {
            #[cfg(feature = "playback")]
            if let Some(output) = output.as_mut() {
                output.push_samples(&block);
            }
            #[cfg(not(feature = "playback"))]
            let _ = block;
        }

        if last_report.elapsed() >= INFO_INTERVAL {
            last_report = Instant::now();
            if let Some(snapshot) = session.info() {
                info!(
                    cycles = snapshot.cycles,
                    frames = snapshot.handoff.frames_delivered,
                    dropped = snapshot.handoff.frames_dropped,
                    state = ?snapshot.state,
                    "progress"
                );
                last_info = Some(snapshot);
            }
        }
    }

    let exit = if session.is_running() {
        session.stop()?.unwrap_or(RunExit::Cancelled)
    } else {
        session.wait()?
    };
    match exit {
        RunExit::BudgetExhausted { cycles } => info!(cycles, "cycle budget used up"),
        RunExit::Cancelled => info!("stopped"),
    }
    info!(
        frames,
        elapsed_s = started.elapsed().as_secs_f64(),
        "frames received"
    );

    if args.print_info {
        match session.final_info().or(last_info.as_ref()) {
            Some(snapshot) => println!("{}", serde_json::to_string_pretty(snapshot)?),
            None => warn!("no info snapshot was captured"),
        }
    }
    Ok(())
}
