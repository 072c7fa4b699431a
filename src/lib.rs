//! NES emulation engine: the hardware under `nes`, the paced run loop and
//! its hand-off points under `session`.

#[cfg(feature = "playback")]
pub mod audio;
pub mod config;
pub mod nes;
pub mod session;

pub use config::EmulatorConfig;
pub use session::{Program, Session};

/// Installs the fmt subscriber used by the binaries, honouring `RUST_LOG`
/// and defaulting to `info`.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
