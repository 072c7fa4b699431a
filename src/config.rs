use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Settings threaded into the console and the run loop at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub sample_rate: u32,
    /// Samples per audio block handed to the consumer.
    pub audio_block_size: usize,
    /// Rows trimmed from the top and bottom of each frame on export.
    pub overscan_rows: usize,
    pub host_tick_hz: u32,
    /// CPU cycle budget for one run; 0 means unlimited.
    pub max_cycles: u64,
    pub debug_overlay: bool,
    /// Pending cycles are capped at this many host ticks worth of quota.
    pub pending_cycle_cap_ticks: u32,
    pub frame_wait_poll_ms: u64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            audio_block_size: 512,
            overscan_rows: 8,
            host_tick_hz: 240,
            max_cycles: 0,
            debug_overlay: false,
            pending_cycle_cap_ticks: 4,
            frame_wait_poll_ms: 10,
        }
    }
}

impl EmulatorConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("invalid emulator config")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        Self::from_json(&text)
    }

    pub fn with_max_cycles(mut self, max_cycles: u64) -> Self {
        self.max_cycles = max_cycles;
        self
    }
}
