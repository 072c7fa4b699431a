use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Button lines shared between the frontend and the emulation thread.
/// One byte, one bit per `BUTTON_*` constant.
#[derive(Debug, Clone, Default)]
pub struct InputPort(Arc<AtomicU8>);

impl InputPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, buttons: u8) {
        self.0.store(buttons, Ordering::Relaxed);
    }

    pub fn get(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn press(&self, button: u8) {
        self.0.fetch_or(button, Ordering::Relaxed);
    }

    pub fn release(&self, button: u8) {
        self.0.fetch_and(!button, Ordering::Relaxed);
    }
}

/// Standard pad on $4016: an 8-bit shift register reloaded while strobe is high.
#[derive(Debug, Clone, Default)]
pub struct Controller {
    port: InputPort,
    state: u8,
    shift: u8,
    strobe: bool,
}

impl Controller {
    pub fn new(port: InputPort) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    pub fn port(&self) -> InputPort {
        self.port.clone()
    }

    /// Takes the button snapshot used until the next instruction boundary.
    pub fn latch_port(&mut self) {
        self.state = self.port.get();
        if self.strobe {
            self.shift = self.state;
        }
    }

    pub fn write_strobe(&mut self, value: u8) {
        self.strobe = (value & 0x01) != 0;
        if self.strobe {
            self.shift = self.state;
        }
    }

    pub fn read(&mut self) -> u8 {
        let bit = if self.strobe {
            self.state & 0x01
        } else {
            let out = self.shift & 0x01;
            self.shift = (self.shift >> 1) | 0x80;
            out
        };
        0x40 | bit
    }
}
