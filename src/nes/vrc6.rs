//! Konami VRC6 expansion audio: two pulse channels with 8-step duty control
//! and a sawtooth accumulator, clocked at the CPU rate.

/// Output level per step, scaled to sit alongside the 2A03 pulse channels.
const VRC6_STEP: f32 = 0.00996;

#[derive(Clone, Copy, Default)]
struct Vrc6Pulse {
    enabled: bool,
    ignore_duty: bool,
    duty: u8,
    volume: u8,
    period: u16,
    counter: u16,
    step: u8,
}

impl Vrc6Pulse {
    fn write(&mut self, reg: u16, value: u8) {
        match reg {
            0 => {
                self.ignore_duty = (value & 0x80) != 0;
                self.duty = (value >> 4) & 0x07;
                self.volume = value & 0x0F;
            }
            1 => self.period = (self.period & 0x0F00) | value as u16,
            _ => {
                self.period = (self.period & 0x00FF) | (((value & 0x0F) as u16) << 8);
                self.enabled = (value & 0x80) != 0;
                if !self.enabled {
                    self.step = 0;
                }
            }
        }
    }

    fn clock(&mut self) {
        if !self.enabled {
            return;
        }
        if self.counter == 0 {
            self.counter = self.period;
            self.step = (self.step + 1) & 0x0F;
        } else {
            self.counter -= 1;
        }
    }

    fn output(&self) -> u8 {
        if !self.enabled {
            return 0;
        }
        if self.ignore_duty || self.step <= self.duty {
            self.volume
        } else {
            0
        }
    }
}

#[derive(Clone, Copy, Default)]
struct Sawtooth {
    enabled: bool,
    rate: u8,
    period: u16,
    counter: u16,
    clocks: u8,
    accumulator: u8,
}

impl Sawtooth {
    fn write(&mut self, reg: u16, value: u8) {
        match reg {
            0 => self.rate = value & 0x3F,
            1 => self.period = (self.period & 0x0F00) | value as u16,
            _ => {
                self.period = (self.period & 0x00FF) | (((value & 0x0F) as u16) << 8);
                self.enabled = (value & 0x80) != 0;
                if !self.enabled {
                    self.accumulator = 0;
                    self.clocks = 0;
                }
            }
        }
    }

    fn clock(&mut self) {
        if !self.enabled {
            return;
        }
        if self.counter > 0 {
            self.counter -= 1;
            return;
        }
        self.counter = self.period;
        // The accumulator gains `rate` on every second clock and resets
        // after the seventh addition.
        self.clocks += 1;
        if self.clocks == 14 {
            self.clocks = 0;
            self.accumulator = 0;
        } else if self.clocks % 2 == 0 {
            self.accumulator = self.accumulator.wrapping_add(self.rate);
        }
    }

    fn output(&self) -> u8 {
        if self.enabled {
            self.accumulator >> 3
        } else {
            0
        }
    }
}

#[derive(Clone, Default)]
pub struct Vrc6 {
    pulses: [Vrc6Pulse; 2],
    saw: Sawtooth,
    halted: bool,
}

impl Vrc6 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles $9000-$9003, $A000-$A002 and $B000-$B002. Returns false for
    /// addresses the chip does not decode.
    pub fn write(&mut self, addr: u16, value: u8) -> bool {
        let reg = addr & 0x0003;
        match addr & 0xF000 {
            0x9000 if reg == 3 => self.halted = (value & 0x01) != 0,
            0x9000 => self.pulses[0].write(reg, value),
            0xA000 if reg < 3 => self.pulses[1].write(reg, value),
            0xB000 if reg < 3 => self.saw.write(reg, value),
            _ => return false,
        }
        true
    }

    /// One CPU cycle.
    pub fn clock(&mut self) {
        if self.halted {
            return;
        }
        for pulse in &mut self.pulses {
            pulse.clock();
        }
        self.saw.clock();
    }

    pub fn output(&self) -> f32 {
        let sum =
            self.pulses[0].output() as u16 + self.pulses[1].output() as u16 + self.saw.output() as u16;
        sum as f32 * VRC6_STEP
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_only_its_register_ranges() {
        let mut chip = Vrc6::new();
        assert!(chip.write(0x9000, 0x8F));
        assert!(chip.write(0xA002, 0x80));
        assert!(chip.write(0xB000, 0x3F));
        assert!(!chip.write(0xB003, 0x00));
        assert!(!chip.write(0xC000, 0x00));
    }

    #[test]
    fn constant_pulse_outputs_volume() {
        let mut chip = Vrc6::new();
        chip.write(0x9000, 0x8F);
        chip.write(0x9001, 0x10);
        chip.write(0x9002, 0x80);
        chip.clock();
        assert!((chip.output() - 15.0 * VRC6_STEP).abs() < 1e-6);
    }

    #[test]
    fn sawtooth_ramps_and_resets() {
        let mut chip = Vrc6::new();
        chip.write(0xB000, 0x3F);
        chip.write(0xB001, 0x00);
        chip.write(0xB002, 0x80);
        let mut peak = 0.0f32;
        for _ in 0..13 {
            chip.clock();
            peak = peak.max(chip.output());
        }
        assert!(peak > 0.0);
        chip.clock();
        assert_eq!(chip.output(), 0.0);
    }

    #[test]
    fn halt_freezes_channels() {
        let mut chip = Vrc6::new();
        chip.write(0x9003, 0x01);
        chip.write(0xB000, 0x3F);
        chip.write(0xB002, 0x80);
        for _ in 0..4 {
            chip.clock();
        }
        assert_eq!(chip.output(), 0.0);
    }
}
