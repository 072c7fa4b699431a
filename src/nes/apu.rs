use std::f32::consts::PI;

use super::vrc6::Vrc6;

pub const CPU_CLOCK_HZ: f64 = 1_789_772.727_272_727_3;
pub const APU_CLOCK_HZ: f64 = CPU_CLOCK_HZ / 2.0;

/// Frame sequencer period in half APU cycles (3728.5 APU cycles).
const FRAME_TICK_HALF_CYCLES: u32 = 7_457;
/// APU cycles between a $4017 write and the sequencer reset.
const FRAME_RESET_DELAY: u8 = 2;
const MIN_SAMPLE_RATE: u32 = 8_000;

pub const LENGTH_TABLE: [u8; 32] = [
    10, 254, 20, 2, 40, 4, 80, 6, 160, 8, 60, 10, 14, 12, 26, 14, 12, 16, 24, 18, 48, 20, 96, 22,
    192, 24, 72, 26, 16, 28, 32, 30,
];

const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 1, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 1, 0, 0, 0],
    [1, 0, 0, 1, 1, 1, 1, 1],
];

const TRI_TABLE: [u8; 32] = [
    15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12,
    13, 14, 15,
];

const NOISE_PERIOD_TABLE: [u16; 16] = [
    4, 8, 16, 32, 64, 96, 128, 160, 202, 254, 380, 508, 762, 1016, 2034, 4068,
];

const DMC_RATE_TABLE: [u16; 16] = [
    428, 380, 340, 320, 286, 254, 226, 214, 190, 160, 142, 128, 106, 84, 72, 54,
];

/// Whatever sits on the CPU side of the APU: DMC sample fetches go through
/// it, and it is told the combined frame/DMC interrupt level after each run.
pub trait ApuHost {
    fn dmc_read(&mut self, addr: u16) -> u8;

    fn irq_line(&mut self, _asserted: bool) {}
}

/// Host with no memory behind it; DMC fetches read as zero.
pub struct SilentHost;

impl ApuHost for SilentHost {
    fn dmc_read(&mut self, _addr: u16) -> u8 {
        0
    }
}

pub fn cycles_per_sample(sample_rate: u32) -> f64 {
    APU_CLOCK_HZ / sample_rate.max(MIN_SAMPLE_RATE) as f64
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SequencerCounts {
    pub quarter: u64,
    pub half: u64,
}

#[derive(Clone, Copy, Default)]
struct FrameSequencer {
    five_step: bool,
    irq_inhibit: bool,
    irq_flag: bool,
    half_cycles: u32,
    step: u8,
    pending_write: Option<u8>,
    write_delay: u8,
    counts: SequencerCounts,
}

pub struct Apu {
    pulse1: PulseChannel,
    pulse2: PulseChannel,
    triangle: TriangleChannel,
    noise: NoiseChannel,
    dmc: DmcChannel,
    expansion: Option<Vrc6>,
    sequencer: FrameSequencer,

    sample_rate: u32,
    block_size: usize,
    sample_clock: f64,
    accum: f32,
    accum_count: u32,
    block: Vec<f32>,
    ready: Vec<Vec<f32>>,

    hp90_prev_in: f32,
    hp90_prev_out: f32,
    hp90_a: f32,
    hp440_prev_in: f32,
    hp440_prev_out: f32,
    hp440_a: f32,
    lp14k_prev_out: f32,
    lp14k_a: f32,
}

impl Apu {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        let mut apu = Self {
            pulse1: PulseChannel::new(true),
            pulse2: PulseChannel::new(false),
            triangle: TriangleChannel::default(),
            noise: NoiseChannel::new(),
            dmc: DmcChannel::new(),
            expansion: None,
            sequencer: FrameSequencer::default(),
            sample_rate: sample_rate.max(MIN_SAMPLE_RATE),
            block_size,
            sample_clock: 0.0,
            accum: 0.0,
            accum_count: 0,
            block: Vec::with_capacity(block_size),
            ready: Vec::new(),
            hp90_prev_in: 0.0,
            hp90_prev_out: 0.0,
            hp90_a: 0.0,
            hp440_prev_in: 0.0,
            hp440_prev_out: 0.0,
            hp440_a: 0.0,
            lp14k_prev_out: 0.0,
            lp14k_a: 0.0,
        };
        apu.update_filter_coeffs();
        apu
    }

    pub fn reset(&mut self) {
        let expansion = self.expansion.as_ref().map(|_| Vrc6::new());
        *self = Self::new(self.sample_rate, self.block_size);
        self.expansion = expansion;
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(MIN_SAMPLE_RATE);
        self.update_filter_coeffs();
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn enable_vrc6(&mut self) {
        self.expansion = Some(Vrc6::new());
    }

    pub fn has_expansion(&self) -> bool {
        self.expansion.is_some()
    }

    /// Routes a cartridge-space write to the expansion chip. Returns whether
    /// the chip decoded the address.
    pub fn write_expansion(&mut self, addr: u16, value: u8) -> bool {
        match self.expansion.as_mut() {
            Some(chip) => chip.write(addr, value),
            None => false,
        }
    }

    pub fn sequencer_counts(&self) -> SequencerCounts {
        self.sequencer.counts
    }

    pub fn write_register(&mut self, addr: u16, value: u8) {
        match addr {
            0x4000 => self.pulse1.write_control(value),
            0x4001 => self.pulse1.write_sweep(value),
            0x4002 => self.pulse1.timer.set_low(value),
            0x4003 => self.pulse1.write_timer_high(value),

            0x4004 => self.pulse2.write_control(value),
            0x4005 => self.pulse2.write_sweep(value),
            0x4006 => self.pulse2.timer.set_low(value),
            0x4007 => self.pulse2.write_timer_high(value),

            0x4008 => self.triangle.write_linear(value),
            0x400A => self.triangle.timer.set_low(value),
            0x400B => self.triangle.write_timer_high(value),

            0x400C => self.noise.write_control(value),
            0x400E => self.noise.write_period(value),
            0x400F => self.noise.write_length(value),

            0x4010 => self.dmc.write_control(value),
            0x4011 => self.dmc.output_level = value & 0x7F,
            0x4012 => self.dmc.sample_addr = value,
            0x4013 => self.dmc.sample_length = value,

            0x4015 => self.write_status(value),
            0x4017 => self.write_frame_counter(value),
            _ => {}
        }
    }

    pub fn read_status(&mut self) -> u8 {
        let mut status = 0u8;
        if self.pulse1.length.active() {
            status |= 0x01;
        }
        if self.pulse2.length.active() {
            status |= 0x02;
        }
        if self.triangle.length.active() {
            status |= 0x04;
        }
        if self.noise.length.active() {
            status |= 0x08;
        }
        if self.dmc.bytes_remaining > 0 {
            status |= 0x10;
        }
        if self.sequencer.irq_flag {
            status |= 0x40;
        }
        if self.dmc.irq_flag {
            status |= 0x80;
        }

        self.sequencer.irq_flag = false;
        status
    }

    pub fn irq_pending(&self) -> bool {
        self.sequencer.irq_flag || self.dmc.irq_flag
    }

    /// Advances every unit by `apu_cycles` and returns every sample block
    /// completed along the way, oldest first. Fractional sample positions
    /// carry across calls and only full blocks are ever handed out.
    pub fn run<H: ApuHost>(
        &mut self,
        apu_cycles: u32,
        cycles_per_sample: f64,
        host: &mut H,
    ) -> Vec<Vec<f32>> {
        let cycles_per_sample = if cycles_per_sample.is_finite() {
            cycles_per_sample.max(1.0)
        } else {
            1.0
        };

        for _ in 0..apu_cycles {
            self.clock_cycle(host);

            self.accum += self.mix_sample();
            self.accum_count += 1;
            self.sample_clock += 1.0;
            if self.sample_clock >= cycles_per_sample {
                self.sample_clock -= cycles_per_sample;
                let averaged = self.accum / self.accum_count as f32;
                self.accum = 0.0;
                self.accum_count = 0;
                let filtered = self.apply_output_filters(averaged);
                self.push_sample(filtered);
            }
        }

        host.irq_line(self.irq_pending());
        std::mem::take(&mut self.ready)
    }

    fn push_sample(&mut self, sample: f32) {
        self.block.push(sample);
        if self.block.len() == self.block_size {
            let full = std::mem::replace(&mut self.block, Vec::with_capacity(self.block_size));
            self.ready.push(full);
        }
    }

    fn clock_cycle<H: ApuHost>(&mut self, host: &mut H) {
        if self.sequencer.pending_write.is_some() {
            self.sequencer.write_delay = self.sequencer.write_delay.saturating_sub(1);
            if self.sequencer.write_delay == 0 {
                if let Some(value) = self.sequencer.pending_write.take() {
                    self.apply_frame_counter_write(value);
                }
            }
        }

        self.pulse1.clock_timer();
        self.pulse2.clock_timer();
        self.noise.clock_timer();

        // Triangle, DMC and expansion audio run at the CPU rate.
        for _ in 0..2 {
            self.triangle.clock_timer();
            self.dmc.clock_timer();
            if self.dmc.needs_fetch() {
                let byte = host.dmc_read(self.dmc.current_addr);
                self.dmc.consume_fetch(byte);
            }
            if let Some(chip) = self.expansion.as_mut() {
                chip.clock();
            }
        }

        self.sequencer.half_cycles += 2;
        if self.sequencer.half_cycles >= FRAME_TICK_HALF_CYCLES {
            self.sequencer.half_cycles -= FRAME_TICK_HALF_CYCLES;
            self.frame_tick();
        }
    }

    fn write_status(&mut self, value: u8) {
        self.dmc.irq_flag = false;

        self.pulse1.length.set_enabled((value & 0x01) != 0);
        self.pulse2.length.set_enabled((value & 0x02) != 0);
        self.triangle.length.set_enabled((value & 0x04) != 0);
        self.noise.length.set_enabled((value & 0x08) != 0);

        self.dmc.enabled = (value & 0x10) != 0;
        if !self.dmc.enabled {
            self.dmc.stop();
        } else if self.dmc.bytes_remaining == 0 {
            self.dmc.restart_sample();
        }
    }

    fn write_frame_counter(&mut self, value: u8) {
        if (value & 0x40) != 0 {
            self.sequencer.irq_flag = false;
        }
        self.sequencer.pending_write = Some(value);
        self.sequencer.write_delay = FRAME_RESET_DELAY;
    }

    fn apply_frame_counter_write(&mut self, value: u8) {
        let seq = &mut self.sequencer;
        seq.five_step = (value & 0x80) != 0;
        seq.irq_inhibit = (value & 0x40) != 0;
        if seq.irq_inhibit {
            seq.irq_flag = false;
        }
        seq.half_cycles = 0;
        seq.step = 0;
        if !seq.five_step {
            self.clock_quarter_frame();
            self.clock_half_frame();
        }
    }

    fn frame_tick(&mut self) {
        let step = self.sequencer.step;
        if self.sequencer.five_step {
            if step != 3 {
                self.clock_quarter_frame();
            }
            if step == 1 || step == 4 {
                self.clock_half_frame();
            }
            self.sequencer.step = (step + 1) % 5;
        } else {
            self.clock_quarter_frame();
            if step % 2 == 1 {
                self.clock_half_frame();
            }
            if step == 3 && !self.sequencer.irq_inhibit {
                self.sequencer.irq_flag = true;
            }
            self.sequencer.step = (step + 1) % 4;
        }
    }

    fn clock_quarter_frame(&mut self) {
        self.sequencer.counts.quarter += 1;
        self.pulse1.envelope.clock();
        self.pulse2.envelope.clock();
        self.triangle.clock_linear_counter();
        self.noise.envelope.clock();
    }

    fn clock_half_frame(&mut self) {
        self.sequencer.counts.half += 1;
        self.pulse1.clock_length_and_sweep();
        self.pulse2.clock_length_and_sweep();
        self.triangle.length.clock();
        self.noise.length.clock();
    }

    fn mix_sample(&self) -> f32 {
        let p1 = self.pulse1.output() as f32;
        let p2 = self.pulse2.output() as f32;
        let t = self.triangle.output() as f32;
        let n = self.noise.output() as f32;
        let d = self.dmc.output_level as f32;

        let pulse_sum = p1 + p2;
        let pulse_out = if pulse_sum > 0.0 {
            95.88 / ((8128.0 / pulse_sum) + 100.0)
        } else {
            0.0
        };

        let tnd_in = (t / 8227.0) + (n / 12241.0) + (d / 22638.0);
        let tnd_out = if tnd_in > 0.0 {
            159.79 / ((1.0 / tnd_in) + 100.0)
        } else {
            0.0
        };

        let expansion = self.expansion.as_ref().map_or(0.0, Vrc6::output);
        pulse_out + tnd_out + expansion
    }

    fn update_filter_coeffs(&mut self) {
        let dt = 1.0f32 / self.sample_rate as f32;
        self.hp90_a = high_pass_alpha(90.0, dt);
        self.hp440_a = high_pass_alpha(440.0, dt);
        self.lp14k_a = low_pass_alpha(14_000.0, dt);
    }

    fn apply_output_filters(&mut self, mut sample: f32) -> f32 {
        let hp90 = self.hp90_a * (self.hp90_prev_out + sample - self.hp90_prev_in);
        self.hp90_prev_in = sample;
        self.hp90_prev_out = hp90;
        sample = hp90;

        let hp440 = self.hp440_a * (self.hp440_prev_out + sample - self.hp440_prev_in);
        self.hp440_prev_in = sample;
        self.hp440_prev_out = hp440;
        sample = hp440;

        self.lp14k_prev_out += self.lp14k_a * (sample - self.lp14k_prev_out);
        self.lp14k_prev_out.clamp(-1.0, 1.0)
    }
}

fn high_pass_alpha(cutoff_hz: f32, dt: f32) -> f32 {
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    rc / (rc + dt)
}

fn low_pass_alpha(cutoff_hz: f32, dt: f32) -> f32 {
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    dt / (rc + dt)
}

/// Reloading down-counter shared by every channel.
#[derive(Clone, Copy, Default)]
struct Timer {
    period: u16,
    counter: u16,
}

impl Timer {
    fn set_low(&mut self, value: u8) {
        self.period = (self.period & 0xFF00) | value as u16;
    }

    fn set_high(&mut self, value: u8) {
        self.period = (self.period & 0x00FF) | (((value & 0x07) as u16) << 8);
    }

    /// Returns true on the cycle the counter reloads.
    fn clock(&mut self) -> bool {
        if self.counter == 0 {
            self.counter = self.period;
            true
        } else {
            self.counter -= 1;
            false
        }
    }
}

#[derive(Clone, Copy, Default)]
struct Envelope {
    looping: bool,
    constant: bool,
    volume: u8,
    start: bool,
    divider: u8,
    decay: u8,
}

impl Envelope {
    fn write(&mut self, value: u8) {
        self.looping = (value & 0x20) != 0;
        self.constant = (value & 0x10) != 0;
        self.volume = value & 0x0F;
        self.start = true;
    }

    fn clock(&mut self) {
        if self.start {
            self.start = false;
            self.decay = 15;
            self.divider = self.volume;
            return;
        }

        if self.divider == 0 {
            self.divider = self.volume;
            if self.decay > 0 {
                self.decay -= 1;
            } else if self.looping {
                self.decay = 15;
            }
        } else {
            self.divider -= 1;
        }
    }

    fn output(&self) -> u8 {
        if self.constant { self.volume } else { self.decay }
    }
}

#[derive(Clone, Copy, Default)]
struct LengthCounter {
    enabled: bool,
    halted: bool,
    value: u8,
}

impl LengthCounter {
    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.value = 0;
        }
    }

    fn load(&mut self, index: u8) {
        if self.enabled {
            self.value = LENGTH_TABLE[(index & 0x1F) as usize];
        }
    }

    fn clock(&mut self) {
        if !self.halted && self.value > 0 {
            self.value -= 1;
        }
    }

    fn active(&self) -> bool {
        self.value > 0
    }
}

#[derive(Clone, Copy, Default)]
struct PulseChannel {
    ones_complement: bool,
    duty: u8,
    duty_step: u8,
    timer: Timer,
    length: LengthCounter,
    envelope: Envelope,

    sweep_enabled: bool,
    sweep_period: u8,
    sweep_negate: bool,
    sweep_shift: u8,
    sweep_reload: bool,
    sweep_divider: u8,
}

impl PulseChannel {
    /// Pulse 1 negates its sweep with ones' complement, pulse 2 with two's.
    fn new(ones_complement: bool) -> Self {
        Self {
            ones_complement,
            sweep_period: 1,
            ..Self::default()
        }
    }

    fn write_control(&mut self, value: u8) {
        self.duty = (value >> 6) & 0x03;
        self.length.halted = (value & 0x20) != 0;
        self.envelope.write(value);
    }

    fn write_sweep(&mut self, value: u8) {
        self.sweep_enabled = (value & 0x80) != 0;
        self.sweep_period = ((value >> 4) & 0x07) + 1;
        self.sweep_negate = (value & 0x08) != 0;
        self.sweep_shift = value & 0x07;
        self.sweep_reload = true;
    }

    fn write_timer_high(&mut self, value: u8) {
        self.timer.set_high(value);
        self.length.load(value >> 3);
        self.duty_step = 0;
        self.envelope.start = true;
    }

    fn clock_timer(&mut self) {
        if self.timer.clock() {
            self.duty_step = (self.duty_step + 1) & 0x07;
        }
    }

    fn clock_length_and_sweep(&mut self) {
        self.length.clock();

        if self.sweep_divider == 0 && self.sweep_enabled && self.sweep_shift > 0 {
            let target = self.sweep_target_period();
            if self.timer.period >= 8 && target <= 0x07FF {
                self.timer.period = target;
            }
        }
        if self.sweep_divider == 0 || self.sweep_reload {
            self.sweep_divider = self.sweep_period;
            self.sweep_reload = false;
        } else {
            self.sweep_divider -= 1;
        }
    }

    fn sweep_target_period(&self) -> u16 {
        let period = self.timer.period;
        let change = period >> self.sweep_shift;
        if self.sweep_negate {
            let extra = u16::from(self.ones_complement);
            period.saturating_sub(change + extra)
        } else {
            period.wrapping_add(change)
        }
    }

    fn output(&self) -> u8 {
        if !self.length.active() || self.timer.period < 8 || self.sweep_target_period() > 0x07FF {
            return 0;
        }
        if DUTY_TABLE[self.duty as usize][self.duty_step as usize] == 0 {
            return 0;
        }
        self.envelope.output()
    }
}

#[derive(Clone, Copy, Default)]
struct TriangleChannel {
    linear_reload_value: u8,
    linear_counter: u8,
    linear_reload: bool,
    timer: Timer,
    length: LengthCounter,
    step: u8,
}

impl TriangleChannel {
    const MIN_AUDIBLE_PERIOD: u16 = 5;

    fn write_linear(&mut self, value: u8) {
        self.length.halted = (value & 0x80) != 0;
        self.linear_reload_value = value & 0x7F;
    }

    fn write_timer_high(&mut self, value: u8) {
        self.timer.set_high(value);
        self.length.load(value >> 3);
        self.linear_reload = true;
    }

    fn clock_linear_counter(&mut self) {
        if self.linear_reload {
            self.linear_counter = self.linear_reload_value;
        } else if self.linear_counter > 0 {
            self.linear_counter -= 1;
        }
        // The control flag doubles as the length-counter halt bit.
        if !self.length.halted {
            self.linear_reload = false;
        }
    }

    fn clock_timer(&mut self) {
        if self.timer.clock() && self.length.active() && self.linear_counter > 0 {
            self.step = (self.step + 1) & 0x1F;
        }
    }

    fn output(&self) -> u8 {
        if !self.length.active()
            || self.linear_counter == 0
            || self.timer.period < Self::MIN_AUDIBLE_PERIOD
        {
            0
        } else {
            TRI_TABLE[self.step as usize]
        }
    }
}

#[derive(Clone, Copy)]
struct NoiseChannel {
    envelope: Envelope,
    length: LengthCounter,
    short_mode: bool,
    timer: Timer,
    shift_register: u16,
}

impl NoiseChannel {
    fn new() -> Self {
        Self {
            envelope: Envelope::default(),
            length: LengthCounter::default(),
            short_mode: false,
            timer: Timer {
                period: NOISE_PERIOD_TABLE[0],
                counter: 0,
            },
            shift_register: 1,
        }
    }

    fn write_control(&mut self, value: u8) {
        // Bit 5 halts the length counter and loops the envelope.
        self.length.halted = (value & 0x20) != 0;
        self.envelope.write(value);
    }

    fn write_period(&mut self, value: u8) {
        self.short_mode = (value & 0x80) != 0;
        self.timer.period = NOISE_PERIOD_TABLE[(value & 0x0F) as usize];
    }

    fn write_length(&mut self, value: u8) {
        self.length.load(value >> 3);
        self.envelope.start = true;
    }

    fn clock_timer(&mut self) {
        if self.timer.clock() {
            let tap = if self.short_mode { 6 } else { 1 };
            let feedback = (self.shift_register ^ (self.shift_register >> tap)) & 0x0001;
            self.shift_register = (self.shift_register >> 1) | (feedback << 14);
        }
    }

    fn output(&self) -> u8 {
        if !self.length.active() || (self.shift_register & 0x0001) != 0 {
            return 0;
        }
        self.envelope.output()
    }
}

#[derive(Clone, Copy)]
struct DmcChannel {
    enabled: bool,
    irq_enabled: bool,
    irq_flag: bool,
    loop_flag: bool,
    timer_period: u16,
    timer_counter: u16,
    output_level: u8,
    sample_addr: u8,
    sample_length: u8,
    current_addr: u16,
    bytes_remaining: u16,
    sample_buffer: Option<u8>,
    shift_register: u8,
    bits_remaining: u8,
    silence: bool,
}

impl DmcChannel {
    fn new() -> Self {
        Self {
            enabled: false,
            irq_enabled: false,
            irq_flag: false,
            loop_flag: false,
            timer_period: DMC_RATE_TABLE[0],
            timer_counter: DMC_RATE_TABLE[0],
            output_level: 0,
            sample_addr: 0,
            sample_length: 0,
            current_addr: 0xC000,
            bytes_remaining: 0,
            sample_buffer: None,
            shift_register: 0,
            bits_remaining: 8,
            silence: true,
        }
    }

    fn write_control(&mut self, value: u8) {
        self.irq_enabled = (value & 0x80) != 0;
        if !self.irq_enabled {
            self.irq_flag = false;
        }
        self.loop_flag = (value & 0x40) != 0;
        self.timer_period = DMC_RATE_TABLE[(value & 0x0F) as usize];
    }

    fn restart_sample(&mut self) {
        self.current_addr = 0xC000 | ((self.sample_addr as u16) << 6);
        self.bytes_remaining = ((self.sample_length as u16) << 4) | 0x0001;
    }

    fn stop(&mut self) {
        self.bytes_remaining = 0;
    }

    fn needs_fetch(&self) -> bool {
        self.enabled && self.sample_buffer.is_none() && self.bytes_remaining > 0
    }

    fn consume_fetch(&mut self, byte: u8) {
        self.sample_buffer = Some(byte);
        self.current_addr = if self.current_addr == 0xFFFF {
            0x8000
        } else {
            self.current_addr + 1
        };
        self.bytes_remaining -= 1;
        if self.bytes_remaining == 0 {
            if self.loop_flag {
                self.restart_sample();
            } else if self.irq_enabled {
                self.irq_flag = true;
            }
        }
    }

    fn clock_output_unit(&mut self) {
        if !self.silence {
            if (self.shift_register & 0x01) != 0 {
                if self.output_level <= 125 {
                    self.output_level += 2;
                }
            } else if self.output_level >= 2 {
                self.output_level -= 2;
            }
        }

        self.shift_register >>= 1;
        self.bits_remaining = self.bits_remaining.saturating_sub(1);
        if self.bits_remaining == 0 {
            self.bits_remaining = 8;
            match self.sample_buffer.take() {
                Some(sample) => {
                    self.shift_register = sample;
                    self.silence = false;
                }
                None => self.silence = true,
            }
        }
    }

    fn clock_timer(&mut self) {
        if self.timer_counter == 0 {
            self.timer_counter = self.timer_period;
        }
        self.timer_counter -= 1;
        if self.timer_counter == 0 {
            self.clock_output_unit();
        }
    }
}
