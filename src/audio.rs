use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Observer, Producer, Split},
};
use tracing::warn;

/// Milliseconds of audio the device-side queue can hold.
const QUEUE_MS: usize = 96;

/// Default output device fed from emulator sample blocks. Samples that do
/// not fit in the queue are dropped rather than stalling the caller.
pub struct AudioOutput {
    producer: HeapProd<f32>,
    _stream: cpal::Stream,
    sample_rate: u32,
    dropped: u64,
}

impl AudioOutput {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no default audio output device"))?;
        let supported = device
            .default_output_config()
            .context("failed to query default audio config")?;

        let stream_config: cpal::StreamConfig = supported.config();
        let sample_rate = stream_config.sample_rate.0;
        let capacity = (sample_rate as usize * QUEUE_MS) / 1000;
        let (producer, consumer) = HeapRb::<f32>::new(capacity.max(1)).split();

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, consumer)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, consumer)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, consumer)?,
            other => return Err(anyhow!("unsupported audio sample format: {other:?}")),
        };
        stream
            .play()
            .context("failed to start audio output stream")?;

        Ok(Self {
            producer,
            _stream: stream,
            sample_rate,
            dropped: 0,
        })
    }

    /// The device rate; configure the emulator's sample rate to match.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn push_samples(&mut self, samples: &[f32]) {
        for &sample in samples {
            if self.producer.try_push(sample.clamp(-1.0, 1.0)).is_err() {
                self.dropped += 1;
            }
        }
    }

    pub fn queued_samples(&self) -> usize {
        self.producer.occupied_len()
    }

    pub fn dropped_samples(&self) -> u64 {
        self.dropped
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: HeapCons<f32>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for frame in data.chunks_mut(channels) {
                let sample = T::from_sample(consumer.try_pop().unwrap_or(0.0));
                frame.fill(sample);
            }
        },
        |err| warn!(%err, "audio stream error"),
        None,
    )?;
    Ok(stream)
}
