//! cpal input (and optional pass-through output) streams. The data callbacks
//! only move samples into preallocated rings and bump atomics.

use cpal::{
    BufferSize, BuildStreamError, FromSample, Sample, SampleFormat, SizedSample, Stream,
    StreamConfig, SupportedStreamConfigRange,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Observer, Producer, Split},
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use super::{BlockReader, HealthStatus, SampleSink, StreamHealth, sample_ring};
use crate::config::AudioConfig;
use crate::devices::{DeviceDescriptor, DeviceKind, device_name};
use crate::error::{Error, Result};

pub struct AudioCapture {
    input: DeviceDescriptor,
    output: Option<DeviceDescriptor>,
    health: Arc<StreamHealth>,
    muted: Arc<AtomicBool>,
    _input_stream: Stream,
    _output_stream: Option<Stream>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Input,
    Output,
}

impl AudioCapture {
    /// Starts capturing from `input` and, when given, forwarding every frame
    /// to `output`. `muted` is shared so the flag survives restarts.
    pub fn open(
        input: &DeviceDescriptor,
        output: Option<&DeviceDescriptor>,
        config: &AudioConfig,
        muted: Arc<AtomicBool>,
    ) -> Result<(Self, BlockReader)> {
        check_descriptor(input, Side::Input)?;
        if let Some(output) = output {
            check_descriptor(output, Side::Output)?;
        }

        let host = cpal::default_host();
        let rate = config.sample_rate;

        let input_device = find_device(&host, &input.name, Side::Input)?;
        let (input_config, input_format) =
            select_config(&input_device, &input.name, rate, Side::Input)?;

        let output_setup = match output {
            Some(descriptor) => {
                let device = find_device(&host, &descriptor.name, Side::Output)?;
                let (cfg, format) = select_config(&device, &descriptor.name, rate, Side::Output)?;
                Some((descriptor, device, cfg, format))
            }
            None => None,
        };

        let health = Arc::new(StreamHealth::new(config.failure_threshold));
        let (analysis, reader) = sample_ring(config.block_size, config.ring_blocks, rate);

        let mut output_stream = None;
        let mut passthrough = None;
        if let Some((descriptor, device, cfg, format)) = &output_setup {
            let ring = HeapRb::<f32>::new(
                config.block_size.max(1) * config.ring_blocks.max(2) * cfg.channels as usize,
            );
            let (producer, consumer) = ring.split();
            let stream = build_output(
                device,
                cfg,
                *format,
                consumer,
                muted.clone(),
                health.clone(),
            )
            .map_err(|e| build_error(&descriptor.name, rate, e))?;
            passthrough = Some(PassThrough {
                producer,
                channels: cfg.channels as usize,
            });
            output_stream = Some(stream);
        }

        let sink = CaptureSink {
            analysis,
            passthrough,
            channels: input_config.channels as usize,
            muted: muted.clone(),
            health: health.clone(),
        };
        let input_stream = build_input(&input_device, &input_config, input_format, sink)
            .map_err(|e| build_error(&input.name, rate, e))?;

        if let Some(stream) = &output_stream {
            stream
                .play()
                .map_err(|e| Error::unavailable(&output_setup_name(output), e))?;
        }
        input_stream
            .play()
            .map_err(|e| Error::unavailable(&input.name, e))?;

        tracing::info!(
            "Audio capture started: {} ({} ch, {:?}) -> {} @ {} Hz",
            input.name,
            input_config.channels,
            input_format,
            output_setup_name(output),
            rate
        );

        Ok((
            Self {
                input: input.clone(),
                output: output.cloned(),
                health,
                muted,
                _input_stream: input_stream,
                _output_stream: output_stream,
            },
            reader,
        ))
    }

    pub fn input(&self) -> &DeviceDescriptor {
        &self.input
    }

    pub fn output(&self) -> Option<&DeviceDescriptor> {
        self.output.as_ref()
    }

    /// Muting silences the output only; capture and analysis continue.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn health(&self) -> HealthStatus {
        self.health.status()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        tracing::info!("Audio capture stopped: {}", self.input.name);
    }
}

fn output_setup_name(output: Option<&DeviceDescriptor>) -> String {
    output
        .map(|d| d.name.clone())
        .unwrap_or_else(|| "no output".to_string())
}

fn check_descriptor(descriptor: &DeviceDescriptor, side: Side) -> Result<()> {
    let direction_ok = match side {
        Side::Input => descriptor.direction.is_input(),
        Side::Output => descriptor.direction.is_output(),
    };
    if descriptor.kind != DeviceKind::Audio || !direction_ok {
        return Err(Error::unavailable(
            &descriptor.name,
            format!("not an audio {side:?} device").to_lowercase(),
        ));
    }
    Ok(())
}

fn find_device(host: &cpal::Host, name: &str, side: Side) -> Result<cpal::Device> {
    let mut devices: Box<dyn Iterator<Item = cpal::Device>> = match side {
        Side::Input => Box::new(host.input_devices().map_err(|e| Error::unavailable(name, e))?),
        Side::Output => Box::new(host.output_devices().map_err(|e| Error::unavailable(name, e))?),
    };
    devices
        .find(|d| device_name(d).as_deref() == Some(name))
        .ok_or_else(|| Error::unavailable(name, "device disconnected"))
}

fn select_config(
    device: &cpal::Device,
    name: &str,
    sample_rate: u32,
    side: Side,
) -> Result<(StreamConfig, SampleFormat)> {
    let ranges: Vec<SupportedStreamConfigRange> = match side {
        Side::Input => device
            .supported_input_configs()
            .map_err(|e| Error::unavailable(name, e))?
            .collect(),
        Side::Output => device
            .supported_output_configs()
            .map_err(|e| Error::unavailable(name, e))?
            .collect(),
    };

    let range = pick_range(&ranges, sample_rate).ok_or_else(|| Error::FormatUnsupported {
        name: name.to_string(),
        sample_rate,
        reason: "no f32/i16/u16 configuration covers this rate".to_string(),
    })?;

    let config = StreamConfig {
        channels: range.channels(),
        sample_rate,
        buffer_size: BufferSize::Default,
    };
    Ok((config, range.sample_format()))
}

/// Prefers f32, then mono/stereo over wider layouts.
fn pick_range(
    ranges: &[SupportedStreamConfigRange],
    sample_rate: u32,
) -> Option<&SupportedStreamConfigRange> {
    ranges
        .iter()
        .filter(|r| r.min_sample_rate() <= sample_rate && sample_rate <= r.max_sample_rate())
        .filter(|r| {
            matches!(
                r.sample_format(),
                SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
            )
        })
        .filter(|r| r.channels() > 0)
        .min_by_key(|r| {
            (
                r.sample_format() != SampleFormat::F32,
                r.channels() > 2,
                r.channels(),
            )
        })
}

fn build_error(name: &str, sample_rate: u32, err: BuildStreamError) -> Error {
    match err {
        BuildStreamError::StreamConfigNotSupported => Error::FormatUnsupported {
            name: name.to_string(),
            sample_rate,
            reason: err.to_string(),
        },
        other => Error::unavailable(name, other),
    }
}

struct PassThrough {
    producer: HeapProd<f32>,
    channels: usize,
}

/// Everything the input callback owns.
struct CaptureSink {
    analysis: SampleSink,
    passthrough: Option<PassThrough>,
    channels: usize,
    muted: Arc<AtomicBool>,
    health: Arc<StreamHealth>,
}

impl CaptureSink {
    fn process<T>(&mut self, data: &[T])
    where
        T: Sample,
        f32: FromSample<T>,
    {
        self.health.record_callback();
        let muted = self.muted.load(Ordering::Relaxed);
        let mut overrun = false;

        for frame in data.chunks(self.channels.max(1)) {
            let sum: f32 = frame.iter().map(|s| s.to_sample::<f32>()).sum();
            if !self.analysis.push(sum / frame.len() as f32) {
                overrun = true;
            }

            if let Some(out) = self.passthrough.as_mut() {
                if muted {
                    continue;
                }
                if out.producer.vacant_len() < out.channels {
                    self.health.record_gap();
                    continue;
                }
                for ch in 0..out.channels {
                    let sample = frame[ch.min(frame.len() - 1)].to_sample::<f32>();
                    let _ = out.producer.try_push(sample);
                }
            }
        }

        if overrun {
            self.health.record_failure();
        } else {
            self.health.record_ok();
        }
    }
}

fn build_input(
    device: &cpal::Device,
    config: &StreamConfig,
    format: SampleFormat,
    sink: CaptureSink,
) -> std::result::Result<Stream, BuildStreamError> {
    match format {
        SampleFormat::F32 => build_input_typed::<f32>(device, config, sink),
        SampleFormat::I16 => build_input_typed::<i16>(device, config, sink),
        SampleFormat::U16 => build_input_typed::<u16>(device, config, sink),
        _ => Err(BuildStreamError::StreamConfigNotSupported),
    }
}

fn build_input_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut sink: CaptureSink,
) -> std::result::Result<Stream, BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let health = sink.health.clone();
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| sink.process(data),
        move |err| health.record_stream_error(&err),
        None,
    )
}

fn build_output(
    device: &cpal::Device,
    config: &StreamConfig,
    format: SampleFormat,
    consumer: HeapCons<f32>,
    muted: Arc<AtomicBool>,
    health: Arc<StreamHealth>,
) -> std::result::Result<Stream, BuildStreamError> {
    match format {
        SampleFormat::F32 => build_output_typed::<f32>(device, config, consumer, muted, health),
        SampleFormat::I16 => build_output_typed::<i16>(device, config, consumer, muted, health),
        SampleFormat::U16 => build_output_typed::<u16>(device, config, consumer, muted, health),
        _ => Err(BuildStreamError::StreamConfigNotSupported),
    }
}

fn build_output_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: HeapCons<f32>,
    muted: Arc<AtomicBool>,
    health: Arc<StreamHealth>,
) -> std::result::Result<Stream, BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let err_health = health.clone();
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            if muted.load(Ordering::Relaxed) {
                consumer.clear();
                data.fill(T::EQUILIBRIUM);
                return;
            }
            let mut short = false;
            for frame in data.chunks_mut(channels.max(1)) {
                if consumer.occupied_len() < frame.len() {
                    frame.fill(T::EQUILIBRIUM);
                    short = true;
                    continue;
                }
                for sample in frame.iter_mut() {
                    *sample = T::from_sample(consumer.try_pop().unwrap_or(0.0));
                }
            }
            if short {
                health.record_gap();
            }
        },
        move |err| err_health.record_stream_error(&err),
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::Direction;

    fn sink(
        channels: usize,
        with_output: Option<usize>,
    ) -> (CaptureSink, BlockReader, Option<HeapCons<f32>>) {
        let (analysis, reader) = sample_ring(1, 16, 44_100);
        let (passthrough, out_cons) = match with_output {
            Some(out_channels) => {
                let (producer, consumer) = HeapRb::<f32>::new(16).split();
                (
                    Some(PassThrough {
                        producer,
                        channels: out_channels,
                    }),
                    Some(consumer),
                )
            }
            None => (None, None),
        };
        let sink = CaptureSink {
            analysis,
            passthrough,
            channels,
            muted: Arc::new(AtomicBool::new(false)),
            health: Arc::new(StreamHealth::new(2)),
        };
        (sink, reader, out_cons)
    }

    fn drain(consumer: &mut HeapCons<f32>) -> Vec<f32> {
        consumer.pop_iter().collect()
    }

    fn drain_blocks(reader: &mut BlockReader) -> Vec<f32> {
        std::iter::from_fn(|| reader.next_block())
            .flat_map(|b| b.samples)
            .collect()
    }

    #[test]
    fn analysis_receives_mono_mixdown() {
        let (mut sink, mut analysis, _) = sink(2, None);
        sink.process(&[1.0f32, 0.0, 0.5, 0.5, -1.0, -0.5]);
        assert_eq!(drain_blocks(&mut analysis), vec![0.5, 0.5, -0.75]);
    }

    #[test]
    fn integer_samples_are_converted() {
        let (mut sink, mut analysis, _) = sink(1, None);
        sink.process(&[0i16, i16::MIN]);
        assert_eq!(drain_blocks(&mut analysis), vec![0.0, -1.0]);
    }

    #[test]
    fn passthrough_forwards_frames_unmodified() {
        let (mut sink, _, out) = sink(2, Some(2));
        let mut out = out.unwrap();
        sink.process(&[0.1f32, 0.2, 0.3, 0.4]);
        assert_eq!(drain(&mut out), vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn mono_input_fans_out_to_every_output_channel() {
        let (mut sink, _, out) = sink(1, Some(2));
        let mut out = out.unwrap();
        sink.process(&[0.25f32, -0.25]);
        assert_eq!(drain(&mut out), vec![0.25, 0.25, -0.25, -0.25]);
    }

    #[test]
    fn muted_sink_still_feeds_analysis() {
        let (mut sink, mut analysis, out) = sink(1, Some(1));
        let mut out = out.unwrap();
        sink.muted.store(true, Ordering::Relaxed);
        sink.process(&[0.5f32, 0.5]);
        assert_eq!(drain_blocks(&mut analysis), vec![0.5, 0.5]);
        assert!(drain(&mut out).is_empty());
    }

    #[test]
    fn repeated_analysis_overruns_escalate() {
        let (mut sink, _analysis, _) = sink(1, None);
        let block = [0.0f32; 32];
        sink.process(&block);
        assert!(!sink.health.status().failed);
        sink.process(&block);
        assert!(sink.health.status().failed);
    }

    #[test]
    fn analysis_overrun_keeps_the_newest_samples() {
        let (mut sink, mut analysis, _) = sink(1, None);
        let samples: Vec<f32> = (0..20).map(|i| i as f32).collect();
        sink.process(&samples);

        let expected: Vec<f32> = (4..20).map(|i| i as f32).collect();
        assert_eq!(drain_blocks(&mut analysis), expected);
        assert_eq!(sink.health.status().consecutive_failures, 1);
    }

    #[test]
    fn every_callback_is_counted() {
        let (mut sink, _analysis, _) = sink(1, None);
        sink.process(&[0.0f32; 4]);
        sink.process::<f32>(&[]);
        assert_eq!(sink.health.status().callbacks, 2);
    }

    #[test]
    fn wrong_descriptors_are_rejected_before_touching_the_host() {
        let midi = DeviceDescriptor::new(DeviceKind::Midi, Direction::Input, "Keys");
        assert!(matches!(
            check_descriptor(&midi, Side::Input),
            Err(Error::DeviceUnavailable { .. })
        ));
        let speakers = DeviceDescriptor::new(DeviceKind::Audio, Direction::Output, "Speakers");
        assert!(check_descriptor(&speakers, Side::Output).is_ok());
        assert!(check_descriptor(&speakers, Side::Input).is_err());
    }
}
