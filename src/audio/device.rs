//! `cpal` implementation of the audio seam.

use super::mixer::Mixer;
use super::resample::{resample_block, StreamResampler};
use super::{
    AudioBackend, BufferId, DeviceNotice, DeviceNotifier, InputDevice, InputRequest,
    OutputContext, OutputRequest, SampleSink,
};
use crate::error::SessionError;
use crate::lock::lock_or_recover;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use std::env;
use std::sync::{Arc, Mutex};

/// Comma-separated device names that replace real enumeration when listing.
pub const TEST_DEVICES_ENV: &str = "PLUMBIT_VOICE_TEST_DEVICES";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Input,
    Output,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

fn test_devices_override() -> Option<Vec<String>> {
    let raw = env::var(TEST_DEVICES_ENV).ok()?;
    Some(
        raw.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

fn enumerate(direction: Direction) -> Result<Vec<String>, SessionError> {
    if let Some(names) = test_devices_override() {
        return Ok(names);
    }
    Ok(host_devices(direction)?
        .iter()
        .filter_map(|device| device.name().ok())
        .collect())
}

fn host_devices(direction: Direction) -> Result<Vec<cpal::Device>, SessionError> {
    let host = cpal::default_host();
    let devices = match direction {
        Direction::Input => host.input_devices().map(|found| found.collect::<Vec<_>>()),
        Direction::Output => host.output_devices().map(|found| found.collect::<Vec<_>>()),
    };
    devices.map_err(|err| {
        SessionError::Permission(format!("cannot enumerate {} devices: {err}", direction.label()))
    })
}

pub fn list_input_devices() -> Result<Vec<String>, SessionError> {
    enumerate(Direction::Input)
}

pub fn list_output_devices() -> Result<Vec<String>, SessionError> {
    enumerate(Direction::Output)
}

fn find_device(direction: Direction, wanted: Option<&str>) -> Result<cpal::Device, SessionError> {
    let host = cpal::default_host();
    let Some(wanted) = wanted.map(str::trim).filter(|name| !name.is_empty()) else {
        let device = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        return device.ok_or_else(|| {
            SessionError::Permission(format!("no default {} device", direction.label()))
        });
    };

    let named: Vec<(String, cpal::Device)> = host_devices(direction)?
        .into_iter()
        .filter_map(|device| device.name().ok().map(|name| (name, device)))
        .collect();
    let needle = wanted.to_ascii_lowercase();
    let position = named
        .iter()
        .position(|(name, _)| name == wanted)
        .or_else(|| {
            named
                .iter()
                .position(|(name, _)| name.to_ascii_lowercase().contains(&needle))
        });
    position
        .and_then(|index| named.into_iter().nth(index))
        .map(|(_, device)| device)
        .ok_or_else(|| {
            SessionError::Permission(format!("{} device '{wanted}' not found", direction.label()))
        })
}

fn downmix_into(data: &[f32], channels: usize, mono: &mut Vec<f32>) {
    mono.clear();
    if channels <= 1 {
        mono.extend_from_slice(data);
        return;
    }
    let scale = 1.0 / channels as f32;
    mono.extend(
        data.chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}

/// Per-callback capture state: downmix, convert to the wire rate, hand off.
struct CaptureStage {
    channels: usize,
    resampler: StreamResampler,
    mono: Vec<f32>,
    converted: Vec<f32>,
    sink: SampleSink,
}

impl CaptureStage {
    fn push(&mut self, data: &[f32]) {
        downmix_into(data, self.channels, &mut self.mono);
        self.converted.clear();
        self.resampler.process(&self.mono, &mut self.converted);
        if !self.converted.is_empty() {
            (self.sink)(&self.converted);
        }
    }
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut stage: CaptureStage,
    notifier: DeviceNotifier,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut floats = Vec::new();
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            floats.clear();
            floats.extend(data.iter().map(|sample| sample.to_sample::<f32>()));
            stage.push(&floats);
        },
        move |err| notifier(DeviceNotice::StreamError(err.to_string())),
        None,
    )
}

pub struct CpalInput {
    name: String,
    stream: Option<cpal::Stream>,
}

impl InputDevice for CpalInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), SessionError> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| SessionError::Permission("microphone already released".into()))?;
        stream
            .play()
            .map_err(|err| SessionError::Permission(format!("cannot start microphone: {err}")))
    }

    fn close(&mut self) -> Result<(), SessionError> {
        if let Some(stream) = self.stream.take() {
            let paused = stream.pause();
            drop(stream);
            paused.map_err(|err| SessionError::Permission(format!("microphone pause failed: {err}")))?;
        }
        Ok(())
    }
}

fn render_into<T>(mixer: &Mutex<Mixer>, notifier: &DeviceNotifier, scratch: &mut Vec<f32>, out: &mut [T])
where
    T: SizedSample + FromSample<f32>,
{
    scratch.clear();
    scratch.resize(out.len(), 0.0);
    let finished = lock_or_recover(mixer, "output_render").render(scratch);
    for (slot, sample) in out.iter_mut().zip(scratch.iter()) {
        *slot = T::from_sample(*sample);
    }
    for id in finished {
        notifier(DeviceNotice::BufferEnded(id));
    }
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
    notifier: DeviceNotifier,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let error_notifier = Arc::clone(&notifier);
    let mut scratch = Vec::new();
    device.build_output_stream(
        config,
        move |out: &mut [T], _: &cpal::OutputCallbackInfo| {
            render_into(&mixer, &notifier, &mut scratch, out);
        },
        move |err| error_notifier(DeviceNotice::StreamError(err.to_string())),
        None,
    )
}

pub struct CpalOutput {
    name: String,
    request_rate: u32,
    device_rate: u32,
    mixer: Arc<Mutex<Mixer>>,
    stream: Option<cpal::Stream>,
}

impl OutputContext for CpalOutput {
    fn now(&self) -> f64 {
        lock_or_recover(&self.mixer, "output_clock").now_seconds()
    }

    fn sample_rate(&self) -> u32 {
        self.request_rate
    }

    fn schedule(
        &mut self,
        id: BufferId,
        samples: Vec<f32>,
        start_at: f64,
    ) -> Result<f64, SessionError> {
        if self.stream.is_none() {
            return Err(SessionError::Permission(format!(
                "speaker '{}' already released",
                self.name
            )));
        }
        let samples = if self.request_rate == self.device_rate {
            samples
        } else {
            resample_block(&samples, self.request_rate, self.device_rate)
        };
        let mut mixer = lock_or_recover(&self.mixer, "output_schedule");
        let requested = mixer.frame_for_time(start_at);
        let start_frame = mixer.schedule(id, samples, requested);
        Ok(mixer.time_for_frame(start_frame))
    }

    fn stop(&mut self, id: BufferId) {
        lock_or_recover(&self.mixer, "output_stop").stop(id);
    }

    fn close(&mut self) -> Result<(), SessionError> {
        lock_or_recover(&self.mixer, "output_close").clear();
        if let Some(stream) = self.stream.take() {
            let paused = stream.pause();
            drop(stream);
            paused.map_err(|err| {
                SessionError::Permission(format!("speaker '{}' pause failed: {err}", self.name))
            })?;
            tracing::debug!(device = %self.name, "speaker released");
        }
        Ok(())
    }
}

/// Real hardware via the platform default `cpal` host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn open_input(
        &self,
        request: &InputRequest,
        sink: SampleSink,
        notifier: DeviceNotifier,
    ) -> Result<Box<dyn InputDevice>, SessionError> {
        let device = find_device(Direction::Input, request.device_name.as_deref())?;
        let name = device.name().unwrap_or_else(|_| "unknown microphone".to_string());
        let supported = device.default_input_config().map_err(|err| {
            SessionError::Permission(format!("microphone '{name}' has no usable config: {err}"))
        })?;
        let format = supported.sample_format();
        let config: StreamConfig = supported.config();
        let stage = CaptureStage {
            channels: usize::from(config.channels.max(1)),
            resampler: StreamResampler::new(config.sample_rate.0, request.sample_rate),
            mono: Vec::new(),
            converted: Vec::new(),
            sink,
        };
        tracing::info!(
            device = %name,
            device_rate = config.sample_rate.0,
            channels = config.channels,
            format = ?format,
            "opening microphone"
        );

        let stream = match format {
            SampleFormat::F32 => build_input_stream::<f32>(&device, &config, stage, notifier),
            SampleFormat::I16 => build_input_stream::<i16>(&device, &config, stage, notifier),
            SampleFormat::U16 => build_input_stream::<u16>(&device, &config, stage, notifier),
            other => {
                return Err(SessionError::Permission(format!(
                    "unsupported microphone sample format {other:?}"
                )))
            }
        }
        .map_err(|err| SessionError::Permission(format!("cannot open microphone '{name}': {err}")))?;

        // Some hosts start streams on build; stay silent until start().
        if let Err(err) = stream.pause() {
            tracing::debug!(%err, "microphone stream could not be paused after build");
        }

        Ok(Box::new(CpalInput {
            name,
            stream: Some(stream),
        }))
    }

    fn open_output(
        &self,
        request: &OutputRequest,
        notifier: DeviceNotifier,
    ) -> Result<Box<dyn OutputContext>, SessionError> {
        let device = find_device(Direction::Output, request.device_name.as_deref())?;
        let name = device.name().unwrap_or_else(|_| "unknown speaker".to_string());
        let supported = device.default_output_config().map_err(|err| {
            SessionError::Permission(format!("speaker '{name}' has no usable config: {err}"))
        })?;
        let format = supported.sample_format();
        let config: StreamConfig = supported.config();
        let device_rate = config.sample_rate.0;
        let mixer = Arc::new(Mutex::new(Mixer::new(
            device_rate,
            usize::from(config.channels.max(1)),
        )));
        tracing::info!(
            device = %name,
            device_rate,
            channels = config.channels,
            format = ?format,
            "opening speaker"
        );

        let shared = Arc::clone(&mixer);
        let stream = match format {
            SampleFormat::F32 => build_output_stream::<f32>(&device, &config, shared, notifier),
            SampleFormat::I16 => build_output_stream::<i16>(&device, &config, shared, notifier),
            SampleFormat::U16 => build_output_stream::<u16>(&device, &config, shared, notifier),
            other => {
                return Err(SessionError::Permission(format!(
                    "unsupported speaker sample format {other:?}"
                )))
            }
        }
        .map_err(|err| SessionError::Permission(format!("cannot open speaker '{name}': {err}")))?;
        stream
            .play()
            .map_err(|err| SessionError::Permission(format!("cannot start speaker '{name}': {err}")))?;

        Ok(Box::new(CpalOutput {
            name,
            request_rate: request.sample_rate,
            device_rate,
            mixer,
            stream: Some(stream),
        }))
    }
}
