//! Sample-accurate renderer behind the speaker output context.
//!
//! The mixer owns the output clock: time advances only as frames are rendered,
//! so a buffer scheduled at `t` seconds starts exactly at frame
//! `round(t * sample_rate)`. Buffers whose start already passed begin on the
//! next rendered frame.

use super::BufferId;

#[derive(Debug)]
struct Voice {
    id: BufferId,
    start_frame: u64,
    samples: Vec<f32>,
    cursor: usize,
}

#[derive(Debug)]
pub struct Mixer {
    sample_rate: u32,
    channels: usize,
    rendered_frames: u64,
    voices: Vec<Voice>,
    scratch: Vec<f32>,
}

impl Mixer {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            rendered_frames: 0,
            voices: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Output clock in seconds.
    pub fn now_seconds(&self) -> f64 {
        self.rendered_frames as f64 / f64::from(self.sample_rate)
    }

    pub fn rendered_frames(&self) -> u64 {
        self.rendered_frames
    }

    pub fn frame_for_time(&self, seconds: f64) -> u64 {
        if seconds <= 0.0 {
            return 0;
        }
        (seconds * f64::from(self.sample_rate)).round() as u64
    }

    pub fn time_for_frame(&self, frame: u64) -> f64 {
        frame as f64 / f64::from(self.sample_rate)
    }

    /// `samples` must already be at the mixer rate. A start frame that was
    /// already rendered is moved up to the next frame; the frame used is returned.
    pub fn schedule(&mut self, id: BufferId, samples: Vec<f32>, start_frame: u64) -> u64 {
        let start_frame = start_frame.max(self.rendered_frames);
        self.voices.push(Voice {
            id,
            start_frame,
            samples,
            cursor: 0,
        });
        start_frame
    }

    pub fn stop(&mut self, id: BufferId) -> bool {
        let before = self.voices.len();
        self.voices.retain(|voice| voice.id != id);
        self.voices.len() != before
    }

    pub fn clear(&mut self) {
        self.voices.clear();
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Fill an interleaved buffer and return the buffers that finished during it.
    pub fn render(&mut self, out: &mut [f32]) -> Vec<BufferId> {
        let frames = out.len() / self.channels;
        self.scratch.clear();
        self.scratch.resize(frames, 0.0);

        let mut finished = Vec::new();
        let rendered = self.rendered_frames;
        for voice in &mut self.voices {
            let offset = voice.start_frame.saturating_sub(rendered);
            if offset >= frames as u64 {
                continue;
            }
            let offset = offset as usize;
            let remaining = voice.samples.len() - voice.cursor;
            let count = remaining.min(frames - offset);
            for (slot, sample) in self.scratch[offset..offset + count]
                .iter_mut()
                .zip(&voice.samples[voice.cursor..voice.cursor + count])
            {
                *slot += *sample;
            }
            voice.cursor += count;
            if voice.cursor >= voice.samples.len() {
                finished.push(voice.id);
            }
        }
        if !finished.is_empty() {
            self.voices.retain(|voice| !finished.contains(&voice.id));
        }

        for (frame, value) in out.chunks_mut(self.channels).zip(self.scratch.iter()) {
            let clamped = value.clamp(-1.0, 1.0);
            for sample in frame.iter_mut() {
                *sample = clamped;
            }
        }
        for sample in out[frames * self.channels..].iter_mut() {
            *sample = 0.0;
        }
        self.rendered_frames += frames as u64;
        finished
    }
}
