//! Sample-rate conversion between device rates and the fixed wire rates.
//!
//! Capture runs continuously, so it uses a stateful stream resampler (FFT-based
//! when `high-quality-audio` is enabled). Playback chunks are converted one at a
//! time with linear interpolation, which adds no delay and keeps buffer
//! durations exact.

#[cfg(feature = "high-quality-audio")]
use rubato::Resampler as _;

/// Convert a whole buffer; output length is `round(len * to / from)`.
pub fn resample_block(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() || from_rate == 0 || to_rate == 0 {
        return input.to_vec();
    }
    let out_len = ((input.len() as u64 * u64::from(to_rate) + u64::from(from_rate) / 2)
        / u64::from(from_rate)) as usize;
    let step = f64::from(from_rate) / f64::from(to_rate);
    let last = input.len() - 1;
    (0..out_len)
        .map(|k| {
            let pos = k as f64 * step;
            let index = (pos.floor() as usize).min(last);
            let frac = (pos - index as f64) as f32;
            let s0 = input[index];
            let s1 = input[(index + 1).min(last)];
            s0 + (s1 - s0) * frac
        })
        .collect()
}

/// Streaming linear interpolator that carries phase across blocks.
#[derive(Debug)]
struct LinearStream {
    step: f64,
    /// Next output position relative to the first sample of the incoming block;
    /// negative values fall between `prev` and that first sample.
    next_pos: f64,
    prev: Option<f32>,
}

impl LinearStream {
    fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            step: f64::from(from_rate) / f64::from(to_rate),
            next_pos: 0.0,
            prev: None,
        }
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if input.is_empty() {
            return;
        }
        let last = (input.len() - 1) as f64;
        while self.next_pos <= last {
            let base = self.next_pos.floor();
            let frac = (self.next_pos - base) as f32;
            let (s0, s1) = if base < 0.0 {
                (self.prev.unwrap_or(input[0]), input[0])
            } else {
                let i = base as usize;
                (input[i], input[(i + 1).min(input.len() - 1)])
            };
            out.push(s0 + (s1 - s0) * frac);
            self.next_pos += self.step;
        }
        self.next_pos -= input.len() as f64;
        self.prev = input.last().copied();
    }
}

#[cfg(feature = "high-quality-audio")]
const FFT_CHUNK_FRAMES: usize = 1024;

#[cfg(feature = "high-quality-audio")]
struct FftStream {
    resampler: rubato::FftFixedIn<f32>,
    pending: Vec<f32>,
}

#[cfg(feature = "high-quality-audio")]
impl FftStream {
    fn new(from_rate: u32, to_rate: u32) -> Option<Self> {
        match rubato::FftFixedIn::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            FFT_CHUNK_FRAMES,
            2,
            1,
        ) {
            Ok(resampler) => Some(Self {
                resampler,
                pending: Vec::with_capacity(FFT_CHUNK_FRAMES * 2),
            }),
            Err(err) => {
                tracing::warn!(%err, from_rate, to_rate, "fft resampler unavailable; using linear");
                None
            }
        }
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> bool {
        self.pending.extend_from_slice(input);
        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending.len() < needed {
                return true;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            match self.resampler.process(&[chunk], None) {
                Ok(mut produced) => {
                    if let Some(channel) = produced.pop() {
                        out.extend_from_slice(&channel);
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "fft resampler failed; switching to linear");
                    return false;
                }
            }
        }
    }
}

enum Stage {
    Passthrough,
    Linear(LinearStream),
    #[cfg(feature = "high-quality-audio")]
    Fft(Box<FftStream>),
}

/// Mono stream resampler used on the capture path.
pub struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    stage: Stage,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        let stage = if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
            Stage::Passthrough
        } else {
            Self::preferred_stage(from_rate, to_rate)
        };
        Self {
            from_rate,
            to_rate,
            stage,
        }
    }

    #[cfg(feature = "high-quality-audio")]
    fn preferred_stage(from_rate: u32, to_rate: u32) -> Stage {
        match FftStream::new(from_rate, to_rate) {
            Some(fft) => Stage::Fft(Box::new(fft)),
            None => Stage::Linear(LinearStream::new(from_rate, to_rate)),
        }
    }

    #[cfg(not(feature = "high-quality-audio"))]
    fn preferred_stage(from_rate: u32, to_rate: u32) -> Stage {
        Stage::Linear(LinearStream::new(from_rate, to_rate))
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self.stage, Stage::Passthrough)
    }

    /// Append converted samples for `input` to `out`.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        match &mut self.stage {
            Stage::Passthrough => out.extend_from_slice(input),
            Stage::Linear(linear) => linear.process(input, out),
            #[cfg(feature = "high-quality-audio")]
            Stage::Fft(fft) => {
                if !fft.process(input, out) {
                    self.stage = Stage::Linear(LinearStream::new(self.from_rate, self.to_rate));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_same_rate_is_identity() {
        let input = vec![0.1, -0.2, 0.3];
        assert_eq!(resample_block(&input, 24_000, 24_000), input);
    }

    #[test]
    fn block_length_scales_with_rate_ratio() {
        let input = vec![0.0; 12_000];
        assert_eq!(resample_block(&input, 24_000, 48_000).len(), 24_000);
        assert_eq!(resample_block(&input, 24_000, 44_100).len(), 22_050);
        assert_eq!(resample_block(&input, 24_000, 16_000).len(), 8_000);
    }

    #[test]
    fn block_upsample_interpolates_midpoints() {
        let out = resample_block(&[0.0, 1.0], 1, 2);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], 0.0);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert_eq!(out[2], 1.0);
    }

    #[test]
    fn linear_stream_matches_block_across_splits() {
        let input: Vec<f32> = (0..480).map(|i| (i as f32 / 480.0).sin()).collect();
        let whole = {
            let mut stream = LinearStream::new(48_000, 16_000);
            let mut out = Vec::new();
            stream.process(&input, &mut out);
            out
        };
        let split = {
            let mut stream = LinearStream::new(48_000, 16_000);
            let mut out = Vec::new();
            for chunk in input.chunks(37) {
                stream.process(chunk, &mut out);
            }
            out
        };
        assert_eq!(whole.len(), 160);
        assert_eq!(whole.len(), split.len());
        for (a, b) in whole.iter().zip(split.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn stream_passthrough_when_rates_match() {
        let mut resampler = StreamResampler::new(16_000, 16_000);
        assert!(resampler.is_passthrough());
        let mut out = Vec::new();
        resampler.process(&[0.5, -0.5], &mut out);
        assert_eq!(out, vec![0.5, -0.5]);
    }

    #[test]
    fn stream_downsample_produces_roughly_one_third() {
        let mut resampler = StreamResampler::new(48_000, 16_000);
        let mut out = Vec::new();
        for _ in 0..20 {
            resampler.process(&vec![0.0; 4_800], &mut out);
        }
        let expected = 32_000_i64;
        assert!((out.len() as i64 - expected).abs() <= 2_048, "got {}", out.len());
    }
}
