use std::{f32::consts::PI, fmt, sync::Arc};

use rand::Rng;
use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::generator::place_on_ticks;
use crate::{BeatMap, BeatReachError, Difficulty, Result};

/// Short-time energy of one analysis frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyFrame {
    /// Centre of the frame in milliseconds.
    pub time_ms: f64,
    /// Energy normalised against the loudest frame of the signal.
    pub energy: f32,
}

/// Result of analysing one signal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnergyProfile {
    pub sample_rate: u32,
    pub frames: Vec<EnergyFrame>,
    /// Indices into `frames` that were flagged as peaks.
    pub peaks: Vec<usize>,
}

impl EnergyProfile {
    pub fn peak_times_ms(&self) -> impl Iterator<Item = f64> + '_ {
        self.peaks.iter().map(|&index| self.frames[index].time_ms)
    }

    /// Mean spacing between consecutive peaks, expressed as a tempo.
    pub fn tempo_estimate(&self) -> Option<f64> {
        if self.peaks.len() < 2 {
            return None;
        }
        let times: Vec<f64> = self.peak_times_ms().collect();
        let average = (times[times.len() - 1] - times[0]) / (times.len() - 1) as f64;
        (average > f64::EPSILON).then(|| 60_000.0 / average)
    }
}

/// Energy-based onset picker. Frames overlap by `frame_size - hop_size`
/// samples; energy is read off the Hann-windowed power spectrum.
pub struct EnergyAnalyzer {
    config: AnalysisConfig,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl EnergyAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Computes the energy profile and its peaks for a mono signal.
    pub fn analyze(&mut self, samples: &[f32], sample_rate: u32) -> Result<EnergyProfile> {
        let AnalysisConfig {
            frame_size,
            hop_size,
            threshold,
            peak_window,
        } = self.config;

        if frame_size < 2 || hop_size == 0 {
            return Err(BeatReachError::InvalidInput(
                "analysis requires a frame of at least two samples and a non-zero hop",
            ));
        }
        if sample_rate == 0 {
            return Err(BeatReachError::Analysis("sample rate must be non-zero".into()));
        }
        if samples.len() < frame_size {
            return Err(BeatReachError::Analysis(format!(
                "signal has {} samples, need at least {frame_size}",
                samples.len()
            )));
        }
        if samples.iter().any(|sample| !sample.is_finite()) {
            return Err(BeatReachError::Analysis("signal contains non-finite samples".into()));
        }

        let mut energies = Vec::new();
        let mut start = 0;
        while start + frame_size <= samples.len() {
            energies.push(self.frame_energy(&samples[start..start + frame_size])?);
            start += hop_size;
        }

        let loudest = energies.iter().copied().fold(0.0_f32, f32::max);
        if loudest <= f32::EPSILON {
            return Err(BeatReachError::Analysis("signal is silent".into()));
        }

        let ms_per_sample = 1000.0 / sample_rate as f64;
        let frames: Vec<EnergyFrame> = energies
            .iter()
            .enumerate()
            .map(|(index, energy)| EnergyFrame {
                time_ms: (index * hop_size + frame_size / 2) as f64 * ms_per_sample,
                energy: energy / loudest,
            })
            .collect();

        let peaks = find_peaks(&frames, threshold, peak_window);
        tracing::debug!(frames = frames.len(), peaks = peaks.len(), "energy analysis complete");

        Ok(EnergyProfile {
            sample_rate,
            frames,
            peaks,
        })
    }

    /// Builds a beat-map whose targets sit on detected peaks, thinned by the
    /// difficulty's density rule.
    pub fn generate_beatmap<R: Rng + ?Sized>(
        &mut self,
        song_id: impl Into<String>,
        samples: &[f32],
        sample_rate: u32,
        difficulty: Difficulty,
        rng: &mut R,
    ) -> Result<BeatMap> {
        let profile = self
            .analyze(samples, sample_rate)
            .inspect_err(|err| tracing::warn!(%err, "energy analysis failed"))?;
        let bpm = profile.tempo_estimate().unwrap_or(120.0);

        let mut last_time = None;
        let ticks: Vec<(usize, u64)> = profile
            .peak_times_ms()
            .map(|time| time.round() as u64)
            .filter(|time| {
                let fresh = last_time != Some(*time);
                last_time = Some(*time);
                fresh
            })
            .enumerate()
            .collect();

        let targets = place_on_ticks(ticks, 60_000.0 / bpm, difficulty, rng);
        BeatMap::new(song_id, bpm, 0, difficulty, targets)
    }

    fn frame_energy(&mut self, frame: &[f32]) -> Result<f32> {
        let len = frame.len();
        let fft = self.prepare_fft(len);

        for (index, value) in frame.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        // One-sided spectrum: interior bins stand in for their mirrored twin.
        let last = fft.spectrum.len() - 1;
        let power: f32 = fft
            .spectrum
            .iter()
            .enumerate()
            .map(|(i, bin)| {
                let weight = if i == 0 || (i == last && len % 2 == 0) { 1.0 } else { 2.0 };
                weight * bin.norm_sqr()
            })
            .sum();

        Ok(power / (len * len) as f32)
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        let rebuild = self
            .fft
            .as_ref()
            .map(|fft| fft.size != size)
            .unwrap_or(true);

        if rebuild {
            self.fft = None;
        }

        let planner = &mut self.fft_planner;
        self.fft.get_or_insert_with(|| {
            let plan = planner.plan_fft_forward(size);
            let scratch = plan.make_scratch_vec();
            let spectrum = plan.make_output_vec();
            let input = plan.make_input_vec();
            FftResources {
                size,
                plan,
                scratch,
                spectrum,
                input,
            }
        })
    }
}

impl Default for EnergyAnalyzer {
    fn default() -> Self {
        Self::new(AnalysisConfig::default())
    }
}

/// A frame is a peak when it clears the threshold, is at least as loud as
/// every later neighbour and strictly louder than every earlier one inside
/// the window. The asymmetry keeps one peak per plateau.
fn find_peaks(frames: &[EnergyFrame], threshold: f32, window: usize) -> Vec<usize> {
    let mut peaks = Vec::new();
    for (index, frame) in frames.iter().enumerate() {
        if frame.energy < threshold {
            continue;
        }
        let lo = index.saturating_sub(window);
        let hi = (index + window).min(frames.len() - 1);
        let earlier = frames[lo..index].iter().all(|other| frame.energy > other.energy);
        let later = frames[index + 1..=hi].iter().all(|other| frame.energy >= other.energy);
        if earlier && later {
            peaks.push(index);
        }
    }
    peaks
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for EnergyAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnergyAnalyzer")
            .field("config", &self.config)
            .field("fft", &self.fft)
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
