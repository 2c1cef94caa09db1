//! Per-session analysis engine
//!
//! Owns the streaming state for one caller: chunk ring, MFCC extraction,
//! the bounded session feature window, similarity scoring against the
//! bound master, and the four enhanced analyzers. Operations on a single
//! session must be externally serialized; chunks are processed strictly
//! in arrival order.
//!
//! State machine:
//!
//! | State     | Entered by                          | Exit                        |
//! |-----------|-------------------------------------|-----------------------------|
//! | Created   | construction, `reset`               | Active on first chunk       |
//! | Active    | first chunk with a master bound     | Finalized, Created (reset)  |
//! | Finalized | `finalize`                          | Created (reset)             |
//! | Poisoned  | internal DSP failure                | none (destroy only)         |
//!
//! Destruction is handled by the owning engine: a destroyed session is
//! removed from the table and later calls fail with `SessionNotFound`.

use std::sync::Arc;
use std::time::Instant;

use cf_core::{sample_rate_supported, EngineConfig, FeatureMatrix};
use cf_dsp::{
    CadenceAnalyzer, CadenceConfig, HarmonicAnalyzer, HarmonicConfig, LoudnessMonitor,
    MfccConfig, MfccProcessor, PitchConfig, PitchReading, PitchTracker, HarmonicReading,
    MAX_FFT_SIZE,
};
use cf_sim::{min_frames_required, SimilarityComponents, SimilarityScorer};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::master::MasterCall;
use crate::waveform::{WaveformBuilder, WaveformOverview};
use crate::{EngineError, EngineResult, EnhancedSummary};

/// Opaque session identifier, unique among live sessions
pub type SessionId = u64;

/// Lowest fundamental the enhanced pitch path must reach (Hz)
const PITCH_MIN_FREQ: f32 = 80.0;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No audio processed yet (or just reset); master may be (re)bound
    Created,
    /// Actively ingesting chunks
    Active,
    /// Canonical score locked; reset to go again
    Finalized,
    /// Internal failure; every further operation fails
    Poisoned,
}

/// Realtime scoring progress
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RealtimeState {
    /// MFCC frames observed since creation or the last reset
    pub frames_observed: u64,
    /// Frames needed before scores count as reliable
    pub min_frames_required: usize,
    /// True once enough frames accumulated and a master is bound
    pub reliable: bool,
}

/// Host-facing session bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: SessionId,
    pub state: SessionState,
    pub sample_rate: u32,
    pub samples_ingested: u64,
    pub frames_emitted: u64,
    /// Seconds of audio ingested
    pub duration_secs: f32,
    pub master_id: Option<String>,
}

/// Per-session orchestrator for analysis and scoring
pub struct SessionEngine {
    id: SessionId,
    sample_rate: u32,
    config: EngineConfig,
    state: SessionState,

    mfcc: MfccProcessor,
    features: FeatureMatrix,
    max_feature_frames: usize,

    master: Option<Arc<MasterCall>>,
    scorer: SimilarityScorer,
    last_components: Option<SimilarityComponents>,
    frames_observed: u64,
    frames_since_score: usize,

    loudness: LoudnessMonitor,
    pitch: PitchTracker,
    harmonic: HarmonicAnalyzer,
    cadence: CadenceAnalyzer,
    last_pitch: PitchReading,
    last_harmonic: HarmonicReading,

    enhanced_enabled: bool,
    enhanced_explicitly_set: bool,
    enhanced: EnhancedSummary,
    enhanced_last_populated: Option<Instant>,

    /// Raw clamped samples awaiting enhanced-analyzer framing
    analysis_pending: Vec<f32>,
    /// Window fed to pitch/harmonic analyzers (>= frame_size)
    analysis_window: usize,
    /// Clamped copy of the chunk slice being processed
    clamp_scratch: Vec<f32>,

    waveform: WaveformBuilder,
    samples_ingested: u64,
    created_at: Instant,
    last_activity: Instant,
}

impl SessionEngine {
    /// Build a session for the declared sample rate
    pub fn new(id: SessionId, sample_rate: u32, config: EngineConfig) -> EngineResult<Self> {
        if !sample_rate_supported(sample_rate) {
            return Err(EngineError::InvalidSampleRate(sample_rate));
        }
        config.validate()?;

        let mfcc = MfccProcessor::new(MfccConfig::from_engine(&config, sample_rate))?;
        let max_feature_frames = ((config.max_session_secs * sample_rate as f32)
            / config.hop_size as f32)
            .ceil() as usize;

        // Pitch needs a window long enough to resolve the lowest target
        // fundamental; 512-sample frames cannot reach 80 Hz.
        let analysis_window = ((2.0 * sample_rate as f32 / PITCH_MIN_FREQ) as usize)
            .next_power_of_two()
            .clamp(config.frame_size, MAX_FFT_SIZE);

        let pitch = PitchTracker::new(PitchConfig::new(
            sample_rate,
            analysis_window,
            config.hop_size,
        ))?;
        let harmonic = HarmonicAnalyzer::new(HarmonicConfig {
            fft_size: analysis_window,
            ..HarmonicConfig::new(sample_rate)
        })?;
        let cadence = CadenceAnalyzer::new(CadenceConfig::new(
            sample_rate,
            config.frame_size,
            config.hop_size,
        ))?;

        Ok(Self {
            id,
            sample_rate,
            state: SessionState::Created,
            features: FeatureMatrix::new(config.num_coeffs),
            max_feature_frames,
            master: None,
            scorer: SimilarityScorer::new(
                config.dtw_band_radius,
                config.similarity_weights,
            ),
            last_components: None,
            frames_observed: 0,
            frames_since_score: 0,
            loudness: LoudnessMonitor::new(sample_rate),
            pitch,
            harmonic,
            cadence,
            last_pitch: PitchReading::default(),
            last_harmonic: HarmonicReading::default(),
            enhanced_enabled: false,
            enhanced_explicitly_set: false,
            enhanced: EnhancedSummary::default(),
            enhanced_last_populated: None,
            analysis_pending: Vec::with_capacity(analysis_window * 2),
            analysis_window,
            clamp_scratch: Vec::with_capacity(config.max_chunk_len),
            waveform: WaveformBuilder::new(sample_rate, config.max_session_secs),
            samples_ingested: 0,
            created_at: Instant::now(),
            last_activity: Instant::now(),
            mfcc,
            config,
        })
    }

    /// Session id
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Declared sample rate (Hz)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames currently held in the session feature window
    pub fn feature_frames(&self) -> usize {
        self.features.num_frames()
    }

    /// Bind a master call.
    ///
    /// Valid in `Created` only; reset first to rebind mid-session.
    pub fn load_master(&mut self, master: Arc<MasterCall>) -> EngineResult<()> {
        match self.state {
            SessionState::Created => {}
            SessionState::Poisoned => {
                return Err(EngineError::InvalidState("session poisoned".into()));
            }
            other => {
                return Err(EngineError::InvalidState(format!(
                    "master can only be bound before audio arrives (state {other:?})"
                )));
            }
        }
        if master.sample_rate() != 0 && master.sample_rate() != self.sample_rate {
            warn!(
                "session {}: master '{}' analyzed at {} Hz, session runs at {} Hz",
                self.id,
                master.id(),
                master.sample_rate(),
                self.sample_rate
            );
        }
        debug!(
            "session {}: bound master '{}' ({} frames)",
            self.id,
            master.id(),
            master.num_frames()
        );
        self.master = Some(master);
        Ok(())
    }

    /// Id of the bound master, if any
    pub fn master_id(&self) -> Option<&str> {
        self.master.as_deref().map(MasterCall::id)
    }

    /// Ingest one chunk of mono PCM.
    ///
    /// The chunk is validated before any state changes: empty chunks and
    /// chunks containing non-finite samples are rejected atomically.
    /// Samples outside [-1, 1] are clamped.
    pub fn process_chunk(&mut self, chunk: &[f32]) -> EngineResult<()> {
        match self.state {
            SessionState::Poisoned => {
                return Err(EngineError::InvalidState("session poisoned".into()));
            }
            SessionState::Finalized => {
                return Err(EngineError::InvalidState(
                    "session finalized; reset before sending more audio".into(),
                ));
            }
            SessionState::Created if self.master.is_none() => {
                return Err(EngineError::InvalidState(
                    "no master call loaded".into(),
                ));
            }
            _ => {}
        }
        if chunk.is_empty() {
            return Err(EngineError::InvalidAudio("empty chunk".into()));
        }
        if !chunk.iter().all(|x| x.is_finite()) {
            return Err(EngineError::InvalidAudio(
                "chunk contains NaN or infinite samples".into(),
            ));
        }

        self.last_activity = Instant::now();
        self.samples_ingested += chunk.len() as u64;
        let mut emitted_total = 0usize;

        for slice in chunk.chunks(self.config.max_chunk_len) {
            self.clamp_scratch.clear();
            self.clamp_scratch
                .extend(slice.iter().map(|x| x.clamp(-1.0, 1.0)));

            self.loudness.process(&self.clamp_scratch);
            self.waveform.push(&self.clamp_scratch);

            let emitted = match self.mfcc.push_samples(&self.clamp_scratch, &mut self.features)
            {
                Ok(n) => n,
                Err(e) => return Err(self.poison(e.into())),
            };
            emitted_total += emitted;

            if self.enhanced_enabled {
                if let Err(e) = self.feed_enhanced_analyzers() {
                    return Err(self.poison(e));
                }
            }
        }

        // Evict the oldest rows once the window is full
        let frames = self.features.num_frames();
        if frames > self.max_feature_frames {
            self.features.trim_front(frames - self.max_feature_frames);
        }

        self.frames_observed += emitted_total as u64;
        self.frames_since_score += emitted_total;
        self.state = SessionState::Active;

        self.maybe_rescore()?;
        if self.enhanced_enabled && emitted_total > 0 {
            self.refresh_enhanced_summary();
        }
        trace!(
            "session {}: chunk of {} samples -> {} frames (total {})",
            self.id,
            chunk.len(),
            emitted_total,
            self.frames_observed
        );
        Ok(())
    }

    /// Latest overall similarity.
    ///
    /// Finalized sessions return the locked canonical value. Before the
    /// first scoring pass this is `InsufficientData`, never a silent 0.
    pub fn similarity_score(&self) -> EngineResult<f32> {
        self.similarity_components().map(|c| c.overall)
    }

    /// Latest similarity component breakdown
    pub fn similarity_components(&self) -> EngineResult<SimilarityComponents> {
        if let Some(finalized) = self.scorer.finalized() {
            return Ok(*finalized);
        }
        self.last_components.ok_or(EngineError::InsufficientData)
    }

    /// Scoring progress and reliability
    pub fn realtime_state(&self) -> RealtimeState {
        let min = self
            .master
            .as_ref()
            .map(|m| min_frames_required(m.num_frames()))
            .unwrap_or(cf_sim::RELIABILITY_FLOOR_FRAMES);
        RealtimeState {
            frames_observed: self.frames_observed,
            min_frames_required: min,
            reliable: self.master.is_some() && self.frames_observed >= min as u64,
        }
    }

    /// Flush residual samples, run the full scoring pass, and lock the
    /// canonical score.
    ///
    /// Finalizing an unreliable session succeeds with a best-effort
    /// score; the caller sees `reliable == false` in the realtime state.
    pub fn finalize(&mut self) -> EngineResult<()> {
        match self.state {
            SessionState::Poisoned => {
                return Err(EngineError::InvalidState("session poisoned".into()));
            }
            SessionState::Finalized => return Err(EngineError::AlreadyFinalized),
            SessionState::Created => {
                return Err(EngineError::InvalidState(
                    "no audio processed yet".into(),
                ));
            }
            SessionState::Active => {}
        }

        // Residual samples shorter than a frame still carry signal
        if let Err(e) = self.mfcc.flush(&mut self.features) {
            return Err(self.poison(e.into()));
        }
        let frames = self.features.num_frames();
        if frames > self.max_feature_frames {
            self.features.trim_front(frames - self.max_feature_frames);
        }

        if let Some(master) = &self.master {
            if !self.features.is_empty() {
                let components = self.scorer.finalize(&self.features, master.features())?;
                self.last_components = Some(components);
                debug!(
                    "session {}: finalized, overall {:.3} over {} frames",
                    self.id,
                    components.overall,
                    self.features.num_frames()
                );
            }
        }
        self.state = SessionState::Finalized;
        Ok(())
    }

    /// Return to `Created`, keeping the master binding and the enhanced
    /// enablement flag. Everything streaming is dropped.
    pub fn reset(&mut self) -> EngineResult<()> {
        if self.state == SessionState::Poisoned {
            return Err(EngineError::InvalidState("session poisoned".into()));
        }
        self.features.clear();
        self.mfcc.reset();
        self.scorer.reset();
        self.last_components = None;
        self.frames_observed = 0;
        self.frames_since_score = 0;
        self.loudness.reset();
        self.pitch.reset();
        self.cadence.reset();
        self.last_pitch = PitchReading::default();
        self.last_harmonic = HarmonicReading::default();
        self.analysis_pending.clear();
        self.waveform.reset();
        self.samples_ingested = 0;
        // Values stay readable as advisory, but the tag drops
        self.enhanced.valid = false;
        self.enhanced_last_populated = None;
        self.state = SessionState::Created;
        debug!("session {}: reset (master kept: {:?})", self.id, self.master_id());
        Ok(())
    }

    /// Enable or disable the enhanced analyzers.
    ///
    /// Turning them on invalidates the summary until the next chunk
    /// produces fresh values.
    pub fn set_enhanced_enabled(&mut self, enabled: bool) -> EngineResult<()> {
        if self.state == SessionState::Poisoned {
            return Err(EngineError::InvalidState("session poisoned".into()));
        }
        self.enhanced_explicitly_set = true;
        if enabled && !self.enhanced_enabled {
            self.enhanced.valid = false;
            self.enhanced_last_populated = None;
        }
        self.enhanced_enabled = enabled;
        Ok(())
    }

    /// Whether the enhanced analyzers currently run per chunk
    pub fn enhanced_enabled(&self) -> bool {
        self.enhanced_enabled
    }

    /// Read the enhanced summary.
    ///
    /// The first read auto-enables the analyzers unless enablement was
    /// set explicitly. Values older than the inactivity timeout are
    /// returned as advisory with `valid == false`.
    pub fn enhanced_summary(&mut self) -> EngineResult<EnhancedSummary> {
        if self.state == SessionState::Poisoned {
            return Err(EngineError::InvalidState("session poisoned".into()));
        }
        if !self.enhanced_enabled && !self.enhanced_explicitly_set {
            debug!("session {}: auto-enabling enhanced analyzers", self.id);
            self.enhanced_enabled = true;
            self.enhanced.valid = false;
            self.enhanced_last_populated = None;
        }

        let timeout_ms = self.config.enhanced_inactivity_timeout_ms;
        let stale = match self.enhanced_last_populated {
            Some(at) => at.elapsed().as_millis() as u64 > timeout_ms,
            None => true,
        };
        if stale {
            self.enhanced.valid = false;
        }
        Ok(self.enhanced)
    }

    /// Decimated waveform of the ingested audio
    pub fn waveform_overview(&self, max_buckets: usize) -> WaveformOverview {
        self.waveform.overview(max_buckets)
    }

    /// Session bookkeeping for host dashboards
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id,
            state: self.state,
            sample_rate: self.sample_rate,
            samples_ingested: self.samples_ingested,
            frames_emitted: self.frames_observed,
            duration_secs: self.samples_ingested as f32 / self.sample_rate as f32,
            master_id: self.master_id().map(str::to_owned),
        }
    }

    /// Run the scorer when enough new frames accumulated
    fn maybe_rescore(&mut self) -> EngineResult<()> {
        let Some(master) = self.master.clone() else {
            return Ok(());
        };
        let min = min_frames_required(master.num_frames());
        if self.frames_observed < min as u64 || self.features.is_empty() {
            return Ok(());
        }
        let due = self.frames_since_score >= self.config.scoring_cadence_frames
            || self.last_components.is_none();
        if !due {
            return Ok(());
        }

        let components = self.scorer.score(&self.features, master.features())?;
        self.last_components = Some(components);
        self.frames_since_score = 0;
        trace!(
            "session {}: rescored, overall {:.3}",
            self.id,
            components.overall
        );
        Ok(())
    }

    /// Slice analysis windows off the pending buffer and feed the
    /// pitch/harmonic/cadence analyzers
    fn feed_enhanced_analyzers(&mut self) -> EngineResult<()> {
        self.analysis_pending.extend_from_slice(&self.clamp_scratch);

        let window = self.analysis_window;
        let hop = self.config.hop_size;
        while self.analysis_pending.len() >= window {
            self.last_pitch = self.pitch.track(&self.analysis_pending[..window]);
            self.last_harmonic = self.harmonic.analyze(&self.analysis_pending[..window])?;
            self.cadence
                .push_frame(&self.analysis_pending[..self.config.frame_size])?;

            let remaining = self.analysis_pending.len() - hop;
            self.analysis_pending.copy_within(hop.., 0);
            self.analysis_pending.truncate(remaining);
        }
        Ok(())
    }

    /// Rebuild the summary from the latest analyzer readings
    fn refresh_enhanced_summary(&mut self) {
        let cadence = self.cadence.analysis();
        let loudness = self.loudness.reading();
        let vibrato = self.pitch.vibrato();

        self.enhanced = EnhancedSummary {
            valid: true,
            pitch_hz: self.last_pitch.frequency_hz,
            pitch_confidence: self.last_pitch.confidence,
            f0_mean: self.pitch.f0_mean(),
            vibrato_rate_hz: vibrato.map(|v| v.rate_hz).unwrap_or(0.0),
            vibrato_extent_cents: vibrato.map(|v| v.extent_cents).unwrap_or(0.0),
            harmonicity: self.last_harmonic.harmonic_to_noise_ratio,
            spectral_centroid: self.last_harmonic.spectral_centroid,
            spectral_bandwidth: self.last_harmonic.spectral_bandwidth,
            tempo_bpm: cadence.estimated_tempo_bpm,
            rhythm_strength: cadence.rhythm_strength,
            num_calls: cadence.num_calls,
            rms: loudness.rms,
            peak: loudness.peak,
            normalization_scalar: loudness.normalization_scalar,
            computed_at_ms: self.created_at.elapsed().as_millis() as u64,
        };
        self.enhanced_last_populated = Some(Instant::now());
    }

    /// Mark the session unusable after an internal failure
    fn poison(&mut self, error: EngineError) -> EngineError {
        warn!("session {} poisoned: {error}", self.id);
        self.state = SessionState::Poisoned;
        error
    }
}
