//! Multi-session engine
//!
//! `UnifiedEngine` owns every session and the shared master-call cache.
//! The session table sits behind a reader/writer lock held only long
//! enough to clone the per-session handle; session state itself is
//! guarded by a per-session mutex, honoring the documented contract that
//! operations on one session are externally serialized.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cf_core::{EngineConfig, FeatureMatrix};
use cf_file::FeatureStore;
use cf_sim::SimilarityComponents;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::session::{RealtimeState, SessionEngine, SessionId, SessionStats};
use crate::waveform::WaveformOverview;
use crate::{EngineError, EngineResult, EnhancedSummary, MasterCall};

/// Shared LRU cache of master feature matrices.
///
/// Most-recently-used entries sit at the back. Eviction skips entries
/// still referenced by a live session (their `Arc` is shared), so a
/// popular master survives even a small cache.
struct MasterCache {
    capacity: usize,
    entries: Vec<(String, Arc<MasterCall>)>,
}

impl MasterCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    fn get(&mut self, id: &str) -> Option<Arc<MasterCall>> {
        let pos = self.entries.iter().position(|(k, _)| k == id)?;
        let entry = self.entries.remove(pos);
        let master = entry.1.clone();
        self.entries.push(entry);
        Some(master)
    }

    fn insert(&mut self, id: String, master: Arc<MasterCall>) {
        if let Some(pos) = self.entries.iter().position(|(k, _)| k == &id) {
            self.entries.remove(pos);
        }
        self.entries.push((id, master));

        while self.entries.len() > self.capacity {
            // Oldest unreferenced entry goes first
            match self
                .entries
                .iter()
                .position(|(_, m)| Arc::strong_count(m) == 1)
            {
                Some(pos) => {
                    let (evicted, _) = self.entries.remove(pos);
                    debug!("master cache: evicted '{evicted}'");
                }
                None => {
                    // Every entry is still bound to a session; let the
                    // cache run over capacity rather than drop live data.
                    warn!(
                        "master cache over capacity ({} entries), all in use",
                        self.entries.len()
                    );
                    break;
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Process-wide engine: session registry, master cache, feature store
pub struct UnifiedEngine {
    config: EngineConfig,
    store: FeatureStore,
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<SessionEngine>>>>,
    masters: Mutex<MasterCache>,
    next_id: AtomicU64,
}

impl UnifiedEngine {
    /// Create an engine with the given configuration.
    ///
    /// The feature store roots at `config.master_dir`.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let store = FeatureStore::new(config.master_dir.clone());
        Self::with_store(config, store)
    }

    /// Create an engine with an explicit feature store
    pub fn with_store(config: EngineConfig, store: FeatureStore) -> EngineResult<Self> {
        config.validate()?;
        info!(
            "engine up: max {} sessions, master cache {} entries, store {:?}",
            config.max_sessions,
            config.master_cache_capacity,
            store.root()
        );
        Ok(Self {
            masters: Mutex::new(MasterCache::new(config.master_cache_capacity)),
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            store,
            config,
        })
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Number of cached master calls
    pub fn cached_master_count(&self) -> usize {
        self.masters.lock().len()
    }

    /// Create a session for the declared sample rate.
    ///
    /// Ids are monotonic and never reused while any session is live.
    pub fn create_session(&self, sample_rate: u32) -> EngineResult<SessionId> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.config.max_sessions {
            return Err(EngineError::LimitExceeded(sessions.len()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = SessionEngine::new(id, sample_rate, self.config.clone())?;
        sessions.insert(id, Arc::new(Mutex::new(session)));
        info!("session {id} created at {sample_rate} Hz ({} live)", sessions.len());
        Ok(id)
    }

    /// Destroy a session. In-flight calls on the session complete;
    /// everything after fails with `SessionNotFound`.
    pub fn destroy_session(&self, id: SessionId) -> EngineResult<()> {
        let removed = self.sessions.write().remove(&id);
        match removed {
            Some(_) => {
                info!("session {id} destroyed");
                Ok(())
            }
            None => Err(EngineError::SessionNotFound(id)),
        }
    }

    /// Reset a session to `Created`, keeping its master binding
    pub fn reset_session(&self, id: SessionId) -> EngineResult<()> {
        self.session(id)?.lock().reset()
    }

    /// Load a master call from the cache or the feature store and bind
    /// it to the session
    pub fn load_master_call(&self, id: SessionId, call_id: &str) -> EngineResult<()> {
        let session = self.session(id)?;

        let master = {
            let mut cache = self.masters.lock();
            match cache.get(call_id) {
                Some(m) => m,
                None => {
                    let features = self.store.load(call_id)?;
                    let sample_rate = session.lock().sample_rate();
                    let master = Arc::new(MasterCall::new(
                        call_id,
                        sample_rate,
                        self.config.frame_size,
                        self.config.hop_size,
                        features,
                    )?);
                    cache.insert(call_id.to_string(), master.clone());
                    master
                }
            }
        };

        session.lock().load_master(master)
    }

    /// Publish a preanalyzed feature matrix under a call id (test path).
    ///
    /// Subsequent `load_master_call` hits the cache instead of the store.
    pub fn inject_master_features(
        &self,
        call_id: &str,
        sample_rate: u32,
        features: FeatureMatrix,
    ) -> EngineResult<()> {
        let master = Arc::new(MasterCall::new(
            call_id,
            sample_rate,
            self.config.frame_size,
            self.config.hop_size,
            features,
        )?);
        self.masters.lock().insert(call_id.to_string(), master);
        debug!("injected master features '{call_id}'");
        Ok(())
    }

    /// Feed one chunk of mono PCM to a session
    pub fn process_chunk(&self, id: SessionId, chunk: &[f32]) -> EngineResult<()> {
        self.session(id)?.lock().process_chunk(chunk)
    }

    /// Latest overall similarity for a session
    pub fn similarity_score(&self, id: SessionId) -> EngineResult<f32> {
        self.session(id)?.lock().similarity_score()
    }

    /// Latest similarity component breakdown for a session
    pub fn similarity_components(&self, id: SessionId) -> EngineResult<SimilarityComponents> {
        self.session(id)?.lock().similarity_components()
    }

    /// Scoring progress and reliability for a session
    pub fn realtime_state(&self, id: SessionId) -> EngineResult<RealtimeState> {
        Ok(self.session(id)?.lock().realtime_state())
    }

    /// Finalize a session's analysis and lock its canonical score
    pub fn finalize_session(&self, id: SessionId) -> EngineResult<()> {
        self.session(id)?.lock().finalize()
    }

    /// Enable or disable the enhanced analyzers for a session
    pub fn set_enhanced_enabled(&self, id: SessionId, enabled: bool) -> EngineResult<()> {
        self.session(id)?.lock().set_enhanced_enabled(enabled)
    }

    /// Read a session's enhanced analysis summary
    pub fn enhanced_summary(&self, id: SessionId) -> EngineResult<EnhancedSummary> {
        self.session(id)?.lock().enhanced_summary()
    }

    /// Decimated waveform of a session's ingested audio
    pub fn waveform_overview(
        &self,
        id: SessionId,
        max_buckets: usize,
    ) -> EngineResult<WaveformOverview> {
        Ok(self.session(id)?.lock().waveform_overview(max_buckets))
    }

    /// Session bookkeeping for host dashboards
    pub fn session_stats(&self, id: SessionId) -> EngineResult<SessionStats> {
        Ok(self.session(id)?.lock().stats())
    }

    fn session(&self, id: SessionId) -> EngineResult<Arc<Mutex<SessionEngine>>> {
        self.sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or(EngineError::SessionNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(max_sessions: usize) -> UnifiedEngine {
        let config = EngineConfig {
            max_sessions,
            master_dir: std::env::temp_dir().join("cf-unified-tests"),
            ..Default::default()
        };
        UnifiedEngine::new(config).unwrap()
    }

    fn wavy_features(frames: usize) -> FeatureMatrix {
        let mut m = FeatureMatrix::new(13);
        let mut row = vec![0.0f32; 13];
        for f in 0..frames {
            for (c, v) in row.iter_mut().enumerate() {
                *v = ((f as f32 * 0.2) + c as f32 * 1.2).sin() * 2.0;
            }
            m.push_row(&row).unwrap();
        }
        m
    }

    #[test]
    fn test_session_cap_and_id_reuse() {
        let engine = engine_with(2);
        let a = engine.create_session(44100).unwrap();
        let b = engine.create_session(44100).unwrap();
        assert_ne!(a, b);
        assert!(matches!(
            engine.create_session(44100),
            Err(EngineError::LimitExceeded(2))
        ));

        engine.destroy_session(a).unwrap();
        let c = engine.create_session(48000).unwrap();
        assert_ne!(c, a, "live-adjacent ids are never reused");
        assert_ne!(c, b);
    }

    #[test]
    fn test_destroyed_session_is_gone() {
        let engine = engine_with(4);
        let id = engine.create_session(44100).unwrap();
        engine.destroy_session(id).unwrap();
        assert!(matches!(
            engine.destroy_session(id),
            Err(EngineError::SessionNotFound(_))
        ));
        assert!(matches!(
            engine.process_chunk(id, &[0.0; 64]),
            Err(EngineError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_unknown_master_is_not_found() {
        let engine = engine_with(4);
        let id = engine.create_session(44100).unwrap();
        assert!(matches!(
            engine.load_master_call(id, "missing_call"),
            Err(EngineError::File(cf_file::FileError::NotFound(_)))
        ));
    }

    #[test]
    fn test_injected_master_is_shared_via_cache() {
        let engine = engine_with(4);
        engine
            .inject_master_features("shared", 44100, wavy_features(120))
            .unwrap();

        let a = engine.create_session(44100).unwrap();
        let b = engine.create_session(44100).unwrap();
        engine.load_master_call(a, "shared").unwrap();
        engine.load_master_call(b, "shared").unwrap();
        assert_eq!(engine.cached_master_count(), 1);
    }

    #[test]
    fn test_cache_eviction_skips_referenced_masters() {
        let config = EngineConfig {
            master_cache_capacity: 2,
            master_dir: std::env::temp_dir().join("cf-unified-evict"),
            ..Default::default()
        };
        let engine = UnifiedEngine::new(config).unwrap();

        engine
            .inject_master_features("bound", 44100, wavy_features(60))
            .unwrap();
        let s = engine.create_session(44100).unwrap();
        engine.load_master_call(s, "bound").unwrap();

        // Fill past capacity with unreferenced masters
        engine
            .inject_master_features("idle_a", 44100, wavy_features(60))
            .unwrap();
        engine
            .inject_master_features("idle_b", 44100, wavy_features(60))
            .unwrap();

        // "bound" survives: it is referenced by a live session
        let t = engine.create_session(44100).unwrap();
        engine.load_master_call(t, "bound").unwrap();
        assert!(engine.session_stats(t).unwrap().master_id.is_some());
    }

    #[test]
    fn test_invalid_sample_rate_rejected() {
        let engine = engine_with(4);
        assert!(matches!(
            engine.create_session(1000),
            Err(EngineError::InvalidSampleRate(1000))
        ));
    }
}
