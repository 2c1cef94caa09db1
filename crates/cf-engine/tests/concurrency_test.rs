//! Multi-session concurrency tests
//!
//! The engine contract: distinct sessions may be driven from distinct
//! threads concurrently, while calls within one session are serialized
//! by the caller. These tests hammer the session table, the master
//! cache, and per-session scoring from parallel threads.

use std::sync::Arc;
use std::thread;

use cf_core::{EngineConfig, FeatureMatrix};
use cf_engine::{EngineError, UnifiedEngine};

const SAMPLE_RATE: u32 = 44100;

fn engine() -> UnifiedEngine {
    let config = EngineConfig {
        master_dir: std::env::temp_dir().join("cf-concurrency-tests"),
        ..Default::default()
    };
    UnifiedEngine::new(config).unwrap()
}

fn synthetic_features(frames: usize, step: f32) -> FeatureMatrix {
    let mut m = FeatureMatrix::new(13);
    let mut row = vec![0.0f32; 13];
    for f in 0..frames {
        for (c, v) in row.iter_mut().enumerate() {
            *v = ((f as f32 * step) + c as f32 * 1.1).sin() * 2.0;
        }
        m.push_row(&row).unwrap();
    }
    m
}

fn tone_chunk(freq: f32, len: usize, offset: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = (offset + i) as f32 / SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * freq * t).sin() * 0.5
        })
        .collect()
}

#[test]
fn test_parallel_sessions_share_one_master() {
    let engine = Arc::new(engine());
    engine
        .inject_master_features("shared_call", SAMPLE_RATE, synthetic_features(200, 0.2))
        .unwrap();

    let mut handles = Vec::new();
    for worker in 0..8 {
        let engine = engine.clone();
        handles.push(thread::spawn(move || {
            let session = engine.create_session(SAMPLE_RATE).unwrap();
            engine.load_master_call(session, "shared_call").unwrap();

            let freq = 200.0 + worker as f32 * 60.0;
            let mut offset = 0;
            for _ in 0..40 {
                let chunk = tone_chunk(freq, 2048, offset);
                engine.process_chunk(session, &chunk).unwrap();
                offset += 2048;
            }

            let state = engine.realtime_state(session).unwrap();
            assert!(state.frames_observed > 0);
            engine.finalize_session(session).unwrap();
            let score = engine.similarity_score(session).unwrap();
            assert!((0.0..=1.0).contains(&score));

            engine.destroy_session(session).unwrap();
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(engine.session_count(), 0);
    // The shared master stayed cached through all of it
    assert_eq!(engine.cached_master_count(), 1);
}

#[test]
fn test_parallel_create_destroy_respects_cap() {
    let config = EngineConfig {
        max_sessions: 16,
        master_dir: std::env::temp_dir().join("cf-concurrency-cap"),
        ..Default::default()
    };
    let engine = Arc::new(UnifiedEngine::new(config).unwrap());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(thread::spawn(move || {
            let mut created = 0usize;
            let mut rejected = 0usize;
            for _ in 0..50 {
                match engine.create_session(SAMPLE_RATE) {
                    Ok(id) => {
                        created += 1;
                        engine.destroy_session(id).unwrap();
                    }
                    Err(EngineError::LimitExceeded(_)) => rejected += 1,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            (created, rejected)
        }));
    }

    let mut total_created = 0;
    for h in handles {
        let (created, _) = h.join().unwrap();
        total_created += created;
    }
    // Sessions are destroyed immediately, so creations mostly succeed
    assert!(total_created > 0);
    assert_eq!(engine.session_count(), 0);
}

#[test]
fn test_session_ids_are_unique_across_threads() {
    let engine = Arc::new(engine());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(thread::spawn(move || {
            (0..32)
                .map(|_| engine.create_session(SAMPLE_RATE).unwrap())
                .collect::<Vec<_>>()
        }));
    }

    let mut all_ids = Vec::new();
    for h in handles {
        all_ids.extend(h.join().unwrap());
    }
    let count = all_ids.len();
    all_ids.sort_unstable();
    all_ids.dedup();
    assert_eq!(all_ids.len(), count, "duplicate session ids handed out");
}

#[test]
fn test_destroy_while_other_sessions_run() {
    let engine = Arc::new(engine());
    engine
        .inject_master_features("call_a", SAMPLE_RATE, synthetic_features(150, 0.2))
        .unwrap();

    let victim = engine.create_session(SAMPLE_RATE).unwrap();
    engine.load_master_call(victim, "call_a").unwrap();

    let runner = {
        let engine = engine.clone();
        thread::spawn(move || {
            let session = engine.create_session(SAMPLE_RATE).unwrap();
            engine.load_master_call(session, "call_a").unwrap();
            let mut offset = 0;
            for _ in 0..60 {
                engine
                    .process_chunk(session, &tone_chunk(330.0, 1024, offset))
                    .unwrap();
                offset += 1024;
            }
            engine.destroy_session(session).unwrap();
        })
    };

    engine.destroy_session(victim).unwrap();
    assert!(matches!(
        engine.process_chunk(victim, &[0.0; 64]),
        Err(EngineError::SessionNotFound(_))
    ));

    runner.join().unwrap();
    assert_eq!(engine.session_count(), 0);
}
