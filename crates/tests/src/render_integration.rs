//! Integration tests for the render thread driving a project's engine

use crate::support::{self, params, EventLog, SCALE};
use cadenza_core::domain::{ChainTarget, EffectId, TrackGroups};
use cadenza_infra::audio::{sample_ring, RenderSpec, RenderThread, SilenceSource, ToneSource};
use std::thread;
use std::time::Duration;

fn spec(track: cadenza_core::domain::TrackId, channels: usize, gain: f32) -> RenderSpec {
    RenderSpec {
        track,
        channels,
        block_frames: 128,
        sample_rate: 48000,
        gain,
        paced: false,
    }
}

#[test]
fn test_chain_shapes_rendered_tone() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let track = project.add_group("Tone", 2);
    let state = engine.add_state(ChainTarget::Track(track), EffectId::new(SCALE)).unwrap();
    engine
        .set_parameters(ChainTarget::Track(track), state, params(&[("factor", "0.25")]))
        .unwrap();

    let (producer, mut consumer) = sample_ring(1 << 14);
    let render = RenderThread::spawn(
        engine.clone(),
        spec(track, 2, 1.0),
        Box::new(ToneSource::new(2, 500.0, 1.0, 48000)),
        Some(producer),
    )
    .unwrap();

    let mut received = Vec::new();
    let mut buf = [0.0f32; 512];
    while received.len() < 4096 {
        let n = consumer.pop(&mut buf);
        received.extend_from_slice(&buf[..n]);
        thread::yield_now();
    }
    let report = render.stop().unwrap();

    let peak = received.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak <= 0.25 + 1e-6);
    assert!(peak > 0.2);
    assert_eq!(report.blocks, report.processed);
    assert!(!engine.is_active());
}

#[test]
fn test_edits_while_render_thread_runs() {
    let log = EventLog::default();
    let (project, history) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let track = project.add_group("Live", 1);
    let target = ChainTarget::Track(track);

    let render = RenderThread::spawn(
        engine.clone(),
        spec(track, 1, 0.5),
        Box::new(SilenceSource::new(1)),
        None,
    )
    .unwrap();

    for _ in 0..50 {
        let state = engine.add_state(target, EffectId::new(SCALE)).unwrap();
        thread::sleep(Duration::from_micros(200));
        engine.remove_state(target, state).unwrap();
    }

    let report = render.stop().unwrap();
    assert!(report.blocks > 0);
    assert_eq!(history.len(), 100);
    assert!(engine.chain_snapshot(target).unwrap().is_empty());
}

#[test]
fn test_paced_render_follows_block_rate() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let track = project.add_group("Paced", 1);

    let render = RenderThread::spawn(
        engine.clone(),
        RenderSpec {
            paced: true,
            block_frames: 480,
            ..spec(track, 1, 1.0)
        },
        Box::new(SilenceSource::new(1)),
        None,
    )
    .unwrap();

    // 10 ms blocks
    thread::sleep(Duration::from_millis(200));
    let report = render.stop().unwrap();
    assert!(report.blocks >= 5, "too few blocks: {}", report.blocks);
    assert!(report.blocks <= 40, "too many blocks: {}", report.blocks);
}

#[test]
fn test_render_thread_accepts_follower_track() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let leader = project.add_group("Pair", 2);
    let follower = project.tracks().group_of(leader)[1];
    let state = engine.add_state(ChainTarget::Track(leader), EffectId::new(SCALE)).unwrap();
    engine
        .set_parameters(ChainTarget::Track(leader), state, params(&[("factor", "0")]))
        .unwrap();

    let render = RenderThread::spawn(
        engine.clone(),
        spec(follower, 2, 1.0),
        Box::new(ToneSource::new(2, 500.0, 1.0, 48000)),
        None,
    )
    .unwrap();

    while render.stats().blocks() < 8 {
        thread::yield_now();
    }
    let report = render.stop().unwrap();
    assert_eq!(report.processed, report.blocks);
    assert_eq!(engine.leaders(), Vec::new());
}
