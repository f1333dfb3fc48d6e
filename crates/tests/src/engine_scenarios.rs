//! Integration tests for the realtime engine
//!
//! These drive a project's engine the way a host does: open a session,
//! register track groups, render blocks, and edit chains in between.

use crate::support::{self, params, render, Event, EventLog, OFFSET, PANIC, PROBE, SCALE};
use cadenza_core::domain::{
    Availability, ChainTarget, EffectId, EffectState, RealtimeEngine, TrackGroups, TrackId,
};
use std::sync::Arc;
use std::thread;

const RATE: f64 = 48000.0;

fn start(engine: &RealtimeEngine, groups: &[(TrackId, usize)]) {
    engine.initialize(RATE).unwrap();
    for &(track, channels) in groups {
        engine.add_processor(track, channels, RATE).unwrap();
    }
    engine.process_start().unwrap();
}

fn add(
    engine: &RealtimeEngine,
    target: ChainTarget,
    id: &str,
    pairs: &[(&str, &str)],
) -> cadenza_core::domain::StateId {
    let state = engine.add_state(target, EffectId::new(id)).unwrap();
    if !pairs.is_empty() {
        assert!(engine.set_parameters(target, state, params(pairs)).unwrap());
    }
    state
}

// ============================================================================
// CHANNEL ADAPTATION
// ============================================================================

#[test]
fn test_mono_track_with_stereo_effect_replicates_input() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let track = project.add_group("Mono", 1);
    add(&engine, ChainTarget::Track(track), PROBE, &[]);

    start(&engine, &[(track, 1)]);
    assert_eq!(log.count(|e| matches!(e, Event::AddProcessor { .. })), 1);
    assert!(log.events().contains(&Event::AddProcessor { channels: 1 }));

    log.clear();
    let (n, out) = render(&engine, track, 1.0, &[vec![0.25; 32]]);
    assert_eq!(n, 32);
    assert_eq!(out[0], vec![0.25; 32]);
    assert_eq!(
        log.events(),
        vec![Event::Process {
            processor: 0,
            second_input: 0.25
        }]
    );
}

#[test]
fn test_master_state_serves_each_group() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let mono = project.add_group("Mono", 1);
    let stereo = project.add_group("Stereo", 2);
    add(&engine, ChainTarget::Master, PROBE, &[]);

    start(&engine, &[(mono, 1), (stereo, 2)]);
    assert_eq!(log.count(|e| *e == Event::Initialize), 1);
    assert_eq!(log.count(|e| *e == Event::AddProcessor { channels: 1 }), 1);
    assert_eq!(log.count(|e| *e == Event::AddProcessor { channels: 2 }), 1);
    assert_eq!(log.count(|e| *e == Event::ProcessStart), 1);

    log.clear();
    render(&engine, stereo, 1.0, &[vec![0.5; 8], vec![-0.5; 8]]);
    // Stereo group owns the second processor
    assert_eq!(
        log.events(),
        vec![Event::Process {
            processor: 1,
            second_input: -0.5
        }]
    );
}

#[test]
fn test_stereo_effect_on_mono_sum_output() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let track = project.add_group("Stereo", 2);
    add(&engine, ChainTarget::Track(track), cadenza_core::domain::builtin::MONO_SUM, &[]);

    start(&engine, &[(track, 2)]);
    let (n, out) = render(&engine, track, 1.0, &[vec![1.0; 4], vec![0.0; 4]]);
    assert_eq!(n, 4);
    // One output: channel 0 gets the average, channel 1 passes through
    assert_eq!(out[0], vec![0.5; 4]);
    assert_eq!(out[1], vec![0.0; 4]);
}

// ============================================================================
// FADER ROUTING
// ============================================================================

#[test]
fn test_prefade_sees_ungained_input() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let track = project.add_group("Stereo", 2);
    let target = ChainTarget::Track(track);

    let pre = add(&engine, target, SCALE, &[("factor", "3")]);
    engine.set_prefade(target, pre, true).unwrap();
    add(&engine, target, SCALE, &[("factor", "2")]);

    start(&engine, &[(track, 2)]);

    let left: Vec<f32> = (0..16).map(|i| i as f32 * 0.1 - 0.8).collect();
    let right: Vec<f32> = left.iter().map(|x| -x * 0.5).collect();
    let (n, out) = render(&engine, track, 0.5, &[left.clone(), right.clone()]);

    assert_eq!(n, 16);
    for (input, output) in [(&left, &out[0]), (&right, &out[1])] {
        let expected: Vec<f32> = input.iter().map(|x| (x * 0.5) * 2.0 + x * 3.0).collect();
        assert_eq!(output, &expected);
    }
}

#[test]
fn test_master_runs_before_track() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let track = project.add_group("Mono", 1);

    add(&engine, ChainTarget::Track(track), SCALE, &[("factor", "2")]);
    add(&engine, ChainTarget::Master, OFFSET, &[("amount", "1")]);

    start(&engine, &[(track, 1)]);
    let (_, out) = render(&engine, track, 1.0, &[vec![1.0, 2.0]]);
    assert_eq!(out[0], vec![4.0, 6.0]);
}

#[test]
fn test_even_number_of_states_lands_in_caller_buffers() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let track = project.add_group("Mono", 1);
    let target = ChainTarget::Track(track);

    for _ in 0..4 {
        add(&engine, target, OFFSET, &[("amount", "1")]);
    }
    start(&engine, &[(track, 1)]);

    let (n, out) = render(&engine, track, 1.0, &[vec![0.0; 3]]);
    assert_eq!(n, 3);
    assert_eq!(out[0], vec![4.0; 3]);

    engine.remove_state(target, engine.chain_snapshot(target).unwrap()[0].state).unwrap();
    let (_, out) = render(&engine, track, 1.0, &[vec![0.0; 3]]);
    assert_eq!(out[0], vec![3.0; 3]);
}

#[test]
fn test_each_prefade_state_adds_its_output() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let track = project.add_group("Stereo", 2);
    let target = ChainTarget::Track(track);

    for factor in ["2", "3"] {
        let pre = add(&engine, target, SCALE, &[("factor", factor)]);
        engine.set_prefade(target, pre, true).unwrap();
    }
    start(&engine, &[(track, 2)]);

    let (n, out) = render(&engine, track, 1.0, &[vec![1.0, 1.0], vec![0.5, -1.0]]);
    assert_eq!(n, 2);
    // x + 2x + 3(2x)
    assert_eq!(out[0], vec![9.0, 9.0]);
    assert_eq!(out[1], vec![4.5, -9.0]);

    // With a post-fader state and a fader: 4(gx) + 2x + 6x
    add(&engine, target, SCALE, &[("factor", "4")]);
    let (_, out) = render(&engine, track, 0.5, &[vec![1.0], vec![-0.25]]);
    assert_eq!(out[0], vec![10.0]);
    assert_eq!(out[1], vec![-2.5]);
}

#[test]
fn test_follower_track_registers_and_renders_the_group() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let leader = project.add_group("Stereo", 2);
    let follower = project.tracks().group_of(leader)[1];
    add(&engine, ChainTarget::Track(follower), SCALE, &[("factor", "2")]);

    start(&engine, &[(follower, 2)]);
    assert_eq!(engine.leaders(), vec![leader]);

    let (n, out) = render(&engine, follower, 0.5, &[vec![1.0, 1.0], vec![1.0, -1.0]]);
    assert_eq!(n, 2);
    assert_eq!(out, vec![vec![1.0, 1.0], vec![1.0, -1.0]]);

    let (n, out) = render(&engine, leader, 1.0, &[vec![0.25], vec![0.5]]);
    assert_eq!(n, 1);
    assert_eq!(out, vec![vec![0.5], vec![1.0]]);
}

// ============================================================================
// EDITING WHILE PROCESSING
// ============================================================================

#[test]
fn test_remove_while_processing_ends_and_finalizes() {
    let log = EventLog::default();
    let (project, history) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let track = project.add_group("Mono", 1);
    let target = ChainTarget::Track(track);
    let probe = add(&engine, target, PROBE, &[]);

    start(&engine, &[(track, 1)]);
    render(&engine, track, 1.0, &[vec![1.0; 8]]);

    log.clear();
    engine.remove_state(target, probe).unwrap();
    assert_eq!(log.events(), vec![Event::ProcessEnd, Event::Finalize]);

    let (n, out) = render(&engine, track, 0.5, &[vec![1.0; 8]]);
    assert_eq!(n, 0);
    assert_eq!(out[0], vec![0.5; 8]);
    assert_eq!(log.events().len(), 2);

    let descriptions: Vec<_> = history.entries().into_iter().map(|e| e.description).collect();
    assert_eq!(descriptions, vec!["Added Probe effect", "Removed Probe effect"]);
}

#[test]
fn test_swap_reorders_processing() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let track = project.add_group("Mono", 1);
    let target = ChainTarget::Track(track);

    add(&engine, target, OFFSET, &[("amount", "1")]);
    add(&engine, target, SCALE, &[("factor", "2")]);
    let silent = add(&engine, target, SCALE, &[("factor", "0")]);
    engine.set_prefade(target, silent, true).unwrap();

    start(&engine, &[(track, 1)]);
    let (_, before) = render(&engine, track, 1.0, &[vec![1.0]]);
    assert_eq!(before[0], vec![4.0]);

    let counts = |entries: &[cadenza_core::domain::ChainEntry]| {
        let pre = entries.iter().filter(|e| e.prefade).count();
        (pre, entries.len() - pre)
    };
    let counts_before = counts(&engine.chain_snapshot(target).unwrap());

    engine.swap(target, 0, 1).unwrap();
    let (_, after) = render(&engine, track, 1.0, &[vec![1.0]]);
    assert_eq!(after[0], vec![3.0]);
    assert_eq!(counts(&engine.chain_snapshot(target).unwrap()), counts_before);
    assert_eq!(counts_before, (1, 2));
}

#[test]
fn test_bypass_toggles_between_blocks() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let track = project.add_group("Mono", 1);
    let target = ChainTarget::Track(track);
    let state = add(&engine, target, SCALE, &[("factor", "4")]);

    start(&engine, &[(track, 1)]);

    engine.bypass(target, true).unwrap();
    assert!(engine.is_bypassed(target));
    let (n, out) = render(&engine, track, 1.0, &[vec![1.0]]);
    assert_eq!((n, out[0][0]), (0, 1.0));

    engine.bypass(target, false).unwrap();
    let (n, out) = render(&engine, track, 1.0, &[vec![1.0]]);
    assert_eq!((n, out[0][0]), (1, 4.0));

    engine.set_state_bypass(target, state, true).unwrap();
    let (n, out) = render(&engine, track, 1.0, &[vec![1.0]]);
    assert_eq!((n, out[0][0]), (0, 1.0));
}

#[test]
fn test_suspended_engine_never_touches_buffers() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let track = project.add_group("Stereo", 2);
    let target = ChainTarget::Track(track);
    add(&engine, target, SCALE, &[("factor", "8")]);
    let pre = add(&engine, target, OFFSET, &[("amount", "1")]);
    engine.set_prefade(target, pre, true).unwrap();
    add(&engine, ChainTarget::Master, PROBE, &[]);

    start(&engine, &[(track, 2)]);
    log.clear();

    let input = vec![vec![0.3; 16], vec![-0.3; 16]];
    let guard = engine.suspend();
    let (n, out) = render(&engine, track, 0.25, &input);
    assert_eq!(n, 0);
    assert_eq!(out, input);
    assert!(log.events().is_empty());

    drop(guard);
    let (n, _) = render(&engine, track, 0.25, &input);
    assert_eq!(n, 16);
}

// ============================================================================
// FAILURE CONTAINMENT
// ============================================================================

#[test]
fn test_panicking_effect_is_contained() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let track = project.add_group("Mono", 1);
    let target = ChainTarget::Track(track);
    add(&engine, target, PANIC, &[]);
    add(&engine, target, SCALE, &[("factor", "2")]);

    start(&engine, &[(track, 1)]);
    for _ in 0..3 {
        let (n, out) = render(&engine, track, 1.0, &[vec![1.0; 4]]);
        assert_eq!(n, 4);
        assert_eq!(out[0], vec![2.0; 4]);
    }

    let entries = engine.chain_snapshot(target).unwrap();
    assert_eq!(entries[0].availability, Availability::Faulted);
    assert_eq!(entries[1].availability, Availability::Ready);

    engine.process_end().unwrap();
    engine.finalize().unwrap();
}

#[test]
fn test_unresolved_effect_is_inert_and_preserved() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let track = project.add_group("Mono", 1);
    let target = ChainTarget::Track(track);

    let missing = engine.add_state(target, EffectId::new("vendor.missing")).unwrap();
    engine
        .set_parameters(target, missing, params(&[("mix", "0.75")]))
        .unwrap();

    start(&engine, &[(track, 1)]);
    let (n, out) = render(&engine, track, 1.0, &[vec![0.5; 4]]);
    assert_eq!(n, 0);
    assert_eq!(out[0], vec![0.5; 4]);

    let entry = &engine.chain_snapshot(target).unwrap()[0];
    assert_eq!(entry.name, "vendor.missing");
    assert_eq!(entry.availability, Availability::Unresolved);

    let doc = engine.write_chain(target).unwrap();
    assert_eq!(doc.effects[0].id.as_str(), "vendor.missing");
    assert_eq!(doc.effects[0].parameters.get("mix").map(String::as_str), Some("0.75"));
}

// ============================================================================
// SESSIONS
// ============================================================================

#[test]
fn test_finalize_then_initialize_matches_fresh_state() {
    let log = EventLog::default();
    let resolver = support::registry(&log).into_resolver();
    let track = TrackId::new(1);
    let input = vec![vec![0.1f32, -0.2, 0.3, -0.4]];

    let run = |state: &mut EffectState| {
        let ins: Vec<&[f32]> = input.iter().map(|b| b.as_slice()).collect();
        let mut out = vec![vec![0.0f32; 4]];
        let mut outs: Vec<&mut [f32]> = out.iter_mut().map(|b| b.as_mut_slice()).collect();
        assert_eq!(state.process(track, &ins, &mut outs, 4), 4);
        out
    };

    let mut reused = EffectState::new(EffectId::new(SCALE), Arc::clone(&resolver));
    reused.set_parameters(params(&[("factor", "1.5")]));
    assert!(reused.initialize(RATE));
    assert!(reused.add_processor(track, 1, RATE));
    run(&mut reused);
    assert!(reused.finalize());
    assert!(reused.initialize(RATE));
    assert!(reused.add_processor(track, 1, RATE));

    let mut fresh = EffectState::new(EffectId::new(SCALE), resolver);
    fresh.set_parameters(params(&[("factor", "1.5")]));
    assert!(fresh.initialize(RATE));
    assert!(fresh.add_processor(track, 1, RATE));

    assert_eq!(run(&mut reused), run(&mut fresh));
}

#[test]
fn test_sessions_repeat_cleanly() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let track = project.add_group("Mono", 1);
    add(&engine, ChainTarget::Track(track), PROBE, &[]);

    for _ in 0..3 {
        start(&engine, &[(track, 1)]);
        let (n, _) = render(&engine, track, 1.0, &[vec![0.0; 8]]);
        assert_eq!(n, 8);
        engine.process_end().unwrap();
        engine.finalize().unwrap();
    }

    assert_eq!(log.count(|e| *e == Event::Initialize), 3);
    assert_eq!(log.count(|e| *e == Event::Finalize), 3);
    assert!(!engine.is_active());
}

#[test]
fn test_finalize_forces_end_when_processing_never_stops() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let track = project.add_group("Mono", 1);
    add(&engine, ChainTarget::Track(track), PROBE, &[]);

    start(&engine, &[(track, 1)]);
    log.clear();

    // Default timeout is two seconds
    engine.finalize().unwrap();
    assert_eq!(log.events(), vec![Event::ProcessEnd, Event::Finalize]);
    assert!(!engine.is_processing());
}

#[test]
fn test_unregistered_track_is_not_processed() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let registered = project.add_group("A", 1);
    let other = project.add_group("B", 1);
    add(&engine, ChainTarget::Master, SCALE, &[("factor", "2")]);

    start(&engine, &[(registered, 1)]);
    let (n, out) = render(&engine, other, 0.5, &[vec![1.0]]);
    assert_eq!((n, out[0][0]), (0, 1.0));
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_control_edits_during_rendering() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let track = project.add_group("Stereo", 2);
    let target = ChainTarget::Track(track);
    add(&engine, target, SCALE, &[("factor", "0.5")]);

    start(&engine, &[(track, 2)]);

    thread::scope(|scope| {
        let renderer = scope.spawn(|| {
            let mut blocks = 0;
            let mut produced = 0;
            while blocks < 2000 {
                let (n, out) = render(&engine, track, 1.0, &[vec![1.0; 64], vec![-1.0; 64]]);
                assert!(n == 0 || n == 64);
                assert!(out.iter().flatten().all(|s| s.is_finite()));
                if n > 0 {
                    produced += 1;
                }
                blocks += 1;
            }
            produced
        });

        for i in 0..200 {
            let state = add(&engine, target, OFFSET, &[("amount", "0.1")]);
            if i % 3 == 0 {
                engine.set_prefade(target, state, true).unwrap();
            }
            if engine.chain_snapshot(target).unwrap().len() > 2 {
                engine.swap(target, 0, 1).unwrap();
            }
            engine.bypass(target, i % 7 == 0).unwrap();
            engine.remove_state(target, state).unwrap();
        }

        let produced = renderer.join().unwrap();
        assert!(produced > 0);
    });

    let entries = engine.chain_snapshot(target).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(!engine.is_suspended());
}
