//! Integration tests for saving and restoring chains
//!
//! Chains go out through the engine as documents, through JSON / TOML / preset
//! files, and back into another chain.

use crate::support::{self, params, render, EventLog, OFFSET, SCALE};
use cadenza_core::domain::{
    ChainDocument, ChainTarget, EffectId, EngineError, PresetManager,
};
use proptest::prelude::*;
use tempfile::TempDir;

fn build_chain(project: &cadenza_core::domain::Project, target: ChainTarget) {
    let engine = project.realtime_engine().unwrap();
    let a = engine.add_state(target, EffectId::new(OFFSET)).unwrap();
    engine.set_parameters(target, a, params(&[("amount", "0.125")])).unwrap();
    let b = engine.add_state(target, EffectId::new(SCALE)).unwrap();
    engine.set_parameters(target, b, params(&[("factor", "-2")])).unwrap();
    engine.set_prefade(target, b, true).unwrap();
    let c = engine.add_state(target, EffectId::new("vendor.reverb")).unwrap();
    engine.set_parameters(target, c, params(&[("room", "large"), ("mix", "0.3")])).unwrap();
    engine.set_state_bypass(target, c, true).unwrap();
}

#[test]
fn test_json_round_trip_between_tracks() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let source = project.add_group("Source", 2);
    let copy = project.add_group("Copy", 2);
    build_chain(&project, ChainTarget::Track(source));
    engine.bypass(ChainTarget::Track(source), true).unwrap();

    let doc = engine.write_chain(ChainTarget::Track(source)).unwrap();
    let json = doc.to_json().unwrap();
    engine
        .read_chain(ChainTarget::Track(copy), &ChainDocument::from_json(&json).unwrap())
        .unwrap();

    let restored = engine.write_chain(ChainTarget::Track(copy)).unwrap();
    assert_eq!(restored, doc);
    assert!(engine.is_bypassed(ChainTarget::Track(copy)));

    let ids: Vec<_> = restored.effects.iter().map(|e| e.id.as_str().to_string()).collect();
    assert_eq!(ids, vec![OFFSET, SCALE, "vendor.reverb"]);
    assert!(restored.effects[1].prefader);
    assert!(restored.effects[2].bypass);
    assert_eq!(restored.effects[2].parameters.get("room").unwrap(), "large");
}

#[test]
fn test_restored_chain_processes_like_the_original() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let source = project.add_group("Source", 1);
    let copy = project.add_group("Copy", 1);
    build_chain(&project, ChainTarget::Track(source));

    let toml = engine.write_chain(ChainTarget::Track(source)).unwrap().to_toml().unwrap();
    engine
        .read_chain(ChainTarget::Track(copy), &ChainDocument::from_toml(&toml).unwrap())
        .unwrap();

    engine.initialize(48000.0).unwrap();
    engine.add_processor(source, 1, 48000.0).unwrap();
    engine.add_processor(copy, 1, 48000.0).unwrap();
    engine.process_start().unwrap();

    let input = vec![vec![0.5, -0.25, 1.0]];
    let (n_source, out_source) = render(&engine, source, 0.5, &input);
    let (n_copy, out_copy) = render(&engine, copy, 0.5, &input);
    assert_eq!(n_source, 3);
    assert_eq!((n_copy, &out_copy), (n_source, &out_source));

    // post: 0.5x + 0.125, pre: -2x, summed
    let expected: Vec<f32> = input[0].iter().map(|x| (x * 0.5 + 0.125) + x * -2.0).collect();
    assert_eq!(out_source[0], expected);
}

#[test]
fn test_read_chain_refused_during_session() {
    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let track = project.add_group("Track", 1);

    engine.initialize(48000.0).unwrap();
    let result = engine.read_chain(ChainTarget::Track(track), &ChainDocument::default());
    assert!(matches!(result, Err(EngineError::SessionActive)));
}

#[test]
fn test_foreign_document_fields_are_ignored() {
    let json = r#"{
        "format": 3,
        "bypass": "off",
        "effects": [
            {
                "id": "test.scale",
                "prefader": true,
                "parameters": { "factor": "2", "nested": { "x": 1 } },
                "color": "red"
            },
            { "version": "9", "bypass": true },
            42
        ]
    }"#;
    let doc = ChainDocument::from_json(json).unwrap();

    assert!(!doc.bypass);
    assert_eq!(doc.len(), 2);
    assert_eq!(doc.effects[0].id.as_str(), SCALE);
    assert!(doc.effects[0].prefader);
    assert_eq!(doc.effects[0].parameters.len(), 1);
    assert!(doc.effects[1].id.is_empty());
    assert!(doc.effects[1].bypass);
}

#[tokio::test]
async fn test_preset_restores_chain() {
    let temp_dir = TempDir::new().unwrap();
    let presets = PresetManager::new(temp_dir.path().join("presets"));

    let log = EventLog::default();
    let (project, _) = support::project(&log);
    let engine = project.realtime_engine().unwrap();
    let track = project.add_group("Vocal", 1);
    build_chain(&project, ChainTarget::Master);

    let doc = engine.write_chain(ChainTarget::Master).unwrap();
    presets.save_preset("bus", &doc).await.unwrap();

    let loaded = presets.load_preset("bus").await.unwrap();
    engine.read_chain(ChainTarget::Track(track), &loaded).unwrap();
    assert_eq!(engine.write_chain(ChainTarget::Track(track)).unwrap(), doc);
}

fn entry_strategy() -> impl Strategy<Value = (usize, bool, bool, Vec<(String, String)>)> {
    (
        0usize..3,
        any::<bool>(),
        any::<bool>(),
        prop::collection::vec(("[a-z]{1,6}", "[ -~]{0,12}"), 0..4),
    )
}

proptest! {
    #[test]
    fn prop_chain_round_trip_preserves_entries(
        entries in prop::collection::vec(entry_strategy(), 0..6),
        bypass in any::<bool>(),
    ) {
        let ids = [SCALE, OFFSET, "vendor.unknown"];
        let log = EventLog::default();
        let (project, _) = support::project(&log);
        let engine = project.realtime_engine().unwrap();
        let source = project.add_group("Source", 1);
        let copy = project.add_group("Copy", 1);
        let target = ChainTarget::Track(source);

        for (id, prefade, bypassed, pairs) in &entries {
            let state = engine.add_state(target, EffectId::new(ids[*id])).unwrap();
            engine.set_prefade(target, state, *prefade).unwrap();
            engine.set_state_bypass(target, state, *bypassed).unwrap();
            if *id == 2 {
                let pairs: Vec<(&str, &str)> =
                    pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
                engine.set_parameters(target, state, params(&pairs)).unwrap();
            }
        }
        engine.bypass(target, bypass).unwrap();

        let doc = engine.write_chain(target).unwrap();
        let json = doc.to_json().unwrap();
        let parsed = ChainDocument::from_json(&json).unwrap();
        engine.read_chain(ChainTarget::Track(copy), &parsed).unwrap();
        let restored = engine.write_chain(ChainTarget::Track(copy)).unwrap();

        prop_assert_eq!(&restored, &doc);
        prop_assert_eq!(restored.len(), entries.len());
        for ((id, prefade, bypassed, _), effect) in entries.iter().zip(&restored.effects) {
            prop_assert_eq!(effect.id.as_str(), ids[*id]);
            prop_assert_eq!(effect.prefader, *prefade);
            prop_assert_eq!(effect.bypass, *bypassed);
        }
    }
}
