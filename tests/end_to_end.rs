//! End-to-end Tests
//!
//! Full runs of every entry strategy against the deterministic mock priors.

mod common;

use pretty_assertions::assert_eq;
use tempfile::tempdir;

use cascade::artifacts::{CheckpointStore, DirectoryCheckpointStore, RunKey};
use cascade::audio::{item_path, Waveform};
use cascade::prior::mock::{MockEvent, MockGeometry, MockPriorBank};
use cascade::sampling::{ancestral_sample, primed_sample, upsample, LevelState, Orchestrator};
use cascade::CodeBatch;

use common::{labels, plan, Sinks};

// === Ancestral ===

#[test]
fn test_ancestral_fills_every_level() {
    let dir = tempdir().unwrap();
    let bank = MockPriorBank::uniform(3, &[1, 1, 1], 4);
    let plan = plan(dir.path(), 10, 3, 2);
    let sinks = Sinks::new(dir.path());
    let labels = labels(bank.priors(), 3, "");

    let run = ancestral_sample(bank.priors(), &plan, sinks.collaborators(), &labels).unwrap();

    assert_eq!(run.codes.lengths(), vec![10, 10, 10]);
    let order: Vec<usize> = run.levels.iter().map(|o| o.report.level).collect();
    assert_eq!(order, vec![2, 1, 0]);

    // Windows at 0, 2, 4, 6; three samples in groups of two and one
    for level in 0..3 {
        let calls = bank.trace().sample_calls(level);
        assert_eq!(
            calls,
            vec![
                (2, 0, 4),
                (1, 0, 4),
                (2, 2, 4),
                (1, 2, 4),
                (2, 2, 4),
                (1, 2, 4),
                (2, 2, 4),
                (1, 2, 4),
            ]
        );
    }
}

#[test]
fn test_decode_once_per_level_with_full_codes() {
    let dir = tempdir().unwrap();
    let bank = MockPriorBank::uniform(3, &[1, 1, 1], 4);
    let plan = plan(dir.path(), 10, 3, 4);
    let sinks = Sinks::new(dir.path());
    let labels = labels(bank.priors(), 2, "");

    ancestral_sample(bank.priors(), &plan, sinks.collaborators(), &labels).unwrap();

    assert_eq!(
        bank.trace().decode_calls(),
        vec![(2, vec![10]), (1, vec![10, 10]), (0, vec![10, 10, 10])]
    );
}

#[test]
fn test_every_level_decodes_through_the_top_prior() {
    let dir = tempdir().unwrap();
    let bank = MockPriorBank::uniform(3, &[1, 2, 4], 4);
    let plan = plan(dir.path(), 32, 3, 4);
    let sinks = Sinks::new(dir.path());
    let labels = labels(bank.priors(), 2, "");

    ancestral_sample(bank.priors(), &plan, sinks.collaborators(), &labels).unwrap();

    let decoders: Vec<usize> = bank
        .trace()
        .events()
        .into_iter()
        .filter_map(|e| match e {
            MockEvent::Decode { prior, .. } => Some(prior),
            _ => None,
        })
        .collect();
    assert_eq!(decoders, vec![2, 2, 2]);
}

#[test]
fn test_label_rows_must_match_code_rows() {
    let dir = tempdir().unwrap();
    let bank = MockPriorBank::uniform(3, &[1, 2, 4], 4);
    let plan = plan(dir.path(), 32, 3, 4);
    let sinks = Sinks::new(dir.path());
    let mut mixed = labels(bank.priors(), 2, "");
    mixed[1] = labels(bank.priors(), 1, "").remove(1);

    let err = ancestral_sample(bank.priors(), &plan, sinks.collaborators(), &mixed).unwrap_err();

    assert_eq!(err.error_code(), "SHAPE_MISMATCH");
    assert!(err.to_string().contains("level 1"));
    assert!(bank.trace().events().is_empty());
}

#[test]
fn test_one_prior_resident_at_a_time() {
    let dir = tempdir().unwrap();
    let bank = MockPriorBank::uniform(3, &[1, 2, 4], 4);
    let plan = plan(dir.path(), 32, 3, 4);
    let sinks = Sinks::new(dir.path());
    let labels = labels(bank.priors(), 2, "");

    ancestral_sample(bank.priors(), &plan, sinks.collaborators(), &labels).unwrap();

    assert_eq!(bank.trace().max_resident(), 1);
    assert!(bank.priors().iter().all(|p| !p.is_resident()));

    // Decoding happens after the level's prior has left the accelerator
    let events = bank.trace().events();
    let first_decode = events
        .iter()
        .position(|e| matches!(e, MockEvent::Decode { .. }))
        .unwrap();
    assert!(events[..first_decode].contains(&MockEvent::ToHost { level: 2 }));
}

#[test]
fn test_artifacts_written_per_level() {
    let dir = tempdir().unwrap();
    let bank = MockPriorBank::uniform(3, &[1, 2, 4], 4);
    let plan = plan(dir.path(), 32, 3, 4);
    let sinks = Sinks::new(dir.path());
    let labels = labels(bank.priors(), 2, "");

    let run = ancestral_sample(bank.priors(), &plan, sinks.collaborators(), &labels).unwrap();

    let key = RunKey::new("test", "run");
    assert_eq!(sinks.store.list_levels(&key).unwrap(), vec![0, 1, 2]);

    for level in 0..3 {
        let level_dir = key.level_dir(dir.path(), level);
        assert!(item_path(&level_dir, 0).exists());
        assert!(item_path(&level_dir, 1).exists());
        assert!(level_dir.join("report.json").exists());

        let bundle = sinks.store.load(&key, level).unwrap();
        assert_eq!(bundle.level, level);
        assert_eq!(bundle.waveform.len(), 32);
    }

    let finest = sinks.store.load(&key, 0).unwrap();
    assert_eq!(finest.codes, run.codes);
    assert_eq!(finest.sampling.len(), 3);
}

#[test]
fn test_orchestrator_states_end_checkpointed() {
    let dir = tempdir().unwrap();
    let bank = MockPriorBank::uniform(2, &[1, 2], 4);
    let plan = plan(dir.path(), 16, 2, 4);
    let sinks = Sinks::new(dir.path());
    let labels = labels(bank.priors(), 1, "");

    let mut orchestrator = Orchestrator::new(bank.priors(), &plan, sinks.collaborators()).unwrap();
    assert_eq!(orchestrator.states(), &[LevelState::NotStarted; 2]);

    let mut codes = cascade::CodeTable::empty(2, 1);
    orchestrator.sample_levels(&mut codes, &labels, &[1, 0]).unwrap();

    assert_eq!(orchestrator.states(), &[LevelState::Checkpointed; 2]);
    assert_eq!(orchestrator.slot().leases_granted(), 2);
    assert_eq!(orchestrator.slot().resident_level(), None);

    // A level is never revisited
    let err = orchestrator
        .sample_levels(&mut codes, &labels, &[0])
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_TRANSITION");
}

#[test]
fn test_alignment_extracted_once_from_lyric_level() {
    let dir = tempdir().unwrap();
    let mut geometries = vec![MockGeometry::new(4, 1), MockGeometry::new(4, 2)];
    geometries[1].text_tokens = 64;
    let bank = MockPriorBank::new(&geometries, common::SAMPLE_RATE);
    let plan = plan(dir.path(), 16, 2, 4);
    let sinks = Sinks::new(dir.path());
    let labels = labels(bank.priors(), 1, "hello there world");

    let run = ancestral_sample(bank.priors(), &plan, sinks.collaborators(), &labels).unwrap();

    let alignment = run.alignment.unwrap();
    assert_eq!(alignment.items.len(), 1);
    assert_eq!(alignment.items[0].len(), 3);

    let report = std::fs::read_to_string(
        RunKey::new("test", "run")
            .level_dir(dir.path(), 0)
            .join("report.json"),
    )
    .unwrap();
    assert!(report.contains("\"there\""));
}

#[test]
fn test_short_levels_use_one_partial_window() {
    let dir = tempdir().unwrap();
    let bank = MockPriorBank::uniform(3, &[1, 1, 1], 16);
    let plan = plan(dir.path(), 10, 3, 4);
    let sinks = Sinks::new(dir.path());
    let labels = labels(bank.priors(), 1, "");

    let run = ancestral_sample(bank.priors(), &plan, sinks.collaborators(), &labels).unwrap();

    assert_eq!(run.codes.lengths(), vec![10, 10, 10]);
    for level in 0..3 {
        assert_eq!(bank.trace().sample_calls(level), vec![(1, 0, 10)]);
    }
}

// === Upsample ===

#[test]
fn test_upsample_leaves_top_codes_untouched() {
    let dir = tempdir().unwrap();
    let bank = MockPriorBank::uniform(3, &[1, 2, 4], 4);
    let plan = plan(dir.path(), 32, 3, 4);
    let sinks = Sinks::new(dir.path());
    let labels = labels(bank.priors(), 2, "");
    let top = CodeBatch::from_rows(vec![
        vec![7, 1, 2000, 3, 3, 9, 0, 12],
        vec![5, 5, 5, 5, 6, 6, 6, 6],
    ])
    .unwrap();

    let run = upsample(bank.priors(), &plan, sinks.collaborators(), top.clone(), &labels).unwrap();

    assert_eq!(run.codes.level(2).unwrap(), &top);
    assert_eq!(run.codes.lengths(), vec![32, 16, 8]);
    assert!(bank.trace().sample_calls(2).is_empty());

    let decoded: Vec<usize> = bank.trace().decode_calls().iter().map(|d| d.0).collect();
    assert_eq!(decoded, vec![1, 0]);

    let key = RunKey::new("test", "run");
    assert_eq!(sinks.store.list_levels(&key).unwrap(), vec![0, 1]);
}

#[test]
fn test_upsample_from_saved_bundle() {
    let dir = tempdir().unwrap();
    let bank = MockPriorBank::uniform(3, &[1, 2, 4], 4);
    let plan = plan(dir.path(), 32, 3, 4);
    let sinks = Sinks::new(dir.path());
    let labels = labels(bank.priors(), 1, "");

    let first = ancestral_sample(bank.priors(), &plan, sinks.collaborators(), &labels).unwrap();
    let bundle_path = sinks.store.bundle_path(&RunKey::new("test", "run"), 2);
    let bundle = DirectoryCheckpointStore::load_bundle(&bundle_path).unwrap();
    let top = bundle.codes.level(2).unwrap().clone();
    assert_eq!(&top, first.codes.level(2).unwrap());

    let other = tempdir().unwrap();
    let other_plan = common::plan(other.path(), 32, 3, 4);
    let other_sinks = Sinks::new(other.path());
    let again = upsample(
        bank.priors(),
        &other_plan,
        other_sinks.collaborators(),
        top,
        &labels,
    )
    .unwrap();

    // Same priors, same labels, same top codes: same lower levels
    assert_eq!(again.codes, first.codes);
}

#[test]
fn test_upsample_rejects_short_target() {
    let dir = tempdir().unwrap();
    let bank = MockPriorBank::uniform(3, &[1, 2, 4], 16);
    let plan = plan(dir.path(), 16, 3, 4);
    let sinks = Sinks::new(dir.path());
    let labels = labels(bank.priors(), 1, "");
    let top = CodeBatch::from_rows(vec![vec![1, 2, 3, 4]]).unwrap();

    let err = upsample(bank.priors(), &plan, sinks.collaborators(), top, &labels).unwrap_err();

    assert_eq!(err.error_code(), "UPSAMPLE_TOO_SHORT");
    assert!(err.is_configuration_error());
    assert!(bank.trace().events().is_empty());
}

// === Primed ===

#[test]
fn test_primed_preserves_encoded_prefix() {
    let dir = tempdir().unwrap();
    let bank = MockPriorBank::uniform(3, &[1, 2, 4], 4);
    let plan = plan(dir.path(), 32, 3, 4);
    let sinks = Sinks::new(dir.path());
    let labels = labels(bank.priors(), 2, "");
    let prompt = Waveform::sine(common::SAMPLE_RATE, 2, 8, 7.0);

    let encoded = bank.priors()[2].encode(&prompt, 0, 3, 2).unwrap();
    let run = primed_sample(bank.priors(), &plan, sinks.collaborators(), &prompt, &labels).unwrap();

    assert_eq!(run.codes.lengths(), vec![32, 16, 8]);
    for (level, prefix) in encoded.iter().enumerate() {
        let sampled = run.codes.level(level).unwrap();
        assert_eq!(&sampled.window(0, prefix.len()), prefix);
    }
}

#[test]
fn test_primed_prompt_batch_must_match_labels() {
    let dir = tempdir().unwrap();
    let bank = MockPriorBank::uniform(3, &[1, 2, 4], 4);
    let plan = plan(dir.path(), 32, 3, 4);
    let sinks = Sinks::new(dir.path());
    let labels = labels(bank.priors(), 3, "");
    let prompt = Waveform::sine(common::SAMPLE_RATE, 2, 8, 7.0);

    let err = primed_sample(bank.priors(), &plan, sinks.collaborators(), &prompt, &labels)
        .unwrap_err();
    assert_eq!(err.error_code(), "SHAPE_MISMATCH");
}

#[test]
fn test_primed_rejects_prompt_longer_than_target() {
    let dir = tempdir().unwrap();
    let bank = MockPriorBank::uniform(3, &[1, 2, 4], 4);
    let plan = plan(dir.path(), 16, 3, 4);
    let sinks = Sinks::new(dir.path());
    let labels = labels(bank.priors(), 1, "");
    let prompt = Waveform::sine(common::SAMPLE_RATE, 1, 24, 7.0);

    let err = primed_sample(bank.priors(), &plan, sinks.collaborators(), &prompt, &labels)
        .unwrap_err();

    assert_eq!(err.error_code(), "INVALID_CONFIG");
    assert!(bank.trace().events().is_empty());
    assert!(sinks
        .store
        .list_levels(&RunKey::new("test", "run"))
        .unwrap()
        .is_empty());
}

// === Failures ===

#[test]
fn test_failure_aborts_remaining_levels() {
    let dir = tempdir().unwrap();
    let mut geometries = vec![
        MockGeometry::new(4, 1),
        MockGeometry::new(4, 2),
        MockGeometry::new(4, 4),
    ];
    geometries[1].fail_after = Some(1);
    let bank = MockPriorBank::new(&geometries, common::SAMPLE_RATE);
    let plan = plan(dir.path(), 32, 3, 4);
    let sinks = Sinks::new(dir.path());
    let labels = labels(bank.priors(), 1, "");

    let err = ancestral_sample(bank.priors(), &plan, sinks.collaborators(), &labels).unwrap_err();
    assert_eq!(err.error_code(), "PRIOR_ERROR");

    // The top level stays checkpointed, nothing below it was saved
    let key = RunKey::new("test", "run");
    assert_eq!(sinks.store.list_levels(&key).unwrap(), vec![2]);
    assert!(sinks.store.load(&key, 2).is_ok());

    // Residency was released on the error path and level 0 never started
    assert!(bank.priors().iter().all(|p| !p.is_resident()));
    assert!(bank.trace().sample_calls(0).is_empty());
    assert!(bank
        .trace()
        .events()
        .contains(&MockEvent::ToHost { level: 1 }));
}

#[test]
fn test_misaligned_length_rejected_before_sampling() {
    let dir = tempdir().unwrap();
    let bank = MockPriorBank::uniform(3, &[1, 2, 4], 4);
    let plan = plan(dir.path(), 30, 3, 4);
    let sinks = Sinks::new(dir.path());
    let labels = labels(bank.priors(), 1, "");

    let err = ancestral_sample(bank.priors(), &plan, sinks.collaborators(), &labels).unwrap_err();

    assert_eq!(err.error_code(), "LENGTH_NOT_ALIGNED");
    assert!(bank.trace().events().is_empty());
    assert!(!RunKey::new("test", "run").run_dir(dir.path()).exists());
}

#[test]
fn test_zero_batch_size_rejected() {
    let dir = tempdir().unwrap();
    let bank = MockPriorBank::uniform(2, &[1, 2], 4);
    let plan = plan(dir.path(), 16, 2, 0);
    let sinks = Sinks::new(dir.path());
    let labels = labels(bank.priors(), 1, "");

    let err = ancestral_sample(bank.priors(), &plan, sinks.collaborators(), &labels).unwrap_err();
    assert_eq!(err.error_code(), "INVALID_BATCH_SIZE");
}
