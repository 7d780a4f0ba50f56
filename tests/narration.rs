mod common;

use std::sync::Arc;

use std::path::PathBuf;

use common::{
    Descriptor, FakeSpeech, FakeToolkit, SpeechOutcome, read_descriptor, scene, test_config,
    write_descriptor,
};
use shorts_pipeline::PipelineError;
use shorts_pipeline::cache::{ArtifactCache, content_key};
use shorts_pipeline::config::Config;
use shorts_pipeline::narration::provider::CADENCE_PROVIDER;
use shorts_pipeline::narration::{
    CACHE_PROVIDER, NarrationSynthesizer, SILENCE_PROVIDER, SpeechProvider, SyntheticCadence,
    TRACK_TOLERANCE,
};
use shorts_pipeline::run_state::RunState;
use shorts_pipeline::text::normalize_narration;
use shorts_pipeline::toolkit::MediaToolkit;

fn synthesizer(
    cfg: &Config,
    toolkit: Arc<FakeToolkit>,
    providers: Vec<Arc<dyn SpeechProvider>>,
) -> NarrationSynthesizer {
    NarrationSynthesizer::new(
        providers,
        toolkit,
        ArtifactCache::new(&cfg.paths.cache_dir),
        cfg,
    )
}

/// Where a clean clip for `text` is cached under the configured voice.
fn cached_clip_path(cfg: &Config, text: &str) -> PathBuf {
    let normalized =
        normalize_narration(text, cfg.voice.language, &cfg.voice.pronunciation_overrides).unwrap();
    let key = content_key(&["tts", cfg.voice.primary_voice_id(), &normalized]);
    ArtifactCache::new(&cfg.paths.cache_dir).path_for("tts", &key, "mp3")
}

#[tokio::test]
async fn identical_requests_hit_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let toolkit = Arc::new(FakeToolkit::new());
    let premium = Arc::new(FakeSpeech::single("premium", SpeechOutcome::clean(5.0)));
    let synth = synthesizer(&cfg, toolkit, vec![premium.clone()]);
    let state = RunState::new();
    let s = scene("Compounding is slow, then sudden.", &[], 5.0);

    let first = synth.synthesize_scene(0, &s, &state).await.unwrap();
    assert!(!first.cache_hit);
    assert_eq!(first.provider, "premium");

    // Same normalized text after whitespace collapse.
    let again = scene("Compounding  is slow,   then sudden.", &[], 5.0);
    let second = synth.synthesize_scene(1, &again, &RunState::new()).await.unwrap();
    assert!(second.cache_hit);
    assert_eq!(second.provider, CACHE_PROVIDER);
    assert_eq!(second.path, first.path);
    assert_eq!(premium.calls(), 1);
}

#[tokio::test]
async fn offline_cadence_used_when_cloud_voices_are_off() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.narration.allow_silent_fallback = true;
    let toolkit = Arc::new(FakeToolkit::new());
    let providers: Vec<Arc<dyn SpeechProvider>> = vec![
        Arc::new(FakeSpeech::unavailable("premium")),
        Arc::new(FakeSpeech::unavailable("network_voice")),
        Arc::new(SyntheticCadence::new(toolkit.clone(), true)),
    ];
    let synth = synthesizer(&cfg, toolkit.clone(), providers);

    let s = scene("one two three four five six seven eight nine ten", &[], 4.0);
    let clip = synth.synthesize_scene(0, &s, &RunState::new()).await.unwrap();
    assert_eq!(clip.provider, CADENCE_PROVIDER);
    assert!(clip.duration > 0.0);
    assert_eq!(toolkit.count("render_cadence"), 1);
    assert_eq!(toolkit.count("render_silence"), 0);
}

#[tokio::test]
async fn silence_only_when_policy_allows() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    let toolkit = Arc::new(FakeToolkit::new());
    let providers = || -> Vec<Arc<dyn SpeechProvider>> {
        vec![
            Arc::new(FakeSpeech::unavailable("premium")),
            Arc::new(FakeSpeech::single("network_voice", SpeechOutcome::Rejected)),
        ]
    };
    let s = scene("Nothing can speak this line.", &[], 6.0);

    cfg.narration.allow_silent_fallback = false;
    let strict = synthesizer(&cfg, toolkit.clone(), providers());
    let err = strict
        .synthesize_scene(2, &s, &RunState::new())
        .await
        .unwrap_err();
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::NarrationUnavailable { index, reasons }) => {
            assert_eq!(*index, 2);
            assert!(reasons.contains("network_voice"));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    cfg.narration.allow_silent_fallback = true;
    let lenient = synthesizer(&cfg, toolkit.clone(), providers());
    let clip = lenient.synthesize_scene(2, &s, &RunState::new()).await.unwrap();
    assert_eq!(clip.provider, SILENCE_PROVIDER);
    assert_eq!(clip.duration, 6.0);
}

#[tokio::test]
async fn premium_keeps_best_scoring_voice() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let toolkit = Arc::new(FakeToolkit::new());
    let premium = Arc::new(FakeSpeech::voices(
        "premium",
        true,
        vec![
            ("a", SpeechOutcome::with_mean(5.1, -30.0)),
            ("b", SpeechOutcome::with_mean(5.2, -26.0)),
            ("c", SpeechOutcome::with_mean(5.3, -40.0)),
        ],
    ));
    let synth = synthesizer(&cfg, toolkit.clone(), vec![premium.clone()]);

    let clip = synth
        .synthesize_scene(0, &scene("Pick the clearest voice.", &[], 5.0), &RunState::new())
        .await
        .unwrap();
    assert_eq!(premium.calls(), 3);
    assert_eq!(clip.provider, "premium");
    assert!((clip.duration - 5.2).abs() < 1e-9);

    let kept = toolkit.measure_loudness(&clip.path).await.unwrap();
    assert_eq!(kept.mean_db, -26.0);
}

#[tokio::test]
async fn premium_accepts_first_voice_over_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let premium = Arc::new(FakeSpeech::voices(
        "premium",
        true,
        vec![
            ("a", SpeechOutcome::with_mean(5.0, -30.0)),
            ("b", SpeechOutcome::with_mean(5.0, -20.0)),
            ("c", SpeechOutcome::clean(5.0)),
        ],
    ));
    let synth = synthesizer(&cfg, Arc::new(FakeToolkit::new()), vec![premium.clone()]);

    synth
        .synthesize_scene(0, &scene("Stop at the first good take.", &[], 5.0), &RunState::new())
        .await
        .unwrap();
    assert_eq!(premium.calls_for("a"), 1);
    assert_eq!(premium.calls_for("b"), 1);
    assert_eq!(premium.calls_for("c"), 0);
}

#[tokio::test]
async fn near_silent_output_falls_through() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let quiet = Arc::new(FakeSpeech::single("premium", SpeechOutcome::with_mean(5.0, -70.0)));
    let backup = Arc::new(FakeSpeech::single("network_voice", SpeechOutcome::clean(5.0)));
    let synth = synthesizer(
        &cfg,
        Arc::new(FakeToolkit::new()),
        vec![quiet.clone(), backup.clone()],
    );

    let clip = synth
        .synthesize_scene(0, &scene("Say it out loud.", &[], 5.0), &RunState::new())
        .await
        .unwrap();
    assert_eq!(clip.provider, "network_voice");
    assert_eq!(quiet.calls(), 1);
}

#[tokio::test]
async fn network_failure_disables_provider_for_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let premium = Arc::new(FakeSpeech::voices(
        "premium",
        true,
        vec![
            ("a", SpeechOutcome::NetworkDown),
            ("b", SpeechOutcome::clean(5.0)),
        ],
    ));
    let backup = Arc::new(FakeSpeech::single("network_voice", SpeechOutcome::clean(5.0)));
    let synth = synthesizer(
        &cfg,
        Arc::new(FakeToolkit::new()),
        vec![premium.clone(), backup.clone()],
    );
    let state = RunState::new();

    let scenes = [
        scene("First scene text.", &[], 5.0),
        scene("Second scene text.", &[], 5.0),
    ];
    for (i, s) in scenes.iter().enumerate() {
        let clip = synth.synthesize_scene(i, s, &state).await.unwrap();
        assert_eq!(clip.provider, "network_voice");
    }
    assert_eq!(premium.calls(), 1);
    assert_eq!(backup.calls(), 2);
    assert!(state.is_disabled("premium"));
}

#[tokio::test]
async fn padding_never_exceeds_cap() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let toolkit = Arc::new(FakeToolkit::new());
    let synth = synthesizer(
        &cfg,
        toolkit.clone(),
        vec![Arc::new(FakeSpeech::single("premium", SpeechOutcome::clean(3.0)))],
    );
    let state = RunState::new();

    // Far short of the estimate: padded by the maximum extension only.
    let long = synth
        .synthesize_scene(0, &scene("Short read.", &[], 8.0), &state)
        .await
        .unwrap();
    assert!((long.duration - 3.35).abs() < 1e-9);

    let near = synth
        .synthesize_scene(1, &scene("Another short read.", &[], 4.0), &state)
        .await
        .unwrap();
    assert!((near.duration - 3.35).abs() < 1e-9);

    // Slightly short: padded up to the estimate.
    let exact = synth
        .synthesize_scene(2, &scene("A third short read.", &[], 3.2), &state)
        .await
        .unwrap();
    assert!((exact.duration - 3.2).abs() < 1e-9);

    // Within the skip margin: untouched.
    let untouched = synth
        .synthesize_scene(3, &scene("Close enough already.", &[], 3.05), &state)
        .await
        .unwrap();
    assert_eq!(untouched.duration, 3.0);
    assert_eq!(toolkit.count("pad_with_silence"), 3);
}

#[tokio::test]
async fn track_duration_matches_clip_sum() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let toolkit = Arc::new(FakeToolkit::new());
    let synth = synthesizer(
        &cfg,
        toolkit.clone(),
        vec![Arc::new(FakeSpeech::single("premium", SpeechOutcome::clean(4.5)))],
    );
    let scenes = vec![
        scene("Scene one.", &[], 4.0),
        scene("Scene two.", &[], 6.0),
        scene("Scene three.", &[], 5.0),
    ];

    let track = synth
        .synthesize_all(&scenes, &RunState::new(), &dir.path().join("work/narration.mp3"))
        .await
        .unwrap();
    assert_eq!(track.clips.len(), 3);
    assert!(track.clips.iter().all(|c| c.duration > 0.0));
    assert!((track.clip_sum() - track.track_duration).abs() <= TRACK_TOLERANCE);
    assert_eq!(track.providers.get("premium"), Some(&3));
    assert_eq!(
        track.clips.iter().map(|c| c.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
}

#[tokio::test]
async fn empty_scene_list_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let synth = synthesizer(&cfg, Arc::new(FakeToolkit::new()), Vec::new());
    let err = synth
        .synthesize_all(&[], &RunState::new(), &dir.path().join("n.mp3"))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::EmptyScript)
    ));
}

#[tokio::test]
async fn invalid_cached_clip_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let text = "The cache went quiet.";
    let path = cached_clip_path(&cfg, text);
    write_descriptor(&path, &Descriptor::audio(5.0, -70.0, -40.0));

    let premium = Arc::new(FakeSpeech::single("premium", SpeechOutcome::clean(5.0)));
    let synth = synthesizer(&cfg, Arc::new(FakeToolkit::new()), vec![premium.clone()]);
    let clip = synth
        .synthesize_scene(0, &scene(text, &[], 5.0), &RunState::new())
        .await
        .unwrap();

    assert!(!clip.cache_hit);
    assert_eq!(premium.calls(), 1);
    assert_eq!(clip.path, path);
    assert_eq!(read_descriptor(&path).unwrap().mean_db, -18.0);
}

#[tokio::test]
async fn padded_clip_is_reused_across_requests() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let toolkit = Arc::new(FakeToolkit::new());
    let synth = synthesizer(
        &cfg,
        toolkit.clone(),
        vec![Arc::new(FakeSpeech::single("premium", SpeechOutcome::clean(3.0)))],
    );
    let s = scene("A short line to pad.", &[], 8.0);

    let first = synth.synthesize_scene(0, &s, &RunState::new()).await.unwrap();
    let second = synth.synthesize_scene(0, &s, &RunState::new()).await.unwrap();
    assert!(second.cache_hit);
    assert_eq!(second.path, first.path);
    assert!((second.duration - 3.35).abs() < 1e-9);
    assert_eq!(toolkit.count("pad_with_silence"), 1);
}

#[tokio::test]
async fn replaced_source_gets_a_fresh_pad() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let toolkit = Arc::new(FakeToolkit::new());
    let synth = synthesizer(
        &cfg,
        toolkit.clone(),
        vec![Arc::new(FakeSpeech::single("premium", SpeechOutcome::clean(3.0)))],
    );
    let text = "Padding follows its source.";
    let s = scene(text, &[], 3.2);

    let first = synth.synthesize_scene(0, &s, &RunState::new()).await.unwrap();
    // Same file name, different audio: the cap stays 3.2 but the source changed.
    write_descriptor(&cached_clip_path(&cfg, text), &Descriptor::audio(2.95, -18.0, -3.0));
    let second = synth.synthesize_scene(0, &s, &RunState::new()).await.unwrap();

    assert_ne!(second.path, first.path);
    assert_eq!(toolkit.count("pad_with_silence"), 2);
}

#[tokio::test]
async fn skipped_tiers_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let synth = synthesizer(
        &cfg,
        Arc::new(FakeToolkit::new()),
        vec![
            Arc::new(FakeSpeech::single("premium", SpeechOutcome::Rejected)),
            Arc::new(FakeSpeech::single("quiet", SpeechOutcome::with_mean(5.0, -70.0))),
            Arc::new(FakeSpeech::single("network_voice", SpeechOutcome::clean(5.0))),
        ],
    );
    let state = RunState::new();

    let clip = synth
        .synthesize_scene(0, &scene("Fall through twice.", &[], 5.0), &state)
        .await
        .unwrap();
    assert_eq!(clip.provider, "network_voice");
    assert_eq!(clip.failures.len(), 2);
    assert!(clip.failures[0].starts_with("premium"));
    assert!(clip.failures[1].starts_with("quiet"));
    // Soft failures keep the provider enabled.
    assert!(!state.is_disabled("premium"));
    assert_eq!(state.api_calls().get("premium"), Some(&1));
    assert_eq!(state.api_calls().get("network_voice"), Some(&1));
}

#[tokio::test]
async fn offline_tiers_are_not_counted_as_api_calls() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path());
    let toolkit = Arc::new(FakeToolkit::new());
    let synth = synthesizer(
        &cfg,
        toolkit.clone(),
        vec![Arc::new(SyntheticCadence::new(toolkit.clone(), true))],
    );
    let state = RunState::new();

    synth
        .synthesize_scene(0, &scene("Nobody is online today.", &[], 4.0), &state)
        .await
        .unwrap();
    assert!(state.api_calls().is_empty());
}
