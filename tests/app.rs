use std::sync::Arc;

use pretty_assertions::assert_eq;

use snaptrans::capture::memory::{MemoryClipboard, ScriptedCopy};
use snaptrans::capture::CaptureErrorKind;
use snaptrans::config::Settings;
use snaptrans::metrics::metric_names;
use snaptrans::scheduler::{ChannelSink, Delivery};
use snaptrans::translate::mock::ScriptedProvider;
use snaptrans::translate::{Method, ProviderError, TranslationProvider, TranslationRequest};
use snaptrans::App;

fn settings(dir: &std::path::Path) -> Settings {
    let mut s = Settings {
        data_dir: Some(dir.to_path_buf()),
        min_request_interval_ms: 0,
        ..Settings::default()
    };
    s.capture.poll_interval_ms = 2;
    s.capture.timeout_ms = 100;
    s.capture.clipboard_retry_delay_ms = 1;
    s
}

fn provider(p: ScriptedProvider) -> Vec<Arc<dyn TranslationProvider>> {
    vec![Arc::new(p)]
}

#[tokio::test]
async fn cache_history_and_stats_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    let app = App::with_providers(
        settings(dir.path()),
        provider(ScriptedProvider::new("google").with_default(Ok("Hello".into()))),
    )
    .unwrap();
    let first = app
        .orchestrator
        .translate(&TranslationRequest::new("Bonjour", "fr", "en"))
        .await;
    assert_eq!(first.method, Some(Method::Provider("google".into())));
    app.shutdown().await;

    // Second session: the provider is down, but the answer is on disk.
    let app = App::with_providers(
        settings(dir.path()),
        provider(
            ScriptedProvider::new("google").with_default(Err(ProviderError::Network("down".into()))),
        ),
    )
    .unwrap();
    let second = app
        .orchestrator
        .translate(&TranslationRequest::new("Bonjour", "fr", "en"))
        .await;
    assert_eq!(second.method, Some(Method::Cache));
    assert_eq!(second.translated_text, "Hello");

    let history = app.history.clone().unwrap();
    let stats = Arc::clone(&app.stats);
    app.shutdown().await;

    let rows = history.recent(10).unwrap();
    let methods: Vec<_> = rows.iter().map(|r| r.method.as_str()).collect();
    assert_eq!(methods, ["Cache", "Provider(google)"]);
    let data = stats.snapshot();
    assert_eq!(data.total_translations, 2);
    assert_eq!(data.most_used_pair(), Some("fr->en"));
    assert!(dir.path().join("usage_statistics.json").exists());
}

#[tokio::test]
async fn hotkey_press_translates_selection_and_restores_clipboard() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = settings(dir.path());
    s.source_lang = "fr".into();
    let mut app = App::with_providers(
        s,
        provider(ScriptedProvider::new("google").with_default(Ok("Hello".into()))),
    )
    .unwrap();

    let clip = Arc::new(MemoryClipboard::with_text("X"));
    let capture = app.capture_controller(
        clip.clone(),
        Arc::new(ScriptedCopy::selecting(&clip, "Bonjour")),
    );
    let (sink, mut rx) = ChannelSink::new();
    let scheduler = app.start_hotkeys(capture, Arc::new(sink));

    let id = scheduler.trigger(None).unwrap();
    drop(scheduler);
    app.drain_hotkeys().await;

    match rx.recv().await {
        Some(Delivery::Translated {
            request_id,
            source_text,
            result,
        }) => {
            assert_eq!(request_id, id);
            assert_eq!(source_text, "Bonjour");
            assert_eq!(result.translated_text, "Hello");
        }
        other => panic!("unexpected delivery: {other:?}"),
    }
    assert_eq!(clip.current().as_deref(), Some("X"));

    let timings = app.metrics.summary();
    for stage in [
        metric_names::QUEUE_WAIT,
        metric_names::CAPTURE_DONE,
        metric_names::PROVIDER_CALL,
        metric_names::TRANSLATE_DONE,
        metric_names::DELIVER_DONE,
    ] {
        assert_eq!(timings[stage].count, 1, "{stage}");
    }
    app.shutdown().await;
}

#[tokio::test]
async fn hotkey_without_selection_reports_nothing_and_keeps_clipboard() {
    let dir = tempfile::tempdir().unwrap();
    let mut app = App::with_providers(
        settings(dir.path()),
        provider(ScriptedProvider::new("google")),
    )
    .unwrap();

    let clip = Arc::new(MemoryClipboard::with_text("X"));
    let capture = app.capture_controller(clip.clone(), Arc::new(ScriptedCopy::nothing_selected()));
    let (sink, mut rx) = ChannelSink::new();
    let scheduler = app.start_hotkeys(capture, Arc::new(sink));

    scheduler.trigger(None).unwrap();
    drop(scheduler);
    app.drain_hotkeys().await;

    match rx.recv().await {
        Some(Delivery::NothingCaptured { capture, .. }) => {
            assert!(!capture.success);
            assert_eq!(capture.error_kind, Some(CaptureErrorKind::NothingSelected));
        }
        other => panic!("unexpected delivery: {other:?}"),
    }
    assert_eq!(clip.current().as_deref(), Some("X"));
    app.shutdown().await;
}

#[tokio::test]
async fn invalid_settings_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let s = Settings {
        target_lang: "auto".into(),
        ..settings(dir.path())
    };
    assert!(App::with_providers(s, Vec::new()).is_err());
}
