mod support;

use std::time::Duration;

use linkpeek::application::{
    blocking::{BlockingError, BlockingPreviewClient},
    preview::PreviewService,
    render::PreviewFailure,
};

use support::{Script, Step, coordinator, title_for, url};

#[test]
fn blocks_until_the_render_completes() {
    let script = Script::new(Duration::from_millis(20));
    let client = BlockingPreviewClient::new(|| {
        PreviewService::new(coordinator(&script, 1, Duration::from_secs(5)))
    })
    .expect("client starts");
    let target = url("/blocking");

    let record = client
        .fetch_preview(&target)
        .expect("no adapter error")
        .expect("record");

    assert_eq!(record.title, Some(title_for(&target)));
    assert_eq!(script.navigations(), vec![target.to_string()]);
}

#[test]
fn failures_are_reported_through_both_apis() {
    let script = Script::new(Duration::from_millis(20));
    let target = url("/fails");
    script.on(
        &target,
        Step::FailExtraction {
            delay: Duration::from_millis(10),
            message: "blank".to_string(),
        },
    );
    let client = BlockingPreviewClient::new(|| {
        PreviewService::new(coordinator(&script, 1, Duration::from_secs(5)))
    })
    .expect("client starts");

    assert_eq!(client.fetch_preview(&target).expect("no adapter error"), None);
    assert!(matches!(
        client.fetch_preview_detailed(&target),
        Err(BlockingError::Preview(PreviewFailure::Extraction { .. }))
    ));
}

#[test]
fn slow_render_is_bounded_by_the_timeout() {
    let script = Script::new(Duration::from_secs(60));
    let client = BlockingPreviewClient::new(|| {
        PreviewService::new(coordinator(&script, 1, Duration::from_millis(200)))
    })
    .expect("client starts");

    let outcome = client.fetch_preview_detailed(&url("/hangs"));

    assert!(matches!(
        outcome,
        Err(BlockingError::Preview(PreviewFailure::Timeout { .. }))
    ));
}

#[tokio::test]
async fn spawn_blocking_threads_are_refused_too() {
    let script = Script::new(Duration::from_millis(20));
    let client = BlockingPreviewClient::new(|| {
        PreviewService::new(coordinator(&script, 1, Duration::from_secs(5)))
    })
    .expect("client starts");

    let outcome =
        tokio::task::spawn_blocking(move || client.fetch_preview(&url("/from-blocking-pool")))
            .await
            .expect("blocking task joins");

    assert!(matches!(outcome, Err(BlockingError::InsideRuntime)));
    assert!(script.navigations().is_empty());
}

#[tokio::test]
async fn refuses_to_block_inside_a_runtime() {
    let script = Script::new(Duration::from_millis(20));
    let client = BlockingPreviewClient::new(|| {
        PreviewService::new(coordinator(&script, 1, Duration::from_secs(5)))
    })
    .expect("client starts");

    assert!(matches!(
        client.fetch_preview(&url("/inside")),
        Err(BlockingError::InsideRuntime)
    ));
    assert!(script.navigations().is_empty());
}
