//! End-to-end tests for the suggestion-to-edit pipeline.
//!
//! Exercises: context selection, provider requests through the replay
//! backend, suggestion parsing, diff generation, queued application with
//! conflicts, cancellation, and undo/redo.

use promptstack_core::apply::{ApplicationRequest, HunkOutcome, Resolution, SkipReason};
use promptstack_core::config::PipelineConfig;
use promptstack_core::document::Document;
use promptstack_core::error::{Error, ProviderError, ProviderErrorKind};
use promptstack_core::events::DiffEvent;
use promptstack_core::pipeline::Pipeline;
use promptstack_core::provider::{Provider, ReplayProvider};
use promptstack_core::queue::ApplicationStatus;
use promptstack_core::tokens::ContextBudget;
use promptstack_core::types::{ConflictKind, ContentHash, ContextCandidate, ContextKind};
use tokio_util::sync::CancellationToken;

fn pipeline(responses: Vec<Result<String, ProviderError>>) -> Pipeline {
    let provider = Provider::Replay(ReplayProvider::scripted(responses));
    Pipeline::with_provider(PipelineConfig::default(), provider).unwrap()
}

fn numbered(n: usize) -> String {
    (0..n).map(|i| format!("line {i}\n")).collect()
}

/// `original` with the given numbered lines upper-cased.
fn shouted(original: &str, lines: &[usize]) -> String {
    lines.iter().fold(original.to_owned(), |text, n| {
        text.replace(&format!("line {n}\n"), &format!("LINE {n}\n"))
    })
}

const DRAFT: &str = "# Release notes\nWe shipped things.\nThanks all.\n";

#[tokio::test]
async fn suggestion_round_trip() {
    let response = "Here you go:\n\
        <suggestion id=\"s1\" title=\"Be specific\" kind=\"clarity\">\n\
        <summary>Name what shipped</summary>\n\
        <content>\n# Release notes\nWe shipped the new importer.\nThanks all.\n</content>\n\
        </suggestion>\n";
    let pipeline = pipeline(vec![Ok(response.to_owned())]);
    let mut events = pipeline.subscribe().unwrap();
    assert!(pipeline.subscribe().is_none());

    let budget = pipeline.context_budget().unwrap();
    let library = vec![ContextCandidate {
        id: "style".into(),
        text: "Release notes list every shipped feature by name.".into(),
        tags: vec!["release".into()],
        ..Default::default()
    }];
    let context = pipeline.select_context(DRAFT, &library, &[], &budget).unwrap();
    assert_eq!(context[0].kind, ContextKind::DocumentExcerpt);
    assert_eq!(context[1].id, "style");

    let cancel = CancellationToken::new();
    let outcome = pipeline
        .request_suggestions(&context, DRAFT, &cancel)
        .await
        .unwrap();
    assert_eq!(outcome.suggestions.len(), 1);
    let suggestion = &outcome.suggestions[0];
    assert_eq!(suggestion.title, "Be specific");

    let id = pipeline.open(Document::new(DRAFT));
    let diff = pipeline.suggestion_diff(suggestion, DRAFT).unwrap();
    assert_eq!(diff.hunk_count(), 1);
    let handle = pipeline
        .enqueue(ApplicationRequest::new(id, diff.clone()))
        .await
        .unwrap();
    let report = handle.wait().await.unwrap();
    assert_eq!(report.hash_before, ContentHash::of(DRAFT));
    assert_eq!(report.hash_after, diff.target_hash);

    let snapshot = pipeline.snapshot(id).await.unwrap();
    assert_eq!(
        snapshot.text,
        "# Release notes\nWe shipped the new importer.\nThanks all.\n"
    );
    match events.recv().await.unwrap() {
        DiffEvent::Applied {
            document_id,
            hunk_count,
            ..
        } => {
            assert_eq!(document_id, id);
            assert_eq!(hunk_count, 1);
        }
        other => panic!("expected diff.applied, got {other:?}"),
    }
}

#[tokio::test]
async fn truncated_response_keeps_complete_suggestions() {
    let response = "<suggestion id=\"a\"><content>\nfine\n</content></suggestion>\n\
        <suggestion id=\"b\"><content>\ncut off mid-";
    let pipeline = pipeline(vec![Ok(response.to_owned())]);
    let cancel = CancellationToken::new();
    let outcome = pipeline
        .request_suggestions(&[], "x\n", &cancel)
        .await
        .unwrap();
    assert_eq!(outcome.suggestions.len(), 1);
    assert_eq!(outcome.defects.len(), 1);
}

#[tokio::test]
async fn empty_and_garbled_responses() {
    let pipeline = pipeline(vec![
        Ok(String::new()),
        Ok("no structure at all".to_owned()),
    ]);
    let cancel = CancellationToken::new();
    let empty = pipeline
        .request_suggestions(&[], "x\n", &cancel)
        .await
        .unwrap();
    assert!(empty.suggestions.is_empty());
    let err = pipeline
        .request_suggestions(&[], "x\n", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedResponse { .. }));
}

#[tokio::test(start_paused = true)]
async fn provider_retries_with_backoff() {
    let pipeline = pipeline(vec![
        Err(ProviderError::new(ProviderErrorKind::RateLimit, "429")),
        Err(ProviderError::new(ProviderErrorKind::RateLimit, "429")),
        Ok("<suggestion><content>\nok\n</content></suggestion>".to_owned()),
    ]);
    let start = tokio::time::Instant::now();
    let cancel = CancellationToken::new();
    let outcome = pipeline
        .request_suggestions(&[], "x\n", &cancel)
        .await
        .unwrap();
    assert_eq!(outcome.suggestions.len(), 1);
    assert!(start.elapsed() >= std::time::Duration::from_secs(3));
}

#[tokio::test]
async fn explicit_references_over_budget_fail() {
    let pipeline = pipeline(Vec::new());
    let budget = ContextBudget::new(100, 0.25).unwrap();
    let pinned = ContextCandidate {
        id: "pinned".into(),
        text: "word ".repeat(100),
        explicit: true,
        ..Default::default()
    };
    let err = pipeline.select_context("short", &[pinned], &[], &budget).unwrap_err();
    assert!(matches!(err, Error::BudgetExceeded { limit: 25, .. }));
}

#[tokio::test]
async fn selected_hunks_leave_the_rest() {
    let pipeline = pipeline(Vec::new());
    let original = numbered(30);
    let modified = shouted(&original, &[3, 25]);
    let id = pipeline.open(Document::new(&original));
    let diff = pipeline.generate_diff(&original, &modified);
    assert_eq!(diff.hunk_count(), 2);

    let report = pipeline
        .enqueue(ApplicationRequest::new(id, diff).selected([0]))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(report.hunks[0].outcome, HunkOutcome::Applied);
    assert_eq!(
        report.hunks[1].outcome,
        HunkOutcome::Skipped(SkipReason::NotSelected)
    );
    let snapshot = pipeline.snapshot(id).await.unwrap();
    assert_eq!(snapshot.text, shouted(&original, &[3]));
}

#[tokio::test]
async fn requests_for_one_document_run_in_order() {
    let pipeline = pipeline(Vec::new());
    let v0 = "a\nb\nc\n";
    let v1 = "a\nB\nc\n";
    let v2 = "a\nB\nC\n";
    let id = pipeline.open(Document::new(v0));
    let first = ApplicationRequest::new(id, pipeline.generate_diff(v0, v1));
    let second = ApplicationRequest::new(id, pipeline.generate_diff(v1, v2));
    let first = pipeline.enqueue(first).await.unwrap();
    let second = pipeline.enqueue(second).await.unwrap();

    let (a, b) = tokio::join!(first.wait(), second.wait());
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.hash_after, b.hash_before);
    assert!(b.conflicts().next().is_none());
    assert_eq!(pipeline.snapshot(id).await.unwrap().text, v2);

    pipeline.undo(id).await.unwrap();
    assert_eq!(pipeline.snapshot(id).await.unwrap().text, v1);
    pipeline.undo(id).await.unwrap();
    assert_eq!(pipeline.snapshot(id).await.unwrap().text, v0);
    assert!(matches!(pipeline.undo(id).await, Err(Error::NothingToUndo)));
}

#[tokio::test]
async fn documents_progress_independently() {
    let pipeline = pipeline(Vec::new());
    let docs: Vec<_> = (0..4)
        .map(|i| (i, pipeline.open(Document::new(&numbered(10)))))
        .collect();

    let mut handles = Vec::new();
    for (i, id) in &docs {
        let modified = numbered(10).replace("line 5\n", &format!("doc {i}\n"));
        let diff = pipeline.generate_diff(&numbered(10), &modified);
        let handle = pipeline
            .enqueue(ApplicationRequest::new(*id, diff))
            .await
            .unwrap();
        handles.push(handle);
    }
    let results = futures::future::join_all(handles.into_iter().map(|h| h.wait())).await;
    assert!(results.iter().all(Result::is_ok));
    for (i, id) in &docs {
        let snapshot = pipeline.snapshot(*id).await.unwrap();
        assert!(snapshot.text.contains(&format!("doc {i}\n")));
    }
}

#[tokio::test]
async fn stale_diff_blocks_until_resolved() {
    let pipeline = pipeline(Vec::new());
    let mut events = pipeline.subscribe().unwrap();
    let original = numbered(20);
    let modified = shouted(&original, &[2, 15]);
    let diff = pipeline.generate_diff(&original, &modified);

    let id = pipeline.open(Document::new(&original));
    let typed = original.replace("line 15\n", "typed\n");
    pipeline.replace_content(id, typed).await.unwrap();

    let mut handle = pipeline
        .enqueue(ApplicationRequest::new(id, diff))
        .await
        .unwrap();
    let pending = handle.blocked().await.unwrap();
    assert_eq!(pending.hunk_index, 1);
    assert_eq!(
        pending.conflict.as_ref().unwrap().kind,
        ConflictKind::ContentChanged
    );
    assert!(matches!(handle.status(), ApplicationStatus::Blocked(_)));
    match events.recv().await.unwrap() {
        DiffEvent::Conflict {
            hunk_index, kind, ..
        } => {
            assert_eq!(hunk_index, 1);
            assert_eq!(kind, ConflictKind::ContentChanged);
        }
        other => panic!("expected diff.conflict, got {other:?}"),
    }

    assert!(handle.resolve(0, Resolution::UseDiff).await.is_err());
    handle.resolve(1, Resolution::UseDiff).await.unwrap();
    let report = handle.wait().await.unwrap();
    assert_eq!(report.hunks[1].outcome, HunkOutcome::Forced);
    assert_eq!(pipeline.snapshot(id).await.unwrap().text, modified);
}

#[tokio::test]
async fn cancelled_request_changes_nothing() {
    let pipeline = pipeline(Vec::new());
    let original = numbered(20);
    let modified = shouted(&original, &[2, 15]);
    let id = pipeline.open(Document::new(&original));

    let diff = pipeline.generate_diff(&original, &modified);
    let request = ApplicationRequest::new(id, diff).hunk_by_hunk();
    let mut handle = pipeline.enqueue(request).await.unwrap();
    handle.blocked().await.unwrap();
    handle.resolve(0, Resolution::UseDiff).await.unwrap();
    assert_eq!(handle.blocked().await.unwrap().hunk_index, 1);
    handle.cancel();
    assert!(matches!(handle.wait().await, Err(Error::Cancelled)));

    let snapshot = pipeline.snapshot(id).await.unwrap();
    assert_eq!(snapshot.text, original);
    assert_eq!(snapshot.undo_depth, 0);
}

#[tokio::test]
async fn queue_depth_counts_waiting_requests() {
    let pipeline = pipeline(Vec::new());
    let id = pipeline.open(Document::new("a\n"));
    let diff = pipeline.generate_diff("a\n", "b\n");

    let request = ApplicationRequest::new(id, diff.clone()).hunk_by_hunk();
    let mut blocker = pipeline.enqueue(request).await.unwrap();
    blocker.blocked().await.unwrap();
    let request = ApplicationRequest::new(id, diff.clone());
    let waiting = pipeline.enqueue(request).await.unwrap();
    let stale = pipeline
        .enqueue(ApplicationRequest::new(id, diff))
        .await
        .unwrap();
    assert_eq!(pipeline.queue_depth(id).unwrap(), 2);
    assert_eq!(waiting.status(), ApplicationStatus::Queued);

    blocker.resolve(0, Resolution::UseCurrent).await.unwrap();
    blocker.wait().await.unwrap();
    waiting.wait().await.unwrap();
    // The third request now conflicts; without a handle to resolve it, it is cancelled.
    drop(stale);
    assert_eq!(pipeline.snapshot(id).await.unwrap().text, "b\n");
}

#[tokio::test]
async fn undo_and_redo_are_exact() {
    let pipeline = pipeline(Vec::new());
    let original = "intro\n\nbody one\nbody two\n\nclosing";
    let modified = "Intro\n\nbody one\nbody 2\nbody 3\n\nclosing line\n";
    let id = pipeline.open(Document::new(original));
    pipeline
        .enqueue(ApplicationRequest::new(id, pipeline.generate_diff(original, modified)))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(pipeline.snapshot(id).await.unwrap().text, modified);

    assert_eq!(pipeline.undo(id).await.unwrap(), ContentHash::of(original));
    assert_eq!(pipeline.snapshot(id).await.unwrap().text, original);
    assert_eq!(pipeline.redo(id).await.unwrap(), ContentHash::of(modified));
    assert_eq!(pipeline.snapshot(id).await.unwrap().text, modified);
    assert!(matches!(pipeline.redo(id).await, Err(Error::NothingToRedo)));

    let document = pipeline.close(id).await.unwrap();
    assert_eq!(document.text(), modified);
    assert!(matches!(
        pipeline.snapshot(id).await,
        Err(Error::UnknownDocument(_))
    ));
}

#[tokio::test]
async fn events_before_subscribing_are_dropped() {
    let pipeline = pipeline(Vec::new());
    let id = pipeline.open(Document::new("a\n"));
    for i in 0..50 {
        let text = format!("a{i}\n");
        pipeline.replace_content(id, "a\n").await.unwrap();
        let diff = pipeline.generate_diff("a\n", &text);
        let handle = pipeline
            .enqueue(ApplicationRequest::new(id, diff))
            .await
            .unwrap();
        handle.wait().await.unwrap();
    }

    let mut events = pipeline.subscribe().unwrap();
    assert!(events.try_recv().is_err());

    pipeline.undo(id).await.unwrap();
    assert_eq!(events.recv().await.unwrap().name(), "document.undone");
}
