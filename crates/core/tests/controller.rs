// crates/core/tests/controller.rs
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{connected, progress, status, After, Script, ScriptedApi};
use jobwatch_core::{BackoffPolicy, ControllerEvent, ControllerOutcome, ReconnectionController};
use jobwatch_types::{ConnectionPhase, JobId, JobStatus, StreamEvent};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn controller(api: &Arc<ScriptedApi>, max_attempts: u32, root: &CancellationToken) -> ReconnectionController {
    ReconnectionController::new(
        api.clone(),
        JobId::new("j1"),
        BackoffPolicy::default(),
        max_attempts,
        root,
    )
}

fn drain(rx: &mut mpsc::Receiver<ControllerEvent>) -> Vec<ControllerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn reconnect_messages(events: &[ControllerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ControllerEvent::Stream(StreamEvent::Reconnecting(msg)) => Some(msg.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_gating_query_stops_reconnection_for_finished_job() {
    let api = ScriptedApi::new("j1");
    api.push_stream(Script::body([connected("j1")], After::End));
    api.set_status(Ok(JobStatus::Completed));

    let root = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(32);
    let outcome = controller(&api, 10, &root).run(tx).await;

    assert_eq!(outcome, ControllerOutcome::Finished(JobStatus::Completed));
    assert_eq!(api.open_calls(), 1);
    assert_eq!(api.status_calls(), 1);
    assert_eq!(
        drain(&mut rx),
        vec![
            ControllerEvent::Stream(StreamEvent::Connected),
            ControllerEvent::Gated(JobStatus::Completed),
            ControllerEvent::Stopped(ControllerOutcome::Finished(JobStatus::Completed)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_gating_stops_on_non_processable_even_with_attempts_left() {
    let api = ScriptedApi::new("j1");
    api.set_status(Ok(JobStatus::Cancelling));

    let root = CancellationToken::new();
    let (tx, _rx) = mpsc::channel::<ControllerEvent>(32);
    let ctl = controller(&api, 10, &root);
    let phase = ctl.phase();
    let outcome = ctl.run(tx).await;

    assert_eq!(outcome, ControllerOutcome::Finished(JobStatus::Cancelling));
    assert_eq!(api.open_calls(), 1);
    assert_eq!(*phase.borrow(), ConnectionPhase::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_failed_gating_query_still_retries() {
    let api = ScriptedApi::new("j1");
    api.push_stream(Script::Refuse);
    api.push_stream(Script::body([connected("j1"), status("Completed")], After::Hang));
    api.push_status(Err(500));
    api.set_status(Ok(JobStatus::Running));

    let root = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(32);
    let handle = controller(&api, 10, &root).spawn(tx);

    loop {
        if let Some(ControllerEvent::Stream(StreamEvent::StatusChanged(s))) = rx.recv().await {
            assert_eq!(s, JobStatus::Completed);
            break;
        }
    }
    assert_eq!(api.open_calls(), 2);
    handle.cancel();
    assert_eq!(handle.join().await, ControllerOutcome::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_issues_no_further_queries() {
    let api = ScriptedApi::new("j1");
    api.set_status(Ok(JobStatus::Running));

    let root = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(64);
    let outcome = controller(&api, 10, &root).run(tx).await;

    assert_eq!(outcome, ControllerOutcome::Exhausted { attempts: 10 });
    // Initial attempt plus ten retries; one gating query per retry.
    assert_eq!(api.open_calls(), 11);
    assert_eq!(api.status_calls(), 10);

    let messages = reconnect_messages(&drain(&mut rx));
    assert_eq!(messages.len(), 10);
    assert_eq!(messages[0], "Reconnecting (attempt 1/10)");
    assert_eq!(messages[9], "Reconnecting (attempt 10/10)");

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(api.status_calls(), 10);
    assert_eq!(api.open_calls(), 11);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_counter_resets_after_connected() {
    let api = ScriptedApi::new("j1");
    api.push_stream(Script::Refuse);
    api.push_stream(Script::Refuse);
    api.push_stream(Script::body([connected("j1")], After::Error));
    api.set_status(Ok(JobStatus::Running));

    let root = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(64);
    let started = Instant::now();
    let outcome = controller(&api, 3, &root).run(tx).await;

    assert_eq!(outcome, ControllerOutcome::Exhausted { attempts: 3 });
    assert_eq!(api.open_calls(), 6);
    assert_eq!(
        reconnect_messages(&drain(&mut rx)),
        vec![
            "Reconnecting (attempt 1/3)",
            "Reconnecting (attempt 2/3)",
            "Reconnecting (attempt 1/3)",
            "Reconnecting (attempt 2/3)",
            "Reconnecting (attempt 3/3)",
        ]
    );
    // 1s + 2s, reset, then 1s + 2s + 4s.
    assert_eq!(started.elapsed(), Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_late_connected_frame_does_not_reset_attempts() {
    let api = ScriptedApi::new("j1");
    api.push_stream(Script::Refuse);
    api.push_stream(Script::body([progress("x"), connected("j1")], After::Error));
    api.set_status(Ok(JobStatus::Running));

    let root = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(64);
    let outcome = controller(&api, 2, &root).run(tx).await;

    assert_eq!(outcome, ControllerOutcome::Exhausted { attempts: 2 });
    assert_eq!(api.open_calls(), 3);

    let events = drain(&mut rx);
    assert!(!events.contains(&ControllerEvent::Stream(StreamEvent::Connected)));
    assert!(events.contains(&ControllerEvent::Stream(StreamEvent::Progress("x".into()))));
    assert_eq!(
        reconnect_messages(&events),
        vec!["Reconnecting (attempt 1/2)", "Reconnecting (attempt 2/2)"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_connected_releases_stream() {
    let api = ScriptedApi::new("j1");
    api.push_stream(Script::body([connected("j1")], After::Hang));

    let root = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(32);
    let handle = controller(&api, 10, &root).spawn(tx);

    assert_eq!(
        rx.recv().await,
        Some(ControllerEvent::Stream(StreamEvent::Connected))
    );
    assert_eq!(handle.phase(), ConnectionPhase::Connected);
    assert_eq!(api.live_streams(), 1);

    handle.cancel();
    handle.cancel();
    assert!(handle.is_cancelled());
    let phase = handle.phase_receiver();
    assert_eq!(handle.join().await, ControllerOutcome::Cancelled);

    assert_eq!(*phase.borrow(), ConnectionPhase::Stopped);
    assert_eq!(api.live_streams(), 0);
    assert_eq!(api.status_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_prevents_retry() {
    let api = ScriptedApi::new("j1");
    api.set_status(Ok(JobStatus::Running));

    let root = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(32);
    let handle = controller(&api, 10, &root).spawn(tx);

    loop {
        if let Some(ControllerEvent::Stream(StreamEvent::Reconnecting(_))) = rx.recv().await {
            break;
        }
    }
    // Parent cancellation reaches the controller.
    root.cancel();
    assert_eq!(handle.join().await, ControllerOutcome::Cancelled);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(api.open_calls(), 1);
}
