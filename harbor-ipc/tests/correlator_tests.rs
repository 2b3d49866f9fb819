use harbor_ipc::{
    Correlator, Envelope, FrameSink, IpcError, MappingAck, Outcome, SandboxRequest,
    SandboxResponse,
};
use harbor_types::{AppId, InstallId, RequestId};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines};

type Wire = Lines<BufReader<DuplexStream>>;

fn wire() -> (FrameSink, Wire) {
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    (FrameSink::spawn(ours), BufReader::new(theirs).lines())
}

fn mapping_of(apps: usize) -> SandboxRequest {
    let mapping: BTreeMap<_, _> = (0..apps)
        .map(|i| {
            (
                AppId::parse(&format!("app-{i}")).unwrap(),
                InstallId::parse(&format!("inst-{i}")).unwrap(),
            )
        })
        .collect();
    SandboxRequest::UpdateAppInstallIdMapping(mapping)
}

fn ack(apps: usize) -> SandboxResponse {
    SandboxResponse::UpdateAppInstallIdMapping(Outcome::Success(MappingAck { apps }))
}

/// Reads the next request frame and returns its id and mapping size.
async fn next_request(wire: &mut Wire) -> (RequestId, usize) {
    let line = wire.next_line().await.unwrap().unwrap();
    let frame: Envelope<SandboxRequest, SandboxResponse> = serde_json::from_str(&line).unwrap();
    match frame {
        Envelope::Request {
            id,
            payload: SandboxRequest::UpdateAppInstallIdMapping(mapping),
        } => (id, mapping.len()),
        other => panic!("unexpected frame {other:?}"),
    }
}

// ── Correlation ─────────────────────────────────────────────────

#[tokio::test]
async fn out_of_order_responses_reach_their_own_callers() {
    let (sink, mut wire) = wire();
    let correlator = Arc::new(Correlator::<SandboxRequest>::new(sink));

    let mut calls = Vec::new();
    for apps in 1..=3 {
        let c = Arc::clone(&correlator);
        calls.push(tokio::spawn(async move {
            (apps, c.send(mapping_of(apps), Duration::from_secs(5)).await)
        }));
    }

    let mut sent = Vec::new();
    for _ in 0..3 {
        sent.push(next_request(&mut wire).await);
    }
    assert_eq!(correlator.pending_count(), 3);

    // answer in reverse order of arrival
    for (id, apps) in sent.into_iter().rev() {
        assert!(correlator.resolve(&id, ack(apps)));
    }

    for call in calls {
        let (apps, reply) = call.await.unwrap();
        assert_eq!(reply.unwrap(), ack(apps));
    }
    assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn ids_are_unique_per_call() {
    let (sink, mut wire) = wire();
    let correlator = Arc::new(Correlator::<SandboxRequest>::new(sink));
    for _ in 0..2 {
        let c = Arc::clone(&correlator);
        tokio::spawn(async move { c.send(mapping_of(0), Duration::from_secs(5)).await });
    }
    let (a, _) = next_request(&mut wire).await;
    let (b, _) = next_request(&mut wire).await;
    assert_ne!(a, b);
}

#[tokio::test]
async fn unknown_id_is_ignored() {
    let (sink, _wire) = wire();
    let correlator = Correlator::<SandboxRequest>::new(sink);
    assert!(!correlator.resolve(&RequestId::from_wire("nobody"), ack(0)));
}

// ── Timeouts ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn timeout_fails_the_call_and_late_reply_is_dropped() {
    let (sink, mut wire) = wire();
    let correlator = Arc::new(Correlator::<SandboxRequest>::new(sink));

    let started = tokio::time::Instant::now();
    let c = Arc::clone(&correlator);
    let call = tokio::spawn(async move { c.send(mapping_of(2), Duration::from_millis(500)).await });
    let (id, _) = next_request(&mut wire).await;

    let err = call.await.unwrap().unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert!(matches!(
        err,
        IpcError::Timeout {
            action: "update_app_install_id_mapping",
            timeout_ms: 500
        }
    ));
    assert_eq!(correlator.pending_count(), 0);

    // the late response completes nothing
    assert!(!correlator.resolve(&id, ack(2)));
}

#[tokio::test(start_paused = true)]
async fn abandoned_call_releases_its_entry() {
    let (sink, mut wire) = wire();
    let correlator = Arc::new(Correlator::<SandboxRequest>::new(sink));

    let c = Arc::clone(&correlator);
    let call = tokio::spawn(async move { c.send(mapping_of(1), Duration::from_secs(60)).await });
    next_request(&mut wire).await;
    assert_eq!(correlator.pending_count(), 1);

    call.abort();
    let _ = call.await;
    assert_eq!(correlator.pending_count(), 0);
}

// ── Closing ─────────────────────────────────────────────────────

#[tokio::test]
async fn close_fails_pending_and_future_calls() {
    let (sink, mut wire) = wire();
    let correlator = Arc::new(Correlator::<SandboxRequest>::new(sink));

    let c = Arc::clone(&correlator);
    let call = tokio::spawn(async move { c.send(mapping_of(1), Duration::from_secs(5)).await });
    next_request(&mut wire).await;

    correlator.close();
    assert!(matches!(call.await.unwrap(), Err(IpcError::ChannelClosed)));
    assert!(matches!(
        correlator.send(mapping_of(1), Duration::from_secs(5)).await,
        Err(IpcError::ChannelClosed)
    ));
}
