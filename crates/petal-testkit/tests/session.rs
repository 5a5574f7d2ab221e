//! Full call lifecycle tests against the in-memory transport.

use std::time::Duration;

use petal_session::{
    CallSession, CallState, ChannelConfig, MethodDescriptor, SendError, SessionEvent,
    SessionEvents, SetupError, WireValue, code,
};
use petal_testkit::{CallScript, MemConnector};

fn unary(service: &str, method: &str) -> MethodDescriptor {
    MethodDescriptor::new(service, method, false, false)
}

fn channel() -> ChannelConfig {
    ChannelConfig::insecure("localhost:50051")
}

fn meta(entries: &[(&str, &str)]) -> Vec<(String, String)> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn start(
    connector: &MemConnector,
    method: MethodDescriptor,
    metadata: &[(String, String)],
) -> (CallSession, SessionEvents) {
    petal_testkit::init_tracing();
    CallSession::start(connector, method, &channel(), metadata).expect("session start")
}

async fn next_event(events: &mut SessionEvents) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event stream closed before a terminal event")
}

async fn collect_until_terminal(events: &mut SessionEvents) -> Vec<SessionEvent> {
    let mut collected = Vec::new();
    loop {
        let event = next_event(events).await;
        let terminal = matches!(event, SessionEvent::Finished(_) | SessionEvent::Aborted);
        collected.push(event);
        if terminal {
            return collected;
        }
    }
}

#[tokio::test]
async fn unary_call_full_lifecycle() {
    let script = CallScript::new()
        .respond(b"pong".to_vec())
        .initial_metadata(vec![
            ("server".to_string(), WireValue::Ascii("mem".to_string())),
            ("token-bin".to_string(), WireValue::Binary(vec![1, 2])),
        ])
        .trailing_metadata(vec![(
            "elapsed".to_string(),
            WireValue::Ascii("1ms".to_string()),
        )]);
    let (connector, handle) = MemConnector::new(script);

    let (session, mut events) = start(
        &connector,
        unary("echo.Echo", "Ping"),
        &meta(&[("authorization", "Bearer abc")]),
    );

    session.send(b"ping".to_vec()).expect("send");

    let collected = collect_until_terminal(&mut events).await;
    assert_eq!(collected.len(), 5);
    assert_eq!(collected[0], SessionEvent::MessageSent);
    assert_eq!(
        collected[1],
        SessionEvent::InitialMetadataReceived(meta(&[("server", "mem"), ("token-bin", "AQI=")]))
    );
    assert_eq!(collected[2], SessionEvent::MessageReceived(b"pong".to_vec()));
    assert_eq!(
        collected[3],
        SessionEvent::TrailingMetadataReceived(meta(&[("elapsed", "1ms")]))
    );
    match &collected[4] {
        SessionEvent::Finished(status) => assert!(status.is_ok()),
        other => panic!("expected Finished, got {other:?}"),
    }

    // What actually went over the wire.
    assert_eq!(handle.request_path(), "/echo.Echo/Ping");
    assert_eq!(
        handle.request_metadata(),
        vec![(
            "authorization".to_string(),
            WireValue::Ascii("Bearer abc".to_string())
        )]
    );
    assert_eq!(handle.sent_payloads(), vec![b"ping".to_vec()]);
    assert!(handle.half_closed(), "unary write must carry the half-close");
    assert!(handle.finish_requested());

    assert_eq!(session.state(), CallState::Finishing);
    assert!(session.elapsed() > Duration::ZERO);

    // Destroying the session after the terminal event delivers nothing
    // further.
    drop(session);
    assert_eq!(events.recv().await, None);
}

#[tokio::test]
async fn metadata_encode_failure_prevents_call_initiation() {
    let (connector, handle) = MemConnector::new(CallScript::new());
    let result = CallSession::start(
        &connector,
        unary("echo.Echo", "Ping"),
        &channel(),
        &meta(&[("Bad Key", "v")]),
    );
    assert!(matches!(result, Err(SetupError::Metadata(_))));
    // The call was never started.
    assert_eq!(handle.request_path(), "");
}

#[tokio::test]
async fn connect_failure_is_a_setup_error() {
    let connector = MemConnector::refusing();
    let result = CallSession::start(&connector, unary("echo.Echo", "Ping"), &channel(), &[]);
    match result {
        Err(SetupError::Connect(e)) => {
            assert_eq!(e.kind(), std::io::ErrorKind::ConnectionRefused)
        }
        other => panic!("expected SetupError::Connect, got {other:?}"),
    }
}

#[tokio::test]
async fn client_streaming_sends_then_single_response() {
    let script = CallScript::new()
        .respond(b"sum=6".to_vec())
        .respond_after_half_close();
    let (connector, handle) = MemConnector::new(script);
    let method = MethodDescriptor::new("math.Adder", "Sum", true, false);

    let (session, mut events) = start(&connector, method, &[]);
    for payload in [b"1".to_vec(), b"2".to_vec(), b"3".to_vec()] {
        session.send(payload).expect("send");
    }
    session.finish_writes();
    // Idempotent: a second half-close must not produce anything extra.
    session.finish_writes();

    let collected = collect_until_terminal(&mut events).await;
    let sent = collected
        .iter()
        .filter(|e| matches!(e, SessionEvent::MessageSent))
        .count();
    let received: Vec<_> = collected
        .iter()
        .filter_map(|e| match e {
            SessionEvent::MessageReceived(p) => Some(p.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(sent, 3, "one MessageSent per send: {collected:?}");
    assert_eq!(received, vec![b"sum=6".to_vec()]);
    assert!(matches!(collected.last(), Some(SessionEvent::Finished(s)) if s.is_ok()));

    assert_eq!(
        handle.sent_payloads(),
        vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]
    );
    assert!(handle.half_closed());
}

#[tokio::test]
async fn server_streaming_delivers_messages_in_emission_order() {
    let script = CallScript::new()
        .respond(b"a".to_vec())
        .respond(b"b".to_vec())
        .respond(b"c".to_vec());
    let (connector, _handle) = MemConnector::new(script);
    let method = MethodDescriptor::new("feed.Feed", "Watch", false, true);

    let (session, mut events) = start(&connector, method, &[]);
    session.send(b"watch-all".to_vec()).expect("send");

    let collected = collect_until_terminal(&mut events).await;
    let sent = collected
        .iter()
        .filter(|e| matches!(e, SessionEvent::MessageSent))
        .count();
    let received: Vec<_> = collected
        .iter()
        .filter_map(|e| match e {
            SessionEvent::MessageReceived(p) => Some(p.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(sent, 1);
    assert_eq!(received, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    // Natural stream end still produces Finished, never Aborted.
    assert!(matches!(collected.last(), Some(SessionEvent::Finished(s)) if s.is_ok()));
    drop(session);
}

#[tokio::test]
async fn bidirectional_reads_continue_after_half_close() {
    // Half-close only ends the client's side of a bidirectional call;
    // the server keeps streaming until it closes its own.
    let script = CallScript::new()
        .respond(b"r1".to_vec())
        .respond(b"r2".to_vec())
        .respond(b"r3".to_vec())
        .respond_after_half_close();
    let (connector, handle) = MemConnector::new(script);
    let method = MethodDescriptor::new("chat.Chat", "Converse", true, true);

    let (session, mut events) = start(&connector, method, &[]);
    session.send(b"q1".to_vec()).expect("send");
    session.send(b"q2".to_vec()).expect("send");
    session.finish_writes();

    let collected = collect_until_terminal(&mut events).await;
    let sent = collected
        .iter()
        .filter(|e| matches!(e, SessionEvent::MessageSent))
        .count();
    let received: Vec<_> = collected
        .iter()
        .filter_map(|e| match e {
            SessionEvent::MessageReceived(p) => Some(p.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(sent, 2);
    assert_eq!(
        received,
        vec![b"r1".to_vec(), b"r2".to_vec(), b"r3".to_vec()],
        "server messages after half-close: {collected:?}"
    );
    assert!(matches!(collected.last(), Some(SessionEvent::Finished(s)) if s.is_ok()));

    assert_eq!(handle.sent_payloads(), vec![b"q1".to_vec(), b"q2".to_vec()]);
    assert!(handle.half_closed());
}

#[tokio::test]
async fn failed_call_start_forces_finished_not_aborted() {
    // A failed call-start completion is a failed operation like any
    // other: fetch the status rather than tearing the session down.
    let script = CallScript::new()
        .fail_start()
        .status(code::UNAVAILABLE, "channel never came up");
    let (connector, handle) = MemConnector::new(script);

    let (session, mut events) = start(&connector, unary("echo.Echo", "Ping"), &[]);

    let collected = collect_until_terminal(&mut events).await;
    assert!(!collected.iter().any(|e| matches!(e, SessionEvent::Aborted)));
    assert!(matches!(
        collected.last(),
        Some(SessionEvent::Finished(s)) if s.code == code::UNAVAILABLE
    ));
    assert!(handle.finish_requested());
    drop(session);
    assert_eq!(events.recv().await, None);
}

#[tokio::test]
async fn non_ok_status_arrives_through_finished() {
    // No responses: the server rejects the call outright.
    let script = CallScript::new()
        .status(code::NOT_FOUND, "no such method")
        .status_details(b"detail-blob".to_vec());
    let (connector, _handle) = MemConnector::new(script);

    let (session, mut events) = start(&connector, unary("echo.Echo", "Missing"), &[]);
    session.send(b"ping".to_vec()).expect("send");

    let collected = collect_until_terminal(&mut events).await;
    match collected.last() {
        Some(SessionEvent::Finished(status)) => {
            assert_eq!(status.code, code::NOT_FOUND);
            assert_eq!(status.message, "no such method");
            assert_eq!(status.details, b"detail-blob".to_vec());
            assert_eq!(status.code_description(), "NOT_FOUND (5)");
        }
        other => panic!("expected Finished, got {other:?}"),
    }
    assert!(!collected.iter().any(|e| matches!(e, SessionEvent::Aborted)));
    drop(session);
}

#[tokio::test]
async fn finish_twice_produces_a_single_terminal_event() {
    let script = CallScript::new().status(code::CANCELLED, "cancelled by client");
    let (connector, _handle) = MemConnector::new(script);

    let (session, mut events) =
        CallSession::start(&connector, unary("echo.Echo", "Ping"), &channel(), &[])
            .expect("start");
    session.finish();
    session.finish();

    let collected = collect_until_terminal(&mut events).await;
    let terminals = collected
        .iter()
        .filter(|e| matches!(e, SessionEvent::Finished(_) | SessionEvent::Aborted))
        .count();
    assert_eq!(terminals, 1);
    assert!(matches!(
        collected.last(),
        Some(SessionEvent::Finished(s)) if s.code == code::CANCELLED
    ));

    // Nothing more after the terminal event, ever.
    drop(session);
    assert_eq!(events.recv().await, None);
}

#[tokio::test]
async fn send_is_rejected_once_writes_are_closed() {
    let script = CallScript::new().respond_after_half_close();
    let (connector, _handle) = MemConnector::new(script);
    let method = MethodDescriptor::new("math.Adder", "Sum", true, false);

    let (session, mut events) = start(&connector, method, &[]);
    session.send(b"1".to_vec()).expect("send");
    session.finish_writes();

    let err = session.send(b"too late".to_vec()).unwrap_err();
    assert!(matches!(err, SendError::InvalidState { .. }));

    let collected = collect_until_terminal(&mut events).await;
    let sent = collected
        .iter()
        .filter(|e| matches!(e, SessionEvent::MessageSent))
        .count();
    assert_eq!(sent, 1, "the rejected payload must not reach the wire");
}

#[tokio::test]
async fn second_send_on_a_unary_call_is_rejected() {
    let script = CallScript::new().respond(b"pong".to_vec());
    let (connector, handle) = MemConnector::new(script);

    let (session, mut events) =
        CallSession::start(&connector, unary("echo.Echo", "Ping"), &channel(), &[])
            .expect("start");
    session.send(b"ping".to_vec()).expect("first send");
    let err = session.send(b"again".to_vec()).unwrap_err();
    assert!(matches!(err, SendError::InvalidState { .. }));

    collect_until_terminal(&mut events).await;
    assert_eq!(handle.sent_payloads(), vec![b"ping".to_vec()]);
}

#[tokio::test]
async fn midstream_failure_forces_finished_not_aborted() {
    let script = CallScript::new()
        .respond_after_half_close()
        .fail_write(2)
        .status(code::UNAVAILABLE, "connection lost");
    let (connector, _handle) = MemConnector::new(script);
    let method = MethodDescriptor::new("math.Adder", "Sum", true, false);

    let (session, mut events) = start(&connector, method, &[]);
    session.send(b"1".to_vec()).expect("send");
    session.send(b"2".to_vec()).expect("send");

    let collected = collect_until_terminal(&mut events).await;
    let sent = collected
        .iter()
        .filter(|e| matches!(e, SessionEvent::MessageSent))
        .count();
    assert_eq!(sent, 1, "the failed write completes without MessageSent");
    assert!(!collected.iter().any(|e| matches!(e, SessionEvent::Aborted)));
    assert!(matches!(
        collected.last(),
        Some(SessionEvent::Finished(s)) if s.code == code::UNAVAILABLE
    ));
    drop(session);
}

#[tokio::test]
async fn queue_shutdown_before_forced_finish_aborts() {
    let script = CallScript::new()
        .respond_after_half_close()
        .fail_write(1)
        .shutdown_on_finish();
    let (connector, handle) = MemConnector::new(script);
    let method = MethodDescriptor::new("math.Adder", "Sum", true, false);

    let (session, mut events) = start(&connector, method, &[]);
    session.send(b"1".to_vec()).expect("send");

    let collected = collect_until_terminal(&mut events).await;
    assert_eq!(collected.last(), Some(&SessionEvent::Aborted));
    assert!(!collected
        .iter()
        .any(|e| matches!(e, SessionEvent::Finished(_))));
    // The forced status fetch was attempted before the queue died.
    assert!(handle.finish_requested());
    drop(session);
}

#[tokio::test]
async fn external_queue_shutdown_aborts_an_idle_call() {
    let script = CallScript::new().respond_after_half_close();
    let (connector, handle) = MemConnector::new(script);
    let method = MethodDescriptor::new("feed.Feed", "Pump", true, true);

    let (session, mut events) = start(&connector, method, &[]);
    session.send(b"hello".to_vec()).expect("send");
    assert_eq!(next_event(&mut events).await, SessionEvent::MessageSent);

    handle.shutdown();
    assert_eq!(next_event(&mut events).await, SessionEvent::Aborted);
    drop(session);
    assert_eq!(events.recv().await, None);
}

#[tokio::test]
async fn dropping_a_live_session_interrupts_the_worker() {
    let script = CallScript::new().respond_after_half_close();
    let (connector, _handle) = MemConnector::new(script);
    let method = MethodDescriptor::new("math.Adder", "Sum", true, false);

    let (session, mut events) = start(&connector, method, &[]);
    session.send(b"1".to_vec()).expect("send");
    assert_eq!(next_event(&mut events).await, SessionEvent::MessageSent);

    // No half-close, no shutdown: the worker is idle-polling. Drop must
    // interrupt and join it, leaving Aborted as the last queued event.
    drop(session);
    assert_eq!(events.recv().await, Some(SessionEvent::Aborted));
    assert_eq!(events.recv().await, None);
}

#[tokio::test]
async fn staged_send_before_connection_is_issued_on_connect() {
    // send() is called immediately after start(); whether the worker has
    // processed the call-start completion yet is a race the staging
    // queue has to absorb. The payload must come out exactly once.
    for _ in 0..16 {
        let script = CallScript::new().respond(b"ok".to_vec());
        let (connector, handle) = MemConnector::new(script);
        let (session, mut events) =
            CallSession::start(&connector, unary("echo.Echo", "Ping"), &channel(), &[])
                .expect("start");
        session.send(b"staged".to_vec()).expect("send");
        let collected = collect_until_terminal(&mut events).await;
        assert!(matches!(collected.last(), Some(SessionEvent::Finished(s)) if s.is_ok()));
        assert_eq!(handle.sent_payloads(), vec![b"staged".to_vec()]);
        drop(session);
    }
}
