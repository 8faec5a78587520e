//! Lifecycle tests for the session and its receive loop
//!
//! These run the real receive loop over the scripted in-memory connector.

use super::*;
use crate::config::{CallbackPolicy, ReconnectPolicy};
use crate::test_utils::{
    RecordSink, ScriptedConnector, Step, chunk_steps, encode_record, magic_header, split_by_sizes,
};
use crate::types::{ByteOrder, HEADER_SIZE};
use bytes::Bytes;
use std::time::Duration;

const NOMINAL: [i16; 4] = [100, -200, 300, -400];

fn config() -> SessionConfig {
    SessionConfig::tcp("127.0.0.1:2758", 4)
}

fn fast_reconnect(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        enabled: true,
        max_attempts,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        multiplier: 2.0,
    }
}

fn nominal_record() -> Vec<u8> {
    encode_record(&[0u8; HEADER_SIZE], &NOMINAL, ByteOrder::Little)
}

fn two_nominal_records() -> Vec<u8> {
    let mut bytes = nominal_record();
    bytes.extend(nominal_record());
    bytes
}

fn session_with(
    config: SessionConfig,
    connector: ScriptedConnector,
) -> (Session, Arc<ScriptedConnector>, Arc<RecordSink>) {
    let connector = Arc::new(connector);
    let session = Session::with_connector(config, connector.clone()).unwrap();
    let sink = RecordSink::new();
    session.set_handlers(vec![sink.clone()]);
    (session, connector, sink)
}

async fn wait_for_records(sink: &RecordSink, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while sink.len() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("records did not arrive in time");
}

async fn wait_outcome(session: &mut Session) -> SessionOutcome {
    tokio::time::timeout(Duration::from_secs(5), session.wait())
        .await
        .expect("receive loop did not finish")
        .expect("session was connected")
}

fn drain_events(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn nominal_two_records_in_three_chunks() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut steps = chunk_steps(split_by_sizes(&two_nominal_records(), &[10, 40, 22]));
    assert_eq!(steps.len(), 3);
    steps.push(Step::Hang);
    let (mut session, connector, sink) =
        session_with(config(), ScriptedConnector::new().connection(steps));

    session.connect().await.unwrap();
    wait_for_records(&sink, 2).await;
    assert!(session.is_connected());

    session.disconnect().await;

    assert_eq!(sink.samples(), vec![NOMINAL.to_vec(), NOMINAL.to_vec()]);
    let sequences: Vec<u64> = sink.records().iter().map(|r| r.sequence()).collect();
    assert_eq!(sequences, [0, 1]);
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(connector.closes(), 1);

    let stats = session.stats();
    assert_eq!(stats.records_delivered, 2);
    assert_eq!(stats.chunks_received, 3);
    assert_eq!(stats.bytes_received, 72);
    assert_eq!(stats.buffered_bytes, 0);
}

#[tokio::test]
async fn one_byte_chunks_yield_identical_records() {
    let mut stream = encode_record(&magic_header(1), &[1, 2, 3, 4], ByteOrder::Little);
    stream.extend(encode_record(&magic_header(2), &[-5, -6, -7, -8], ByteOrder::Little));

    let mut steps = chunk_steps(split_by_sizes(&stream, &[1]));
    steps.push(Step::Hang);
    let (mut session, _connector, sink) =
        session_with(config(), ScriptedConnector::new().connection(steps));

    session.connect().await.unwrap();
    wait_for_records(&sink, 2).await;
    session.disconnect().await;

    let records = sink.records();
    assert_eq!(records[0].header().packet_number(), 1);
    assert_eq!(records[0].samples(), &[1, 2, 3, 4]);
    assert_eq!(records[1].header().packet_number(), 2);
    assert_eq!(records[1].samples(), &[-5, -6, -7, -8]);
}

#[tokio::test]
async fn partial_record_stays_buffered() {
    let stream = two_nominal_records();
    let steps = vec![Step::Chunk(Bytes::copy_from_slice(&stream[..36 + 20])), Step::Hang];
    let (mut session, _connector, sink) =
        session_with(config(), ScriptedConnector::new().connection(steps));

    session.connect().await.unwrap();
    wait_for_records(&sink, 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(sink.len(), 1);
    assert_eq!(session.stats().buffered_bytes, 20);
    session.disconnect().await;
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let steps = vec![Step::Chunk(Bytes::from(nominal_record())), Step::Hang];
    let (mut session, connector, sink) =
        session_with(config(), ScriptedConnector::new().connection(steps));

    // Before connect: nothing to do.
    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Idle);

    session.connect().await.unwrap();
    wait_for_records(&sink, 1).await;

    session.disconnect().await;
    session.disconnect().await;
    session.disconnect().await;

    assert_eq!(sink.len(), 1);
    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.last_error().is_none());
    assert_eq!(connector.closes(), 1);
    assert!(session.wait().await.unwrap().is_clean());
}

#[tokio::test]
async fn disconnect_while_waiting_for_data_closes_cleanly() {
    let (mut session, connector, sink) =
        session_with(config(), ScriptedConnector::new().connection(vec![Step::Hang]));
    let mut events = session.take_events();

    session.connect().await.unwrap();
    session.wait_for_state(|s| s == SessionState::Streaming).await;
    session.disconnect().await;

    assert!(sink.is_empty());
    assert_eq!(connector.closes(), 1);
    let states: Vec<SessionState> = drain_events(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        [
            SessionState::Connecting,
            SessionState::Streaming,
            SessionState::Closing,
            SessionState::Closed
        ]
    );
}

#[tokio::test]
async fn reconnect_gives_up_after_max_attempts() {
    let steps = vec![Step::Chunk(Bytes::from(nominal_record())), Step::Fail("reset".into())];
    let (mut session, connector, sink) = session_with(
        config().with_reconnect(fast_reconnect(3)),
        ScriptedConnector::new().connection(steps),
    );
    let mut events = session.take_events();

    session.connect().await.unwrap();
    let outcome = wait_outcome(&mut session).await;

    assert!(outcome.error().is_some_and(StreamError::is_transport));
    assert_eq!(session.state(), SessionState::Failed);
    // One initial connection plus three reconnect attempts.
    assert_eq!(connector.opens(), 4);
    assert_eq!(session.stats().reconnect_attempts, 3);
    assert_eq!(sink.len(), 1);

    let events = drain_events(&mut events);
    let scheduled: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::ReconnectScheduled { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(scheduled, [1, 2, 3]);
    assert!(matches!(events.last(), Some(SessionEvent::StateChanged(SessionState::Failed))));
    assert!(events.iter().any(|e| matches!(e, SessionEvent::Failed(_))));
}

#[tokio::test]
async fn reconnect_resets_framing() {
    let record = nominal_record();
    let mut first = record.clone();
    first.extend_from_slice(&[0xEE; 10]);
    let second = encode_record(&magic_header(7), &[9, 8, 7, 6], ByteOrder::Little);

    let connector = ScriptedConnector::new()
        .connection(vec![Step::Chunk(Bytes::from(first)), Step::Fail("link dropped".into())])
        .refuse("still down")
        .connection(vec![Step::Chunk(Bytes::from(second)), Step::Hang]);
    let (mut session, connector, sink) =
        session_with(config().with_reconnect(fast_reconnect(3)), connector);

    session.connect().await.unwrap();
    wait_for_records(&sink, 2).await;
    session.disconnect().await;

    assert_eq!(sink.samples(), vec![NOMINAL.to_vec(), vec![9, 8, 7, 6]]);
    assert_eq!(sink.records()[1].header().packet_number(), 7);
    assert_eq!(connector.opens(), 3);
    assert_eq!(session.stats().connections_opened, 2);
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn transport_error_without_reconnect_fails_immediately() {
    let (mut session, connector, _sink) = session_with(
        config(),
        ScriptedConnector::new().connection(vec![Step::Fail("reset".into())]),
    );

    session.connect().await.unwrap();
    let outcome = wait_outcome(&mut session).await;

    assert!(matches!(outcome.error(), Some(StreamError::Transport { .. })));
    assert_eq!(connector.opens(), 1);
    assert!(session.last_error().is_some());
}

#[tokio::test]
async fn refused_connection_without_reconnect_fails() {
    let (mut session, connector, _sink) =
        session_with(config(), ScriptedConnector::new().refuse("connection refused"));

    session.connect().await.unwrap();
    let outcome = wait_outcome(&mut session).await;

    assert!(!outcome.is_clean());
    assert_eq!(connector.opens(), 1);
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn peer_close_is_a_transport_error() {
    let steps = vec![Step::Chunk(Bytes::from(nominal_record())), Step::Close];
    let (mut session, _connector, sink) =
        session_with(config(), ScriptedConnector::new().connection(steps));

    session.connect().await.unwrap();
    let outcome = wait_outcome(&mut session).await;

    assert_eq!(sink.len(), 1);
    let error = outcome.error().expect("peer close fails the session");
    assert!(error.to_string().contains("closed by peer"));
}

#[tokio::test]
async fn framing_overflow_fails_without_retry() {
    // The device sends 36-byte records and never more than 72 bytes per record,
    // but the session was configured for 64 samples (156-byte records).
    let mut stream = two_nominal_records();
    stream.extend_from_slice(&nominal_record()[..28]);
    let steps = vec![Step::Chunk(Bytes::from(stream)), Step::Hang];
    let (mut session, connector, sink) = session_with(
        SessionConfig::tcp("127.0.0.1:2758", 64)
            .with_max_buffered_bytes(72)
            .with_reconnect(fast_reconnect(3)),
        ScriptedConnector::new().connection(steps),
    );

    session.connect().await.unwrap();
    let outcome = wait_outcome(&mut session).await;

    assert!(matches!(
        outcome.error(),
        Some(StreamError::FramingOverflow { buffered: 100, limit: 72, record_size: 156 })
    ));
    assert!(outcome.error().is_some_and(StreamError::is_fatal_framing));
    assert_eq!(connector.opens(), 1);
    assert_eq!(connector.closes(), 1);
    assert!(sink.is_empty());
    assert_eq!(session.state(), SessionState::Failed);
}

#[tokio::test]
async fn message_with_more_records_than_the_limit_is_delivered() {
    // Default limit is 8 records; the device batches 10 into one message.
    let mut batch = Vec::new();
    for n in 0..10u8 {
        batch.extend(encode_record(&magic_header(n), &NOMINAL, ByteOrder::Little));
    }
    let steps = vec![Step::Chunk(Bytes::from(batch)), Step::Hang];
    let (mut session, _connector, sink) =
        session_with(config(), ScriptedConnector::new().connection(steps));

    session.connect().await.unwrap();
    wait_for_records(&sink, 10).await;
    assert!(session.is_connected());
    session.disconnect().await;

    let packets: Vec<u8> = sink.records().iter().map(|r| r.header().packet_number()).collect();
    assert_eq!(packets, (0..10).collect::<Vec<u8>>());
    assert!(sink.samples().iter().all(|s| s == &NOMINAL));
    assert!(session.last_error().is_none());
    let stats = session.stats();
    assert_eq!(stats.records_delivered, 10);
    assert_eq!(stats.buffered_bytes, 0);
}

#[tokio::test]
async fn callback_errors_are_reported_and_streaming_continues() {
    let mut steps = chunk_steps(split_by_sizes(&two_nominal_records(), &[72]));
    steps.push(Step::Hang);
    let connector = Arc::new(ScriptedConnector::new().connection(steps));
    let mut session = Session::with_connector(config(), connector).unwrap();
    session.on_record(|record: &Record| Err(format!("cannot store {}", record.sequence()).into()));
    let mut events = session.take_events();

    session.connect().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.stats().callback_errors < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    assert!(session.is_connected());
    session.disconnect().await;

    let failed_sequences: Vec<u64> = drain_events(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::CallbackError { sequence, .. } => Some(sequence),
            _ => None,
        })
        .collect();
    assert_eq!(failed_sequences, [0, 1]);
    assert!(session.wait().await.unwrap().is_clean());
}

#[tokio::test]
async fn fatal_callback_policy_fails_the_session() {
    let steps = vec![Step::Chunk(Bytes::from(two_nominal_records())), Step::Hang];
    let connector = Arc::new(ScriptedConnector::new().connection(steps));
    let mut session = Session::with_connector(
        config().with_callback_policy(CallbackPolicy::Fatal),
        connector,
    )
    .unwrap();
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    session.on_record(move |_: &Record| {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Err("disk full".into())
    });

    session.connect().await.unwrap();
    let outcome = wait_outcome(&mut session).await;

    assert!(matches!(outcome.error(), Some(StreamError::Callback { .. })));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn receive_timeout_is_handled_as_transport_error() {
    let (mut session, _connector, _sink) = session_with(
        config().with_receive_timeout(Duration::from_millis(20)),
        ScriptedConnector::new().connection(vec![Step::Hang]),
    );

    session.connect().await.unwrap();
    let outcome = wait_outcome(&mut session).await;

    assert!(matches!(outcome.error(), Some(StreamError::Timeout { .. })));
}

#[tokio::test]
async fn fan_out_handlers_all_receive_records() {
    let steps = vec![Step::Chunk(Bytes::from(nominal_record())), Step::Hang];
    let (mut session, _connector, first) =
        session_with(config(), ScriptedConnector::new().connection(steps));
    let second = RecordSink::new();
    session.set_handlers(vec![first.clone(), second.clone()]);
    assert_eq!(session.handler_count(), 2);

    session.connect().await.unwrap();
    wait_for_records(&second, 1).await;
    session.disconnect().await;

    assert_eq!(first.records(), second.records());
}

#[tokio::test]
async fn connect_while_active_is_rejected() {
    let (mut session, _connector, _sink) =
        session_with(config(), ScriptedConnector::new().connection(vec![Step::Hang]));

    session.connect().await.unwrap();
    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, StreamError::AlreadyActive { .. }));

    let err = session.set_sample_count(8).unwrap_err();
    assert!(matches!(err, StreamError::AlreadyActive { .. }));

    session.disconnect().await;
    session.set_sample_count(8).unwrap();
    assert_eq!(session.config().sample_count, 8);
    assert!(session.set_sample_count(0).is_err());
}

#[tokio::test]
async fn session_can_connect_again_after_closing() {
    let record = Bytes::from(nominal_record());
    let connector = ScriptedConnector::new()
        .connection(vec![Step::Chunk(record.clone()), Step::Hang])
        .connection(vec![Step::Chunk(record), Step::Hang]);
    let (mut session, connector, sink) = session_with(config(), connector);

    session.connect().await.unwrap();
    wait_for_records(&sink, 1).await;
    session.disconnect().await;

    session.connect().await.unwrap();
    wait_for_records(&sink, 2).await;
    // Counters and sequence numbers restart with each connect().
    assert_eq!(session.stats().records_delivered, 1);
    assert_eq!(sink.records()[1].sequence(), 0);
    session.disconnect().await;

    assert_eq!(connector.opens(), 2);
}

#[test]
fn invalid_config_is_rejected_before_connecting() {
    let err = Session::new(SessionConfig::tcp("127.0.0.1:2758", 0)).unwrap_err();
    assert!(matches!(err, StreamError::Configuration { .. }));

    let err = Session::new(SessionConfig::websocket("tcp://device:80", 4)).unwrap_err();
    assert!(matches!(err, StreamError::Configuration { .. }));
}

#[tokio::test]
async fn state_updates_follow_the_lifecycle() {
    use futures::StreamExt;

    let (mut session, _connector, _sink) =
        session_with(config(), ScriptedConnector::new().connection(vec![Step::Hang]));
    let mut updates = Box::pin(session.state_updates());
    assert_eq!(updates.next().await, Some(SessionState::Idle));

    session.connect().await.unwrap();
    let streaming = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(state) = updates.next().await {
            if state == SessionState::Streaming {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(streaming);

    session.disconnect().await;
    let last = tokio::time::timeout(Duration::from_secs(5), updates.next()).await.unwrap();
    assert_eq!(last, Some(SessionState::Closed));
}

#[tokio::test]
async fn disconnect_handle_stops_a_waiting_session() {
    let steps = vec![Step::Chunk(Bytes::from(two_nominal_records())), Step::Hang];
    let (mut session, connector, sink) =
        session_with(config(), ScriptedConnector::new().connection(steps));
    let handle = session.disconnect_handle();

    session.connect().await.unwrap();

    let stopper = tokio::spawn({
        let sink = Arc::clone(&sink);
        async move {
            wait_for_records(&sink, 2).await;
            assert_eq!(handle.state(), SessionState::Streaming);
            handle.disconnect();
        }
    });

    let outcome = wait_outcome(&mut session).await;
    stopper.await.unwrap();

    assert!(outcome.is_clean());
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(connector.closes(), 1);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(sink.len(), 2);
}

#[tokio::test]
async fn disconnect_handle_follows_later_connects() {
    let connector = ScriptedConnector::new()
        .connection(vec![Step::Hang])
        .connection(vec![Step::Hang]);
    let (mut session, connector, _sink) = session_with(config(), connector);
    let handle = session.disconnect_handle();

    // Before any connect there is nothing to stop.
    handle.disconnect();
    assert_eq!(handle.state(), SessionState::Idle);

    for _ in 0..2 {
        session.connect().await.unwrap();
        session.wait_for_state(|s| s == SessionState::Streaming).await;
        handle.clone().disconnect();
        assert!(wait_outcome(&mut session).await.is_clean());
    }
    assert_eq!(connector.opens(), 2);
    assert_eq!(connector.closes(), 2);
}
