//! End-to-end resilience scenarios driven through `SessionGuard` with a
//! paused clock.

use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tokio::time::Instant;

use relic_session::{
    config::ResilienceConfig,
    core::{CardId, ParticipantId},
    error::{ConnectionFault, ErrorCategory, ErrorKind},
    network::{
        AuthConfig, ClientMessage, ConnectionState, DisconnectReason, ReconnectEvent, ReconnectOutcome,
        ScriptedLink, ServerMessage, Session,
    },
    recovery::RecoveryResult,
    security::{ActionKeyring, Card, TableState, ZoneKind},
    SessionGuard, TypedError,
};

fn pid(n: u8) -> ParticipantId {
    ParticipantId::new([n; 16])
}

fn session() -> Session {
    let mut table = TableState::new(&[pid(1), pid(2)]);
    table.version = 3;
    table.cards.push(Card::new(1, "Birds of Paradise", pid(1), ZoneKind::Hand));
    table.cards.push(Card::new(2, "Wrath of God", pid(2), ZoneKind::Hand));
    table.cards.push(Card::new(3, "Ancestral Recall", pid(2), ZoneKind::Library));
    table.cards.push(Card::new(4, "Morph", pid(2), ZoneKind::Battlefield).face_down());
    table.cards.push(Card::new(5, "Forest", pid(1), ZoneKind::Battlefield));
    Session::new([7; 16], table)
}

fn guard() -> Arc<SessionGuard> {
    SessionGuard::new(
        [7; 16],
        ResilienceConfig::test_profile(),
        AuthConfig::with_secret("integration-secret-0123456789abcdef"),
        ActionKeyring::new(b"integration".to_vec()),
    )
}

fn link() -> Arc<ScriptedLink> {
    let link = Arc::new(ScriptedLink::connected());
    link.set_session(session());
    link
}

type Timeline = Arc<Mutex<Vec<(Duration, ReconnectEvent)>>>;

fn record(guard: &SessionGuard) -> (Timeline, Arc<impl Fn(&ReconnectEvent) + Send + Sync>) {
    let origin = Instant::now();
    let timeline: Timeline = Arc::new(Mutex::new(Vec::new()));
    let sink = timeline.clone();
    let subscriber = Arc::new(move |e: &ReconnectEvent| sink.lock().push((origin.elapsed(), e.clone())));
    guard.reconnector().subscribe(&subscriber);
    (timeline, subscriber)
}

#[tokio::test(start_paused = true)]
async fn test_third_attempt_succeeds() {
    let guard = guard();
    let link = link();
    guard.attach(pid(1), link.clone()).unwrap();
    let (timeline, _keep) = record(&guard);

    link.drop_connection();
    link.script_connects([false, false, true]);
    let handle = guard.handle_disconnect(pid(1), DisconnectReason::NetworkError).unwrap();
    let outcome = handle.outcome().await;
    assert!(matches!(outcome, ReconnectOutcome::Reconnected { attempts: 3, resynced: true, .. }));

    let timeline = timeline.lock();
    let attempts = timeline.iter().filter(|(_, e)| matches!(e, ReconnectEvent::Attempt { .. })).count();
    let retrying = timeline
        .iter()
        .filter(|(_, e)| matches!(e, ReconnectEvent::Failed { will_retry: true, .. }))
        .count();
    let succeeded: Vec<_> = timeline
        .iter()
        .filter_map(|(_, e)| match e {
            ReconnectEvent::Succeeded { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    let given_up = timeline.iter().filter(|(_, e)| matches!(e, ReconnectEvent::GivenUp { .. })).count();

    assert_eq!(attempts, 3);
    assert_eq!(retrying, 2);
    assert_eq!(succeeded, vec![3]);
    assert_eq!(given_up, 0);

    // Progress is published once the backoff wait is over.
    let dialled: Vec<Duration> = timeline
        .iter()
        .filter(|(_, e)| matches!(e, ReconnectEvent::Progress { .. }))
        .map(|(at, _)| *at)
        .collect();
    assert_eq!(
        dialled,
        vec![Duration::ZERO, Duration::from_millis(1000), Duration::from_millis(3000)]
    );
    assert_eq!(guard.connections().current_state(&pid(1)), Some(ConnectionState::Connected));
    assert!(guard.heartbeat().is_tracked(&pid(1)));
}

#[tokio::test(start_paused = true)]
async fn test_all_attempts_fail_gives_up_once() {
    let guard = guard();
    let link = link();
    guard.attach(pid(1), link.clone()).unwrap();
    let (timeline, _keep) = record(&guard);

    link.drop_connection();
    link.set_default_connect(false);
    let outcome = guard
        .handle_disconnect(pid(1), DisconnectReason::NetworkError)
        .unwrap()
        .outcome()
        .await;
    assert!(matches!(outcome, ReconnectOutcome::GaveUp { attempts: 5, .. }));

    let timeline = timeline.lock();
    let given_up: Vec<Duration> = timeline
        .iter()
        .filter_map(|(_, e)| match e {
            ReconnectEvent::GivenUp { total_duration, .. } => Some(*total_duration),
            _ => None,
        })
        .collect();
    assert_eq!(given_up.len(), 1);
    assert!(given_up[0] >= Duration::from_millis(1000 + 2000 + 4000 + 8000));
    assert!(!timeline.iter().any(|(_, e)| matches!(e, ReconnectEvent::Succeeded { .. })));
    assert!(matches!(
        timeline.iter().rev().find(|(_, e)| matches!(e, ReconnectEvent::Failed { .. })),
        Some((_, ReconnectEvent::Failed { attempt: 5, will_retry: false, .. }))
    ));

    assert_eq!(link.connection_attempts(), 5);
    assert_eq!(guard.connections().current_state(&pid(1)), Some(ConnectionState::Disconnected));
    assert!(guard.reconnector().retained_snapshot(&pid(1)).is_some());
    assert_eq!(guard.reconnector().stats().given_up, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_triggers_share_one_pipeline() {
    let guard = guard();
    let link = link();
    guard.attach(pid(1), link.clone()).unwrap();
    link.drop_connection();
    link.set_default_connect(false);

    let handle = guard.handle_disconnect(pid(1), DisconnectReason::NetworkError).unwrap();
    let again = guard.handle_disconnect(pid(1), DisconnectReason::HeartbeatTimeout).unwrap();
    assert!(handle.same_pipeline(&again));

    let lost = TypedError::new(ErrorKind::Connection(ConnectionFault::Lost), "socket reset");
    let (outcome, routed) = tokio::join!(handle.outcome(), guard.route_fault(pid(1), lost));

    assert!(matches!(outcome, ReconnectOutcome::GaveUp { attempts: 5, .. }));
    assert!(matches!(routed, Some(RecoveryResult::Failure(_))));
    assert_eq!(link.connection_attempts(), 5);
    let stats = guard.reconnector().stats();
    assert_eq!(stats.started, 1);
    assert_eq!(stats.joined, 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pipeline() {
    let guard = guard();
    let link = link();
    guard.attach(pid(1), link.clone()).unwrap();
    let (timeline, _keep) = record(&guard);
    link.drop_connection();
    link.set_default_connect(false);

    let handle = guard.handle_disconnect(pid(1), DisconnectReason::NetworkError).unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    guard.shutdown("maintenance").await;

    assert_eq!(handle.outcome().await, ReconnectOutcome::Cancelled { attempts: 2 });
    let attempts = link.connection_attempts();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(link.connection_attempts(), attempts);
    assert_eq!(guard.connections().current_state(&pid(1)), Some(ConnectionState::Disconnected));
    assert!(!timeline.lock().iter().any(|(_, e)| matches!(e, ReconnectEvent::GivenUp { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_silent_participant_reconnected_responsive_one_untouched() {
    let guard = guard();
    let mut responsive = guard.attach(pid(1), link()).unwrap();
    let silent_link = link();
    guard.attach(pid(2), silent_link.clone()).unwrap();
    guard.start();

    let responder = {
        let guard = guard.clone();
        tokio::spawn(async move {
            while let Some(message) = responsive.outbound.recv().await {
                if let ServerMessage::Heartbeat { sequence, .. } = message {
                    guard.handle_message(pid(1), ClientMessage::HeartbeatAck { sequence });
                }
            }
        })
    };

    tokio::time::sleep(Duration::from_millis(4500)).await;

    assert_eq!(guard.heartbeat().timeout_count(), 1);
    assert_eq!(silent_link.prepare_calls(), 1);
    assert_eq!(guard.reconnector().stats().succeeded, 1);
    let timeouts = guard.router().statistics(ErrorCategory::Timeout).unwrap();
    assert_eq!(timeouts.count, 1);
    assert_eq!(timeouts.recovery_successes, 1);

    let history = guard.connections().history(&pid(1));
    assert!(history.iter().all(|t| t.to != ConnectionState::Reconnecting));
    let states: Vec<_> = guard.connections().history(&pid(2)).iter().map(|t| t.to).collect();
    assert_eq!(
        states,
        vec![ConnectionState::Connected, ConnectionState::Reconnecting, ConnectionState::Connected]
    );

    responder.abort();
    guard.shutdown("test over").await;
}

#[tokio::test]
async fn test_views_never_leak_hidden_cards() {
    let guard = guard();
    guard.attach(pid(1), link()).unwrap();
    guard.attach(pid(2), link()).unwrap();

    let Some(ServerMessage::View(view)) = guard.handle_message(pid(1), ClientMessage::SyncRequest) else {
        panic!("expected a view");
    };
    let wire = ServerMessage::View(view.clone()).to_json().unwrap();
    for hidden in ["Wrath of God", "Ancestral Recall", "Morph"] {
        assert!(!wire.contains(hidden), "{hidden} leaked");
    }
    assert_eq!(view.disclosed_ids(), vec![CardId(1), CardId(5)]);
    assert_eq!(view.zone(&pid(2), ZoneKind::Hand).map(|z| z.count), Some(1));
    assert_eq!(view.zone(&pid(2), ZoneKind::Library).map(|z| z.count), Some(1));
    assert!(view.zone(&pid(2), ZoneKind::Hand).unwrap().cards.is_empty());
}
