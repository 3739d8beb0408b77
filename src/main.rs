//! Relic Session demo
//!
//! Runs a two-seat table through a flaky reconnection, a filtered sync, a
//! rejected peek at a hidden card and a resume, then shuts down.

use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use tracing::info;

use relic_session::{
    config::ResilienceConfig,
    core::{CardId, ParticipantId},
    network::{AuthConfig, ClientMessage, DisconnectReason, ScriptedLink, ServerMessage, Session},
    security::{ActionKeyring, ActionKind, Card, ProposedAction, TableState, ZoneKind},
    telemetry::init_tracing,
    SessionGuard, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let level = if cfg!(feature = "debug-tracing") { "debug" } else { "info" };
    init_tracing(level);

    info!("Relic Session v{}", VERSION);

    let config = if std::env::var("RELIC_DEMO_FAST").is_ok() {
        ResilienceConfig::test_profile()
    } else {
        ResilienceConfig::from_env().context("loading RELIC_* settings")?
    };
    let mut auth = AuthConfig::from_env();
    if !auth.is_configured() {
        auth = AuthConfig::with_secret(hex::encode(rand::random::<[u8; 32]>()));
    }

    let alice = ParticipantId::random();
    let bob = ParticipantId::random();
    let session_id = *uuid::Uuid::new_v4().as_bytes();

    let mut table = TableState::new(&[alice, bob]);
    table.version = 1;
    table.cards.push(Card::new(1, "Llanowar Elves", alice, ZoneKind::Hand));
    table.cards.push(Card::new(2, "Counterspell", bob, ZoneKind::Hand));
    table.cards.push(Card::new(3, "Island", bob, ZoneKind::Battlefield));
    let session = Session::new(session_id, table);

    let guard = SessionGuard::new(session_id, config, auth, ActionKeyring::random());
    guard.start();

    let alice_link = Arc::new(ScriptedLink::connected());
    alice_link.set_session(session.clone());
    let bob_link = Arc::new(ScriptedLink::connected());
    bob_link.set_session(session);

    let alice_seat = guard.attach(alice, alice_link.clone()).context("attaching alice")?;
    guard.attach(bob, bob_link.clone()).context("attaching bob")?;

    // Two failed attempts before the link comes back.
    info!("=== Flaky Reconnection ===");
    alice_link.drop_connection();
    alice_link.script_connects([false, false, true]);
    if let Some(handle) = guard.handle_disconnect(alice, DisconnectReason::NetworkError) {
        let outcome = handle.outcome().await;
        info!(?outcome, "Reconnection finished");
    }

    info!("=== Filtered Sync ===");
    if let Some(ServerMessage::View(view)) = guard.handle_message(alice, ClientMessage::SyncRequest) {
        info!(disclosed = ?view.disclosed_ids(), "Alice sees");
    }

    info!("=== Peek Attempt ===");
    let peek = ProposedAction::new(1, alice, ActionKind::PlayCard)
        .with_source(CardId(1))
        .with_target(CardId(2))
        .at_version(1)
        .sign(&alice_seat.action_key);
    if let Some(reply) = guard.handle_message(alice, ClientMessage::Action(peek)) {
        info!(reply = %reply.to_json()?, "Action answered");
    }

    info!("=== Leave and Resume ===");
    guard.handle_message(bob, ClientMessage::Leave);
    if let Some(token) = alice_seat.resume_token.clone() {
        let result = guard.resume(&alice, &token);
        info!(success = result.success, "Alice resumed (already connected)");
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    for (category, stats) in guard.router().statistics_snapshot() {
        info!(category = %category, count = stats.count, highest = %stats.highest_severity, "Error statistics");
    }
    info!(stats = ?guard.reconnector().stats(), "Reconnection statistics");

    guard.shutdown("demo complete").await;
    Ok(())
}
