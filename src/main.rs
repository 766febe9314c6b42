//! call-demo: zwei Clients im selben Prozess
//!
//! alice ruft bob an, bob nimmt an, nach ein paar Sekunden legt alice auf.
//! Danach werden Anrufprotokoll und Chat-Verlauf ausgegeben.
//!
//! Mit `CALL_DEMO_PERSIST=1` landet das Protokoll in der Datenbank im
//! App-Datenverzeichnis statt im Speicher.

use anyhow::{bail, Context, Result};
use peer_call::database::Profile;
use peer_call::media::{WebRtcConfig, WebRtcMediaAdapter};
use peer_call::{CallConfig, CallEngine, CallEvent, CallState, Collaborators, Database, LocalBus};
use std::sync::Arc;
use std::time::Duration;

const ALICE: &str = "alice";
const BOB: &str = "bob";

#[tokio::main]
async fn main() -> Result<()> {
    peer_call::init_tracing();

    let config = CallConfig::from_env();
    tracing::info!("Starting call demo ({:?})", config);

    let database = Arc::new(open_database()?);
    database.set_all_offline()?;
    for (id, name) in [(ALICE, "Alice"), (BOB, "Bob")] {
        database.upsert_profile(&Profile::new(id, name))?;
        database.set_online_status(id, true)?;
    }

    // Kein Mitschnitt der Frames, die Demo inspiziert den Bus nicht
    let bus = LocalBus::with_history_limit(0);
    let alice = start_client(ALICE, &config, &bus, &database).await?;
    let bob = start_client(BOB, &config, &bus, &database).await?;

    // bob nimmt jeden eingehenden Anruf an
    let mut bob_events = bob.subscribe();
    let bob_handle = bob.clone();
    let answering = tokio::spawn(async move {
        while let Ok(event) = bob_events.recv().await {
            match event {
                CallEvent::IncomingCall {
                    peer_id, profile, ..
                } => {
                    let name = profile.map(|p| p.display_name).unwrap_or(peer_id);
                    tracing::info!("bob: incoming call from {}", name);
                    if let Err(e) = bob_handle.accept_call().await {
                        tracing::error!("bob: failed to accept: {}", e);
                    }
                }
                CallEvent::CallEnded { status, .. } => {
                    tracing::info!("bob: call ended ({:?})", status);
                    break;
                }
                _ => {}
            }
        }
    });

    let call_id = alice.start_call(BOB, None).await?;
    tracing::info!("alice: calling bob (call {})", call_id);

    wait_for_state(&alice, CallState::Active, Duration::from_secs(10)).await?;
    tracing::info!("alice: connected");

    tokio::time::sleep(Duration::from_secs(3)).await;
    alice.end_call().await?;
    let _ = tokio::time::timeout(Duration::from_secs(5), answering).await;

    println!("Call history of {ALICE}:");
    for call in database.calls_for_user(ALICE)? {
        println!(
            "  #{} {} -> {} {} {} ({}s)",
            call.id,
            call.caller_id,
            call.receiver_id,
            call.call_type,
            call.status,
            call.duration_secs().unwrap_or(0)
        );
    }
    println!("Chat {ALICE} <-> {BOB}:");
    for message in database.chat_history(ALICE, BOB)? {
        println!("  [{}] {}: {}", message.timestamp, message.sender_id, message.content);
    }

    alice.shutdown().await;
    bob.shutdown().await;
    database.set_all_offline()?;
    Ok(())
}

fn open_database() -> Result<Database> {
    let persist = std::env::var("CALL_DEMO_PERSIST")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if persist {
        tracing::info!("Using database at {:?}", Database::database_path()?);
        Database::open().context("failed to open database")
    } else {
        Database::open_in_memory().context("failed to open in-memory database")
    }
}

async fn start_client(
    id: &str,
    config: &CallConfig,
    bus: &LocalBus,
    database: &Arc<Database>,
) -> Result<CallEngine> {
    let collaborators = Collaborators {
        transport: Arc::new(bus.clone()),
        media: Arc::new(WebRtcMediaAdapter::new(WebRtcConfig::local())),
        call_log: database.clone(),
        profiles: database.clone(),
    };
    CallEngine::start(id, config.clone(), collaborators)
        .await
        .with_context(|| format!("failed to start engine for {id}"))
}

async fn wait_for_state(engine: &CallEngine, state: CallState, limit: Duration) -> Result<()> {
    let mut events = engine.subscribe();
    let reached = tokio::time::timeout(limit, async {
        while engine.state() != state {
            match events.recv().await {
                Ok(CallEvent::CallEnded { reason, .. }) => return Err(reason),
                Ok(_) => {}
                Err(_) => return Ok(()),
            }
        }
        Ok(())
    })
    .await;

    match reached {
        Ok(Ok(())) if engine.state() == state => Ok(()),
        Ok(Err(reason)) => bail!("call ended early: {:?}", reason),
        _ => bail!("{} did not reach {:?}", engine.self_id(), state),
    }
}
