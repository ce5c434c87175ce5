//! Two peers chatting through an in-process room.
//!
//! Runs the full stack (manager, channel, presence, transport) with the
//! in-memory pair transport, so there is nothing to deploy: run it and
//! watch the join, the host election, and a short exchange.

use std::time::Duration;

use peerlink::prelude::*;
use peerlink::transport::MemoryNetwork;
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), PeerlinkError> {
    peerlink::init_logging();

    let network = MemoryNetwork::new();

    let alice = RoomManager::new(network.clone())
        .with_peer_id("alice")
        .with_metadata(json!({ "name": "Alice" }));
    let bob = RoomManager::new(network)
        .with_peer_id("bob")
        .with_metadata(json!({ "name": "Bob" }));

    for manager in [&alice, &bob] {
        let me = manager.peer_id().clone();
        let chat_me = me.clone();
        manager.on("chat", move |n| {
            let me = &chat_me;
            let from = n.peer.as_ref().map(|p| p.0.as_str()).unwrap_or("?");
            println!(
                "[{me}] {from} says: {}",
                n.data.get("text").and_then(|t| t.as_str()).unwrap_or("")
            );
        });
        manager.set_hooks(
            PresenceHooks::new()
                .on_peer_joined({
                    let me = me.clone();
                    move |room, peer, _| {
                        println!("[{me}] {peer} joined {room}");
                    }
                })
                .on_host_changed(move |room, host, is_local| {
                    let host =
                        host.map(|h| h.0.as_str()).unwrap_or("nobody");
                    let marker = if is_local { " (that's me)" } else { "" };
                    println!("[{me}] host of {room} is now {host}{marker}");
                }),
        );
    }

    // The pair transport links two dials into the same room, so both
    // joins have to be in flight at once.
    let (a, b) = tokio::join!(alice.join_room("lobby"), bob.join_room("lobby"));
    a?;
    b?;

    // Let the join exchange and the election settle.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let lobby = RoomId::from("lobby");
    alice
        .emit(&lobby, "chat", json!({ "text": "hi bob!" }))
        .await;
    bob.emit(&lobby, "chat", json!({ "text": "hey alice" }))
        .await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    for (who, manager) in [("alice", &alice), ("bob", &bob)] {
        for (room, status) in manager.status().await {
            println!(
                "[{who}] {room}: {} peers, host {:?}",
                status.peer_count, status.host_id
            );
        }
    }

    alice.leave_all_rooms().await;
    bob.leave_all_rooms().await;
    Ok(())
}
