use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use inkmesh_core::ReplicatedDocument;
use inkmesh_core::sync::{ClientMessage, ServerMessage, decode_payload};
use inkmesh_server::{RelayState, router};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(Arc::new(RelayState::default()));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/ws")
}

async fn connect(url: &str) -> Client {
    let (client, _) = connect_async(url).await.unwrap();
    client
}

async fn send(client: &mut Client, message: &ClientMessage) {
    let json = message.to_json().unwrap();
    client.send(Message::text(json)).await.unwrap();
}

async fn recv(client: &mut Client) -> ServerMessage {
    loop {
        let frame = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for the relay")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn join(client: &mut Client, room: &str) -> ServerMessage {
    send(
        client,
        &ClientMessage::Join {
            room: room.to_string(),
        },
    )
    .await;
    recv(client).await
}

#[tokio::test]
async fn test_room_lifecycle_over_websocket() {
    let url = start().await;
    let mut alice = connect(&url).await;
    assert!(matches!(
        join(&mut alice, "board").await,
        ServerMessage::Joined { peer_count: 1, snapshot: None, .. }
    ));

    let mut doc = ReplicatedDocument::new();
    doc.ensure_default_layer().unwrap();
    send(&mut alice, &ClientMessage::sync(&doc.export_snapshot().unwrap())).await;

    // Frames are handled in order, so this reply means the sync landed.
    alice.send(Message::text("garbage")).await.unwrap();
    assert!(matches!(recv(&mut alice).await, ServerMessage::Error { .. }));

    let mut bob = connect(&url).await;
    let ServerMessage::Joined {
        peer_count,
        snapshot: Some(snapshot),
        ..
    } = join(&mut bob, "board").await
    else {
        panic!("late joiner should receive the room state");
    };
    assert_eq!(peer_count, 2);
    let replica = ReplicatedDocument::from_snapshot(&decode_payload(&snapshot).unwrap()).unwrap();
    assert_eq!(replica.layer_count(), 1);

    let ServerMessage::PeerJoined { peer_id: bob_id } = recv(&mut alice).await else {
        panic!("expected peer_joined");
    };

    send(
        &mut bob,
        &ClientMessage::Awareness {
            peer_id: 7,
            state: Default::default(),
        },
    )
    .await;
    match recv(&mut alice).await {
        ServerMessage::Awareness { from, peer_id, .. } => {
            assert_eq!(from, bob_id);
            assert_eq!(peer_id, 7);
        }
        other => panic!("expected awareness, got {other:?}"),
    }

    bob.close(None).await.unwrap();
    assert_eq!(
        recv(&mut alice).await,
        ServerMessage::PeerLeft { peer_id: bob_id }
    );
}
