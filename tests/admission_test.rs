// Confirms the admission controller's bound on concurrent client
// sessions is enforced over real sockets: a third connection cannot
// complete its request until an admitted connection disconnects.

use kvd::proto::{read_frame, types, write_frame};
use kvd::{Server, ServerConfig};
use tokio::net::TcpStream;
use tokio::time::{sleep, Duration};

fn test_config(port: u16) -> ServerConfig {
    ServerConfig {
        max_clients: 2,
        database_shards: 2,
        user_shards: 1,
        port,
    }
}

async fn spawn_server(port: u16) {
    let server = Server::new(&test_config(port));
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    sleep(Duration::from_millis(50)).await;
}

async fn connect(port: u16) -> TcpStream {
    TcpStream::connect(("127.0.0.1", port)).await.unwrap()
}

#[tokio::test]
async fn a_third_client_is_not_served_until_a_slot_is_released() {
    spawn_server(19501).await;

    let a = connect(19501).await;
    let b = connect(19501).await;

    // The third TCP connection succeeds at the socket layer (the
    // listener always accepts), but the accept loop itself is parked
    // behind admission, so this connection is never handed to a
    // session task until a slot frees up: its requests go unanswered.
    let mut c = connect(19501).await;
    write_frame(&mut c, 1, types::DISCONNECT, &[]).await.unwrap();
    let pending = tokio::time::timeout(Duration::from_millis(150), read_frame(&mut c)).await;
    assert!(pending.is_err(), "third client was served before a slot freed");

    // Free a slot by disconnecting one of the first two sessions.
    drop(a);
    sleep(Duration::from_millis(100)).await;

    let frame = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut c))
        .await
        .expect("third client should be served once a slot frees")
        .unwrap()
        .unwrap();
    assert_eq!(frame.tag, 1);

    drop(b);
}
