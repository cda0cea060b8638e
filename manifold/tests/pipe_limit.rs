//! Admission control against the pipe limit.

use manifold::{ConnectorOptions, DialerOptions, Socket, SocketOptions};
use std::time::Duration;

#[compio::test]
async fn pipe_limit_caps_open_pipes() {
    let server = Socket::with_options(
        SocketOptions::default().with_connector(ConnectorOptions::default().with_pipe_limit(2)),
    );
    server.listen("inproc://limited").await.unwrap();

    let mut clients = Vec::new();
    for _ in 0..3 {
        let client = Socket::new();
        let dialer = client
            .connector()
            .new_dialer_with(
                "inproc://limited",
                DialerOptions::default()
                    .with_dial_async(true)
                    .with_min_reconnect_interval(Duration::from_millis(10))
                    .with_max_reconnect_interval(Duration::from_millis(50)),
            )
            .unwrap();
        dialer.dial().await.unwrap();
        clients.push((client, dialer));
    }

    compio::time::sleep(Duration::from_millis(500)).await;

    // Never more than the limit; the first two arrivals hold stable pipes
    // while the third keeps getting turned away and backing off.
    assert_eq!(server.connector().pipe_count(), 2);
    assert_eq!(clients[0].0.connector().pipe_count(), 1);
    assert_eq!(clients[1].0.connector().pipe_count(), 1);

    // Freeing a slot lets the waiting dialer in.
    let (first_client, first_dialer) = clients.remove(0);
    first_dialer.close();
    first_client.close().unwrap();
    compio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(server.connector().pipe_count(), 2);
    assert_eq!(clients[0].0.connector().pipe_count(), 1);
    assert_eq!(clients[1].0.connector().pipe_count(), 1);

    for (client, dialer) in &clients {
        dialer.close();
        client.close().unwrap();
    }
    server.close().unwrap();
}
