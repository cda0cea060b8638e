//! Close semantics, timeouts, raw pipes, identifier uniqueness.

use manifold::{
    Connector, ManifoldError, Pipe, PipeEvent, PipeEventHandler, ReceiverOptions, Socket,
    SocketOptions, MSG_FLAG_RAW,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[compio::test]
async fn recv_timeout_surfaces() {
    let server = Socket::with_options(
        SocketOptions::default()
            .with_receiver(ReceiverOptions::default().with_recv_timeout(Duration::from_millis(50))),
    );
    server.listen("inproc://quiet").await.unwrap();

    assert!(matches!(
        server.recv_msg().await,
        Err(ManifoldError::Timeout)
    ));
    server.close().unwrap();
}

#[compio::test]
async fn close_is_idempotent_and_terminal() {
    let server = Socket::new();
    server.listen("inproc://idem").await.unwrap();

    let connector = Connector::new();
    let dialer = connector.new_dialer("inproc://idem").unwrap();
    dialer.dial().await.unwrap();
    dialer.close();
    dialer.close();

    assert!(connector.close().is_ok());
    assert!(matches!(connector.close(), Err(ManifoldError::Closed)));

    assert!(server.close().is_ok());
    assert!(matches!(server.close(), Err(ManifoldError::Closed)));

    // A closed socket refuses further work.
    assert!(matches!(
        server.listen("inproc://idem-again").await,
        Err(ManifoldError::Closed)
    ));
    assert!(matches!(
        server.recv_msg().await,
        Err(ManifoldError::Closed)
    ));
}

/// User hook that records every admitted pipe.
#[derive(Default)]
struct PipeLog {
    pipes: Mutex<Vec<Arc<Pipe>>>,
}

impl PipeEventHandler for PipeLog {
    fn handle_pipe_event(&self, event: PipeEvent, pipe: &Arc<Pipe>) {
        if event == PipeEvent::Add {
            self.pipes.lock().unwrap().push(pipe.clone());
        }
    }
}

#[compio::test]
async fn pipes_report_their_origin() {
    let server = Socket::new();
    server.listen("inproc://origin").await.unwrap();
    let server_log = Arc::new(PipeLog::default());
    server
        .connector()
        .register_pipe_event_handler(server_log.clone());

    let client = Socket::new();
    let client_log = Arc::new(PipeLog::default());
    client
        .connector()
        .register_pipe_event_handler(client_log.clone());
    client.dial("inproc://origin").await.unwrap();

    // Let the accept loop admit the server-side pipe.
    compio::time::sleep(Duration::from_millis(50)).await;

    let accepted = server_log.pipes.lock().unwrap().clone();
    assert_eq!(accepted.len(), 1);
    assert!(accepted[0].is_listener_origin());
    assert!(!accepted[0].is_dialer_origin());

    let dialed = client_log.pipes.lock().unwrap().clone();
    assert_eq!(dialed.len(), 1);
    assert!(dialed[0].is_dialer_origin());
    assert!(!dialed[0].is_listener_origin());

    client.close().unwrap();
    server.close().unwrap();
}

#[compio::test]
async fn concurrent_pipes_get_distinct_ids() {
    let server = Socket::new();
    server.listen("inproc://distinct").await.unwrap();

    let one = Socket::new();
    one.dial("inproc://distinct").await.unwrap();
    let two = Socket::new();
    two.dial("inproc://distinct").await.unwrap();

    one.send(&b"from one"[..]).await.unwrap();
    two.send(&b"from two"[..]).await.unwrap();

    let first = server.recv_msg().await.unwrap();
    let second = server.recv_msg().await.unwrap();
    let first_pipe = first.pipe_id().unwrap();
    let second_pipe = second.pipe_id().unwrap();
    assert_ne!(first_pipe, 0);
    assert_ne!(second_pipe, 0);
    assert_ne!(first_pipe, second_pipe);

    for socket in [one, two, server] {
        socket.close().unwrap();
    }
}

#[compio::test]
async fn raw_pipes_announce_wrap_and_signal_eof() {
    let server = Socket::new();
    server.listen("inproc://rawline?rawmode=true").await.unwrap();

    let client = Socket::new();
    client.dial("inproc://rawline?rawmode=true").await.unwrap();

    // The raw peer announces itself with an empty message first.
    let announce = server.recv_msg().await.unwrap();
    assert!(announce.header.has_flags(MSG_FLAG_RAW));
    assert_eq!(announce.content(), b"");
    assert!(!announce.is_stream_end());
    assert_eq!(announce.header.hops, 1);
    let pipe = announce.pipe_id().unwrap();

    client.send(&b"raw bytes"[..]).await.unwrap();
    let msg = server.recv_msg().await.unwrap();
    assert!(msg.header.has_flags(MSG_FLAG_RAW));
    assert_eq!(msg.content(), b"raw bytes");
    assert_eq!(msg.source().ids().collect::<Vec<_>>(), vec![pipe]);
    assert_eq!(msg.header.distance, 0);

    // Hanging up yields the end-of-stream sentinel.
    client.close().unwrap();
    let eof = server.recv_msg().await.unwrap();
    assert!(eof.is_stream_end());
    assert_eq!(eof.pipe_id(), Some(pipe));

    server.close().unwrap();
}

#[compio::test]
async fn no_recv_discards_everything() {
    let server = Socket::with_options(
        SocketOptions::default().with_receiver(
            ReceiverOptions::default()
                .with_no_recv(true)
                .with_recv_timeout(Duration::from_millis(100)),
        ),
    );
    server.listen("inproc://blackhole").await.unwrap();

    let client = Socket::new();
    client.dial("inproc://blackhole").await.unwrap();
    for _ in 0..5 {
        client.send(&b"into the void"[..]).await.unwrap();
    }

    assert!(matches!(
        server.recv_msg().await,
        Err(ManifoldError::Timeout)
    ));

    client.close().unwrap();
    server.close().unwrap();
}

#[compio::test]
async fn oversized_content_closes_the_pipe() {
    let server = Socket::with_options(
        SocketOptions::default().with_receiver(
            ReceiverOptions::default()
                .with_max_recv_content_length(8)
                .with_recv_timeout(Duration::from_millis(200)),
        ),
    );
    server.listen("inproc://strict").await.unwrap();

    let client = Socket::new();
    // No redial: the point is to watch the offending pipe disappear.
    client.dial("inproc://strict?reconnect=false").await.unwrap();
    client
        .send(&b"this content is much too long"[..])
        .await
        .unwrap();

    // The offending frame never arrives and the pipe is gone.
    assert!(matches!(
        server.recv_msg().await,
        Err(ManifoldError::Timeout)
    ));
    assert_eq!(server.connector().pipe_count(), 0);

    client.close().unwrap();
    server.close().unwrap();
}
