//! End-to-end relay tests: a real broker between test clients and a fake
//! upstream service.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use framerelay::{
    metrics::Metrics, protocol::Direction, relay::SessionRegistry, Broker, BrokerHandle, Config,
    Frame, FrameClient, FrameCodec,
};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct TestBroker {
    addr: SocketAddr,
    handle: BrokerHandle,
    registry: Arc<SessionRegistry>,
    metrics: Arc<Metrics>,
    task: JoinHandle<framerelay::Result<()>>,
}

async fn start_broker(target_port: u16, max_frame_length: u32) -> TestBroker {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.server.shutdown_timeout = Duration::from_secs(3);
    config.upstream.target_port = target_port;
    config.upstream.connect_timeout = Duration::from_secs(2);
    config.limits.max_frame_length = max_frame_length;

    let metrics = Arc::new(Metrics::new());
    let mut broker = Broker::new(Arc::new(config), metrics.clone());
    let addr = broker.bind().await.unwrap();
    let handle = broker.handle();
    let registry = broker.registry().clone();
    let task = tokio::spawn(async move { broker.start().await });

    TestBroker {
        addr,
        handle,
        registry,
        metrics,
        task,
    }
}

/// Upstream that answers `ping` with `pong` and echoes every other frame
async fn start_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let codec = FrameCodec::default();
                while let Ok(frame) = codec.read_frame(&mut stream).await {
                    let reply = if frame.frame_type == 0x0001 && &frame.payload[..] == b"ping" {
                        Frame::new(1, 0x0002, &b"pong"[..])
                    } else {
                        frame
                    };
                    if codec
                        .write_frame(&mut stream, reply.version, reply.frame_type, &reply.payload)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });
        }
    });

    addr
}

enum Observed {
    Frame(Frame),
    Eof,
}

/// Upstream that reports every frame it receives, plus EOF, and first writes
/// `greeting` frames of its own
async fn start_recording_upstream(greeting: Vec<Frame>) -> (SocketAddr, mpsc::UnboundedReceiver<Observed>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let codec = FrameCodec::default();
        for frame in &greeting {
            codec
                .write_frame(&mut stream, frame.version, frame.frame_type, &frame.payload)
                .await
                .unwrap();
        }
        loop {
            match codec.read_frame(&mut stream).await {
                Ok(frame) => {
                    let _ = tx.send(Observed::Frame(frame));
                }
                Err(_) => {
                    let _ = tx.send(Observed::Eof);
                    break;
                }
            }
        }
    });

    (addr, rx)
}

async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

async fn expect_closed(stream: &mut TcpStream) {
    let result = timeout(WAIT, FrameCodec::default().read_frame(stream))
        .await
        .expect("socket should be closed by the relay");
    assert!(result.is_err(), "expected close, got {:?}", result);
}

/// Small deterministic generator for frame sizes and contents
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }
}

#[tokio::test]
async fn test_ping_pong_through_relay() {
    let upstream = start_echo_upstream().await;
    let broker = start_broker(upstream.port(), 16 * 1024 * 1024).await;
    let codec = FrameCodec::default();

    let mut client = TcpStream::connect(broker.addr).await.unwrap();
    codec.write_frame(&mut client, 1, 0x0001, b"ping").await.unwrap();
    let reply = timeout(WAIT, codec.read_frame(&mut client)).await.unwrap().unwrap();

    assert_eq!(reply, Frame::new(1, 0x0002, &b"pong"[..]));

    let sessions = broker.registry.snapshot();
    assert_eq!(sessions.len(), 1);
    let local = client.local_addr().unwrap();
    assert_eq!(sessions[0].client_id, format!("{}_{}", local.ip(), local.port()));
}

#[tokio::test]
async fn test_frames_arrive_upstream_identical_and_in_order() {
    let (upstream, mut observed) = start_recording_upstream(Vec::new()).await;
    let broker = start_broker(upstream.port(), 16 * 1024 * 1024).await;
    let codec = FrameCodec::default();

    let sent = vec![
        Frame::new(1, 0x0001, &b"first"[..]),
        Frame::new(1, 0x0003, Bytes::new()),
        Frame::new(7, 0xFFFF, vec![0xAB; 70_000]),
        Frame::new(0, 0x0000, &b"last"[..]),
    ];

    let mut client = TcpStream::connect(broker.addr).await.unwrap();
    for frame in &sent {
        codec
            .write_frame(&mut client, frame.version, frame.frame_type, &frame.payload)
            .await
            .unwrap();
    }

    for expected in &sent {
        match timeout(WAIT, observed.recv()).await.unwrap() {
            Some(Observed::Frame(frame)) => assert_eq!(&frame, expected),
            _ => panic!("upstream stream ended early"),
        }
    }
}

#[tokio::test]
async fn test_directions_are_independent() {
    let greeting = vec![
        Frame::new(1, 0x0010, &b"s1"[..]),
        Frame::new(1, 0x0011, &b"s2"[..]),
        Frame::new(1, 0x0012, &b"s3"[..]),
    ];
    let (upstream, mut observed) = start_recording_upstream(greeting.clone()).await;
    let broker = start_broker(upstream.port(), 16 * 1024 * 1024).await;
    let codec = FrameCodec::default();

    let mut client = TcpStream::connect(broker.addr).await.unwrap();
    let requests = vec![
        Frame::new(1, 0x0020, &b"c1"[..]),
        Frame::new(1, 0x0021, &b"c2"[..]),
        Frame::new(1, 0x0022, &b"c3"[..]),
    ];
    for frame in &requests {
        codec
            .write_frame(&mut client, frame.version, frame.frame_type, &frame.payload)
            .await
            .unwrap();
    }

    for expected in &greeting {
        let frame = timeout(WAIT, codec.read_frame(&mut client)).await.unwrap().unwrap();
        assert_eq!(&frame, expected);
    }
    for expected in &requests {
        match timeout(WAIT, observed.recv()).await.unwrap() {
            Some(Observed::Frame(frame)) => assert_eq!(&frame, expected),
            _ => panic!("upstream stream ended early"),
        }
    }

    assert!(
        eventually(|| {
            let stats = broker.registry.snapshot();
            stats.len() == 1 && stats[0].frames_up == 3 && stats[0].frames_down == 3
        })
        .await
    );
}

#[tokio::test]
async fn test_downstream_close_tears_down_upstream() {
    let (upstream, mut observed) = start_recording_upstream(Vec::new()).await;
    let broker = start_broker(upstream.port(), 16 * 1024 * 1024).await;
    let codec = FrameCodec::default();

    let mut client = TcpStream::connect(broker.addr).await.unwrap();
    codec.write_frame(&mut client, 1, 0x0001, b"hello").await.unwrap();
    assert!(matches!(
        timeout(WAIT, observed.recv()).await.unwrap(),
        Some(Observed::Frame(_))
    ));
    assert_eq!(broker.registry.len(), 1);

    drop(client);

    assert!(matches!(
        timeout(WAIT, observed.recv()).await.unwrap(),
        Some(Observed::Eof)
    ));
    assert!(eventually(|| broker.registry.is_empty()).await);
    assert!(eventually(|| broker.metrics.active_sessions() == 0).await);
    assert_eq!(broker.metrics.total_sessions(), 1);
}

#[tokio::test]
async fn test_concurrent_sessions_keep_separate_totals() {
    let upstream = start_echo_upstream().await;
    let broker = start_broker(upstream.port(), 16 * 1024 * 1024).await;

    let mut workers = Vec::new();
    for seed in [0x9E37_79B9_7F4A_7C15u64, 0xD1B5_4A32_D192_ED03] {
        let addr = broker.addr;
        workers.push(tokio::spawn(async move {
            let codec = FrameCodec::default();
            let mut rng = XorShift(seed);
            let mut client = TcpStream::connect(addr).await.unwrap();
            let local = client.local_addr().unwrap();
            let mut wire_total = 0u64;

            for i in 0..100u16 {
                let len = (rng.next() % (64 * 1024 + 1)) as usize;
                let fill = rng.next() as u8;
                let payload = vec![fill; len];
                let frame_type = 0x0100 + i;

                codec.write_frame(&mut client, 1, frame_type, &payload).await.unwrap();
                let echoed = timeout(WAIT, codec.read_frame(&mut client)).await.unwrap().unwrap();
                assert_eq!(echoed.frame_type, frame_type);
                assert_eq!(&echoed.payload[..], &payload[..]);
                wire_total += 8 + len as u64;
            }
            (client, local, wire_total)
        }));
    }

    let mut results = Vec::new();
    for worker in workers {
        results.push(worker.await.unwrap());
    }

    for (_, local, wire_total) in &results {
        let client_id = format!("{}_{}", local.ip(), local.port());
        let matched = eventually(|| {
            broker.registry.snapshot().iter().any(|s| {
                s.client_id == client_id
                    && s.bytes_up == *wire_total
                    && s.bytes_down == *wire_total
                    && s.request_count == 100
            })
        })
        .await;
        assert!(matched, "session {} totals did not match", client_id);
    }

    let combined: u64 = results.iter().map(|(_, _, total)| total).sum();
    assert!(
        eventually(|| {
            broker.metrics.bytes_forwarded(Direction::ClientToServer) == combined
                && broker.metrics.bytes_forwarded(Direction::ServerToClient) == combined
        })
        .await
    );
    assert_eq!(broker.metrics.frames_forwarded(Direction::ClientToServer), 200);
}

#[tokio::test]
async fn test_oversized_frame_ends_session() {
    let (upstream, mut observed) = start_recording_upstream(Vec::new()).await;
    let broker = start_broker(upstream.port(), 1024).await;

    let mut client = TcpStream::connect(broker.addr).await.unwrap();
    // Header only: declares 1 MiB against a 1 KiB limit
    let header = framerelay::FrameHeader::new(1, 0x0001, 1024 * 1024).encode();
    client.write_all(&header).await.unwrap();

    expect_closed(&mut client).await;
    assert!(matches!(
        timeout(WAIT, observed.recv()).await.unwrap(),
        Some(Observed::Eof)
    ));
    assert!(eventually(|| broker.registry.is_empty()).await);
}

#[tokio::test]
async fn test_unreachable_upstream_closes_downstream() {
    let closed_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let broker = start_broker(closed_port, 16 * 1024 * 1024).await;

    let mut client = TcpStream::connect(broker.addr).await.unwrap();
    expect_closed(&mut client).await;

    assert!(eventually(|| broker.metrics.dial_failures() == 1).await);
    assert!(broker.registry.is_empty());
    assert_eq!(broker.metrics.total_sessions(), 0);
}

#[tokio::test]
async fn test_shutdown_closes_sessions_and_stops_accepting() {
    let upstream = start_echo_upstream().await;
    let broker = start_broker(upstream.port(), 16 * 1024 * 1024).await;
    let codec = FrameCodec::default();

    let mut client = TcpStream::connect(broker.addr).await.unwrap();
    codec.write_frame(&mut client, 1, 0x0001, b"ping").await.unwrap();
    timeout(WAIT, codec.read_frame(&mut client)).await.unwrap().unwrap();
    assert_eq!(broker.registry.len(), 1);

    broker.handle.shutdown().await.unwrap();

    assert!(broker.registry.is_empty());
    assert!(!broker.registry.is_accepting());
    expect_closed(&mut client).await;

    timeout(WAIT, broker.task).await.unwrap().unwrap().unwrap();

    // Listener is gone: either refused outright or closed without service
    if let Ok(mut late) = TcpStream::connect(broker.addr).await {
        expect_closed(&mut late).await;
    }
}

#[tokio::test]
async fn test_frame_client_through_relay() {
    let upstream = start_echo_upstream().await;
    let broker = start_broker(upstream.port(), 16 * 1024 * 1024).await;

    let mut client = FrameClient::new("127.0.0.1", broker.addr.port());
    client.connect().await.unwrap();

    for _ in 0..3 {
        let (frame_type, payload) = client.send_request(0x0001, b"ping").await.unwrap();
        assert_eq!(frame_type, 0x0002);
        assert_eq!(&payload[..], b"pong");
    }
    let (frame_type, payload) = client.send_request(0x0042, b"").await.unwrap();
    assert_eq!(frame_type, 0x0042);
    assert!(payload.is_empty());
    assert_eq!(client.request_count(), 4);

    client.disconnect().await;
    assert!(eventually(|| broker.registry.is_empty()).await);
}
