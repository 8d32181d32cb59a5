//! End-to-end tests against a server listening on a loopback port.

use smpp_server::datatypes::{BindRequest, BindResponse, CommandId, CommandStatus};
use smpp_server::{AuditConfig, Connection, Encodable, Pdu, PduCodec, Server, ServerConfig, ServerHandle};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep, timeout};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Budget for tests that first have to fill the socket buffers.
const FLOOD_TIMEOUT: Duration = Duration::from_secs(20);

fn audit_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("smpp-server-it-{}-{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn local_config() -> ServerConfig {
    ServerConfig::default().with_bind_address("127.0.0.1:0".parse().unwrap())
}

async fn start(name: &str, config: ServerConfig) -> (ServerHandle, PathBuf) {
    let dir = audit_dir(name);
    let server = Server::start(config, AuditConfig::new(&dir)).await.unwrap();
    (server, dir)
}

async fn connect(server: &ServerHandle) -> Connection {
    let stream = TcpStream::connect(server.local_addr()).await.unwrap();
    Connection::new(stream)
}

async fn send(conn: &mut Connection, pdu: &Pdu) -> bytes::Bytes {
    let encoded = conn.write_pdu(pdu).await.unwrap();
    conn.flush().await.unwrap();
    encoded
}

async fn recv(conn: &mut Connection) -> Pdu {
    let (_, pdu) = timeout(READ_TIMEOUT, conn.read_frame())
        .await
        .expect("timed out waiting for a response")
        .unwrap()
        .expect("connection closed");
    pdu
}

/// True once the server has closed its end of the socket.
async fn is_closed(conn: &mut Connection) -> bool {
    match timeout(READ_TIMEOUT, conn.read_frame()).await {
        Ok(Ok(None)) | Ok(Err(_)) => true,
        Ok(Ok(Some(_))) | Err(_) => false,
    }
}

async fn eventually(server: &ServerHandle, condition: impl Fn(&smpp_server::CountersSnapshot) -> bool) {
    eventually_within(server, READ_TIMEOUT, condition).await;
}

async fn eventually_within(
    server: &ServerHandle,
    within: Duration,
    condition: impl Fn(&smpp_server::CountersSnapshot) -> bool,
) {
    let deadline = Instant::now() + within;
    while !condition(&server.counters()) {
        assert!(Instant::now() < deadline, "condition not reached: {}", server.counters());
        sleep(Duration::from_millis(10)).await;
    }
}

fn bind_transceiver(seq: u32, system_id: &str) -> Pdu {
    Pdu::new(
        CommandId::BindTransceiver,
        seq,
        BindRequest::new(system_id, "").to_bytes().unwrap(),
    )
}

#[tokio::test]
async fn bind_then_enquire_link() {
    let (server, _) = start("bind-enquire", local_config().with_system_id("SMSC")).await;
    let mut conn = connect(&server).await;

    send(&mut conn, &bind_transceiver(1, "test")).await;
    let response = recv(&mut conn).await;
    assert_eq!(response.command_id, CommandId::BindTransceiverResp);
    assert_eq!(response.command_status, CommandStatus::Ok);
    assert_eq!(response.sequence_number, 1);
    assert_eq!(BindResponse::decode(&response.body).unwrap().system_id, "SMSC");

    send(&mut conn, &Pdu::request(CommandId::EnquireLink, 2)).await;
    let response = recv(&mut conn).await;
    assert_eq!(response.command_id, CommandId::EnquireLinkResp);
    assert_eq!(response.command_status, CommandStatus::Ok);
    assert_eq!(response.sequence_number, 2);

    let counters = server.shutdown().await.unwrap();
    assert_eq!(counters.binds_succeeded, 1);
    assert_eq!(counters.pdus_received, 2);
    assert_eq!(counters.pdus_sent, 2);
}

#[tokio::test]
async fn submit_before_bind_is_rejected_and_session_survives() {
    let (server, _) = start("reject-before-bind", local_config()).await;
    let mut conn = connect(&server).await;

    send(&mut conn, &Pdu::request(CommandId::SubmitSm, 5)).await;
    let response = recv(&mut conn).await;
    assert_eq!(response.command_id, CommandId::SubmitSmResp);
    assert_eq!(response.command_status, CommandStatus::IncorrectBindStatus);
    assert_eq!(response.sequence_number, 5);

    send(&mut conn, &bind_transceiver(6, "late")).await;
    let response = recv(&mut conn).await;
    assert_eq!(response.command_status, CommandStatus::Ok);
    assert_eq!(response.sequence_number, 6);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn unbind_closes_after_response() {
    let (server, _) = start("unbind", local_config()).await;
    let mut conn = connect(&server).await;

    send(&mut conn, &bind_transceiver(1, "test")).await;
    recv(&mut conn).await;

    send(&mut conn, &Pdu::request(CommandId::Unbind, 9)).await;
    let response = recv(&mut conn).await;
    assert_eq!(response.command_id, CommandId::UnbindResp);
    assert_eq!(response.command_status, CommandStatus::Ok);
    assert_eq!(response.sequence_number, 9);

    assert!(is_closed(&mut conn).await);
    eventually(&server, |c| c.sessions_destroyed == 1).await;

    let counters = server.shutdown().await.unwrap();
    assert_eq!(counters.active_sessions, 0);
}

#[tokio::test]
async fn pipelined_requests_are_answered_in_order() {
    let (server, _) = start("pipelined", local_config()).await;
    let mut conn = connect(&server).await;

    conn.write_pdu(&bind_transceiver(1, "test")).await.unwrap();
    for seq in 2..=10 {
        conn.write_pdu(&Pdu::request(CommandId::EnquireLink, seq)).await.unwrap();
    }
    conn.flush().await.unwrap();

    for seq in 1..=10 {
        assert_eq!(recv(&mut conn).await.sequence_number, seq);
    }

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_command_gets_generic_nack() {
    let (server, _) = start("generic-nack", local_config()).await;
    let mut conn = connect(&server).await;

    send(&mut conn, &bind_transceiver(1, "test")).await;
    recv(&mut conn).await;

    send(&mut conn, &Pdu::request(CommandId::Other(0x0000_0099), 44)).await;
    let response = recv(&mut conn).await;
    assert_eq!(response.command_id, CommandId::GenericNack);
    assert_eq!(response.command_status, CommandStatus::InvalidCommandId);
    assert_eq!(response.sequence_number, 44);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn audit_logs_hold_raw_frames_in_order() {
    let (server, dir) = start("audit-order", local_config()).await;
    let mut conn = connect(&server).await;

    let mut received = Vec::new();
    let mut sent = Vec::new();

    let requests = [
        bind_transceiver(1, "audited"),
        Pdu::request(CommandId::EnquireLink, 2),
        Pdu::new(CommandId::SubmitSm, 3, bytes::Bytes::from_static(b"\x00\x01\x01opaque")),
        Pdu::request(CommandId::Unbind, 4),
    ];
    for request in &requests {
        received.extend_from_slice(&send(&mut conn, request).await);
        let (raw, _) = timeout(READ_TIMEOUT, conn.read_frame()).await.unwrap().unwrap().unwrap();
        sent.extend_from_slice(&raw);
    }
    assert!(is_closed(&mut conn).await);

    let counters = server.shutdown().await.unwrap();
    assert_eq!(counters.audit_records_written, 8);
    assert_eq!(counters.audit_overruns, 0);

    let config = AuditConfig::new(&dir);
    assert_eq!(std::fs::read(config.received_path()).unwrap(), received);
    assert_eq!(std::fs::read(config.sent_path()).unwrap(), sent);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn bogus_length_prefix_closes_connection() {
    let (server, _) = start("malformed", local_config().with_max_frame_size(1024)).await;

    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    stream.write_all(&0x00FF_FFFFu32.to_be_bytes()).await.unwrap();
    stream.flush().await.unwrap();
    let mut conn = Connection::new(stream);

    assert!(is_closed(&mut conn).await);
    eventually(&server, |c| c.malformed_frames == 1 && c.active_sessions == 0).await;

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn idle_session_is_closed() {
    let config = local_config().with_idle_timeout(Duration::from_millis(200));
    let (server, _) = start("idle", config).await;
    let mut conn = connect(&server).await;

    send(&mut conn, &bind_transceiver(1, "sleepy")).await;
    recv(&mut conn).await;

    let started = Instant::now();
    assert!(is_closed(&mut conn).await);
    assert!(started.elapsed() >= Duration::from_millis(150));
    eventually(&server, |c| c.idle_timeouts == 1).await;

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn enquire_link_keeps_session_alive() {
    let config = local_config().with_idle_timeout(Duration::from_millis(300));
    let (server, _) = start("keepalive", config).await;
    let mut conn = connect(&server).await;

    send(&mut conn, &bind_transceiver(1, "busy")).await;
    recv(&mut conn).await;

    for seq in 2..8 {
        sleep(Duration::from_millis(100)).await;
        send(&mut conn, &Pdu::request(CommandId::EnquireLink, seq)).await;
        assert_eq!(recv(&mut conn).await.sequence_number, seq);
    }
    assert_eq!(server.counters().idle_timeouts, 0);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn connections_over_the_limit_are_refused() {
    let (server, _) = start("limit", local_config().with_max_sessions(1)).await;

    let mut first = connect(&server).await;
    send(&mut first, &bind_transceiver(1, "first")).await;
    assert_eq!(recv(&mut first).await.command_status, CommandStatus::Ok);

    let mut second = connect(&server).await;
    assert!(is_closed(&mut second).await);
    eventually(&server, |c| c.sessions_rejected == 1).await;

    // The first session is unaffected.
    send(&mut first, &Pdu::request(CommandId::EnquireLink, 2)).await;
    assert_eq!(recv(&mut first).await.sequence_number, 2);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_live_sessions() {
    let (server, _) = start("shutdown", local_config()).await;
    let mut conn = connect(&server).await;

    send(&mut conn, &bind_transceiver(1, "test")).await;
    recv(&mut conn).await;

    let counters = server.shutdown().await.unwrap();
    assert_eq!(counters.sessions_created, 1);
    assert_eq!(counters.sessions_destroyed, 1);
    assert_eq!(counters.active_sessions, 0);
    assert!(is_closed(&mut conn).await);
}

/// Bind and then write enquire_links forever without reading a single
/// response. The read half is returned so the socket stays open.
async fn flood_without_reading(server: &ServerHandle) -> (OwnedReadHalf, JoinHandle<()>) {
    let socket = TcpSocket::new_v4().unwrap();
    socket.set_recv_buffer_size(4096).unwrap();
    let stream = socket.connect(server.local_addr()).await.unwrap();
    let (reader, mut writer) = stream.into_split();

    let codec = PduCodec::default();
    let bind = codec.encode_to_bytes(&bind_transceiver(1, "deaf")).unwrap();
    writer.write_all(&bind).await.unwrap();

    let mut batch = Vec::new();
    for seq in 2..4098 {
        let enquire_link = codec.encode_to_bytes(&Pdu::request(CommandId::EnquireLink, seq)).unwrap();
        batch.extend_from_slice(&enquire_link);
    }

    // 64 KiB per batch, capped at 64 MiB in case the server never pushes back.
    let flood = tokio::spawn(async move {
        for _ in 0..1024 {
            if writer.write_all(&batch).await.is_err() {
                break;
            }
        }
    });
    (reader, flood)
}

/// Wait until the server has stopped taking requests off the socket.
async fn wait_for_stall(server: &ServerHandle) {
    let deadline = Instant::now() + FLOOD_TIMEOUT;
    let mut last = server.counters().pdus_received;
    loop {
        sleep(Duration::from_millis(250)).await;
        let received = server.counters().pdus_received;
        if received > 1 && received == last {
            return;
        }
        assert!(Instant::now() < deadline, "server never stalled: {}", server.counters());
        last = received;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_that_never_reads_is_closed_after_write_timeout() {
    let config = local_config()
        .with_idle_timeout(Duration::from_millis(500))
        .with_write_timeout(Duration::from_millis(500));
    let (server, dir) = start("not-reading", config).await;
    let (_reader, flood) = flood_without_reading(&server).await;

    eventually_within(&server, FLOOD_TIMEOUT, |c| c.write_timeouts == 1 && c.active_sessions == 0).await;
    assert_eq!(server.counters().idle_timeouts, 0);
    flood.abort();

    let counters = timeout(READ_TIMEOUT, server.shutdown())
        .await
        .expect("shutdown hung")
        .unwrap();
    assert_eq!(counters.sessions_destroyed, 1);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_is_not_held_up_by_a_stalled_write() {
    let config = local_config().with_write_timeout(Duration::from_secs(60));
    let (server, dir) = start("stalled-shutdown", config).await;
    let (_reader, flood) = flood_without_reading(&server).await;

    wait_for_stall(&server).await;
    assert_eq!(server.counters().active_sessions, 1);

    let counters = timeout(READ_TIMEOUT, server.shutdown())
        .await
        .expect("shutdown hung")
        .unwrap();
    assert_eq!(counters.active_sessions, 0);
    assert_eq!(counters.write_timeouts, 0);
    flood.abort();

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn saturated_audit_queue_does_not_delay_responses() {
    const BURST: u32 = 500;

    let dir = audit_dir("audit-saturated");
    let audit = AuditConfig::new(&dir).with_queue_capacity(1);
    let server = Server::start(local_config(), audit).await.unwrap();

    let codec = PduCodec::default();
    let mut burst = codec.encode_to_bytes(&bind_transceiver(1, "burst")).unwrap().to_vec();
    for seq in 2..=BURST {
        let enquire_link = codec.encode_to_bytes(&Pdu::request(CommandId::EnquireLink, seq)).unwrap();
        burst.extend_from_slice(&enquire_link);
    }

    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    stream.write_all(&burst).await.unwrap();
    let mut conn = Connection::new(stream);

    let started = Instant::now();
    assert_eq!(recv(&mut conn).await.command_status, CommandStatus::Ok);
    for seq in 2..=BURST {
        let response = recv(&mut conn).await;
        assert_eq!(response.command_id, CommandId::EnquireLinkResp);
        assert_eq!(response.sequence_number, seq);
    }
    assert!(started.elapsed() < READ_TIMEOUT);

    let counters = server.shutdown().await.unwrap();
    assert!(counters.audit_overruns > 0, "{counters}");
    assert_eq!(
        counters.audit_records_written + counters.audit_overruns,
        2 * u64::from(BURST)
    );
    assert_eq!(counters.audit_write_failures, 0);

    let _ = std::fs::remove_dir_all(dir);
}

async fn run_client(server_addr: std::net::SocketAddr, id: usize, enquires: u32) {
    let stream = TcpStream::connect(server_addr).await.unwrap();
    let mut conn = Connection::new(stream);

    send(&mut conn, &bind_transceiver(1, &format!("esme{id}"))).await;
    assert_eq!(recv(&mut conn).await.command_status, CommandStatus::Ok);

    for seq in 2..2 + enquires {
        send(&mut conn, &Pdu::request(CommandId::EnquireLink, seq)).await;
        assert_eq!(recv(&mut conn).await.sequence_number, seq);
    }

    send(&mut conn, &Pdu::request(CommandId::Unbind, 2 + enquires)).await;
    assert_eq!(recv(&mut conn).await.command_id, CommandId::UnbindResp);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_concurrent_sessions() {
    let (server, _) = start("concurrent", local_config()).await;
    let addr = server.local_addr();

    let clients: Vec<_> = (0..200).map(|id| tokio::spawn(run_client(addr, id, 5))).collect();
    for client in clients {
        client.await.unwrap();
    }

    eventually(&server, |c| c.active_sessions == 0).await;
    let counters = server.shutdown().await.unwrap();
    assert_eq!(counters.sessions_created, 200);
    assert_eq!(counters.binds_succeeded, 200);
    assert_eq!(counters.pdus_received, 200 * 7);
    assert_eq!(counters.protocol_violations, 0);
}

/// Needs a raised open-file limit (`ulimit -n 25000`).
#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn ten_thousand_sessions() {
    let (server, _) = start("ten-thousand", local_config()).await;
    let addr = server.local_addr();

    let mut idle = Vec::with_capacity(10_000);
    for _ in 0..10_000 {
        let stream = TcpStream::connect(addr).await.unwrap();
        idle.push(Connection::new(stream));
    }
    eventually(&server, |c| c.active_sessions == 10_000).await;

    for (id, conn) in idle.iter_mut().enumerate() {
        conn.write_pdu(&bind_transceiver(1, &format!("esme{id}"))).await.unwrap();
        conn.write_pdu(&Pdu::request(CommandId::EnquireLink, 2)).await.unwrap();
        conn.flush().await.unwrap();
    }
    for conn in idle.iter_mut() {
        assert_eq!(recv(conn).await.sequence_number, 1);
        assert_eq!(recv(conn).await.sequence_number, 2);
    }

    // Keep every session alive with an enquire_link per second, first ticks
    // spread over one interval.
    let keepalives: Vec<_> = idle
        .into_iter()
        .enumerate()
        .map(|(id, mut conn)| {
            tokio::spawn(async move {
                sleep(Duration::from_micros(id as u64 * 100)).await;
                let mut ticker = interval(Duration::from_secs(1));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                for seq in 3..6 {
                    ticker.tick().await;
                    send(&mut conn, &Pdu::request(CommandId::EnquireLink, seq)).await;
                    assert_eq!(recv(&mut conn).await.sequence_number, seq);
                }
                conn
            })
        })
        .collect();

    let mut open = Vec::with_capacity(keepalives.len());
    for keepalive in keepalives {
        open.push(keepalive.await.unwrap());
    }
    assert_eq!(server.counters().active_sessions, 10_000);

    let counters = server.shutdown().await.unwrap();
    assert_eq!(counters.sessions_created, 10_000);
    assert_eq!(counters.binds_succeeded, 10_000);
    assert_eq!(counters.pdus_received, 10_000 * 5);
}
