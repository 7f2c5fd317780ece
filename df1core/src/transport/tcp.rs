use crate::config::TcpConfig;
use crate::logging::{self, Logger};
use crate::support::{Error, Result};
use crate::transport::{
    push_bounded, Inbound, Transport, CONNECT_RETRY_PAUSE, READ_CHUNK_SIZE, RECEIVE_POLL,
    SEND_QUEUE_SIZE, WORKER_START_TIMEOUT,
};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use socket2::{Socket, TcpKeepalive};
use std::io::{self, Read, Write};
use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const READ_TOKEN: Token = Token(0);

/// DF1 over a TCP byte pipe, typically an Ethernet-to-serial gateway in
/// front of the controller. A single worker thread owns the socket.
pub struct TcpTransport {
    config: TcpConfig,
    timeout: Duration,
    run: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    clearing: Arc<AtomicBool>,
    send_tx: Sender<Vec<u8>>,
    send_rx: Receiver<Vec<u8>>,
    inbound_tx: Sender<Inbound>,
    inbound_rx: Receiver<Inbound>,
    worker: Option<thread::JoinHandle<()>>,
    log: Logger,
}

struct WorkerCtx {
    address: String,
    port: u16,
    timeout: Duration,
    run: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    clearing: Arc<AtomicBool>,
    send_rx: Receiver<Vec<u8>>,
    inbound_tx: Sender<Inbound>,
    log: Logger,
}

struct Session {
    stream: TcpStream,
    poll: Poll,
    events: Events,
}

impl TcpTransport {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(
        config: TcpConfig,
        timeout: Duration,
        log: L,
    ) -> TcpTransport {
        let (send_tx, send_rx) = bounded(SEND_QUEUE_SIZE);
        let (inbound_tx, inbound_rx) = unbounded();

        TcpTransport {
            config,
            timeout,
            run: Arc::new(AtomicBool::new(false)),
            connected: Arc::new(AtomicBool::new(false)),
            clearing: Arc::new(AtomicBool::new(false)),
            send_tx,
            send_rx,
            inbound_tx,
            inbound_rx,
            worker: None,
            log: logging::child(log),
        }
    }

    fn worker_ctx(&self) -> WorkerCtx {
        WorkerCtx {
            address: self.config.ip_address.clone(),
            port: self.config.ip_port,
            timeout: self.timeout,
            run: self.run.clone(),
            connected: self.connected.clone(),
            clearing: self.clearing.clone(),
            send_rx: self.send_rx.clone(),
            inbound_tx: self.inbound_tx.clone(),
            log: self.log.new(logging::o!("worker" => "tcp")),
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> Result<()> {
        if self.worker.is_some() {
            // Already running; report the current link state.
            return if self.is_connected() {
                Ok(())
            } else {
                Err(Error::NotConnected)
            };
        }

        logging::info!(self.log, "connecting";
                       "address" => %self.config.ip_address,
                       "port" => self.config.ip_port);

        self.run.store(true, Ordering::Relaxed);

        let (started_tx, started_rx) = bounded(1);
        let ctx = self.worker_ctx();

        let worker = thread::Builder::new()
            .name("df1-tcp-worker".to_string())
            .spawn(move || worker_loop(ctx, started_tx))
            .map_err(|_| Error::Thread)?;
        self.worker = Some(worker);

        match started_rx.recv_timeout(self.timeout + WORKER_START_TIMEOUT) {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::NotConnected),
            Err(_) => Err(Error::Thread),
        }
    }

    fn close(&mut self) {
        self.run.store(false, Ordering::Relaxed);

        if let Some(worker) = self.worker.take() {
            worker.join().ok();
        }

        self.connected.store(false, Ordering::Relaxed);
        logging::debug!(self.log, "transport closed");
    }

    #[inline]
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    #[inline]
    fn is_clearing_comm(&self) -> bool {
        self.clearing.load(Ordering::Relaxed)
    }

    #[inline]
    fn is_pending_command(&self) -> bool {
        !self.send_tx.is_empty()
    }

    fn send_bytes(&self, bytes: Vec<u8>) -> Result<()> {
        push_bounded(&self.send_tx, bytes)
    }

    fn clear_buffer(&self) {
        while self.send_rx.try_recv().is_ok() {}
    }

    #[inline]
    fn inbound(&self) -> &Receiver<Inbound> {
        &self.inbound_rx
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(ctx: WorkerCtx, started: Sender<bool>) {
    let mut started = Some(started);

    while ctx.run.load(Ordering::Relaxed) {
        match open_session(&ctx) {
            Ok(mut session) => {
                ctx.connected.store(true, Ordering::Relaxed);
                if let Some(tx) = started.take() {
                    tx.send(true).ok();
                }

                logging::info!(ctx.log, "connected");

                if clear_comm(&ctx, &mut session) {
                    run_session(&ctx, &mut session);
                }

                ctx.connected.store(false, Ordering::Relaxed);
            }
            Err(err) => {
                logging::warn!(ctx.log, "connection attempt failed"; "error" => %err);
                if let Some(tx) = started.take() {
                    tx.send(false).ok();
                }
                thread::sleep(CONNECT_RETRY_PAUSE);
            }
        }
    }
}

fn open_session(ctx: &WorkerCtx) -> io::Result<Session> {
    let address = (ctx.address.as_str(), ctx.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable))?;

    let stream = std::net::TcpStream::connect_timeout(&address, ctx.timeout)?;

    // Gateways sit on flaky plant networks; fail fast after three missed
    // keepalive probes instead of the OS default.
    let socket = Socket::from(stream);
    socket.set_nodelay(true)?;
    socket.set_tcp_keepalive(&TcpKeepalive::new().with_retries(3))?;

    let stream: std::net::TcpStream = socket.into();
    stream.set_nonblocking(true)?;

    let mut stream = TcpStream::from_std(stream);
    let poll = Poll::new()?;
    poll.registry()
        .register(&mut stream, READ_TOKEN, Interest::READABLE)?;

    Ok(Session {
        stream,
        poll,
        events: Events::with_capacity(8),
    })
}

/// Drains whatever the peer still has in flight from a previous session.
/// Returns false when the peer disconnected mid-drain.
fn clear_comm(ctx: &WorkerCtx, session: &mut Session) -> bool {
    ctx.clearing.store(true, Ordering::Relaxed);
    logging::debug!(ctx.log, "clearing stale communication");

    let mut chunk = [0u8; READ_CHUNK_SIZE];
    let alive = loop {
        if session
            .poll
            .poll(&mut session.events, Some(ctx.timeout))
            .is_err()
        {
            break false;
        }

        if session.events.is_empty() {
            // One full quiet window: the line is clean.
            break true;
        }

        match drain_ready(session, &mut chunk, |_| ()) {
            DrainOutcome::Open => (),
            DrainOutcome::Closed => break false,
        }
    };

    while ctx.send_rx.try_recv().is_ok() {}

    ctx.clearing.store(false, Ordering::Relaxed);

    if alive {
        logging::debug!(ctx.log, "comm clear finished");
        ctx.inbound_tx.send(Inbound::CommCleared).ok();
    } else {
        ctx.inbound_tx.send(Inbound::Disconnected).ok();
    }

    alive
}

fn run_session(ctx: &WorkerCtx, session: &mut Session) {
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    while ctx.run.load(Ordering::Relaxed) {
        if let Ok(buffer) = ctx.send_rx.try_recv() {
            if let Err(err) = write_all(&mut session.stream, &buffer) {
                logging::warn!(ctx.log, "send failed"; "error" => %err);
                ctx.inbound_tx.send(Inbound::Disconnected).ok();
                return;
            }
        }

        if session
            .poll
            .poll(&mut session.events, Some(RECEIVE_POLL))
            .is_err()
        {
            ctx.inbound_tx.send(Inbound::Disconnected).ok();
            return;
        }

        if session.events.is_empty() {
            continue;
        }

        let inbound_tx = &ctx.inbound_tx;
        match drain_ready(session, &mut chunk, |bytes| {
            inbound_tx.send(Inbound::Bytes(bytes.to_vec())).ok();
        }) {
            DrainOutcome::Open => (),
            DrainOutcome::Closed => {
                logging::info!(ctx.log, "peer disconnected");
                ctx.inbound_tx.send(Inbound::Disconnected).ok();
                return;
            }
        }
    }
}

enum DrainOutcome {
    Open,
    Closed,
}

/// Reads until the socket would block, handing each chunk to `sink`. A
/// zero-length read means the peer closed the stream.
fn drain_ready<F: FnMut(&[u8])>(
    session: &mut Session,
    chunk: &mut [u8],
    mut sink: F,
) -> DrainOutcome {
    loop {
        match session.stream.read(chunk) {
            Ok(0) => return DrainOutcome::Closed,
            Ok(count) => sink(&chunk[..count]),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return DrainOutcome::Open,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => (),
            Err(_) => return DrainOutcome::Closed,
        }
    }
}

fn write_all(stream: &mut TcpStream, mut buffer: &[u8]) -> io::Result<()> {
    while !buffer.is_empty() {
        match stream.write(buffer) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(count) => buffer = &buffer[count..],
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(1))
            }
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => (),
            Err(err) => return Err(err),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn transport_for(port: u16) -> TcpTransport {
        let config = TcpConfig {
            ip_address: "127.0.0.1".to_string(),
            ip_port: port,
        };
        TcpTransport::new(config, Duration::from_millis(200), None)
    }

    #[test]
    fn test_send_queue_overflow_without_connection() {
        let transport = transport_for(1);

        for i in 0..SEND_QUEUE_SIZE {
            transport.send_bytes(vec![i as u8]).unwrap();
        }
        assert_eq!(
            transport.send_bytes(vec![0xff]),
            Err(Error::SendQueueOverflow)
        );

        transport.clear_buffer();
        transport.send_bytes(vec![0xff]).unwrap();
        assert!(transport.is_pending_command());
    }

    #[test]
    fn test_connect_refused() {
        // Port 9 is discard; nothing listens on it in the test environment.
        let mut transport = transport_for(9);

        assert_eq!(transport.connect(), Err(Error::NotConnected));
        transport.close();
    }

    #[test]
    fn test_roundtrip_against_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let echo = thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            let mut buffer = [0u8; 16];
            let count = peer.read(&mut buffer).unwrap();
            peer.write_all(&buffer[..count]).unwrap();
            // Hold the socket open until the client is done reading.
            thread::sleep(Duration::from_millis(300));
        });

        let mut transport = transport_for(port);
        transport.connect().unwrap();
        assert!(transport.is_connected());

        // Wait out the comm-clear phase before exchanging data.
        let inbound = transport.inbound().clone();
        loop {
            match inbound.recv_timeout(Duration::from_secs(2)).unwrap() {
                Inbound::CommCleared => break,
                other => panic!("Unexpected event {:?}", other),
            }
        }

        transport.send_bytes(vec![0x10, 0x05]).unwrap();

        match inbound.recv_timeout(Duration::from_secs(2)).unwrap() {
            Inbound::Bytes(bytes) => assert_eq!(bytes, vec![0x10, 0x05]),
            other => panic!("Unexpected event {:?}", other),
        }

        transport.close();
        echo.join().unwrap();
    }

    #[test]
    fn test_peer_close_signals_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (peer, _) = listener.accept().unwrap();
            drop(peer);
        });

        let mut transport = transport_for(port);
        transport.connect().unwrap();

        let inbound = transport.inbound().clone();
        let mut disconnected = false;
        for _ in 0..4 {
            match inbound.recv_timeout(Duration::from_secs(2)) {
                Ok(Inbound::Disconnected) => {
                    disconnected = true;
                    break;
                }
                Ok(_) => (),
                Err(_) => break,
            }
        }
        assert!(disconnected);

        transport.close();
        server.join().unwrap();
    }
}
