use crate::config::SerialConfig;
use crate::logging::{self, Logger};
use crate::support::{Error, Result};
use crate::transport::{
    push_bounded, Inbound, Transport, CONNECT_RETRY_PAUSE, RECEIVE_POLL, SEND_QUEUE_SIZE,
    WORKER_START_TIMEOUT,
};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use serialport::{ClearBuffer, SerialPort};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How many quiet polls in a row end the comm-clear drain.
const CLEAR_QUIET_POLLS: u32 = 2;
/// Pause between comm-clear polls, long enough for a controller mid-frame
/// to finish transmitting.
const CLEAR_POLL_PAUSE: Duration = Duration::from_millis(100);

/// DF1 over a directly attached serial port. A single worker thread owns
/// the port handle.
pub struct SerialTransport {
    config: SerialConfig,
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
    config: SerialConfig,
    timeout: Duration,
    run: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    clearing: Arc<AtomicBool>,
    send_rx: Receiver<Vec<u8>>,
    inbound_tx: Sender<Inbound>,
    log: Logger,
}

impl SerialTransport {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(
        config: SerialConfig,
        timeout: Duration,
        log: L,
    ) -> SerialTransport {
        let (send_tx, send_rx) = bounded(SEND_QUEUE_SIZE);
        let (inbound_tx, inbound_rx) = unbounded();

        SerialTransport {
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
            config: self.config.clone(),
            timeout: self.timeout,
            run: self.run.clone(),
            connected: self.connected.clone(),
            clearing: self.clearing.clone(),
            send_rx: self.send_rx.clone(),
            inbound_tx: self.inbound_tx.clone(),
            log: self.log.new(logging::o!("worker" => "serial")),
        }
    }
}

impl Transport for SerialTransport {
    fn connect(&mut self) -> Result<()> {
        if self.worker.is_some() {
            // Already running; report the current link state.
            return if self.is_connected() {
                Ok(())
            } else {
                Err(Error::NotConnected)
            };
        }

        logging::info!(self.log, "opening port";
                       "port" => %self.config.port,
                       "baudrate" => self.config.baudrate);

        self.run.store(true, Ordering::Relaxed);

        let (started_tx, started_rx) = bounded(1);
        let ctx = self.worker_ctx();

        let worker = thread::Builder::new()
            .name("df1-serial-worker".to_string())
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

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(ctx: WorkerCtx, started: Sender<bool>) {
    let mut started = Some(started);

    while ctx.run.load(Ordering::Relaxed) {
        match open_port(&ctx) {
            Ok(mut port) => {
                ctx.connected.store(true, Ordering::Relaxed);
                if let Some(tx) = started.take() {
                    tx.send(true).ok();
                }

                logging::info!(ctx.log, "port opened");

                clear_comm(&ctx, port.as_mut());
                run_session(&ctx, port.as_mut());

                ctx.connected.store(false, Ordering::Relaxed);
            }
            Err(err) => {
                logging::warn!(ctx.log, "open attempt failed"; "error" => %err);
                if let Some(tx) = started.take() {
                    tx.send(false).ok();
                }
                thread::sleep(CONNECT_RETRY_PAUSE);
            }
        }
    }
}

fn open_port(ctx: &WorkerCtx) -> serialport::Result<Box<dyn SerialPort>> {
    serialport::new(ctx.config.port.clone(), ctx.config.baudrate)
        .parity(ctx.config.parity)
        .stop_bits(ctx.config.stopbits)
        .data_bits(ctx.config.bytesize)
        .timeout(ctx.timeout)
        .open()
}

/// Discards whatever the controller is still transmitting from a previous
/// session: flush driver buffers, then read until the line stays quiet.
fn clear_comm(ctx: &WorkerCtx, port: &mut dyn SerialPort) {
    ctx.clearing.store(true, Ordering::Relaxed);
    logging::debug!(ctx.log, "clearing stale communication");

    port.clear(ClearBuffer::All).ok();

    let mut quiet = 0;
    while quiet < CLEAR_QUIET_POLLS {
        thread::sleep(CLEAR_POLL_PAUSE);

        match port.bytes_to_read() {
            Ok(0) | Err(_) => quiet += 1,
            Ok(count) => {
                quiet = 0;
                let mut stale = vec![0u8; count as usize];
                port.read(&mut stale).ok();
            }
        }
    }

    while ctx.send_rx.try_recv().is_ok() {}

    ctx.clearing.store(false, Ordering::Relaxed);
    logging::debug!(ctx.log, "comm clear finished");
    ctx.inbound_tx.send(Inbound::CommCleared).ok();
}

fn run_session(ctx: &WorkerCtx, port: &mut dyn SerialPort) {
    while ctx.run.load(Ordering::Relaxed) {
        if let Ok(buffer) = ctx.send_rx.try_recv() {
            if let Err(err) = port.write_all(&buffer).and_then(|_| port.flush()) {
                logging::warn!(ctx.log, "send failed"; "error" => %err);
                ctx.inbound_tx.send(Inbound::Disconnected).ok();
                return;
            }
        }

        match port.bytes_to_read() {
            Ok(0) => thread::sleep(RECEIVE_POLL),
            Ok(count) => {
                let mut chunk = vec![0u8; count as usize];
                match port.read(&mut chunk) {
                    Ok(read) if read > 0 => {
                        chunk.truncate(read);
                        ctx.inbound_tx.send(Inbound::Bytes(chunk)).ok();
                    }
                    Ok(_) => (),
                    Err(err) => {
                        logging::warn!(ctx.log, "receive failed"; "error" => %err);
                        ctx.inbound_tx.send(Inbound::Disconnected).ok();
                        return;
                    }
                }
            }
            Err(err) => {
                logging::warn!(ctx.log, "port unavailable"; "error" => %err);
                ctx.inbound_tx.send(Inbound::Disconnected).ok();
                return;
            }
        }
    }
}
