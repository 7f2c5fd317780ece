use crate::config::{ClientConfig, SerialConfig, TcpConfig};
use crate::link::buffer::ReceiveBuffer;
use crate::link::symbol::{DLE_ACK, DLE_ENQ, DLE_NAK};
use crate::logging::{self, Logger};
use crate::pccc::command::{Command, WriteData};
use crate::pccc::file::{self, BitSelect, CounterField, FileType, TimerField};
use crate::pccc::reply::{Reply, TypedData};
use crate::support::{Error, Result};
use crate::transport::serial::SerialTransport;
use crate::transport::tcp::TcpTransport;
use crate::transport::{Inbound, Transport};
use crossbeam_channel::Receiver;
use rand::Rng;
use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

/// One entry of the communication history ring.
#[derive(Debug, Clone, PartialEq)]
pub enum CommEvent {
    /// A frame handed to the transport, in wire form.
    Sent(Vec<u8>),
    /// A parsed inbound frame.
    Received(Reply),
}

/// DF1 transaction engine. Owns the receive buffer, the message sink, the
/// transaction counter and the history ring outright; inbound bytes arrive
/// over the transport's event channel and are processed on the caller
/// thread, so none of this state needs locking.
///
/// One command is in flight at a time: `send_command` serialises on the
/// transport's pending-send and comm-clear states before emitting anything.
pub struct Df1Client<T: Transport> {
    config: ClientConfig,
    transport: T,
    inbound: Receiver<Inbound>,
    receive_buffer: ReceiveBuffer,
    sink: VecDeque<Reply>,
    history: VecDeque<CommEvent>,
    last_tns: u16,
    command_tns: Option<u16>,
    last_response: [u8; 2],
    reconnects: u64,
    messages_dropped: u64,
    read_ok: bool,
    last_data: TypedData,
    log: Logger,
}

pub type Df1TcpClient = Df1Client<TcpTransport>;
pub type Df1SerialClient = Df1Client<SerialTransport>;

impl Df1Client<TcpTransport> {
    /// Client over an Ethernet-to-serial gateway.
    pub fn tcp<'a, L: Into<Option<&'a Logger>>>(
        address: TcpConfig,
        config: ClientConfig,
        log: L,
    ) -> Df1TcpClient {
        let log = logging::child(log);
        let transport = TcpTransport::new(address, config.timeout, &log);
        Df1Client::with_logger(transport, config, log)
    }
}

impl Df1Client<SerialTransport> {
    /// Client over a directly attached serial port.
    pub fn serial<'a, L: Into<Option<&'a Logger>>>(
        line: SerialConfig,
        config: ClientConfig,
        log: L,
    ) -> Df1SerialClient {
        let log = logging::child(log);
        let transport = SerialTransport::new(line, config.timeout, &log);
        Df1Client::with_logger(transport, config, log)
    }
}

impl<T: Transport> Df1Client<T> {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(
        transport: T,
        config: ClientConfig,
        log: L,
    ) -> Df1Client<T> {
        Self::with_logger(transport, config, logging::child(log))
    }

    fn with_logger(transport: T, config: ClientConfig, log: Logger) -> Df1Client<T> {
        let inbound = transport.inbound().clone();

        Df1Client {
            config,
            transport,
            inbound,
            receive_buffer: ReceiveBuffer::new(),
            sink: VecDeque::new(),
            history: VecDeque::new(),
            last_tns: rand::thread_rng().gen::<u16>(),
            command_tns: None,
            last_response: DLE_NAK,
            reconnects: 0,
            messages_dropped: 0,
            read_ok: false,
            last_data: TypedData::Bytes(Vec::new()),
            log,
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        logging::info!(self.log, "connecting to controller";
                       "plc_type" => %self.config.plc_type,
                       "src" => self.config.src,
                       "dst" => self.config.dst);
        self.transport.connect()
    }

    pub fn close(&mut self) {
        self.transport.close();
    }

    /// Same as `close`.
    pub fn disconnect(&mut self) {
        self.close();
    }

    /// Tears the connection down and brings it back up after a pause,
    /// discarding everything queued in either direction.
    pub fn reconnect(&mut self) -> Result<()> {
        self.reconnects += 1;
        logging::info!(self.log, "reconnecting"; "total" => self.reconnects);

        self.transport.clear_buffer();
        self.transport.close();
        thread::sleep(self.config.wait_reconnect);

        self.receive_buffer.clear();
        self.clear_queue();

        self.transport.connect()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    #[inline]
    pub fn is_clear_comm(&self) -> bool {
        self.transport.is_clearing_comm()
    }

    #[inline]
    pub fn is_pending_command(&self) -> bool {
        self.transport.is_pending_command()
    }

    /// Times the connection has been re-established.
    #[inline]
    pub fn reconnect_total(&self) -> u64 {
        self.reconnects
    }

    /// Replies discarded because their transaction number matched nothing
    /// in flight.
    #[inline]
    pub fn messages_dropped_total(&self) -> u64 {
        self.messages_dropped
    }

    /// The last `history_size` frames exchanged, oldest first.
    #[inline]
    pub fn comm_history(&self) -> &VecDeque<CommEvent> {
        &self.history
    }

    /// Whether the most recent read helper produced any values.
    #[inline]
    pub fn read_ok(&self) -> bool {
        self.read_ok
    }

    /// Values produced by the most recent read helper.
    #[inline]
    pub fn data(&self) -> &TypedData {
        &self.last_data
    }

    /// Empties the message sink.
    pub fn clear_queue(&mut self) {
        self.sink.clear();
    }

    #[inline]
    pub fn bit_inspect(&self, word: u16, bit: BitSelect) -> u16 {
        file::bit_inspect(word, bit)
    }
}

/// Command construction. Each builder stamps the configured node addresses
/// and a fresh transaction number.
impl<T: Transport> Df1Client<T> {
    pub fn read_command(
        &mut self,
        bytes_to_read: u8,
        table: u16,
        file_type: FileType,
        start: u16,
        start_sub: u16,
    ) -> Result<Command> {
        let tns = self.new_tns();
        Command::typed_read(
            self.config.src,
            self.config.dst,
            tns,
            bytes_to_read,
            table,
            file_type,
            start,
            start_sub,
        )
    }

    pub fn write_command(
        &mut self,
        table: u16,
        file_type: FileType,
        start: u16,
        start_sub: u16,
        data: &WriteData,
    ) -> Result<Command> {
        let tns = self.new_tns();
        Command::typed_write(
            self.config.src,
            self.config.dst,
            tns,
            table,
            file_type,
            start,
            start_sub,
            data,
        )
    }

    pub fn masked_write_command(
        &mut self,
        table: u16,
        file_type: FileType,
        start: u16,
        start_sub: u16,
        mask: u16,
        data: &WriteData,
    ) -> Result<Command> {
        let tns = self.new_tns();
        Command::typed_write_masked(
            self.config.src,
            self.config.dst,
            tns,
            table,
            file_type,
            start,
            start_sub,
            mask,
            data,
        )
    }

    pub fn echo_command(&mut self, data: &[u8]) -> Command {
        let tns = self.new_tns();
        Command::echo(self.config.src, self.config.dst, tns, data)
    }

    pub fn diagnostic_status_command(
        &mut self,
        bytes_to_read: u8,
        table: u16,
        file_type: FileType,
        start: u16,
        start_sub: u16,
    ) -> Result<Command> {
        let tns = self.new_tns();
        Command::diagnostic_status(
            self.config.src,
            self.config.dst,
            tns,
            bytes_to_read,
            table,
            file_type,
            start,
            start_sub,
        )
    }

    fn new_tns(&mut self) -> u16 {
        self.last_tns = self.last_tns.wrapping_add(1);
        self.last_tns
    }
}

/// The transmitter: delivers one command and obtains its matching data
/// reply, or fails definitively.
impl<T: Transport> Df1Client<T> {
    pub fn send_command(&mut self, command: &mut Command) -> Result<Reply> {
        for attempt in 0..3 {
            self.wait_no_pending_command();
            self.wait_while_com_clear();

            logging::debug!(self.log, "sending command";
                            "cmd" => command.cmd,
                            "fnc" => command.fnc,
                            "tns" => command.tns,
                            "attempt" => attempt);

            let frame_bytes = command.bytes();
            self.push_history(CommEvent::Sent(frame_bytes.clone()));
            self.command_tns = Some(command.tns);
            self.transport.send_bytes(frame_bytes)?;

            let mut retry_send = false;
            let mut got_ack = false;
            let mut i = 0;

            while i < 3 {
                let reply = self.expect_message()?;

                if matches!(reply, Reply::Ack) {
                    got_ack = true;
                    i = 0;
                } else if matches!(reply, Reply::Nak) {
                    // A fresh tns keeps a late reply to the old attempt
                    // from being mistaken for the retry's answer.
                    command.tns = self.new_tns();
                    logging::debug!(self.log, "nak received, retrying"; "tns" => command.tns);
                    retry_send = true;
                    break;
                } else if matches!(reply, Reply::Timeout) || !reply.is_valid() {
                    logging::warn!(self.log, "no usable reply"; "reply" => ?reply, "got_ack" => got_ack);
                    if got_ack {
                        self.send_nak();
                    } else {
                        self.send_enq();
                    }
                    retry_send = true;
                    break;
                } else if got_ack {
                    if reply.tns() == Some(command.tns) {
                        return Ok(reply);
                    }

                    self.messages_dropped += 1;
                    logging::warn!(self.log, "reply dropped, transaction mismatch";
                                   "command_tns" => command.tns,
                                   "reply_tns" => ?reply.tns());
                    got_ack = false;
                    i = 0;
                }

                i += 1;
                if self.config.seq_sleep_time > Duration::from_secs(0) {
                    thread::sleep(self.config.seq_sleep_time);
                }
            }

            if !retry_send {
                self.transport.clear_buffer();
                return Err(Error::SendReceive);
            }
        }

        Err(Error::SendReceive)
    }

    /// Pops the next reply, draining the inbound channel while waiting.
    /// Produces a synthetic `Timeout` when nothing usable arrives within
    /// `timeout_read_msg`.
    fn expect_message(&mut self) -> Result<Reply> {
        let deadline = Instant::now() + self.config.timeout_read_msg;

        loop {
            if let Some(reply) = self.sink.pop_front() {
                return Ok(reply);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Reply::Timeout);
            }

            match self.inbound.recv_timeout(deadline - now) {
                Ok(Inbound::Bytes(bytes)) => self.ingest(&bytes)?,
                Ok(Inbound::Disconnected) => {
                    logging::warn!(self.log, "transport disconnected mid transaction");
                    self.receive_buffer.clear();
                }
                Ok(Inbound::CommCleared) => (),
                Err(_) => return Ok(Reply::Timeout),
            }
        }
    }

    /// Drains any inbound events without blocking. Lets the engine answer
    /// enquiries and acknowledge frames while no transaction is running.
    pub fn process_pending(&mut self) -> Result<()> {
        loop {
            match self.inbound.try_recv() {
                Ok(Inbound::Bytes(bytes)) => self.ingest(&bytes)?,
                Ok(Inbound::Disconnected) => self.receive_buffer.clear(),
                Ok(Inbound::CommCleared) => (),
                Err(_) => return Ok(()),
            }
        }
    }

    fn ingest(&mut self, bytes: &[u8]) -> Result<()> {
        self.receive_buffer.extend(bytes)?;

        let frames: Vec<Vec<u8>> = self.receive_buffer.pop_frames().collect();
        for frame_bytes in frames {
            self.process_frame(&frame_bytes);
        }

        Ok(())
    }

    /// The receiver: reacts to one extracted frame.
    fn process_frame(&mut self, frame_bytes: &[u8]) {
        let reply = match Reply::parse(frame_bytes) {
            Ok(reply) => reply,
            Err(_) => {
                logging::warn!(self.log, "discarding unparseable frame"; "len" => frame_bytes.len());
                return;
            }
        };

        self.push_history(CommEvent::Received(reply.clone()));

        match &reply {
            Reply::Enq => {
                // The peer lost our ack; repeat whichever we sent last.
                let response = self.last_response;
                logging::debug!(self.log, "enquiry received, repeating last response");
                self.send_control(response);
            }
            Reply::Data(data) | Reply::Unknown(data) => {
                let tns = data.tns;

                if data.is_valid() {
                    self.send_ack();
                    if Some(tns) == self.command_tns {
                        self.sink.push_back(reply.clone());
                    } else {
                        self.messages_dropped += 1;
                        logging::warn!(self.log, "stale reply dropped"; "reply_tns" => tns);
                    }
                } else {
                    self.send_nak();
                }
            }
            Reply::Ack | Reply::Nak => {
                self.last_response = DLE_NAK;
                self.sink.push_back(reply.clone());
            }
            Reply::Timeout => (),
        }
    }

    fn send_ack(&mut self) {
        self.last_response = DLE_ACK;
        self.send_control(DLE_ACK);
    }

    fn send_nak(&mut self) {
        self.last_response = DLE_NAK;
        self.send_control(DLE_NAK);
    }

    fn send_enq(&mut self) {
        self.send_control(DLE_ENQ);
    }

    fn send_control(&mut self, symbol_pair: [u8; 2]) {
        self.push_history(CommEvent::Sent(symbol_pair.to_vec()));
        if self.transport.send_bytes(symbol_pair.to_vec()).is_err() {
            logging::warn!(self.log, "send queue full, control frame dropped");
        }
    }

    /// Blocks until the transport finishes draining queued sends, bounded
    /// by the configured timeout.
    fn wait_no_pending_command(&self) {
        let deadline = Instant::now() + self.config.timeout;

        while self.transport.is_pending_command() {
            if Instant::now() >= deadline {
                logging::warn!(self.log, "send queue did not drain in time");
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Holds the transaction back while the transport drains stale bytes,
    /// then discards anything queued in either direction.
    fn wait_while_com_clear(&mut self) {
        if self.transport.is_clearing_comm() {
            let deadline = Instant::now() + self.config.timeout + self.config.timeout;

            while self.transport.is_clearing_comm() {
                let now = Instant::now();
                if now >= deadline {
                    logging::warn!(self.log, "comm clear did not finish in time");
                    break;
                }

                match self.inbound.recv_timeout(deadline - now) {
                    Ok(Inbound::CommCleared) => break,
                    Ok(_) => (),
                    Err(_) => break,
                }
            }
        }

        self.transport.clear_buffer();
        self.clear_queue();
    }

    fn push_history(&mut self, event: CommEvent) {
        while self.history.len() >= self.config.history_size {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }
}

/// Typed read/write helpers over the canonical file tables.
impl<T: Transport> Df1Client<T> {
    /// Reads words from an output file (table 0 on the supported PLCs),
    /// optionally projecting a single bit of each word.
    pub fn read_output(
        &mut self,
        file_table: u16,
        start: u16,
        bit: BitSelect,
        total_int: u8,
    ) -> Result<Vec<u16>> {
        let words = self.word_read(file_table, FileType::OutLogic, start, 0, total_int)?;
        self.finish_word_read(words.iter().map(|&word| bit.project(word)).collect())
    }

    /// Reads words from an input file (table 1).
    pub fn read_input(
        &mut self,
        file_table: u16,
        start: u16,
        bit: BitSelect,
        total_int: u8,
    ) -> Result<Vec<u16>> {
        let words = self.word_read(file_table, FileType::InLogic, start, 0, total_int)?;
        self.finish_word_read(words.iter().map(|&word| bit.project(word)).collect())
    }

    /// Reads words from a binary file (table 3).
    pub fn read_binary(
        &mut self,
        file_table: u16,
        start: u16,
        bit: BitSelect,
        total_int: u8,
    ) -> Result<Vec<u16>> {
        let words = self.word_read(file_table, FileType::Bit, start, 0, total_int)?;
        self.finish_word_read(words.iter().map(|&word| bit.project(word)).collect())
    }

    /// Reads a timer field (table 4): preset, accumulator or status bits.
    pub fn read_timer(
        &mut self,
        file_table: u16,
        start: u16,
        field: TimerField,
        total_int: u8,
    ) -> Result<Vec<u16>> {
        let words = self.word_read(
            file_table,
            FileType::Timer,
            start,
            field.sub_element(),
            total_int,
        )?;
        self.finish_word_read(words.iter().map(|&word| field.project(word)).collect())
    }

    /// Reads a counter field (table 5).
    pub fn read_counter(
        &mut self,
        file_table: u16,
        start: u16,
        field: CounterField,
        total_int: u8,
    ) -> Result<Vec<u16>> {
        let words = self.word_read(
            file_table,
            FileType::Counter,
            start,
            field.sub_element(),
            total_int,
        )?;
        self.finish_word_read(words.iter().map(|&word| field.project(word)).collect())
    }

    /// Reads control registers (table 6).
    pub fn read_register(&mut self, file_table: u16, start: u16, total_int: u8) -> Result<Vec<u16>> {
        let words = self.word_read(file_table, FileType::Control, start, 0, total_int)?;
        self.finish_word_read(words)
    }

    /// Reads integers (table 7).
    pub fn read_integer(&mut self, file_table: u16, start: u16, total_int: u8) -> Result<Vec<u16>> {
        let words = self.word_read(file_table, FileType::Integer, start, 0, total_int)?;
        self.finish_word_read(words)
    }

    /// Reads floats (table 8).
    pub fn read_float(&mut self, file_table: u16, start: u16, total_float: u8) -> Result<Vec<f32>> {
        self.read_ok = false;

        if total_float as usize * 4 > 0xff {
            return Err(Error::NotImplemented("read size above 255 bytes"));
        }

        let mut command = self.read_command(
            total_float * 4,
            file_table,
            FileType::Float,
            start,
            0,
        )?;
        let reply = self.send_command(&mut command)?;

        let values = match reply {
            Reply::Data(ref data) => data.floats()?,
            _ => Vec::new(),
        };

        self.read_ok = !values.is_empty();
        self.last_data = TypedData::Floats(values.clone());
        Ok(values)
    }

    /// Writes whole words to an output file.
    pub fn write_output(&mut self, file_table: u16, start: u16, data: &[u16]) -> Result<bool> {
        self.word_write(file_table, FileType::OutLogic, start, data)
    }

    /// Writes whole words to a binary file.
    pub fn write_binary(&mut self, file_table: u16, start: u16, data: &[u16]) -> Result<bool> {
        self.word_write(file_table, FileType::Bit, start, data)
    }

    /// Writes words to a control register file.
    pub fn write_register(&mut self, file_table: u16, start: u16, data: &[u16]) -> Result<bool> {
        self.word_write(file_table, FileType::Control, start, data)
    }

    /// Writes floats to a float file.
    pub fn write_float(&mut self, file_table: u16, start: u16, data: &[f32]) -> Result<bool> {
        let mut command = self.write_command(
            file_table,
            FileType::Float,
            start,
            0,
            &WriteData::Floats(data.to_vec()),
        )?;
        let reply = self.send_command(&mut command)?;
        Ok(matches!(reply, Reply::Data(_)))
    }

    /// Sets or clears a single bit through a masked write, leaving the
    /// rest of the word untouched.
    pub fn write_single_bit(
        &mut self,
        file_table: u16,
        file_type: FileType,
        start: u16,
        bit: u8,
        value: bool,
    ) -> Result<bool> {
        let tns = self.new_tns();
        let mut command = Command::single_bit_write(
            self.config.src,
            self.config.dst,
            tns,
            file_table,
            file_type,
            start,
            bit,
            value,
        )?;
        let reply = self.send_command(&mut command)?;
        Ok(matches!(reply, Reply::Data(_)))
    }

    fn word_read(
        &mut self,
        table: u16,
        file_type: FileType,
        start: u16,
        start_sub: u16,
        total_words: u8,
    ) -> Result<Vec<u16>> {
        self.read_ok = false;

        if total_words as usize * 2 > 0xff {
            return Err(Error::NotImplemented("read size above 255 bytes"));
        }

        let mut command = self.read_command(total_words * 2, table, file_type, start, start_sub)?;
        let reply = self.send_command(&mut command)?;

        match reply {
            Reply::Data(ref data) => data.words(),
            _ => Ok(Vec::new()),
        }
    }

    fn finish_word_read(&mut self, values: Vec<u16>) -> Result<Vec<u16>> {
        self.read_ok = !values.is_empty();
        self.last_data = TypedData::Words(values.clone());
        Ok(values)
    }

    fn word_write(
        &mut self,
        table: u16,
        file_type: FileType,
        start: u16,
        data: &[u16],
    ) -> Result<bool> {
        let mut command =
            self.write_command(table, file_type, start, 0, &WriteData::Words(data.to_vec()))?;
        let reply = self.send_command(&mut command)?;
        Ok(matches!(reply, Reply::Data(_)))
    }
}

impl<T: Transport> Drop for Df1Client<T> {
    fn drop(&mut self) {
        self.transport.close();
    }
}
