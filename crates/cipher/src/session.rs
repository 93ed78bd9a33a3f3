use crate::error::CipherResult;
use crate::proto::{caesar_transform, Header, HEADER_SIZE};
use libc::c_int;
use reactor::socket::{read_nonblocking_eof_aware, write_nonblocking};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ReadingHeader,
    ReadingPayload,
    Writing,
}

/// What the reactor loop should do with this connection's epoll
/// registration after a read/write round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Keep waiting on the same interest set.
    Continue,
    /// Switch interest to EPOLLOUT — a full message has been transformed.
    ReadyToWrite,
    /// Reply fully flushed; switch back to EPOLLIN for the next message.
    ReadyForNextMessage,
    /// Peer closed or a protocol violation occurred; tear the connection down.
    Close,
}

pub struct Session {
    pub fd: c_int,
    phase: Phase,
    header_buf: [u8; HEADER_SIZE],
    header_filled: usize,
    header: Option<Header>,
    payload: Vec<u8>,
    payload_filled: usize,
    write_buf: Vec<u8>,
    write_pos: usize,
    pub requests_served: u32,
}

impl Default for Session {
    /// Placeholder slot for the slab's backing array; never dispatched
    /// against directly since the slab only hands out occupied slots.
    fn default() -> Self {
        Session::new(-1)
    }
}

impl Session {
    pub fn new(fd: c_int) -> Self {
        Self {
            fd,
            phase: Phase::ReadingHeader,
            header_buf: [0; HEADER_SIZE],
            header_filled: 0,
            header: None,
            payload: Vec::new(),
            payload_filled: 0,
            write_buf: Vec::new(),
            write_pos: 0,
            requests_served: 0,
        }
    }

    fn reset_for_next_message(&mut self) {
        self.phase = Phase::ReadingHeader;
        self.header_filled = 0;
        self.header = None;
        self.payload_filled = 0;
        self.write_pos = 0;
        self.write_buf.clear();
        self.requests_served += 1;
    }

    /// Drain readable data until WouldBlock, advancing the header/payload
    /// state machine. Returns `Progress::ReadyToWrite` once a full message
    /// has been received and transformed.
    pub fn drive_read(&mut self) -> CipherResult<Progress> {
        loop {
            match self.phase {
                Phase::ReadingHeader => {
                    let remaining = &mut self.header_buf[self.header_filled..];
                    match read_nonblocking_eof_aware(self.fd, remaining)? {
                        None => return Ok(Progress::Continue),
                        Some(0) => return Ok(Progress::Close),
                        Some(n) => {
                            self.header_filled += n;
                            if self.header_filled < HEADER_SIZE {
                                continue;
                            }
                            let header = Header::parse(&self.header_buf)?;
                            self.payload = vec![0u8; header.payload_len()];
                            self.header = Some(header);
                            self.phase = Phase::ReadingPayload;
                        }
                    }
                }
                Phase::ReadingPayload => {
                    let remaining = &mut self.payload[self.payload_filled..];
                    if remaining.is_empty() {
                        self.finish_payload();
                        return Ok(Progress::ReadyToWrite);
                    }
                    match read_nonblocking_eof_aware(self.fd, remaining)? {
                        None => return Ok(Progress::Continue),
                        Some(0) => return Ok(Progress::Close),
                        Some(n) => {
                            self.payload_filled += n;
                            if self.payload_filled == self.payload.len() {
                                self.finish_payload();
                                return Ok(Progress::ReadyToWrite);
                            }
                        }
                    }
                }
                Phase::Writing => return Ok(Progress::Continue),
            }
        }
    }

    fn finish_payload(&mut self) {
        let header = self.header.expect("payload only fills once header is parsed");
        caesar_transform(header.op, header.shift, &mut self.payload);
        self.write_buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        self.write_buf.extend_from_slice(&header.to_bytes());
        self.write_buf.extend_from_slice(&self.payload);
        self.write_pos = 0;
        self.phase = Phase::Writing;
    }

    /// Drain writable capacity until WouldBlock or the reply is fully sent.
    pub fn drive_write(&mut self) -> CipherResult<Progress> {
        while self.write_pos < self.write_buf.len() {
            let n = write_nonblocking(self.fd, &self.write_buf[self.write_pos..])?;
            if n == 0 {
                return Ok(Progress::Continue);
            }
            self.write_pos += n;
        }
        self.reset_for_next_message();
        Ok(Progress::ReadyForNextMessage)
    }
}
