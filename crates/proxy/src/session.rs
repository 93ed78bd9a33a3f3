use crate::error::ProxyResult;
use crate::proto::{self, ContentType};
use libc::c_int;
use reactor::socket::{read_nonblocking_eof_aware, write_nonblocking};
use std::sync::Arc;

const READ_CHUNK: usize = 8192;

/// Tagged phase discriminator plus two independent open/closed flags,
/// replacing the bitset the original session record used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingRequest,
    ForwardingRequest,
    AwaitingResponse,
    ForwardingResponse,
    Done,
}

/// What the reactor loop should do after a read/write round.
pub enum Outcome {
    Continue,
    /// Client request is fully buffered but malformed; there's no upstream
    /// to open. The 400 reply is already queued in `res_buf`.
    BadRequest,
    /// Ready to connect to the resolved upstream and start forwarding.
    OpenUpstream { host: String, port: u16 },
    /// Request fully relayed to the upstream; switch it to EPOLLIN.
    RequestForwarded,
    /// Response fully buffered from the upstream; switch the client to
    /// EPOLLOUT.
    ResponseReady,
    /// Reply fully flushed to the client; tear the whole session down.
    Done,
    Close,
}

pub struct Session {
    pub client_fd: c_int,
    pub server_fd: Option<c_int>,
    pub client_open: bool,
    pub server_open: bool,
    phase: Phase,

    black_urls: Arc<Vec<String>>,

    req_buf: Vec<u8>,
    req_sent: usize,
    /// Set once a blacklist hit rewrites the outgoing request.
    req_override: Option<Vec<u8>>,

    res_buf: Vec<u8>,
    res_sent: usize,
    header_parsed: bool,
    content_type: ContentType,
    content_length: u32,
    header_length: u32,
}

impl Default for Session {
    fn default() -> Self {
        Session::new(-1, Arc::new(Vec::new()))
    }
}

impl Session {
    pub fn new(client_fd: c_int, black_urls: Arc<Vec<String>>) -> Self {
        Self {
            client_fd,
            server_fd: None,
            client_open: true,
            server_open: false,
            phase: Phase::AwaitingRequest,
            black_urls,
            req_buf: Vec::new(),
            req_sent: 0,
            req_override: None,
            res_buf: Vec::new(),
            res_sent: 0,
            header_parsed: false,
            content_type: ContentType::None,
            content_length: 0,
            header_length: 0,
        }
    }

    fn request_to_send(&self) -> &[u8] {
        self.req_override.as_deref().unwrap_or(&self.req_buf)
    }

    /// Drain the client fd, accumulating the request until `\r\n\r\n`.
    pub fn drive_client_read(&mut self) -> ProxyResult<Outcome> {
        if self.phase != Phase::AwaitingRequest {
            return Ok(Outcome::Continue);
        }
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match read_nonblocking_eof_aware(self.client_fd, &mut chunk)? {
                None => return Ok(Outcome::Continue),
                Some(0) => return Ok(Outcome::Close),
                Some(n) => {
                    self.req_buf.extend_from_slice(&chunk[..n]);
                    if self.req_buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        return Ok(self.finish_request());
                    }
                }
            }
        }
    }

    fn finish_request(&mut self) -> Outcome {
        match proto::parse_request(&self.req_buf, &self.black_urls) {
            None => {
                self.res_buf = b"HTTP/1.0 400 Bad Request\r\n".to_vec();
                self.phase = Phase::ForwardingResponse;
                Outcome::BadRequest
            }
            Some(parsed) => {
                self.req_override = parsed.rewrite;
                self.phase = Phase::ForwardingRequest;
                Outcome::OpenUpstream { host: parsed.host, port: parsed.port }
            }
        }
    }

    /// DNS resolution for the requested host failed — same outcome as the
    /// original's `host_entry == NULL` branch.
    pub fn set_bad_request(&mut self) {
        self.res_buf = b"HTTP/1.0 400 Bad Request\r\n".to_vec();
        self.phase = Phase::ForwardingResponse;
    }

    /// Called once `connect()` to the upstream has been issued and
    /// registered; marks the server side open.
    pub fn mark_server_open(&mut self, fd: c_int) {
        self.server_fd = Some(fd);
        self.server_open = true;
    }

    pub fn drive_server_write(&mut self) -> ProxyResult<Outcome> {
        let Some(fd) = self.server_fd else { return Ok(Outcome::Close) };
        loop {
            let buf = self.request_to_send();
            if self.req_sent >= buf.len() {
                self.phase = Phase::AwaitingResponse;
                return Ok(Outcome::RequestForwarded);
            }
            let n = write_nonblocking(fd, &buf[self.req_sent..])?;
            if n == 0 {
                return Ok(Outcome::Continue);
            }
            self.req_sent += n;
        }
    }

    pub fn drive_server_read(&mut self) -> ProxyResult<Outcome> {
        if self.phase != Phase::AwaitingResponse {
            return Ok(Outcome::Continue);
        }
        let Some(fd) = self.server_fd else { return Ok(Outcome::Close) };
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match read_nonblocking_eof_aware(fd, &mut chunk)? {
                None => return Ok(Outcome::Continue),
                Some(0) => {
                    // Close-delimited (HTTP/1.0, no Content-Length, no
                    // chunked framing): EOF from the upstream is the
                    // terminator.
                    if self.header_parsed && self.content_type == ContentType::None {
                        self.phase = Phase::ForwardingResponse;
                        return Ok(Outcome::ResponseReady);
                    }
                    return Ok(Outcome::Close);
                }
                Some(n) => {
                    self.res_buf.extend_from_slice(&chunk[..n]);

                    if !self.header_parsed {
                        if let Some(header) = proto::parse_response_header(&self.res_buf) {
                            self.content_type = header.content_type;
                            self.content_length = header.content_length;
                            self.header_length = header.header_length;
                            self.header_parsed = true;
                        }
                    }

                    if self.header_parsed && self.response_complete() {
                        self.phase = Phase::ForwardingResponse;
                        return Ok(Outcome::ResponseReady);
                    }
                }
            }
        }
    }

    fn response_complete(&self) -> bool {
        match self.content_type {
            ContentType::Chunked => proto::chunked_body_complete(&self.res_buf),
            ContentType::ContentLength => {
                self.res_buf.len() as u32 == self.header_length + self.content_length
            }
            ContentType::None => false,
        }
    }

    pub fn drive_client_write(&mut self) -> ProxyResult<Outcome> {
        loop {
            if self.res_sent >= self.res_buf.len() {
                self.phase = Phase::Done;
                return Ok(Outcome::Done);
            }
            let n = write_nonblocking(self.client_fd, &self.res_buf[self.res_sent..])?;
            if n == 0 {
                return Ok(Outcome::Continue);
            }
            self.res_sent += n;
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
}
