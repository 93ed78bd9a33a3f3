use crate::error::{StcpError, StcpResult};
use crate::header::{Header, HEADER_SIZE, TH_ACK, TH_FIN, TH_SYN};
use crate::substrate::{Application, Datagram};
use std::time::Duration;

pub const WIN_SIZE: u16 = 3072;
/// `transport.h`'s `STCP_MSS` wasn't part of the retrieved source; 536 is
/// the classic minimum-MTU TCP default and keeps a single segment well
/// under `WIN_SIZE`.
pub const MSS: u16 = 536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    SynSent,
    SynRcvd,
    Established,
    CloseWait,
    Closing,
    FinWait1,
    FinWait2,
    LastAck,
    Closed,
}

pub struct Context<D: Datagram, A: Application> {
    state: State,
    my_window: u16,
    peer_window: u16,
    my_seq: u32,
    my_acked: u32,
    peer_acked: u32,
    done: bool,
    datagram: D,
    app: A,
}

impl<D: Datagram, A: Application> Context<D, A> {
    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Perform the three-way handshake (active side sends the first SYN,
    /// passive side waits for one) and unblock the application once
    /// established.
    pub fn open(mut datagram: D, mut app: A, active: bool) -> StcpResult<Self> {
        let initial_sequence_num: u32 = rand::random();
        let mut my_seq = initial_sequence_num;
        let my_window = WIN_SIZE;
        let peer_window = WIN_SIZE;
        let state;
        let my_acked;
        let peer_acked;

        if active {
            let syn = Header { seq: my_seq, ack: 0, flags: TH_SYN, window: my_window };
            datagram.send(&syn.to_bytes())?;
            my_seq = my_seq.wrapping_add(1);

            let mut buf = [0u8; HEADER_SIZE];
            let n = datagram.recv(&mut buf)?;
            let reply = parse_handshake_header(&buf[..n])?;
            if reply.flags != (TH_SYN | TH_ACK) {
                return Err(StcpError::ConnectionRefused("expected SYN|ACK"));
            }
            my_acked = reply.ack;
            peer_acked = reply.seq.wrapping_add(1);
            state = State::Established;

            let ack = Header { seq: my_seq, ack: peer_acked, flags: TH_ACK, window: my_window };
            datagram.send(&ack.to_bytes())?;
        } else {
            let mut buf = [0u8; HEADER_SIZE];
            let n = datagram.recv(&mut buf)?;
            let syn = parse_handshake_header(&buf[..n])?;
            if syn.flags != TH_SYN {
                return Err(StcpError::ConnectionRefused("expected SYN"));
            }
            let syn_peer_acked = syn.seq.wrapping_add(1);

            let synack = Header {
                seq: my_seq,
                ack: syn_peer_acked,
                flags: TH_SYN | TH_ACK,
                window: my_window,
            };
            datagram.send(&synack.to_bytes())?;
            my_seq = my_seq.wrapping_add(1);

            let n = datagram.recv(&mut buf)?;
            let ack = parse_handshake_header(&buf[..n])?;
            if ack.flags != TH_ACK {
                return Err(StcpError::ConnectionRefused("expected ACK"));
            }
            my_acked = ack.ack;
            peer_acked = syn_peer_acked;
            state = State::Established;
        }

        app.unblock();

        Ok(Self {
            state,
            my_window,
            peer_window,
            my_seq,
            my_acked,
            peer_acked,
            done: false,
            datagram,
            app,
        })
    }

    /// Runs until the four-way teardown completes. Busy-polls both
    /// substrates rather than blocking on a combined event source, since a
    /// generic `Datagram`/`Application` pair has no shared wait primitive;
    /// behaviorally equivalent to the blocking original, one tick at a time.
    pub fn run_control_loop(&mut self) -> StcpResult<()> {
        while !self.done {
            self.tick()?;
            if !self.done {
                std::thread::sleep(Duration::from_micros(200));
            }
        }
        Ok(())
    }

    fn tick(&mut self) -> StcpResult<()> {
        let mut send_ready = false;
        let mut payload_out: Vec<u8> = Vec::new();

        let mut recv_buf = vec![0u8; HEADER_SIZE + MSS as usize];
        if let Some(n) = self.datagram.try_recv(&mut recv_buf)? {
            let Some(pkt) = Header::parse(&recv_buf[..n]) else { return Ok(()) };

            if !pkt.has_flag(TH_ACK) {
                // Non-ACK packets outside the handshake are discarded.
                return Ok(());
            }
            self.peer_window = self
                .peer_window
                .wrapping_add(pkt.ack.wrapping_sub(self.my_acked) as u16);
            self.my_acked = pkt.ack;

            if self.state == State::LastAck && self.my_acked == self.my_seq {
                self.state = State::Closed;
                self.done = true;
                return Ok(());
            }

            let payload_len = n.saturating_sub(HEADER_SIZE);
            if payload_len > 0 {
                self.app.push(&recv_buf[HEADER_SIZE..n]);
                self.peer_acked = self.peer_acked.wrapping_add(payload_len as u32);
                send_ready = true;
            }

            if pkt.has_flag(TH_FIN) {
                self.app.fin_received();
                if self.state == State::Established {
                    self.state = State::CloseWait;
                }
                if self.state == State::FinWait1 {
                    if self.my_seq == self.my_acked {
                        self.state = State::Closed;
                        self.done = true;
                    } else {
                        self.state = State::Closing;
                    }
                }
                if self.state == State::FinWait2 {
                    self.state = State::Closed;
                    self.done = true;
                }
                self.peer_acked = self.peer_acked.wrapping_add(1);
                send_ready = true;
            } else if self.state == State::FinWait1 && self.my_seq == self.my_acked {
                self.state = State::FinWait2;
            } else if self.state == State::Closing && self.my_seq == self.my_acked {
                self.state = State::Closed;
                self.done = true;
            }
        }

        if self.peer_window > 0 {
            let max = self.peer_window.min(MSS) as usize;
            if let Some(payload) = self.app.try_pull(max) {
                payload_out = payload;
                send_ready = true;
            }
        }

        if send_ready {
            let header = Header {
                seq: self.my_seq,
                ack: self.peer_acked,
                flags: TH_ACK,
                window: self.my_window,
            };
            let mut buf = header.to_bytes().to_vec();
            buf.extend_from_slice(&payload_out);
            self.datagram.send(&buf)?;
            self.my_seq = self.my_seq.wrapping_add(payload_out.len() as u32);
            self.peer_window = self.peer_window.saturating_sub(payload_out.len() as u16);
        }

        if self.app.take_close_requested()
            && (self.state == State::Established || self.state == State::CloseWait)
        {
            self.state = match self.state {
                State::CloseWait => State::LastAck,
                State::Established => State::FinWait1,
                other => other,
            };
            let fin = Header {
                seq: self.my_seq,
                ack: self.peer_acked,
                flags: TH_ACK | TH_FIN,
                window: self.my_window,
            };
            self.datagram.send(&fin.to_bytes())?;
            self.my_seq = self.my_seq.wrapping_add(1);
            self.peer_window = self.peer_window.saturating_sub(1);
        }

        Ok(())
    }
}

fn parse_handshake_header(buf: &[u8]) -> StcpResult<Header> {
    Header::parse(buf).ok_or(StcpError::ConnectionRefused("short handshake packet"))
}
