//! In-memory `Datagram`/`Application` implementations for loopback tests.
//! No real socket involved; two `Context`s talk over a pair of channels.

use crate::substrate::{Application, Datagram};
use std::collections::VecDeque;
use std::io;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::time::Duration;

pub struct ChannelDatagram {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

pub fn channel_pair() -> (ChannelDatagram, ChannelDatagram) {
    let (tx_a, rx_b) = std::sync::mpsc::channel();
    let (tx_b, rx_a) = std::sync::mpsc::channel();
    (
        ChannelDatagram { tx: tx_a, rx: rx_a },
        ChannelDatagram { tx: tx_b, rx: rx_b },
    )
}

impl Datagram for ChannelDatagram {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        self.tx
            .send(buf.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let packet = self
            .rx
            .recv_timeout(Duration::from_secs(5))
            .map_err(|e| io::Error::new(io::ErrorKind::TimedOut, e))?;
        let n = packet.len().min(buf.len());
        buf[..n].copy_from_slice(&packet[..n]);
        Ok(n)
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.rx.try_recv() {
            Ok(packet) => {
                let n = packet.len().min(buf.len());
                buf[..n].copy_from_slice(&packet[..n]);
                Ok(Some(n))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))
            }
        }
    }
}

/// Drives a fixed outbound byte stream and records whatever arrives,
/// requesting close once the outbound stream is drained.
#[derive(Default)]
pub struct ScriptedApplication {
    outbound: VecDeque<u8>,
    pub received: Vec<u8>,
    close_after_drain: bool,
    close_requested: bool,
    got_fin: bool,
    unblocked: bool,
}

impl ScriptedApplication {
    pub fn new(outbound: Vec<u8>, close_after_drain: bool) -> Self {
        Self {
            outbound: outbound.into(),
            close_after_drain,
            ..Default::default()
        }
    }

    pub fn fin_seen(&self) -> bool {
        self.got_fin
    }

    pub fn is_unblocked(&self) -> bool {
        self.unblocked
    }
}

impl Application for ScriptedApplication {
    fn push(&mut self, data: &[u8]) {
        self.received.extend_from_slice(data);
    }

    fn try_pull(&mut self, max: usize) -> Option<Vec<u8>> {
        if self.outbound.is_empty() {
            // Request our own close either once we've sent everything we
            // meant to (active close), or once the peer has already hung
            // up its side and we have nothing left to say (passive close).
            if (self.close_after_drain || self.got_fin) && !self.close_requested && self.unblocked
            {
                self.close_requested = true;
            }
            return None;
        }
        let n = max.min(self.outbound.len());
        if n == 0 {
            return None;
        }
        Some(self.outbound.drain(..n).collect())
    }

    fn take_close_requested(&mut self) -> bool {
        if self.close_requested {
            self.close_requested = false;
            true
        } else {
            false
        }
    }

    fn unblock(&mut self) {
        self.unblocked = true;
    }

    fn fin_received(&mut self) {
        self.got_fin = true;
    }
}
