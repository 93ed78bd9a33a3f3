//! ARP cache + pending-request queue. The only structure shared between the
//! packet-handling path and the sweep thread, so both are folded into one
//! `Mutex`-guarded inner struct and every access — including the
//! look-up-and-enqueue combination — takes the lock for its whole critical
//! section, per `spec.md` §5.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const MAX_UNANSWERED_SWEEPS: u32 = 5;

#[derive(Debug, Clone)]
pub struct QueuedPacket {
    pub buf: Vec<u8>,
    pub iface: String,
}

struct PendingRequest {
    iface: String,
    packets: Vec<QueuedPacket>,
    sweeps_sent: u32,
    last_sent: Instant,
}

#[derive(Debug)]
pub enum LookupResult {
    /// Already resolved; caller can address and send immediately.
    Resolved([u8; 6]),
    /// No entry yet; packet was appended to an existing pending request.
    Queued,
    /// No entry yet and none was pending either; caller should broadcast an
    /// ARP request for `ip` on `iface` right away, mirroring the original's
    /// `sr_arpcache_handle_arpreq` being invoked on a freshly created request.
    QueuedFirst,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<u32, [u8; 6]>,
    pending: HashMap<u32, PendingRequest>,
}

#[derive(Default)]
pub struct ArpCache {
    inner: Mutex<Inner>,
}

impl ArpCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, ip: u32) -> Option<[u8; 6]> {
        self.inner.lock().unwrap().entries.get(&ip).copied()
    }

    /// Combined lookup + enqueue under one lock (see module docs).
    pub fn lookup_or_queue(&self, ip: u32, iface: &str, packet: Vec<u8>) -> LookupResult {
        let mut inner = self.inner.lock().unwrap();
        if let Some(mac) = inner.entries.get(&ip) {
            return LookupResult::Resolved(*mac);
        }
        match inner.pending.get_mut(&ip) {
            Some(req) => {
                req.packets.push(QueuedPacket { buf: packet, iface: iface.to_string() });
                LookupResult::Queued
            }
            None => {
                inner.pending.insert(
                    ip,
                    PendingRequest {
                        iface: iface.to_string(),
                        packets: vec![QueuedPacket { buf: packet, iface: iface.to_string() }],
                        sweeps_sent: 0,
                        last_sent: Instant::now(),
                    },
                );
                LookupResult::QueuedFirst
            }
        }
    }

    /// Learns `ip -> mac` and returns the packets that were waiting on it,
    /// if any request was pending (mirrors `sr_arpcache_insert`'s return).
    pub fn insert(&self, mac: [u8; 6], ip: u32) -> Option<Vec<QueuedPacket>> {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.insert(ip, mac);
        inner.pending.remove(&ip).map(|req| req.packets)
    }

    /// One sweep pass: re-broadcasts ARP requests for pending targets every
    /// ~1s, or — past `MAX_UNANSWERED_SWEEPS` — drains the queue for that
    /// target into `on_unreachable`, one packet at a time.
    fn sweep_once(
        &self,
        mut rebroadcast: impl FnMut(u32, &str),
        mut on_unreachable: impl FnMut(QueuedPacket),
    ) {
        let mut expired: Vec<(u32, Vec<QueuedPacket>)> = Vec::new();
        let mut to_resend: Vec<(u32, String)> = Vec::new();

        {
            let mut inner = self.inner.lock().unwrap();
            let now = Instant::now();
            inner.pending.retain(|&ip, req| {
                if now.duration_since(req.last_sent) < SWEEP_INTERVAL {
                    return true;
                }
                if req.sweeps_sent >= MAX_UNANSWERED_SWEEPS {
                    expired.push((ip, std::mem::take(&mut req.packets)));
                    false
                } else {
                    req.sweeps_sent += 1;
                    req.last_sent = now;
                    to_resend.push((ip, req.iface.clone()));
                    true
                }
            });
        }

        for (ip, iface) in to_resend {
            rebroadcast(ip, &iface);
        }
        for (_, packets) in expired {
            for packet in packets {
                on_unreachable(packet);
            }
        }
    }

    /// Spawns the sweep loop on its own thread, grounded on the original's
    /// `sr_arpcache_timeout` pthread.
    pub fn start_sweep_thread(
        cache: Arc<ArpCache>,
        rebroadcast: impl Fn(u32, &str) + Send + 'static,
        on_unreachable: impl Fn(QueuedPacket) + Send + 'static,
    ) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || loop {
            std::thread::sleep(SWEEP_INTERVAL);
            cache.sweep_once(&rebroadcast, &on_unreachable);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_queue_reports_queued_first() {
        let cache = ArpCache::new();
        let result = cache.lookup_or_queue(0x0a000001, "eth0", vec![1, 2, 3]);
        assert!(matches!(result, LookupResult::QueuedFirst));
    }

    #[test]
    fn second_queue_on_same_target_reports_queued() {
        let cache = ArpCache::new();
        cache.lookup_or_queue(0x0a000001, "eth0", vec![1]);
        let result = cache.lookup_or_queue(0x0a000001, "eth0", vec![2]);
        assert!(matches!(result, LookupResult::Queued));
    }

    #[test]
    fn insert_resolves_and_flushes_pending_packets() {
        let cache = ArpCache::new();
        cache.lookup_or_queue(0x0a000001, "eth0", vec![1]);
        cache.lookup_or_queue(0x0a000001, "eth0", vec![2]);
        let flushed = cache.insert([1, 2, 3, 4, 5, 6], 0x0a000001).unwrap();
        assert_eq!(flushed.len(), 2);
        assert!(matches!(
            cache.lookup_or_queue(0x0a000001, "eth0", vec![3]),
            LookupResult::Resolved(mac) if mac == [1, 2, 3, 4, 5, 6]
        ));
    }

    #[test]
    fn insert_with_no_pending_request_returns_none() {
        let cache = ArpCache::new();
        assert!(cache.insert([1, 2, 3, 4, 5, 6], 0x0a000001).is_none());
    }
}
