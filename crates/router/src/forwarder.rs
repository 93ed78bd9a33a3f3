//! The `sr_handlepacket` equivalent: receives one Ethernet frame plus the
//! interface it arrived on, and either sends zero or more frames back out
//! through `sink`, or drops silently. Grounded line-for-line on
//! `original_source/prj4/sr_router.c`.

use crate::arp::{ArpCache, LookupResult, QueuedPacket};
use crate::config::Interfaces;
use crate::proto::*;
use crate::rtable::RoutingTable;
use log::{debug, warn};
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Blacklisted CIDR block; matches the original's hardcoded
/// `ip_black_list` (10.0.2.0/24 on source or destination).
const BLACKLIST_NET: u32 = 0x0a000200;
const BLACKLIST_MASK: u32 = 0xffffff00;

/// Where the forwarder sends outgoing frames. One implementation per
/// interface fan-out: a raw-socket binary's `Epoll`-registered fds, or an
/// in-memory recorder in tests.
pub trait PacketSink {
    fn send(&self, iface: &str, frame: &[u8]);
}

pub struct Forwarder {
    pub interfaces: Arc<Interfaces>,
    pub routing_table: Arc<RoutingTable>,
    pub arp_cache: Arc<ArpCache>,
}

fn is_blacklisted(ip_be: u32) -> bool {
    (ip_be & BLACKLIST_MASK) == BLACKLIST_NET
}

fn log_blocked(ip_be: u32) {
    warn!("[IP blocked] : {}", Ipv4Addr::from(ip_be.to_be_bytes()));
}

impl Forwarder {
    pub fn new(interfaces: Arc<Interfaces>, routing_table: Arc<RoutingTable>, arp_cache: Arc<ArpCache>) -> Self {
        Self { interfaces, routing_table, arp_cache }
    }

    pub fn handle_frame(&self, sink: &dyn PacketSink, packet: &[u8], iface: &str) {
        if packet.len() < ETHERNET_HEADER_LEN {
            return;
        }
        let Some(eth) = EthernetHeader::from_bytes(packet) else { return };

        match eth.ether_type {
            ETHERTYPE_IP => self.handle_ip(sink, packet, iface, eth),
            ETHERTYPE_ARP => self.handle_arp(sink, packet, iface, eth),
            _ => {}
        }
    }

    fn handle_ip(&self, sink: &dyn PacketSink, packet: &[u8], iface: &str, eth: EthernetHeader) {
        let ip_bytes = &packet[ETHERNET_HEADER_LEN..];
        if ip_bytes.len() < IPV4_HEADER_LEN {
            return;
        }
        let Some(mut ip_hdr) = Ipv4Header::from_bytes(ip_bytes) else { return };
        if ip_hdr.version != 4 {
            return;
        }

        let received_checksum = ip_hdr.checksum;
        ip_hdr.checksum = 0;
        let mut check_buf = [0u8; IPV4_HEADER_LEN];
        ip_hdr.write_to(&mut check_buf);
        if received_checksum != checksum(&check_buf) {
            return;
        }
        ip_hdr.checksum = received_checksum;

        if is_blacklisted(ip_hdr.src) {
            log_blocked(ip_hdr.src);
            return;
        }
        if is_blacklisted(ip_hdr.dst) {
            log_blocked(ip_hdr.dst);
            return;
        }

        if self.interfaces.contains_ip(ip_hdr.dst) {
            self.handle_ip_for_us(sink, packet, iface, eth, ip_hdr);
        } else {
            self.handle_ip_forward(sink, packet, iface, eth, ip_hdr);
        }
    }

    fn handle_ip_for_us(
        &self,
        sink: &dyn PacketSink,
        packet: &[u8],
        iface: &str,
        mut eth: EthernetHeader,
        mut ip_hdr: Ipv4Header,
    ) {
        let payload = &packet[ETHERNET_HEADER_LEN + IPV4_HEADER_LEN..];

        match ip_hdr.protocol {
            IP_PROTOCOL_ICMP => {
                if payload.len() < ICMP_HEADER_LEN {
                    return;
                }
                let Some(icmp) = IcmpHeader::from_bytes(payload) else { return };
                if icmp.icmp_type != ICMP_TYPE_ECHO_REQUEST {
                    return;
                }

                let received = icmp.checksum;
                let mut zeroed = payload.to_vec();
                zeroed[2..4].copy_from_slice(&0u16.to_be_bytes());
                if received != checksum(&zeroed) {
                    return;
                }

                // Turn the request into a reply in place.
                ip_hdr.ttl = INIT_TTL;
                std::mem::swap(&mut ip_hdr.src, &mut ip_hdr.dst);
                ip_hdr.recompute_checksum();

                let mut reply_icmp = zeroed;
                reply_icmp[0] = ICMP_TYPE_ECHO_REPLY;
                reply_icmp[2..4].copy_from_slice(&0u16.to_be_bytes());
                let icmp_sum = checksum(&reply_icmp);
                reply_icmp[2..4].copy_from_slice(&icmp_sum.to_be_bytes());

                let mut frame = packet.to_vec();
                eth.write_to(&mut frame);
                ip_hdr.write_to(&mut frame[ETHERNET_HEADER_LEN..]);
                frame[ETHERNET_HEADER_LEN + IPV4_HEADER_LEN..].copy_from_slice(&reply_icmp);

                self.route_and_send(sink, frame, ip_hdr.dst);
            }
            IP_PROTOCOL_TCP | IP_PROTOCOL_UDP => {
                self.send_icmp_t3(sink, packet, ip_hdr, iface, ICMP_CODE_PORT_UNREACHABLE);
            }
            _ => {}
        }
    }

    fn handle_ip_forward(
        &self,
        sink: &dyn PacketSink,
        packet: &[u8],
        iface: &str,
        mut eth: EthernetHeader,
        mut ip_hdr: Ipv4Header,
    ) {
        let Some(route) = self.routing_table.lookup(ip_hdr.dst) else {
            self.send_icmp_t3(sink, packet, ip_hdr, iface, ICMP_CODE_NET_UNREACHABLE);
            return;
        };

        if ip_hdr.ttl <= 1 {
            self.send_icmp_t11(sink, packet, ip_hdr, iface);
            return;
        }

        let Some(egress) = self.interfaces.by_name(&route.interface) else {
            debug!("route to unknown interface {}", route.interface);
            return;
        };
        // Source MAC is set unconditionally, but the TTL decrement+checksum
        // only happens once the packet actually goes out (immediately on an
        // ARP hit, or later when a queued request resolves) -- never at
        // enqueue time, matching the original's queued copy keeping its
        // original TTL until flush.
        eth.src = egress.mac;

        let mut frame = packet.to_vec();
        eth.write_to(&mut frame);
        ip_hdr.write_to(&mut frame[ETHERNET_HEADER_LEN..]);

        self.resolve_and_send(sink, frame, ip_hdr.dst, &route.interface, true);
    }

    fn send_icmp_t3(
        &self,
        sink: &dyn PacketSink,
        packet: &[u8],
        offending: Ipv4Header,
        receiving_iface: &str,
        code: u8,
    ) {
        let mut data = [0u8; ICMP_DATA_SIZE];
        let ip_bytes = &packet[ETHERNET_HEADER_LEN..];
        let n = ip_bytes.len().min(ICMP_DATA_SIZE);
        data[..n].copy_from_slice(&ip_bytes[..n]);

        let t3 = IcmpT3Header { icmp_type: ICMP_TYPE_DEST_UNREACHABLE, code, next_mtu: 0, data };
        let mut icmp_buf = vec![0u8; ICMP_T3_HEADER_LEN];
        t3.write_to(&mut icmp_buf);
        let icmp_sum = checksum(&icmp_buf);
        icmp_buf[2..4].copy_from_slice(&icmp_sum.to_be_bytes());

        // Port-unreachable replies to the sender using the original
        // destination as source; net-unreachable originates from the
        // receiving interface, matching the original's two call sites.
        let src_ip = if code == ICMP_CODE_PORT_UNREACHABLE {
            offending.dst
        } else {
            match self.interfaces.by_name(receiving_iface) {
                Some(ifc) => ifc.ip,
                None => return,
            }
        };

        let mut new_ip = Ipv4Header {
            version: 4,
            ihl: 5,
            tos: 0,
            total_len: (IPV4_HEADER_LEN + ICMP_T3_HEADER_LEN) as u16,
            id: 0,
            off: IP_DF,
            ttl: INIT_TTL,
            protocol: IP_PROTOCOL_ICMP,
            checksum: 0,
            src: src_ip,
            dst: offending.src,
        };
        new_ip.recompute_checksum();

        let mut frame = vec![0u8; ETHERNET_HEADER_LEN + IPV4_HEADER_LEN + ICMP_T3_HEADER_LEN];
        let eth = EthernetHeader { dst: [0; 6], src: [0; 6], ether_type: ETHERTYPE_IP };
        eth.write_to(&mut frame);
        new_ip.write_to(&mut frame[ETHERNET_HEADER_LEN..]);
        frame[ETHERNET_HEADER_LEN + IPV4_HEADER_LEN..].copy_from_slice(&icmp_buf);

        self.route_and_send(sink, frame, new_ip.dst);
    }

    fn send_icmp_t11(&self, sink: &dyn PacketSink, packet: &[u8], offending: Ipv4Header, receiving_iface: &str) {
        let Some(ifc) = self.interfaces.by_name(receiving_iface) else { return };

        let mut data = [0u8; ICMP_DATA_SIZE];
        let ip_bytes = &packet[ETHERNET_HEADER_LEN..];
        let n = ip_bytes.len().min(ICMP_DATA_SIZE);
        data[..n].copy_from_slice(&ip_bytes[..n]);

        let t11 = IcmpT11Header { icmp_type: ICMP_TYPE_TIME_EXCEEDED, code: ICMP_CODE_TTL_EXCEEDED, data };
        let mut icmp_buf = vec![0u8; ICMP_T11_HEADER_LEN];
        t11.write_to(&mut icmp_buf);
        let icmp_sum = checksum(&icmp_buf);
        icmp_buf[2..4].copy_from_slice(&icmp_sum.to_be_bytes());

        let mut new_ip = Ipv4Header {
            version: 4,
            ihl: 5,
            tos: 0,
            total_len: (IPV4_HEADER_LEN + ICMP_T11_HEADER_LEN) as u16,
            id: 0,
            off: IP_DF,
            ttl: INIT_TTL,
            protocol: IP_PROTOCOL_ICMP,
            checksum: 0,
            src: ifc.ip,
            dst: offending.src,
        };
        new_ip.recompute_checksum();

        let mut frame = vec![0u8; ETHERNET_HEADER_LEN + IPV4_HEADER_LEN + ICMP_T11_HEADER_LEN];
        let eth = EthernetHeader { dst: [0; 6], src: ifc.mac, ether_type: ETHERTYPE_IP };
        eth.write_to(&mut frame);
        new_ip.write_to(&mut frame[ETHERNET_HEADER_LEN..]);
        frame[ETHERNET_HEADER_LEN + IPV4_HEADER_LEN..].copy_from_slice(&icmp_buf);

        self.resolve_and_send(sink, frame, new_ip.dst, receiving_iface, false);
    }

    /// A self-generated reply (ICMP echo reply, t3, t11) that still needs a
    /// route lookup before it can be addressed and sent. Self-generated
    /// replies never decrement TTL on send, matching the original.
    fn route_and_send(&self, sink: &dyn PacketSink, mut frame: Vec<u8>, dst_ip: u32) {
        let Some(route) = self.routing_table.lookup(dst_ip) else { return };
        let Some(egress) = self.interfaces.by_name(&route.interface) else { return };
        if let Some(eth) = EthernetHeader::from_bytes(&frame) {
            let eth = EthernetHeader { src: egress.mac, ..eth };
            eth.write_to(&mut frame);
        }
        self.resolve_and_send(sink, frame, dst_ip, &route.interface, false);
    }

    /// ARP-resolve `dst_ip` reachable via `iface` and either send `frame`
    /// now or queue it, mirroring `sr_arpcache_lookup`/`queuereq`.
    /// `decrement_ttl` is set only for the genuine forwarding path: TTL is
    /// decremented and the checksum recomputed right before the packet
    /// actually leaves, never while it merely sits in the ARP queue.
    fn resolve_and_send(
        &self,
        sink: &dyn PacketSink,
        mut frame: Vec<u8>,
        dst_ip: u32,
        iface: &str,
        decrement_ttl: bool,
    ) {
        match self.arp_cache.lookup_or_queue(dst_ip, iface, frame.clone()) {
            LookupResult::Resolved(mac) => {
                if let Some(mut eth) = EthernetHeader::from_bytes(&frame) {
                    eth.dst = mac;
                    if decrement_ttl {
                        if let Some(mut ip_hdr) = Ipv4Header::from_bytes(&frame[ETHERNET_HEADER_LEN..]) {
                            ip_hdr.ttl -= 1;
                            ip_hdr.recompute_checksum();
                            ip_hdr.write_to(&mut frame[ETHERNET_HEADER_LEN..]);
                        }
                    }
                    eth.write_to(&mut frame);
                }
                sink.send(iface, &frame);
            }
            LookupResult::QueuedFirst => {
                self.broadcast_arp_request(sink, dst_ip, iface);
            }
            LookupResult::Queued => {}
        }
    }

    pub fn broadcast_arp_request(&self, sink: &dyn PacketSink, target_ip: u32, iface: &str) {
        let Some(ifc) = self.interfaces.by_name(iface) else { return };
        let mut frame = vec![0u8; ETHERNET_HEADER_LEN + ARP_PACKET_LEN];
        let eth = EthernetHeader { dst: [0xff; 6], src: ifc.mac, ether_type: ETHERTYPE_ARP };
        eth.write_to(&mut frame);
        let arp = ArpPacket {
            hrd: ARP_HRD_ETHERNET,
            pro: ETHERTYPE_IP,
            hln: ETHER_ADDR_LEN as u8,
            pln: 4,
            op: ARP_OP_REQUEST,
            sha: ifc.mac,
            sip: ifc.ip,
            tha: [0; 6],
            tip: target_ip,
        };
        arp.write_to(&mut frame[ETHERNET_HEADER_LEN..]);
        sink.send(iface, &frame);
    }

    pub fn send_host_unreachable(&self, sink: &dyn PacketSink, queued: &QueuedPacket) {
        if queued.buf.len() < ETHERNET_HEADER_LEN + IPV4_HEADER_LEN {
            return;
        }
        let Some(offending) = Ipv4Header::from_bytes(&queued.buf[ETHERNET_HEADER_LEN..]) else { return };
        self.send_icmp_t3(sink, &queued.buf, offending, &queued.iface, ICMP_CODE_HOST_UNREACHABLE);
    }

    fn handle_arp(&self, sink: &dyn PacketSink, packet: &[u8], iface: &str, eth: EthernetHeader) {
        let arp_bytes = &packet[ETHERNET_HEADER_LEN..];
        let Some(arp) = ArpPacket::from_bytes(arp_bytes) else { return };
        if arp.hrd != ARP_HRD_ETHERNET || arp.pro != ETHERTYPE_IP || arp.hln != ETHER_ADDR_LEN as u8 || arp.pln != 4 {
            return;
        }

        let Some(ifc) = self.interfaces.by_name(iface) else { return };
        if arp.tip != ifc.ip {
            return;
        }

        match arp.op {
            ARP_OP_REQUEST => {
                let mut frame = vec![0u8; ETHERNET_HEADER_LEN + ARP_PACKET_LEN];
                let reply_eth = EthernetHeader { dst: eth.src, src: ifc.mac, ether_type: ETHERTYPE_ARP };
                reply_eth.write_to(&mut frame);
                let reply_arp = ArpPacket {
                    hrd: ARP_HRD_ETHERNET,
                    pro: ETHERTYPE_IP,
                    hln: ETHER_ADDR_LEN as u8,
                    pln: 4,
                    op: ARP_OP_REPLY,
                    sha: ifc.mac,
                    sip: ifc.ip,
                    tha: arp.sha,
                    tip: arp.sip,
                };
                reply_arp.write_to(&mut frame[ETHERNET_HEADER_LEN..]);
                sink.send(iface, &frame);
            }
            ARP_OP_REPLY => {
                if let Some(flushed) = self.arp_cache.insert(arp.sha, arp.sip) {
                    for mut queued in flushed {
                        if queued.buf.len() < ETHERNET_HEADER_LEN + IPV4_HEADER_LEN {
                            continue;
                        }
                        if let Some(qeth) = EthernetHeader::from_bytes(&queued.buf) {
                            let qeth = EthernetHeader { dst: arp.sha, ..qeth };
                            qeth.write_to(&mut queued.buf);
                        }
                        if let Some(mut ip_hdr) = Ipv4Header::from_bytes(&queued.buf[ETHERNET_HEADER_LEN..]) {
                            if !self.interfaces.contains_ip(ip_hdr.src) {
                                ip_hdr.ttl -= 1;
                                ip_hdr.recompute_checksum();
                                ip_hdr.write_to(&mut queued.buf[ETHERNET_HEADER_LEN..]);
                            }
                        }
                        sink.send(&queued.iface, &queued.buf);
                    }
                }
            }
            _ => {}
        }
    }
}
