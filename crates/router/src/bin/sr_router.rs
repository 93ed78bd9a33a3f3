//! Raw-frame IPv4 router. One `AF_PACKET` `SOCK_RAW` socket per configured
//! interface, registered with `reactor::Epoll`; each readable socket hands
//! its frame to `router::Forwarder`, which calls back into this binary's
//! `PacketSink` to transmit replies/forwards on the right interface. This is
//! this repo's concrete stand-in for the out-of-scope `sr_vns_comm.c`
//! delivery harness the original linked against.

#![cfg(target_os = "linux")]

use clap::Parser;
use log::{error, info, warn};
use reactor::{Epoll, EpollEvent, EPOLLIN};
use router::arp::ArpCache;
use router::{load_interfaces, load_routing_table, Forwarder, PacketSink};
use std::collections::HashMap;
use std::ffi::CString;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const ETH_P_ALL: u16 = 0x0003;
const FRAME_BUF_SIZE: usize = 65536;

#[derive(Parser, Debug)]
#[command(about = "IPv4 router forwarding frames between raw AF_PACKET interfaces")]
struct Args {
    /// Path to the interface list file (name, IP, MAC per line).
    #[arg(short = 'i', long = "interfaces")]
    interfaces_file: String,

    /// Path to the routing table file (dest, gateway, mask, iface per line).
    #[arg(short = 'r', long = "routing-table")]
    routing_table_file: String,
}

#[repr(C)]
struct IfReqIndex {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_ifindex: libc::c_int,
    _pad: [u8; 16],
}

fn if_index(fd: RawFd, name: &str) -> std::io::Result<libc::c_int> {
    let cname = CString::new(name).unwrap();
    let mut req: IfReqIndex = unsafe { std::mem::zeroed() };
    let bytes = cname.as_bytes_with_nul();
    for (dst, src) in req.ifr_name.iter_mut().zip(bytes.iter()) {
        *dst = *src as libc::c_char;
    }
    let res = unsafe { libc::ioctl(fd, libc::SIOCGIFINDEX, &mut req) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(req.ifr_ifindex)
}

fn open_raw_socket(name: &str) -> std::io::Result<RawFd> {
    let proto = (ETH_P_ALL as u16).to_be() as libc::c_int;
    let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, proto) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let ifindex = if_index(fd, name).inspect_err(|_| unsafe {
        libc::close(fd);
    })?;

    let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as u16;
    addr.sll_protocol = proto as u16;
    addr.sll_ifindex = ifindex;

    let res = unsafe {
        libc::bind(
            fd,
            &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_ll>() as u32,
        )
    };
    if res < 0 {
        let err = std::io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }

    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };

    Ok(fd)
}

struct RawSink {
    fds_by_name: Mutex<HashMap<String, RawFd>>,
}

impl PacketSink for RawSink {
    fn send(&self, iface: &str, frame: &[u8]) {
        let fds = self.fds_by_name.lock().unwrap();
        let Some(&fd) = fds.get(iface) else {
            warn!("no socket open for interface {iface}");
            return;
        };
        let res = unsafe { libc::write(fd, frame.as_ptr() as *const libc::c_void, frame.len()) };
        if res < 0 {
            warn!("send on {iface} failed: {}", std::io::Error::last_os_error());
        }
    }
}

fn main() -> router::RouterResult<()> {
    env_logger::init();
    let args = Args::parse();

    let interfaces = Arc::new(load_interfaces(&args.interfaces_file)?);
    let routing_table = Arc::new(load_routing_table(&args.routing_table_file)?);
    let arp_cache = Arc::new(ArpCache::new());

    let mut fds_by_name = HashMap::new();
    let mut name_by_fd = HashMap::new();
    for ifc in interfaces.iter() {
        let fd = open_raw_socket(&ifc.name).map_err(router::RouterError::Io)?;
        info!("listening on {} (fd {fd})", ifc.name);
        fds_by_name.insert(ifc.name.clone(), fd);
        name_by_fd.insert(fd as u64, ifc.name.clone());
    }

    let sink = Arc::new(RawSink { fds_by_name: Mutex::new(fds_by_name.clone()) });
    let forwarder = Arc::new(Forwarder::new(interfaces.clone(), routing_table.clone(), arp_cache.clone()));

    start_sweep(arp_cache.clone(), forwarder.clone(), sink.clone());

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("shutdown signal received");
        handler_flag.store(true, Ordering::Relaxed);
    })
    .expect("failed to install signal handler");

    let epoll = Epoll::new()?;
    for &fd in fds_by_name.values() {
        epoll.add(fd, fd as u64, EPOLLIN)?;
    }

    let mut events = vec![EpollEvent { events: 0, u64: 0 }; 64];
    let mut buf = vec![0u8; FRAME_BUF_SIZE];

    while !shutdown.load(Ordering::Relaxed) {
        let n = epoll.wait(&mut events, 1000)?;
        for event in &events[..n] {
            let Some(iface) = name_by_fd.get(&event.u64) else { continue };
            loop {
                let res = unsafe {
                    libc::read(event.u64 as RawFd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
                };
                if res < 0 {
                    let err = std::io::Error::last_os_error();
                    if err.kind() == std::io::ErrorKind::WouldBlock {
                        break;
                    }
                    error!("read on {iface} failed: {err}");
                    break;
                }
                if res == 0 {
                    break;
                }
                forwarder.handle_frame(sink.as_ref(), &buf[..res as usize], iface);
            }
        }
    }

    for &fd in fds_by_name.values() {
        unsafe { libc::close(fd) };
    }
    Ok(())
}

fn start_sweep(arp_cache: Arc<ArpCache>, forwarder: Arc<Forwarder>, sink: Arc<RawSink>) {
    let rebroadcast_forwarder = forwarder.clone();
    let rebroadcast_sink = sink.clone();
    let unreachable_forwarder = forwarder;
    let unreachable_sink = sink;

    ArpCache::start_sweep_thread(
        arp_cache,
        move |ip, iface| rebroadcast_forwarder.broadcast_arp_request(rebroadcast_sink.as_ref(), ip, iface),
        move |queued| unreachable_forwarder.send_host_unreachable(unreachable_sink.as_ref(), &queued),
    );
}
