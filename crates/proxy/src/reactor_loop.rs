// Single-threaded half-duplex proxy loop. Each session owns up to two file
// descriptors (client, upstream server); both are registered against the
// same slab slot, tagged in the high bit of the epoll token so a fired
// event can be routed back to "which side of this session" without a
// separate pointer-keyed lookup table.
use crate::error::ProxyResult;
use crate::session::{Outcome, Session};
use libc::c_int;
use reactor::{Epoll, EpollEvent, Slab, EPOLLIN, EPOLLOUT};
use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const LISTEN_TOKEN: u64 = u64::MAX;
const SERVER_TAG: u64 = 1 << 63;
const MAX_EVENTS: usize = 1024;
const SOFT_CAP: usize = 100;

fn client_token(idx: usize) -> u64 {
    idx as u64
}

fn server_token(idx: usize) -> u64 {
    idx as u64 | SERVER_TAG
}

pub fn run_proxy(port: u16, black_urls: Vec<String>, shutdown: Arc<AtomicBool>) -> ProxyResult<()> {
    let black_urls = Arc::new(black_urls);
    let listen_fd = reactor::socket::create_listen_socket("0.0.0.0", port)?;
    let epoll = Epoll::new()?;
    epoll.add(listen_fd, LISTEN_TOKEN, EPOLLIN)?;
    log::info!("proxy listening on 0.0.0.0:{port}, {} blacklisted host(s)", black_urls.len());

    let mut sessions: Slab<Session> = Slab::new(SOFT_CAP);
    let mut events = vec![unsafe { std::mem::zeroed::<EpollEvent>() }; MAX_EVENTS];

    while !shutdown.load(Ordering::Relaxed) {
        let n = epoll.wait(&mut events, 1000)?;

        for event in &events[..n] {
            let token = event.u64;
            if token == LISTEN_TOKEN {
                accept_all(listen_fd, &epoll, &mut sessions, &black_urls);
                continue;
            }

            let is_server = token & SERVER_TAG != 0;
            let idx = (token & !SERVER_TAG) as usize;
            let readable = (event.events & EPOLLIN as u32) != 0;
            let writable = (event.events & EPOLLOUT as u32) != 0;

            let close = if is_server {
                dispatch_server(&epoll, &mut sessions, idx, readable, writable)
            } else {
                dispatch_client(&epoll, &mut sessions, idx, readable, writable)
            };
            if close {
                close_session(&epoll, &mut sessions, idx);
            }
        }
    }

    let open: Vec<usize> = sessions.iter().map(|(i, _)| i).collect();
    for idx in open {
        close_session(&epoll, &mut sessions, idx);
    }
    unsafe { libc::close(listen_fd) };
    Ok(())
}

fn accept_all(listen_fd: c_int, epoll: &Epoll, sessions: &mut Slab<Session>, black_urls: &Arc<Vec<String>>) {
    loop {
        match reactor::socket::accept_connection(listen_fd) {
            Ok(Some(fd)) => {
                let Some(idx) = sessions.allocate(Session::new(fd, black_urls.clone())) else {
                    log::warn!("session slab exhausted, dropping connection");
                    unsafe { libc::close(fd) };
                    continue;
                };
                if epoll.add(fd, client_token(idx), EPOLLIN).is_err() {
                    sessions.free(idx);
                    unsafe { libc::close(fd) };
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::warn!("accept failed: {e}");
                break;
            }
        }
    }
}

fn dispatch_client(epoll: &Epoll, sessions: &mut Slab<Session>, idx: usize, readable: bool, writable: bool) -> bool {
    if readable {
        let Some(session) = sessions.get_mut(idx) else { return true };
        match session.drive_client_read() {
            Ok(Outcome::Continue) => {}
            Ok(Outcome::BadRequest) => {
                let fd = session.client_fd;
                let _ = epoll.modify(fd, client_token(idx), EPOLLOUT);
            }
            Ok(Outcome::OpenUpstream { host, port }) => return open_upstream(epoll, sessions, idx, &host, port),
            Ok(Outcome::Close) | Err(_) => return true,
            Ok(_) => {}
        }
    }
    if writable {
        let Some(session) = sessions.get_mut(idx) else { return true };
        match session.drive_client_write() {
            Ok(Outcome::Done) => return true,
            Ok(Outcome::Continue) => {}
            Ok(_) | Err(_) => return true,
        }
    }
    false
}

fn open_upstream(epoll: &Epoll, sessions: &mut Slab<Session>, idx: usize, host: &str, port: u16) -> bool {
    let addr = (host, port).to_socket_addrs().ok().and_then(|mut it| it.next());
    let Some(addr) = addr else {
        let Some(session) = sessions.get_mut(idx) else { return true };
        session.set_bad_request();
        let fd = session.client_fd;
        let _ = epoll.modify(fd, client_token(idx), EPOLLOUT);
        return false;
    };

    let server_fd = match reactor::socket::connect_nonblocking(addr) {
        Ok(fd) => fd,
        Err(e) => {
            log::warn!("connect to {host}:{port} failed: {e}");
            return true;
        }
    };

    if epoll.add(server_fd, server_token(idx), EPOLLOUT).is_err() {
        unsafe { libc::close(server_fd) };
        return true;
    }

    if let Some(session) = sessions.get_mut(idx) {
        session.mark_server_open(server_fd);
    }
    false
}

fn dispatch_server(epoll: &Epoll, sessions: &mut Slab<Session>, idx: usize, readable: bool, writable: bool) -> bool {
    if writable {
        let Some(session) = sessions.get_mut(idx) else { return true };
        match session.drive_server_write() {
            Ok(Outcome::RequestForwarded) => {
                let Some(fd) = session.server_fd else { return true };
                let _ = epoll.modify(fd, server_token(idx), EPOLLIN);
            }
            Ok(Outcome::Continue) => {}
            Ok(_) | Err(_) => return true,
        }
    }
    if readable {
        let Some(session) = sessions.get_mut(idx) else { return true };
        match session.drive_server_read() {
            Ok(Outcome::ResponseReady) => {
                let client_fd = session.client_fd;
                if let Some(server_fd) = session.server_fd {
                    let _ = epoll.modify(server_fd, server_token(idx), 0);
                }
                let _ = epoll.modify(client_fd, client_token(idx), EPOLLOUT);
            }
            Ok(Outcome::Continue) => {}
            Ok(Outcome::Close) | Err(_) => return true,
            Ok(_) => {}
        }
    }
    false
}

fn close_session(epoll: &Epoll, sessions: &mut Slab<Session>, idx: usize) {
    if let Some(session) = sessions.get(idx) {
        if session.client_open {
            let _ = epoll.delete(session.client_fd);
            unsafe { libc::close(session.client_fd) };
        }
        if session.server_open {
            if let Some(server_fd) = session.server_fd {
                let _ = epoll.delete(server_fd);
                unsafe { libc::close(server_fd) };
            }
        }
    }
    sessions.free(idx);
}
