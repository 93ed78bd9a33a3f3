// Single-threaded edge-triggered reactor loop: one epoll instance, one
// listen socket, one slab of sessions. Mirrors the shape of a worker's
// accept/dispatch loop, minus the multi-worker sharding.
use crate::error::CipherResult;
use crate::session::{Progress, Session};
use libc::c_int;
use reactor::{Epoll, EpollEvent, Slab, EPOLLIN, EPOLLOUT};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const LISTEN_TOKEN: u64 = u64::MAX;
const MAX_EVENTS: usize = 1024;
const SOFT_CAP: usize = 50;

pub fn run_server(host: &str, port: u16, shutdown: Arc<AtomicBool>) -> CipherResult<()> {
    let listen_fd = reactor::socket::create_listen_socket(host, port)?;
    let epoll = Epoll::new()?;
    epoll.add(listen_fd, LISTEN_TOKEN, EPOLLIN)?;
    log::info!("cipher-server listening on {host}:{port}");

    let mut sessions: Slab<Session> = Slab::new(SOFT_CAP);
    let mut events = vec![unsafe { std::mem::zeroed::<EpollEvent>() }; MAX_EVENTS];

    while !shutdown.load(Ordering::Relaxed) {
        let timeout_ms = if shutdown.load(Ordering::Relaxed) { 100 } else { 1000 };
        let n = epoll.wait(&mut events, timeout_ms)?;

        for event in &events[..n] {
            let token = event.u64;
            if token == LISTEN_TOKEN {
                accept_all(listen_fd, &epoll, &mut sessions);
                continue;
            }

            let idx = token as usize;
            let readable = (event.events & EPOLLIN as u32) != 0;
            let writable = (event.events & EPOLLOUT as u32) != 0;
            let mut close = false;

            if readable {
                close |= dispatch_read(&epoll, &mut sessions, idx);
            }
            if writable && !close {
                close |= dispatch_write(&epoll, &mut sessions, idx);
            }
            if close {
                close_session(&epoll, &mut sessions, idx);
            }
        }
    }

    let open: Vec<(usize, c_int)> = sessions.iter().map(|(i, s)| (i, s.fd)).collect();
    for (idx, fd) in open {
        let _ = epoll.delete(fd);
        unsafe { libc::close(fd) };
        sessions.free(idx);
    }
    unsafe { libc::close(listen_fd) };
    Ok(())
}

fn accept_all(listen_fd: c_int, epoll: &Epoll, sessions: &mut Slab<Session>) {
    loop {
        match reactor::socket::accept_connection(listen_fd) {
            Ok(Some(fd)) => {
                let Some(idx) = sessions.allocate(Session::new(fd)) else {
                    log::warn!("session slab exhausted, dropping connection");
                    unsafe { libc::close(fd) };
                    continue;
                };
                if epoll.add(fd, idx as u64, EPOLLIN).is_err() {
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

fn dispatch_read(epoll: &Epoll, sessions: &mut Slab<Session>, idx: usize) -> bool {
    let Some(session) = sessions.get_mut(idx) else { return true };
    match session.drive_read() {
        Ok(Progress::ReadyToWrite) => {
            let fd = session.fd;
            let _ = epoll.modify(fd, idx as u64, EPOLLOUT);
            false
        }
        Ok(Progress::Continue) | Ok(Progress::ReadyForNextMessage) => false,
        Ok(Progress::Close) => true,
        Err(e) => {
            log::debug!("session {idx} read error: {e}");
            true
        }
    }
}

fn dispatch_write(epoll: &Epoll, sessions: &mut Slab<Session>, idx: usize) -> bool {
    let Some(session) = sessions.get_mut(idx) else { return true };
    match session.drive_write() {
        Ok(Progress::ReadyForNextMessage) => {
            let fd = session.fd;
            let _ = epoll.modify(fd, idx as u64, EPOLLIN);
            false
        }
        Ok(Progress::Continue) => false,
        Ok(Progress::Close) | Ok(Progress::ReadyToWrite) => true,
        Err(e) => {
            log::debug!("session {idx} write error: {e}");
            true
        }
    }
}

fn close_session(epoll: &Epoll, sessions: &mut Slab<Session>, idx: usize) {
    if let Some(session) = sessions.get(idx) {
        let fd = session.fd;
        let _ = epoll.delete(fd);
        unsafe { libc::close(fd) };
    }
    sessions.free(idx);
}

