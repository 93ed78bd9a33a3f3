// Edge-triggered epoll wrapper. One Epoll instance per reactor loop.
use crate::error::ReactorResult;
use libc::{c_int, EPOLLET, epoll_event};
use std::io;
use std::ptr;

pub const EPOLLIN: i32 = libc::EPOLLIN;
pub const EPOLLOUT: i32 = libc::EPOLLOUT;

pub use libc::epoll_event as EpollEvent;

pub struct Epoll {
    fd: c_int,
}

impl Epoll {
    pub fn new() -> ReactorResult<Self> {
        unsafe {
            let fd = libc::epoll_create1(0);
            if fd < 0 {
                return Err(io::Error::last_os_error().into());
            }
            Ok(Self { fd })
        }
    }

    /// Register `fd` under `token`, always edge-triggered.
    pub fn add(&self, fd: c_int, token: u64, interests: i32) -> ReactorResult<()> {
        let mut event = epoll_event {
            events: (interests | EPOLLET) as u32,
            u64: token,
        };
        unsafe {
            if libc::epoll_ctl(self.fd, libc::EPOLL_CTL_ADD, fd, &mut event) < 0 {
                return Err(io::Error::last_os_error().into());
            }
        }
        Ok(())
    }

    pub fn modify(&self, fd: c_int, token: u64, interests: i32) -> ReactorResult<()> {
        let mut event = epoll_event {
            events: (interests | EPOLLET) as u32,
            u64: token,
        };
        unsafe {
            if libc::epoll_ctl(self.fd, libc::EPOLL_CTL_MOD, fd, &mut event) < 0 {
                return Err(io::Error::last_os_error().into());
            }
        }
        Ok(())
    }

    /// Tolerates ENOENT — deleting an fd that was never registered, or was
    /// already dropped by the kernel on close(), is not an error here.
    pub fn delete(&self, fd: c_int) -> ReactorResult<()> {
        unsafe {
            if libc::epoll_ctl(self.fd, libc::EPOLL_CTL_DEL, fd, ptr::null_mut()) < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ENOENT) {
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    /// Tolerates EINTR by reporting zero ready events.
    pub fn wait(&self, events: &mut [epoll_event], timeout_ms: i32) -> ReactorResult<usize> {
        unsafe {
            let res = libc::epoll_wait(self.fd, events.as_mut_ptr(), events.len() as c_int, timeout_ms);
            if res < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    return Ok(0);
                }
                return Err(err.into());
            }
            Ok(res as usize)
        }
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
