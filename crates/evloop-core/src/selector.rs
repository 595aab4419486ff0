// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The I/O selector task: one per process, regardless of how many contexts
//! register I/O watchers with it.
//!
//! This follows the spec's literal `select(2)` contract rather than
//! reimplementing it on top of an `epoll`/`kqueue` abstraction, so it binds
//! directly to `libc::select` and a loopback UDP "wake socket" used purely as
//! a self-pipe: any byte sent to the socket's own address makes the current
//! `select` return immediately, the same trick this corpus's own examples use
//! a notify pipe for.

use crate::context::Context;
use crate::trace::{self, TraceEvent};
use crate::watcher::WatcherKind;
use evloop_abi::{EventMask, LoopError, LoopResult, WakeBits, WatcherId};
use evloop_ringbuf::ringbuf_entry;
use evloop_runtime::critical_section;
use std::net::UdpSocket;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

struct Registration {
    context: Arc<Context>,
    id: WatcherId,
}

struct SelectorHandle {
    wake_socket: UdpSocket,
    wake_addr: std::net::SocketAddr,
    iolist: Mutex<Vec<Registration>>,
    backoff: Duration,
}

static SELECTOR: OnceLock<Mutex<Option<Arc<SelectorHandle>>>> = OnceLock::new();

/// `iothread_init`: starts the selector task. Idempotent per process — a
/// second call is a no-op that returns `Ok(())` without spawning a second
/// thread.
pub fn iothread_init(backoff: Duration) -> LoopResult<()> {
    let cell = SELECTOR.get_or_init(|| Mutex::new(None));
    let mut guard = cell.lock().unwrap_or_else(|e| e.into_inner());
    if guard.is_some() {
        return Ok(());
    }
    let handle = spawn(backoff)?;
    *guard = Some(handle);
    Ok(())
}

fn handle() -> Option<Arc<SelectorHandle>> {
    SELECTOR
        .get()?
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}

fn spawn(backoff: Duration) -> LoopResult<Arc<SelectorHandle>> {
    let wake_socket = UdpSocket::bind("127.0.0.1:0")
        .map_err(|_| LoopError::ResourceExhausted("binding the selector's wake socket"))?;
    wake_socket
        .set_nonblocking(true)
        .map_err(|_| LoopError::ResourceExhausted("configuring the wake socket"))?;
    let wake_addr = wake_socket
        .local_addr()
        .map_err(|_| LoopError::ResourceExhausted("reading the wake socket's local address"))?;

    let handle = Arc::new(SelectorHandle {
        wake_socket,
        wake_addr,
        iolist: Mutex::new(Vec::new()),
        backoff,
    });

    let worker = Arc::clone(&handle);
    std::thread::Builder::new()
        .name("evloop-io-selector".into())
        .spawn(move || run_selector_loop(&worker))
        .map_err(|_| LoopError::ResourceExhausted("spawning the selector thread"))?;

    Ok(handle)
}

/// Registers `id` (an I/O watcher of `context`) with the selector, starting
/// the selector task first if it has not been started yet.
pub fn add(context: Arc<Context>, id: WatcherId, backoff: Duration) -> LoopResult<()> {
    iothread_init(backoff)?;
    let handle = handle().expect("selector initialized by iothread_init above");
    critical_section(|| {
        handle
            .iolist
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Registration { context, id });
    });
    wake(&handle);
    Ok(())
}

pub fn remove(context: &Arc<Context>, id: WatcherId) {
    let Some(handle) = handle() else { return };
    critical_section(|| {
        handle
            .iolist
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|reg| !(Arc::ptr_eq(&reg.context, context) && reg.id == id));
    });
    wake(&handle);
}

/// Called by the dispatcher after delivering an I/O callback, to force the
/// selector to rebuild its readiness set and re-admit the watcher it just
/// drained bits from.
pub fn notify_drained() {
    if let Some(handle) = handle() {
        wake(&handle);
    }
}

fn wake(handle: &SelectorHandle) {
    let _ = handle.wake_socket.send_to(&[0u8], handle.wake_addr);
    ringbuf_entry!(trace::EVLOOP_TRACE, TraceEvent::SelectorWoke);
}

fn run_selector_loop(handle: &SelectorHandle) {
    let wake_fd = handle.wake_socket.as_raw_fd();
    loop {
        let mut read_fds: libc::fd_set = unsafe { std::mem::zeroed() };
        let mut write_fds: libc::fd_set = unsafe { std::mem::zeroed() };
        let mut err_fds: libc::fd_set = unsafe { std::mem::zeroed() };
        unsafe {
            libc::FD_ZERO(&mut read_fds);
            libc::FD_ZERO(&mut write_fds);
            libc::FD_ZERO(&mut err_fds);
        }

        let mut max_fd = wake_fd;
        critical_section(|| {
            let iolist = handle.iolist.lock().unwrap_or_else(|e| e.into_inner());
            for reg in iolist.iter() {
                build_readiness_entry(reg, &mut read_fds, &mut write_fds, &mut err_fds, &mut max_fd);
            }
        });
        unsafe {
            libc::FD_SET(wake_fd, &mut read_fds);
        }

        let ret = unsafe {
            libc::select(
                max_fd + 1,
                &mut read_fds,
                &mut write_fds,
                &mut err_fds,
                std::ptr::null_mut(),
            )
        };

        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            tracing::warn!(error = %err, "selector: select() failed, backing off");
            std::thread::sleep(handle.backoff);
            continue;
        }

        if unsafe { libc::FD_ISSET(wake_fd, &read_fds) } {
            if !drain_wake_socket(handle) {
                ringbuf_entry!(trace::EVLOOP_TRACE, TraceEvent::SelectorTerminated);
                tracing::error!("selector: wake socket closed or errored, terminating I/O dispatch");
                return;
            }
        }

        critical_section(|| {
            let iolist = handle.iolist.lock().unwrap_or_else(|e| e.into_inner());
            for reg in iolist.iter() {
                deliver_readiness(reg, &read_fds, &write_fds, &err_fds);
            }
        });
    }
}

fn build_readiness_entry(
    reg: &Registration,
    read_fds: &mut libc::fd_set,
    write_fds: &mut libc::fd_set,
    err_fds: &mut libc::fd_set,
    max_fd: &mut RawFd,
) {
    if !reg.context.registry.is_active(reg.id).unwrap_or(false) {
        return;
    }
    let info = reg.context.registry.with_kind(reg.id, |kind| match kind {
        WatcherKind::Io(fields) => Some((
            fields.fd,
            fields.requested,
            fields.pending.load(Ordering::Acquire) != 0,
        )),
        _ => None,
    });
    let Ok(Some((fd, requested, has_pending))) = info else {
        return;
    };
    // Watchers with undelivered events are excluded to prevent a wakeup
    // storm: the dispatcher, not the selector, decides when to re-admit them
    // (see `notify_drained`).
    if fd < 0 || has_pending {
        return;
    }
    if requested.contains(EventMask::READ) {
        unsafe { libc::FD_SET(fd, read_fds) };
    }
    if requested.contains(EventMask::WRITE) {
        unsafe { libc::FD_SET(fd, write_fds) };
    }
    if requested.contains(EventMask::ERROR) {
        unsafe { libc::FD_SET(fd, err_fds) };
    }
    *max_fd = (*max_fd).max(fd);
}

fn deliver_readiness(
    reg: &Registration,
    read_fds: &libc::fd_set,
    write_fds: &libc::fd_set,
    err_fds: &libc::fd_set,
) {
    if !reg.context.registry.is_active(reg.id).unwrap_or(false) {
        return;
    }
    let observed = reg.context.registry.with_kind(reg.id, |kind| match kind {
        WatcherKind::Io(fields) => {
            if fields.fd < 0 {
                return EventMask::empty();
            }
            let mut observed = EventMask::empty();
            if unsafe { libc::FD_ISSET(fields.fd, read_fds) } {
                observed |= EventMask::READ;
            }
            if unsafe { libc::FD_ISSET(fields.fd, write_fds) } {
                observed |= EventMask::WRITE;
            }
            if unsafe { libc::FD_ISSET(fields.fd, err_fds) } {
                observed |= EventMask::ERROR;
            }
            let observed = observed & fields.requested;
            if !observed.is_empty() {
                fields.pending.fetch_or(observed.bits(), Ordering::AcqRel);
            }
            observed
        }
        _ => EventMask::empty(),
    });
    if matches!(observed, Ok(bits) if !bits.is_empty()) {
        reg.context.bits.set(WakeBits::IO.bits());
    }
}

/// Drains pending bytes from the wake socket. Returns `false` if the socket
/// is fatally broken and the selector task should terminate.
fn drain_wake_socket(handle: &SelectorHandle) -> bool {
    let mut buf = [0u8; 64];
    loop {
        match handle.wake_socket.recv(&mut buf) {
            Ok(_) => continue,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return true,
            Err(_) => return false,
        }
    }
}
