// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! TCP port allocation for child processes.
//!
//! A port is handed out only if it is free on the host *and* not already
//! reserved by this allocator. Reservation and probing happen under one lock,
//! so two concurrent callers can never receive the same port. Ports stay
//! reserved until [`PortAllocator::release`] is called, which the supervisor
//! does when the owning process record is removed.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Mutex;

use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug)]
struct AllocatorState {
    reserved: HashSet<u16>,
    /// Next port to probe; rotates through the range so recently released
    /// ports are not immediately reused.
    cursor: u16,
}

/// Allocates ports from an inclusive range.
#[derive(Debug)]
pub struct PortAllocator {
    start: u16,
    end: u16,
    state: Mutex<AllocatorState>,
}

impl PortAllocator {
    /// Create an allocator over `start..=end`.
    pub fn new(start: u16, end: u16) -> Self {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        Self {
            start,
            end,
            state: Mutex::new(AllocatorState {
                reserved: HashSet::new(),
                cursor: start,
            }),
        }
    }

    /// Reserve a port that is currently unbound on the host.
    ///
    /// Probes every port in the range at most once.
    pub fn allocate(&self) -> Result<u16> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let span = u32::from(self.end - self.start) + 1;

        for _ in 0..span {
            let candidate = state.cursor;
            state.cursor = if candidate >= self.end {
                self.start
            } else {
                candidate + 1
            };

            if state.reserved.contains(&candidate) {
                continue;
            }
            if !is_port_free(candidate) {
                debug!(port = candidate, "Port in use on host, skipping");
                continue;
            }

            state.reserved.insert(candidate);
            debug!(port = candidate, "Allocated port");
            return Ok(candidate);
        }

        Err(Error::ResourceExhausted {
            start: self.start,
            end: self.end,
        })
    }

    /// Return a port to the pool. Releasing an unknown port is a no-op.
    pub fn release(&self, port: u16) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.reserved.remove(&port) {
            debug!(port, "Released port");
        }
    }

    /// Whether the port is currently handed out by this allocator.
    pub fn is_reserved(&self, port: u16) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.reserved.contains(&port)
    }

    /// Inclusive range this allocator serves.
    pub fn range(&self) -> (u16, u16) {
        (self.start, self.end)
    }
}

fn is_port_free(port: u16) -> bool {
    TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).is_ok()
}
