//! Per-store state: resource limits and the wall-clock deadline.

use std::fmt;
use std::time::Instant;

use wasmtime::ResourceLimiter;
use wasmtime_wasi::preview1::WasiP1Ctx;

const MAX_TABLE_ELEMENTS: usize = 10_000;

/// The first limit a store tried to exceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitHit {
    Memory { requested: usize, limit: u64 },
    Table { requested: usize, limit: usize },
}

impl fmt::Display for LimitHit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitHit::Memory { requested, limit } => {
                write!(f, "requested {requested} bytes of linear memory, limit is {limit}")
            }
            LimitHit::Table { requested, limit } => {
                write!(f, "requested {requested} table elements, limit is {limit}")
            }
        }
    }
}

/// Refuses memory and table growth beyond fixed caps.
///
/// A refusal makes the guest's allocation fail; the interpreter then
/// usually aborts, and [`hit`](Self::hit) tells the caller why.
#[derive(Debug)]
pub struct SandboxLimiter {
    max_memory: u64,
    hit: Option<LimitHit>,
}

impl SandboxLimiter {
    pub fn new(max_memory: u64) -> Self {
        Self {
            max_memory,
            hit: None,
        }
    }

    pub fn hit(&self) -> Option<LimitHit> {
        self.hit
    }

    fn refuse(&mut self, hit: LimitHit) -> anyhow::Result<bool> {
        self.hit.get_or_insert(hit);
        Ok(false)
    }
}

impl ResourceLimiter for SandboxLimiter {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        if desired as u64 > self.max_memory {
            return self.refuse(LimitHit::Memory {
                requested: desired,
                limit: self.max_memory,
            });
        }
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        if desired > MAX_TABLE_ELEMENTS {
            return self.refuse(LimitHit::Table {
                requested: desired,
                limit: MAX_TABLE_ELEMENTS,
            });
        }
        Ok(true)
    }
}

/// Everything one [`wasmtime::Store`] owns.
pub struct StoreData {
    pub limiter: SandboxLimiter,
    pub wasi: WasiP1Ctx,
    deadline: Instant,
    timed_out: bool,
}

impl StoreData {
    pub fn new(max_memory: u64, wasi: WasiP1Ctx, deadline: Instant) -> Self {
        Self {
            limiter: SandboxLimiter::new(max_memory),
            wasi,
            deadline,
            timed_out: false,
        }
    }

    /// Called on every epoch tick. Once the deadline has passed the
    /// store stays timed out.
    pub fn check_deadline(&mut self, now: Instant) -> bool {
        self.timed_out |= now >= self.deadline;
        self.timed_out
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }
}
