// Copyright 2026 the Policy Stack Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Host-side observability adapters for `policy_stack`.
//!
//! The VM core is `no_std` and never reads time directly; this crate supplies
//! the std pieces an embedder usually wants:
//!
//! - [`WallClock`], a monotonic [`Clock`] for profiling durations,
//! - [`tracing_sink`], a trace sink that forwards VM steps to `tracing`,
//! - [`render_profile`], a human-readable view of [`ProfileStats`].

use std::fmt::Write as _;
use std::time::Instant;

use policy_stack::opcode::{OPCODE_COUNT, OpCode};
use policy_stack::profile::{Clock, ProfileStats};
use policy_stack::trace::TraceEvent;

/// A monotonic nanosecond clock backed by [`Instant`].
///
/// Timestamps are relative to the clock's construction.
#[derive(Clone, Debug)]
pub struct WallClock {
    origin: Instant,
}

impl WallClock {
    /// Creates a clock whose origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn now_nanos(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Returns a trace sink that emits each VM step as a `tracing` event at
/// TRACE level.
///
/// Install with `vm.set_trace_sink(tracing_sink())`.
#[must_use]
pub fn tracing_sink() -> impl FnMut(&TraceEvent) + 'static {
    |event: &TraceEvent| {
        tracing::trace!(
            pc = event.pc,
            opcode = event.opcode.name(),
            stack_size = event.stack_size,
            call_depth = event.call_depth,
            "vm step"
        );
    }
}

/// Renders profile counters as a per-opcode table, busiest opcodes first.
///
/// Opcodes that never executed are omitted.
#[must_use]
pub fn render_profile(stats: &ProfileStats) -> String {
    let mut rows: Vec<(OpCode, u64, u64)> = (0..OPCODE_COUNT)
        .filter_map(|byte| OpCode::from_u8(byte as u8))
        .map(|opcode| {
            (
                opcode,
                stats.count_for(opcode),
                stats.nanoseconds_for(opcode),
            )
        })
        .filter(|&(_, count, _)| count > 0)
        .collect();
    rows.sort_by(|a, b| b.2.cmp(&a.2).then(b.1.cmp(&a.1)));

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<16} {:>12} {:>14} {:>10}",
        "opcode", "count", "total ns", "ns/op"
    );
    for (opcode, count, nanos) in rows {
        let per_op = if count == 0 { 0 } else { nanos / count };
        let _ = writeln!(
            out,
            "{:<16} {:>12} {:>14} {:>10}",
            opcode.name(),
            count,
            nanos,
            per_op
        );
    }
    let _ = writeln!(
        out,
        "runs: {}  steps: {}  total run ns: {}",
        stats.runs, stats.executed_steps, stats.total_run_nanoseconds
    );
    out
}
