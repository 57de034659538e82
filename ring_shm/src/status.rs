//! Ring status snapshots for tooling

use crate::owner::Role;
use crate::ring::RingBuffer;
use ring_common::ring::{RingMode, SaturationPolicy};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::num::NonZeroU32;

/// Point-in-time view of one ring
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RingStatus {
    /// Ring name
    pub name: String,
    /// Capacity in bytes
    pub capacity: usize,
    /// Framing discipline
    pub mode: RingMode,
    /// Set option flags, lowercase
    pub flags: Vec<String>,
    /// Scratchpad size in bytes
    pub scratchpad: usize,
    /// Saturation policy
    pub policy: SaturationPolicy,
    /// Reader role holder
    pub reader: Option<u32>,
    /// Writer role holder
    pub writer: Option<u32>,
    /// Counted handles attached
    pub attached: u32,
    /// Bytes waiting to be read
    pub available_to_read: usize,
    /// Bytes free for writing
    pub available_to_write: usize,
    /// Writes dropped by the drop-newest policy
    pub dropped: u64,
    /// Creation time, ns since the Unix epoch
    pub created_ts: u64,
}

impl RingStatus {
    /// Snapshot `ring`.
    pub fn from_ring(ring: &RingBuffer) -> Self {
        Self {
            name: ring.name().to_string(),
            capacity: ring.capacity(),
            mode: ring.mode(),
            flags: ring.flags().names().into_iter().map(String::from).collect(),
            scratchpad: ring.descriptor().scratchpad,
            policy: ring.descriptor().policy,
            reader: ring.owner(Role::Reader).id().map(NonZeroU32::get),
            writer: ring.owner(Role::Writer).id().map(NonZeroU32::get),
            attached: ring.attached(),
            available_to_read: ring.available_to_read(),
            available_to_write: ring.available_to_write(),
            dropped: ring.dropped(),
            created_ts: ring.descriptor().created_ts,
        }
    }

    /// Fill level in percent.
    pub fn fill_percent(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.available_to_read as f64 * 100.0 / self.capacity as f64
    }
}

fn holder(id: Option<u32>) -> String {
    id.map_or_else(|| "-".to_string(), |id| id.to_string())
}

/// Plain-text table of `rings`, one line each.
pub fn render_report(rings: &[RingStatus]) -> String {
    let width = rings
        .iter()
        .map(|r| r.name.len())
        .max()
        .unwrap_or(0)
        .max(4);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<width$}  {:<10}  {:>10}  {:>6}  {:>8}  {:>8}  {:>4}  {:>8}  flags",
        "name", "mode", "capacity", "fill%", "reader", "writer", "att", "dropped"
    );
    for ring in rings {
        let flags = if ring.flags.is_empty() {
            "-".to_string()
        } else {
            ring.flags.join(",")
        };
        let _ = writeln!(
            out,
            "{:<width$}  {:<10}  {:>10}  {:>6.1}  {:>8}  {:>8}  {:>4}  {:>8}  {}",
            ring.name,
            ring.mode.as_str(),
            ring.capacity,
            ring.fill_percent(),
            holder(ring.reader),
            holder(ring.writer),
            ring.attached,
            ring.dropped,
            flags
        );
    }
    out
}
