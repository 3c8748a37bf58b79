//! Nominal resource requirements and the component-wise fit predicate.
//!
//! A [`Resource`] describes what an experiment asks for (or what a host has
//! free): CPU cores, RAM, local disk, GPU slots and GPU memory. GPU slots
//! are counted at the board level — a multi-GPU job is never split across
//! boards, so availability is always reported for the largest single board.

use std::fmt;
use std::str::FromStr;

use bytesize::ByteSize;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A resource quintuple. All-zero means "no declared requirement".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub cpus: u32,
    #[serde(default)]
    pub ram: ByteSize,
    #[serde(default, alias = "hdd")]
    pub disk: ByteSize,
    #[serde(default)]
    pub gpus: u32,
    #[serde(default, alias = "gpuMem")]
    pub gpu_mem: ByteSize,
}

impl Resource {
    /// Component-wise ≤ against an availability sample.
    ///
    /// Units are typed, so there is no malformed-unit failure mode here;
    /// bad unit strings are rejected when the payload or limit is parsed.
    pub fn fits(&self, avail: &Resource) -> bool {
        self.cpus <= avail.cpus
            && self.ram <= avail.ram
            && self.disk <= avail.disk
            && self.gpus <= avail.gpus
            && self.gpu_mem <= avail.gpu_mem
    }

    /// Names of the components that do not fit, for operator-readable
    /// rejection messages. Empty when `fits` would return true.
    pub fn shortfall(&self, avail: &Resource) -> Vec<&'static str> {
        let mut short = Vec::new();
        if self.cpus > avail.cpus {
            short.push("cpus");
        }
        if self.ram > avail.ram {
            short.push("ram");
        }
        if self.disk > avail.disk {
            short.push("disk");
        }
        if self.gpus > avail.gpus {
            short.push("gpus");
        }
        if self.gpu_mem > avail.gpu_mem {
            short.push("gpu_mem");
        }
        short
    }

    /// Whether no requirement at all has been declared.
    pub fn is_empty(&self) -> bool {
        *self == Resource::default()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpus={} ram={} disk={} gpus={} gpu_mem={}",
            self.cpus,
            self.ram.to_string_as(true),
            self.disk.to_string_as(true),
            self.gpus,
            self.gpu_mem.to_string_as(true),
        )
    }
}

/// One physical GPU board: how many schedulable slots it carries and the
/// VRAM shared by those slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuBoard {
    pub slots: u32,
    pub vram: ByteSize,
}

/// Parse a board inventory string: comma-separated `SLOTSxVRAM` entries,
/// one per board, e.g. `4x16GiB,4x16GiB,2x8GiB`. Empty input means the
/// host carries no GPUs.
pub fn parse_gpu_boards(spec: &str) -> Result<Vec<GpuBoard>, CoreError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Ok(Vec::new());
    }

    let mut boards = Vec::new();
    for entry in spec.split(',') {
        let entry = entry.trim();
        let (slots, vram) = entry
            .split_once(|c| c == 'x' || c == 'X')
            .ok_or_else(|| CoreError::InvalidGpuInventory(entry.to_string()))?;
        let slots: u32 = slots
            .trim()
            .parse()
            .map_err(|_| CoreError::InvalidGpuInventory(entry.to_string()))?;
        let vram = parse_bytes(vram)?;
        if slots == 0 {
            return Err(CoreError::InvalidGpuInventory(entry.to_string()));
        }
        boards.push(GpuBoard { slots, vram });
    }
    Ok(boards)
}

/// Parse a human byte quantity (`512gb`, `16GiB`, `1073741824`).
pub fn parse_bytes(s: &str) -> Result<ByteSize, CoreError> {
    ByteSize::from_str(s.trim()).map_err(|_| CoreError::InvalidByteQuantity(s.to_string()))
}
