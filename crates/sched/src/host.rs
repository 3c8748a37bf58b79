//! Host capacity sampling.
//!
//! Admission control compares a queue's resource hint against what this
//! machine has free right now. GPU availability follows the board rule:
//! jobs are never split across boards, so the sample reports the largest
//! single board's slots and VRAM rather than fleet-wide totals.

use std::thread;

use bytesize::ByteSize;
use tracing::debug;

use gantry_core::config::Limits;
use gantry_core::{GpuBoard, Resource};

pub trait HostCapacity: Send + Sync {
    /// Sample what the host can currently offer to a new job.
    fn sample(&self) -> Resource;
}

/// Live host sampling, clamped to the operator's limits.
///
/// CPUs and RAM are read from the machine; scratch disk is the declared
/// budget (the runner owns its working directory, the OS cannot say how
/// much of it jobs may take). Zero-valued limits mean unbounded.
pub struct SystemCapacity {
    limits: Limits,
    boards: Vec<GpuBoard>,
}

impl SystemCapacity {
    pub fn new(limits: Limits, boards: Vec<GpuBoard>) -> Self {
        Self { limits, boards }
    }

    fn free_cpus(&self) -> u32 {
        let avail = thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        clamp_nonzero(avail, self.limits.max_cores)
    }

    fn free_ram(&self) -> ByteSize {
        match mem_available() {
            Some(avail) => ByteSize::b(clamp_nonzero(
                avail.as_u64(),
                self.limits.max_mem.as_u64(),
            )),
            // No /proc on this platform: the operator limit is the best
            // answer we have.
            None => self.limits.max_mem,
        }
    }

    fn largest_board(&self) -> (u32, ByteSize) {
        self.boards
            .iter()
            .max_by_key(|b| (b.slots, b.vram))
            .map(|b| (b.slots, b.vram))
            .unwrap_or((0, ByteSize::b(0)))
    }
}

impl HostCapacity for SystemCapacity {
    fn sample(&self) -> Resource {
        let (gpus, gpu_mem) = self.largest_board();
        let sample = Resource {
            cpus: self.free_cpus(),
            ram: self.free_ram(),
            disk: self.limits.max_disk,
            gpus,
            gpu_mem,
        };
        debug!(%sample, "host capacity sampled");
        sample
    }
}

/// Fixed availability, for tests and dry runs.
pub struct FixedCapacity(pub Resource);

impl HostCapacity for FixedCapacity {
    fn sample(&self) -> Resource {
        self.0.clone()
    }
}

fn clamp_nonzero<T: Ord + Copy + Default>(value: T, limit: T) -> T {
    if limit == T::default() {
        value
    } else {
        value.min(limit)
    }
}

/// MemAvailable from /proc/meminfo, in bytes.
fn mem_available() -> Option<ByteSize> {
    let text = std::fs::read_to_string("/proc/meminfo").ok()?;
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            let kib: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(ByteSize::kib(kib));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_cores: u32, max_mem: ByteSize, max_disk: ByteSize) -> Limits {
        Limits {
            max_cores,
            max_mem,
            max_disk,
        }
    }

    #[test]
    fn largest_single_board_wins() {
        let host = SystemCapacity::new(
            limits(0, ByteSize::b(0), ByteSize::gb(100)),
            vec![
                GpuBoard {
                    slots: 2,
                    vram: ByteSize::gib(8),
                },
                GpuBoard {
                    slots: 4,
                    vram: ByteSize::gib(16),
                },
            ],
        );
        let sample = host.sample();
        // Two boards are never combined into one job.
        assert_eq!(sample.gpus, 4);
        assert_eq!(sample.gpu_mem, ByteSize::gib(16));
    }

    #[test]
    fn no_boards_means_no_gpu_capacity() {
        let host = SystemCapacity::new(limits(0, ByteSize::b(0), ByteSize::b(0)), Vec::new());
        let sample = host.sample();
        assert_eq!(sample.gpus, 0);
        assert_eq!(sample.gpu_mem, ByteSize::b(0));
    }

    #[test]
    fn core_limit_clamps_the_live_count() {
        let host = SystemCapacity::new(limits(1, ByteSize::b(0), ByteSize::b(0)), Vec::new());
        assert_eq!(host.sample().cpus, 1);
    }

    #[test]
    fn disk_is_the_declared_budget() {
        let host = SystemCapacity::new(
            limits(0, ByteSize::b(0), ByteSize::gb(250)),
            Vec::new(),
        );
        assert_eq!(host.sample().disk, ByteSize::gb(250));
    }

    #[test]
    fn fixed_capacity_returns_its_resource() {
        let fixed = FixedCapacity(Resource {
            cpus: 8,
            ..Resource::default()
        });
        assert_eq!(fixed.sample().cpus, 8);
    }
}
