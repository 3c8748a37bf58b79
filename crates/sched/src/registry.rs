//! The catalog of known queues.
//!
//! Queues appear when a refresh reports them and disappear when a refresh
//! no longer does. Each entry carries the last-seen resource hint and the
//! count of workers currently processing the queue. All mutation happens
//! under one mutex; nothing blocks on I/O while holding it.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use gantry_core::Resource;

use crate::error::SchedError;

/// A read-only copy of one registry entry, taken under the lock.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub name: String,
    pub resource: Option<Resource>,
    pub in_flight: u32,
}

#[derive(Debug, Default)]
struct QueueEntry {
    resource: Option<Resource>,
    in_flight: u32,
}

#[derive(Default)]
pub struct Registry {
    queues: Mutex<HashMap<String, QueueEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile the catalog against the authoritative queue set.
    ///
    /// New queues start with no hint and zero in-flight work. Removed
    /// queues are discarded outright; a worker already processing one
    /// runs to completion but the queue will not be offered again.
    pub fn align(&self, expected: &HashSet<String>) -> (Vec<String>, Vec<String>) {
        let mut queues = self.queues.lock().unwrap();

        let mut added = Vec::new();
        for name in expected {
            if !queues.contains_key(name) {
                queues.insert(name.clone(), QueueEntry::default());
                added.push(name.clone());
            }
        }

        let mut removed = Vec::new();
        queues.retain(|name, _| {
            let keep = expected.contains(name);
            if !keep {
                removed.push(name.clone());
            }
            keep
        });

        (added, removed)
    }

    /// Snapshot every queue, sorted ascending by in-flight count so the
    /// least-busy queues are offered work first. Tie order is arbitrary;
    /// the producer shuffles the subset it admits.
    pub fn rank(&self) -> Vec<QueueSnapshot> {
        let queues = self.queues.lock().unwrap();
        let mut ranked: Vec<QueueSnapshot> = queues
            .iter()
            .map(|(name, entry)| QueueSnapshot {
                name: name.clone(),
                resource: entry.resource.clone(),
                in_flight: entry.in_flight,
            })
            .collect();
        ranked.sort_by_key(|q| q.in_flight);
        ranked
    }

    /// The queue's resource hint, distinguishing "unknown queue" from
    /// "known queue without a hint".
    pub fn lookup(&self, name: &str) -> Result<Option<Resource>, SchedError> {
        let queues = self.queues.lock().unwrap();
        queues
            .get(name)
            .map(|entry| entry.resource.clone())
            .ok_or_else(|| SchedError::QueueUnknown(name.to_string()))
    }

    /// Record the resources a queue's work items generally need.
    pub fn set_resource(&self, name: &str, resource: Resource) -> Result<(), SchedError> {
        if resource.is_empty() {
            return Err(SchedError::InvalidArgument(format!(
                "clearing the resource hint for queue {name} is not supported"
            )));
        }

        let mut queues = self.queues.lock().unwrap();
        let entry = queues
            .get_mut(name)
            .ok_or_else(|| SchedError::QueueUnknown(name.to_string()))?;
        entry.resource = Some(resource);
        Ok(())
    }

    /// Clone of the hint; callers cannot mutate registry state through it.
    pub fn get_resource(&self, name: &str) -> Option<Resource> {
        let queues = self.queues.lock().unwrap();
        queues.get(name).and_then(|entry| entry.resource.clone())
    }

    /// Worker accounting. Unknown names are ignored: the queue may have
    /// been removed while its worker was still running.
    pub fn inc_in_flight(&self, name: &str) {
        let mut queues = self.queues.lock().unwrap();
        if let Some(entry) = queues.get_mut(name) {
            entry.in_flight += 1;
        }
    }

    pub fn dec_in_flight(&self, name: &str) {
        let mut queues = self.queues.lock().unwrap();
        if let Some(entry) = queues.get_mut(name) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
        }
    }

    pub fn len(&self) -> usize {
        self.queues.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.lock().unwrap().is_empty()
    }
}
