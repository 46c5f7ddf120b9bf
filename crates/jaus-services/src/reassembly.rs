//! Reassembler: collects fragments of many large data sets at once.
//!
//! The receive path feeds fragments in with [`Reassembler::add_fragment`];
//! a timer path polls [`Reassembler::stalled_sets`] to decide which missing
//! fragments to ask the sender for. The reassembler itself never sends
//! anything and never sleeps.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use jaus_core::config::ReassemblyConfig;

use crate::fragment::{Fragment, FragmentKey, FragmentSet};

#[derive(Clone)]
pub struct Reassembler {
    active: Arc<Mutex<HashMap<FragmentKey, Assembly>>>,
    config: ReassemblyConfig,
}

struct Assembly {
    set: FragmentSet,
    started_at: Instant,
    last_fragment_at: Instant,
    request_count: u8,
    missing_at_last_request: usize,
}

/// A set that has gone quiet with fragments still missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledSet {
    pub key: FragmentKey,
    pub missing: Vec<u16>,
    /// Retransmit requests already made without progress.
    pub attempt: u8,
}

impl Reassembler {
    pub fn new(config: ReassemblyConfig) -> Self {
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    pub fn config(&self) -> &ReassemblyConfig {
        &self.config
    }

    /// Drop sets older than the assembly timeout.
    fn cleanup_stale(&self, active: &mut HashMap<FragmentKey, Assembly>) {
        let timeout = self.config.assembly_timeout();
        active.retain(|key, assembly| {
            let stale = assembly.started_at.elapsed() > timeout;
            if stale {
                tracing::warn!(
                    set = %key,
                    received = assembly.set.received(),
                    "removing stale fragment set (timed out)"
                );
            }
            !stale
        });
    }

    /// Add a fragment. Returns the merged message once its set completes.
    pub async fn add_fragment(&self, fragment: Fragment) -> Option<Bytes> {
        let mut active = self.active.lock().await;
        self.cleanup_stale(&mut active);

        let key = fragment.key();
        let seq = fragment.sequence_number();
        let now = Instant::now();
        let assembly = match active.entry(key) {
            Entry::Occupied(entry) => {
                let assembly = entry.into_mut();
                assembly.set.add_fragment(fragment);
                assembly.last_fragment_at = now;
                assembly
            }
            Entry::Vacant(entry) => {
                tracing::debug!(set = %key, seq, "new fragment set");
                entry.insert(Assembly {
                    set: FragmentSet::start(fragment),
                    started_at: now,
                    last_fragment_at: now,
                    request_count: 0,
                    missing_at_last_request: 0,
                })
            }
        };

        if !assembly.set.is_complete() {
            tracing::trace!(set = %key, seq, received = assembly.set.received(), "fragment stored");
            return None;
        }

        let fragments = assembly.set.received();
        let merged = assembly.set.merge();
        active.remove(&key);
        match merged {
            Ok(bytes) => {
                tracing::info!(
                    set = %key,
                    fragments,
                    bytes = bytes.len(),
                    "large data set reassembled"
                );
                Some(bytes)
            }
            Err(e) => {
                tracing::warn!(set = %key, error = %e, "complete fragment set failed to merge");
                None
            }
        }
    }

    /// Identities of the sets currently being received.
    pub async fn in_progress(&self) -> Vec<FragmentKey> {
        self.active.lock().await.keys().copied().collect()
    }

    /// Missing sequence numbers of every set that has a known gap.
    pub async fn missing_packets(&self) -> Vec<(FragmentKey, Vec<u16>)> {
        let active = self.active.lock().await;
        active
            .iter()
            .map(|(key, assembly)| (*key, assembly.set.missing_packets()))
            .filter(|(_, missing)| !missing.is_empty())
            .collect()
    }

    /// Sets with no fragment for longer than `delay` that still have
    /// retransmit requests left.
    ///
    /// A set that received fragments since its last request gets its request
    /// count reset.
    pub async fn stalled_sets(&self, delay: Duration) -> Vec<StalledSet> {
        let limit = self.config.max_retransmit_requests;
        let mut active = self.active.lock().await;
        self.cleanup_stale(&mut active);
        active
            .iter_mut()
            .filter(|(_, a)| a.last_fragment_at.elapsed() > delay)
            .filter_map(|(key, a)| {
                let missing = a.set.missing_packets();
                if missing.is_empty() {
                    return None;
                }

                let current = missing.len();
                if a.missing_at_last_request > 0 && current < a.missing_at_last_request {
                    tracing::debug!(
                        set = %key,
                        was = a.missing_at_last_request,
                        now = current,
                        "progress detected, resetting retransmit request count"
                    );
                    a.request_count = 0;
                }

                if a.request_count >= limit {
                    return None;
                }

                Some(StalledSet {
                    key: *key,
                    missing,
                    attempt: a.request_count,
                })
            })
            .collect()
    }

    /// Note that missing fragments were requested for `key`, remembering how
    /// many were missing so later progress can be detected.
    pub async fn record_retransmit_request(&self, key: &FragmentKey, missing_count: usize) {
        let mut active = self.active.lock().await;
        if let Some(assembly) = active.get_mut(key) {
            assembly.request_count = assembly.request_count.saturating_add(1);
            assembly.missing_at_last_request = missing_count;
        }
    }

    /// Give up on a set. Returns whether it existed.
    pub async fn abandon(&self, key: &FragmentKey) -> bool {
        let mut active = self.active.lock().await;
        let removed = active.remove(key);
        if let Some(assembly) = &removed {
            tracing::warn!(
                set = %key,
                received = assembly.set.received(),
                "fragment set abandoned, fragments unrecoverable"
            );
        }
        removed.is_some()
    }
}
