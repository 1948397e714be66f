//! Bounded, RTT-sorted queue of probed endpoints.
//!
//! The queue holds the best endpoints found so far, ascending by RTT.
//! Acceptable entries that arrive while the queue is full overflow into an
//! unbounded reserved FIFO and re-enter when expiry frees slots. When
//! every slot holds an entry under the RTT threshold the queue is in
//! *ideal mode* and the scan engine parks on [`IpQueue::wait_available`]
//! until expiry or a dequeue wakes it.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

use crate::types::{IpInfo, ScannerOptions};

struct QueueInner {
    queue: Vec<IpInfo>,
    reserved: VecDeque<IpInfo>,
    in_ideal_mode: bool,
}

/// Priority queue of endpoints, deduplicated by `addr:port` and kept in
/// ascending RTT order.
pub struct IpQueue {
    inner: Mutex<QueueInner>,
    wake: Notify,
    max_queue_size: usize,
    max_ttl: Duration,
    rtt_threshold: Duration,
}

impl IpQueue {
    /// Build a queue from scanner options.
    #[must_use]
    pub fn new(options: &ScannerOptions) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                queue: Vec::new(),
                reserved: VecDeque::new(),
                in_ideal_mode: false,
            }),
            wake: Notify::new(),
            max_queue_size: options.ip_queue_size,
            max_ttl: options.ip_queue_ttl,
            rtt_threshold: options.max_desirable_rtt,
        }
    }

    /// Insert an endpoint. Duplicates and entries over the RTT threshold
    /// are ignored. A full queue either displaces its worst member (when
    /// the newcomer beats it) or overflows the newcomer into the reserved
    /// FIFO.
    ///
    /// Returns `true` once every slot holds an entry under the threshold:
    /// the queue has reached ideal mode and callers should wait for
    /// expiry before scanning further.
    pub fn enqueue(&self, info: IpInfo) -> bool {
        let mut inner = self.inner.lock().unwrap();

        if inner.queue.iter().any(|e| e.addr_port == info.addr_port) {
            return false;
        }

        if info.rtt > self.rtt_threshold {
            return false;
        }

        if inner.queue.len() < self.max_queue_size {
            let index = inner.queue.partition_point(|e| e.rtt <= info.rtt);
            inner.queue.insert(index, info);
        } else if inner
            .queue
            .last()
            .is_some_and(|worst| info.rtt < worst.rtt)
        {
            // Displace the worst incumbent; it is dropped, not reserved.
            inner.queue.pop();
            let index = inner.queue.partition_point(|e| e.rtt <= info.rtt);
            inner.queue.insert(index, info);
        } else {
            inner.reserved.push_back(info);
        }

        debug!(current_size = inner.queue.len(), "IP queue state change");

        if inner.queue.iter().any(|e| e.rtt > self.rtt_threshold) {
            return false;
        }
        if inner.queue.len() < self.max_queue_size {
            return false;
        }

        inner.in_ideal_mode = true;
        true
    }

    /// Remove and return the worst (highest-RTT) entry, freeing a slot.
    pub fn dequeue(&self) -> Option<IpInfo> {
        let mut inner = self.inner.lock().unwrap();
        let info = inner.queue.pop()?;
        inner.in_ideal_mode = false;
        drop(inner);
        self.wake.notify_one();
        Some(info)
    }

    /// Drop entries older than the TTL, then drain the reserved FIFO into
    /// the freed slots in arrival order. When anything expired, the queue
    /// leaves ideal mode and the scan engine is woken for a new round.
    pub fn expire(&self) {
        let mut inner = self.inner.lock().unwrap();

        let before = inner.queue.len();
        let max_ttl = self.max_ttl;
        inner.queue.retain(|e| e.created_at.elapsed() <= max_ttl);
        let expired = before - inner.queue.len();

        while inner.queue.len() < self.max_queue_size {
            match inner.reserved.pop_front() {
                Some(info) => inner.queue.push(info),
                None => break,
            }
        }
        inner.queue.sort_by_key(|e| e.rtt);

        if expired > 0 {
            debug!(expired, "Expired stale entries from IP queue");
            inner.in_ideal_mode = false;
            drop(inner);
            self.wake.notify_one();
        }
    }

    /// Whether every slot is filled with an entry under the threshold.
    #[must_use]
    pub fn is_ideal(&self) -> bool {
        self.inner.lock().unwrap().in_ideal_mode
    }

    /// Wait until the queue transitions out of ideal mode.
    pub async fn wait_available(&self) {
        self.wake.notified().await;
    }

    /// Snapshot of the queue sorted by RTT, ascending by default.
    #[must_use]
    pub fn available_ips(&self, descending: bool) -> Vec<IpInfo> {
        let inner = self.inner.lock().unwrap();
        let mut snapshot = inner.queue.clone();
        if descending {
            snapshot.sort_by(|a, b| b.rtt.cmp(&a.rtt));
        } else {
            snapshot.sort_by_key(|e| e.rtt);
        }
        snapshot
    }

    /// Number of entries currently queued.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Instant;

    fn options(size: usize, threshold_ms: u64) -> ScannerOptions {
        ScannerOptions {
            ip_queue_size: size,
            max_desirable_rtt: Duration::from_millis(threshold_ms),
            ip_queue_ttl: Duration::from_secs(30),
            ..Default::default()
        }
    }

    fn info(addr: &str, rtt_ms: u64) -> IpInfo {
        IpInfo {
            addr_port: addr.parse::<SocketAddr>().unwrap(),
            rtt: Duration::from_millis(rtt_ms),
            created_at: Instant::now(),
        }
    }

    fn aged_info(addr: &str, rtt_ms: u64, age: Duration) -> IpInfo {
        IpInfo {
            created_at: Instant::now() - age,
            ..info(addr, rtt_ms)
        }
    }

    #[test]
    fn duplicate_enqueue_is_ignored() {
        let queue = IpQueue::new(&options(4, 200));
        queue.enqueue(info("1.1.1.1:2408", 100));
        queue.enqueue(info("1.1.1.1:2408", 100));
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn over_threshold_entries_are_ignored() {
        let queue = IpQueue::new(&options(4, 200));
        assert!(!queue.enqueue(info("1.1.1.1:2408", 250)));
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn ideal_mode_when_all_slots_beat_threshold() {
        let queue = IpQueue::new(&options(2, 200));
        assert!(!queue.enqueue(info("1.1.1.1:2408", 100)));
        assert!(queue.enqueue(info("2.2.2.2:2408", 150)));
        assert!(queue.is_ideal());
    }

    #[test]
    fn displacement_evicts_worst_without_reserving_it() {
        let queue = IpQueue::new(&options(2, 200));
        queue.enqueue(info("1.1.1.1:2408", 100));
        queue.enqueue(info("2.2.2.2:2408", 150));

        assert!(queue.enqueue(info("3.3.3.3:2408", 120)));

        let snapshot = queue.available_ips(false);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].rtt, Duration::from_millis(100));
        assert_eq!(snapshot[1].rtt, Duration::from_millis(120));

        // The displaced entry is gone for good: expiry frees both slots
        // and nothing re-enters from the reserved FIFO.
        assert!(!snapshot.iter().any(|e| e.rtt == Duration::from_millis(150)));
    }

    #[test]
    fn acceptable_overflow_goes_to_reserved() {
        let queue = IpQueue::new(&options(2, 200));
        queue.enqueue(aged_info("1.1.1.1:2408", 100, Duration::from_secs(60)));
        queue.enqueue(aged_info("2.2.2.2:2408", 110, Duration::from_secs(60)));

        // Not better than the worst incumbent: overflows to reserved.
        queue.enqueue(info("3.3.3.3:2408", 180));
        queue.enqueue(info("4.4.4.4:2408", 190));
        assert_eq!(queue.size(), 2);

        // Expiry evicts both aged incumbents and drains the reserved FIFO
        // in arrival order.
        queue.expire();
        let snapshot = queue.available_ips(false);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].rtt, Duration::from_millis(180));
        assert_eq!(snapshot[1].rtt, Duration::from_millis(190));
    }

    #[test]
    fn capacity_never_exceeded() {
        let queue = IpQueue::new(&options(3, 500));
        for i in 0..20u64 {
            queue.enqueue(info(&format!("10.0.0.{i}:2408"), 400 - i * 10));
            assert!(queue.size() <= 3);
        }
    }

    #[test]
    fn snapshot_sorted_both_directions() {
        let queue = IpQueue::new(&options(8, 500));
        queue.enqueue(info("1.1.1.1:2408", 300));
        queue.enqueue(info("2.2.2.2:2408", 100));
        queue.enqueue(info("3.3.3.3:2408", 200));

        let ascending = queue.available_ips(false);
        assert!(ascending.windows(2).all(|w| w[0].rtt <= w[1].rtt));

        let descending = queue.available_ips(true);
        assert!(descending.windows(2).all(|w| w[0].rtt >= w[1].rtt));
    }

    #[test]
    fn dequeue_pops_worst_and_leaves_ideal_mode() {
        let queue = IpQueue::new(&options(2, 200));
        queue.enqueue(info("1.1.1.1:2408", 100));
        queue.enqueue(info("2.2.2.2:2408", 150));
        assert!(queue.is_ideal());

        let popped = queue.dequeue().unwrap();
        assert_eq!(popped.rtt, Duration::from_millis(150));
        assert!(!queue.is_ideal());
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn expire_without_stale_entries_keeps_ideal_mode() {
        let queue = IpQueue::new(&options(2, 200));
        queue.enqueue(info("1.1.1.1:2408", 100));
        queue.enqueue(info("2.2.2.2:2408", 150));
        queue.expire();
        assert!(queue.is_ideal());
        assert_eq!(queue.size(), 2);
    }

    #[tokio::test]
    async fn expiry_wakes_waiters() {
        let queue = std::sync::Arc::new(IpQueue::new(&options(1, 200)));
        queue.enqueue(aged_info("1.1.1.1:2408", 100, Duration::from_secs(60)));

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_available().await })
        };

        queue.expire();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter must wake after expiry")
            .unwrap();
    }
}
