//! Priority queue feeding a network loader's consumer task.

use crate::page::ReaderPage;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Background prefetch of pages after the one being read.
pub const PRIORITY_PRELOAD: u8 = 0;
/// A page the reader asked for.
pub const PRIORITY_REQUEST: u8 = 1;
/// A page the user explicitly retried.
pub const PRIORITY_RETRY: u8 = 2;

/// A queued page. Higher priority first, then first come, first served.
#[derive(Clone, Debug)]
pub(crate) struct PriorityPage {
    pub page: Arc<ReaderPage>,
    pub priority: u8,
    pub sequence: u64,
}

impl PartialEq for PriorityPage {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PriorityPage {}

impl PartialOrd for PriorityPage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityPage {
    // `BinaryHeap` pops the greatest element, so a lower sequence is "greater".
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Multi-producer, single-consumer priority queue with an async pop.
///
/// Sequence numbers are handed out per queue, so ordering only holds within
/// one loader.
#[derive(Debug, Default)]
pub(crate) struct PriorityQueue {
    heap: Mutex<BinaryHeap<PriorityPage>>,
    notify: Notify,
    sequence: AtomicU64,
}

impl PriorityQueue {
    /// Enqueue a page and return the sequence number identifying the entry.
    pub fn push(&self, page: Arc<ReaderPage>, priority: u8) -> u64 {
        let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        self.lock().push(PriorityPage { page, priority, sequence });
        self.notify.notify_one();
        sequence
    }

    /// Take the most urgent entry, waiting for one if the queue is empty.
    ///
    /// Cancel safe: dropping the future never loses an entry. Only one task
    /// may pop at a time.
    pub async fn pop(&self) -> PriorityPage {
        loop {
            if let Some(entry) = self.lock().pop() {
                return entry;
            }
            // `notify_one` stores a permit when nobody is waiting, so a push
            // between the check above and this await isn't missed.
            self.notify.notified().await;
        }
    }

    /// Remove the entries with the given sequence numbers for which `keep`
    /// returns `false`.
    pub fn remove_where(&self, sequences: &[u64], keep: impl Fn(&PriorityPage) -> bool) -> usize {
        let mut heap = self.lock();
        let before = heap.len();
        heap.retain(|entry| !sequences.contains(&entry.sequence) || keep(entry));
        before - heap.len()
    }

    /// Whether any entry for this page is waiting.
    pub fn contains(&self, page: &ReaderPage) -> bool {
        self.lock().iter().any(|entry| std::ptr::eq(Arc::as_ptr(&entry.page), page))
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// `(page index, priority)` of waiting entries, in service order.
    #[cfg(test)]
    pub fn pending(&self) -> Vec<(usize, u8)> {
        let mut entries = self.lock().clone().into_sorted_vec();
        entries.reverse();
        entries.into_iter().map(|entry| (entry.page.index(), entry.priority)).collect()
    }

    fn lock(&self) -> MutexGuard<'_, BinaryHeap<PriorityPage>> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn page(index: usize) -> Arc<ReaderPage> {
        Arc::new(ReaderPage::remote(index, format!("/p/{index}"), None))
    }

    #[tokio::test]
    async fn test_service_order() {
        let queue = PriorityQueue::default();
        queue.push(page(1), PRIORITY_REQUEST);
        queue.push(page(2), PRIORITY_PRELOAD);
        queue.push(page(3), PRIORITY_RETRY);
        let order = [queue.pop().await, queue.pop().await, queue.pop().await].map(|e| e.page.index());
        assert_eq!(order, [3, 1, 2]);
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let queue = PriorityQueue::default();
        for index in 0..5 {
            queue.push(page(index), PRIORITY_PRELOAD);
        }
        let mut order = Vec::new();
        while queue.len() > 0 {
            order.push(queue.pop().await.page.index());
        }
        assert_eq!(order, [0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(PriorityQueue::default());
        let consumer = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.pop().await.page.index() }
        });
        tokio::task::yield_now().await;
        assert!(!consumer.is_finished());
        queue.push(page(9), PRIORITY_REQUEST);
        let index = tokio::time::timeout(Duration::from_secs(5), consumer).await.unwrap().unwrap();
        assert_eq!(index, 9);
    }

    #[test]
    fn test_remove_where() {
        let queue = PriorityQueue::default();
        let keep = page(0);
        let a = queue.push(keep.clone(), PRIORITY_PRELOAD);
        let b = queue.push(page(1), PRIORITY_PRELOAD);
        queue.push(page(2), PRIORITY_PRELOAD);
        let removed = queue.remove_where(&[a, b], |entry| Arc::ptr_eq(&entry.page, &keep));
        assert_eq!(removed, 1);
        assert_eq!(queue.pending(), [(0, 0), (2, 0)]);
    }

    #[test]
    fn test_contains_and_clear() {
        let queue = PriorityQueue::default();
        let queued = page(0);
        let other = page(0);
        queue.push(queued.clone(), PRIORITY_REQUEST);
        assert!(queue.contains(&queued));
        assert!(!queue.contains(&other));
        queue.clear();
        assert_eq!(queue.len(), 0);
    }
}
