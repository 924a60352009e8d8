use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;

const COMPACT_SLACK: usize = 16;

/// Min-heap of wake-up times keyed by group, driven by explicit `now`
/// values. Rescheduling a key supersedes its previous entry; stale heap
/// entries are skipped when popped and compacted away once they outnumber
/// the live ones.
#[derive(Debug)]
pub struct TimerQueue<K: Ord + Hash + Clone> {
    heap: BinaryHeap<Reverse<(i64, u64, K)>>,
    live: HashMap<K, (i64, u64)>,
    seq: u64,
}

impl<K: Ord + Hash + Clone> Default for TimerQueue<K> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashMap::new(),
            seq: 0,
        }
    }
}

impl<K: Ord + Hash + Clone> TimerQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, key: K, due_ms: i64) {
        self.seq += 1;
        self.live.insert(key.clone(), (due_ms, self.seq));
        self.heap.push(Reverse((due_ms, self.seq, key)));
        if self.heap.len() > 2 * self.live.len() + COMPACT_SLACK {
            self.compact();
        }
    }

    pub fn cancel(&mut self, key: &K) {
        self.live.remove(key);
    }

    pub fn due_of(&self, key: &K) -> Option<i64> {
        self.live.get(key).map(|(due, _)| *due)
    }

    pub fn next_due(&mut self) -> Option<i64> {
        self.discard_stale();
        self.heap.peek().map(|Reverse((due, _, _))| *due)
    }

    /// Removes and returns every key due at or before `now_ms`, earliest first.
    pub fn pop_due(&mut self, now_ms: i64) -> Vec<K> {
        let mut out = Vec::new();
        loop {
            self.discard_stale();
            match self.heap.peek() {
                Some(Reverse((due, _, _))) if *due <= now_ms => {}
                _ => break,
            }
            if let Some(Reverse((_, _, key))) = self.heap.pop() {
                self.live.remove(&key);
                out.push(key);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn compact(&mut self) {
        self.heap = self
            .live
            .iter()
            .map(|(key, (due, seq))| Reverse((*due, *seq, key.clone())))
            .collect();
    }

    fn discard_stale(&mut self) {
        while let Some(Reverse((due, seq, key))) = self.heap.peek() {
            if self.live.get(key) == Some(&(*due, *seq)) {
                break;
            }
            self.heap.pop();
        }
    }
}
