//! Timer heap.
//!
//! Min-heap keyed by `(deadline, seq)`: the sequence number breaks deadline
//! ties by insertion order. Cancellation is lazy — entries whose handle left
//! the registry are discarded when they surface, so removal stays cheap.

use crate::evloop::registry::HandleId;

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TimerEntry {
  deadline: Instant,
  seq: u64,
  id: HandleId,
}

#[derive(Debug, Default)]
pub struct TimerHeap {
  heap: BinaryHeap<Reverse<TimerEntry>>,
  seq: u64,
}

impl TimerHeap {
  pub fn new() -> Self {
    TimerHeap {
      heap: BinaryHeap::new(),
      seq: 0,
    }
  }

  /// Plants a timer. Ties on `deadline` fire in insertion order.
  pub fn insert(&mut self, deadline: Instant, id: HandleId) {
    self.seq += 1;
    self.heap.push(Reverse(TimerEntry {
      deadline,
      seq: self.seq,
      id,
    }));
  }

  /// Earliest live deadline, pruning dead entries on the way.
  pub fn peek_deadline(
    &mut self,
    is_alive: impl Fn(HandleId) -> bool,
  ) -> Option<Instant> {
    while let Some(Reverse(entry)) = self.heap.peek() {
      if is_alive(entry.id) {
        return Some(entry.deadline);
      }
      self.heap.pop();
    }
    None
  }

  /// Pops the next entry due at `now`, skipping dead ones.
  pub fn pop_due(
    &mut self,
    now: Instant,
    is_alive: impl Fn(HandleId) -> bool,
  ) -> Option<HandleId> {
    while let Some(Reverse(entry)) = self.heap.peek() {
      if entry.deadline > now {
        return None;
      }
      let entry = self.heap.pop().unwrap().0;
      if is_alive(entry.id) {
        return Some(entry.id);
      }
    }
    None
  }

  pub fn len(&self) -> usize {
    self.heap.len()
  }

  pub fn is_empty(&self) -> bool {
    self.heap.is_empty()
  }
}

#[cfg(test)]
mod timer_tests {
  use super::*;
  use std::time::Duration;

  #[test]
  fn pop_order1() {
    let mut timers = TimerHeap::new();
    let base = Instant::now();
    timers.insert(base + Duration::from_millis(30), 3);
    timers.insert(base + Duration::from_millis(10), 1);
    timers.insert(base + Duration::from_millis(20), 2);

    let far = base + Duration::from_millis(100);
    assert_eq!(timers.pop_due(far, |_| true), Some(1));
    assert_eq!(timers.pop_due(far, |_| true), Some(2));
    assert_eq!(timers.pop_due(far, |_| true), Some(3));
    assert_eq!(timers.pop_due(far, |_| true), None);
  }

  #[test]
  fn ties_fire_in_insertion_order1() {
    let mut timers = TimerHeap::new();
    let deadline = Instant::now() + Duration::from_millis(5);
    for id in 10..15 {
      timers.insert(deadline, id);
    }
    let far = deadline + Duration::from_millis(1);
    for id in 10..15 {
      assert_eq!(timers.pop_due(far, |_| true), Some(id));
    }
  }

  #[test]
  fn due_respects_now1() {
    let mut timers = TimerHeap::new();
    let base = Instant::now();
    timers.insert(base + Duration::from_secs(60), 1);
    assert_eq!(timers.pop_due(base, |_| true), None);
    assert_eq!(timers.len(), 1);
  }

  #[test]
  fn lazy_deletion1() {
    let mut timers = TimerHeap::new();
    let base = Instant::now();
    timers.insert(base, 1);
    timers.insert(base, 2);
    // Handle 1 was cancelled: the pop path skips it.
    assert_eq!(timers.pop_due(base, |id| id != 1), Some(2));
    assert_eq!(timers.pop_due(base, |id| id != 1), None);
    assert!(timers.is_empty());
  }

  #[test]
  fn peek_prunes_dead1() {
    let mut timers = TimerHeap::new();
    let base = Instant::now();
    timers.insert(base + Duration::from_millis(1), 1);
    timers.insert(base + Duration::from_millis(9), 2);
    assert_eq!(
      timers.peek_deadline(|id| id != 1),
      Some(base + Duration::from_millis(9))
    );
    assert_eq!(timers.len(), 1);
  }
}
