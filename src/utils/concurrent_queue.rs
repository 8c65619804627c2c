// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A blocking double-ended FIFO shared between threads.
///
/// Every operation takes the same lock. `wait` releases it while parked and
/// re-checks emptiness on every wake-up.
#[derive(Debug)]
pub struct ConcurrentQueue<T> {
    items: Mutex<VecDeque<T>>,
    blocking: Condvar,
}

impl<T> Default for ConcurrentQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConcurrentQueue<T> {
    pub fn new() -> Self {
        ConcurrentQueue {
            items: Mutex::new(VecDeque::new()),
            blocking: Condvar::new(),
        }
    }

    /// Returns true when the queue was empty before this push.
    pub fn push_back(&self, item: T) -> bool {
        let was_empty = {
            let mut items = self.items.lock();
            let was_empty = items.is_empty();
            items.push_back(item);
            was_empty
        };
        self.blocking.notify_one();
        was_empty
    }

    /// Returns true when the queue was empty before this push.
    pub fn push_front(&self, item: T) -> bool {
        let was_empty = {
            let mut items = self.items.lock();
            let was_empty = items.is_empty();
            items.push_front(item);
            was_empty
        };
        self.blocking.notify_one();
        was_empty
    }

    pub fn pop_front(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    pub fn pop_back(&self) -> Option<T> {
        self.items.lock().pop_back()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Drops every queued element.
    pub fn clear(&self) {
        self.items.lock().clear();
    }

    /// Parks the calling thread until the queue holds at least one element.
    pub fn wait(&self) {
        let mut items = self.items.lock();
        self.blocking.wait_while(&mut items, |items| items.is_empty());
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    /// Returns whether the queue is non-empty.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut items = self.items.lock();
        self.blocking
            .wait_while_for(&mut items, |items| items.is_empty(), timeout);
        !items.is_empty()
    }

    /// Blocks until an element is available and removes it from the front.
    pub fn wait_and_pop(&self) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            self.blocking.wait(&mut items);
        }
    }
}

impl<T: Clone> ConcurrentQueue<T> {
    pub fn front(&self) -> Option<T> {
        self.items.lock().front().cloned()
    }

    pub fn back(&self) -> Option<T> {
        self.items.lock().back().cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn both_ends() {
        let queue = ConcurrentQueue::new();
        assert!(queue.push_back(2));
        assert!(!queue.push_back(3));
        queue.push_front(1);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.front(), Some(1));
        assert_eq!(queue.back(), Some(3));

        assert_eq!(queue.pop_back(), Some(3));
        assert_eq!(queue.pop_front(), Some(1));
        assert_eq!(queue.pop_front(), Some(2));
        assert_eq!(queue.pop_front(), None);
        assert_eq!(queue.pop_back(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn clear_drains() {
        let queue = ConcurrentQueue::new();
        for i in 0..10 {
            queue.push_back(i);
        }
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.push_back(42));
    }

    #[test]
    fn wait_returns_once_producer_pushes() {
        let queue = Arc::new(ConcurrentQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                queue.push_back("hello");
            })
        };

        queue.wait();
        assert_eq!(queue.pop_front(), Some("hello"));
        producer.join().unwrap();
    }

    #[test]
    fn wait_for_times_out_on_empty_queue() {
        let queue: ConcurrentQueue<u8> = ConcurrentQueue::new();
        assert!(!queue.wait_for(Duration::from_millis(20)));
        queue.push_back(1);
        assert!(queue.wait_for(Duration::from_millis(20)));
    }

    #[test]
    fn many_producers_keep_per_producer_order() {
        let queue = Arc::new(ConcurrentQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..250 {
                        queue.push_back((p, i));
                    }
                })
            })
            .collect();

        let mut last = [-1i32; 4];
        for _ in 0..1000 {
            let (p, i) = queue.wait_and_pop();
            assert!(i > last[p], "producer {p} went backwards");
            last[p] = i;
        }
        for producer in producers {
            producer.join().unwrap();
        }
        assert!(queue.is_empty());
    }
}
