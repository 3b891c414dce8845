//! Frame fan-out: one producer, many subscribers, each with its own bounded
//! queue and delivery thread.
//!
//! A subscriber whose handler blocks must not stall the others, so every
//! subscriber owns a small bounded buffer with drop-oldest overflow. Within
//! one subscriber, frames arrive in capture order with no duplication;
//! across subscribers, delivery order is unspecified.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use verdure_core::domain::AudioFrame;

/// Frames buffered per subscriber before the oldest is dropped.
pub const SUBSCRIBER_BUFFER_FRAMES: usize = 8;

/// A subscriber's bounded frame queue.
struct SubscriberQueue {
    frames: Mutex<VecDeque<AudioFrame>>,
    available: Condvar,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl SubscriberQueue {
    fn new() -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(SUBSCRIBER_BUFFER_FRAMES)),
            available: Condvar::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push a frame, dropping the oldest when full.
    fn push(&self, frame: AudioFrame, subscriber_id: u64) {
        let mut frames = match self.frames.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if frames.len() >= SUBSCRIBER_BUFFER_FRAMES {
            frames.pop_front();
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                subscriber_id,
                dropped_total = total,
                "Capture subscriber queue full, dropping oldest frame"
            );
        }
        frames.push_back(frame);
        drop(frames);
        self.available.notify_one();
    }

    /// Block until a frame is available or the queue is closed.
    fn pop(&self) -> Option<AudioFrame> {
        let mut frames = match self.frames.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        loop {
            if let Some(frame) = frames.pop_front() {
                return Some(frame);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            frames = match self.available.wait(frames) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.available.notify_all();
    }
}

/// One registered subscriber.
struct Slot {
    id: u64,
    queue: Arc<SubscriberQueue>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Single-producer / multi-subscriber frame distributor.
pub struct FanOut {
    slots: Mutex<Vec<Slot>>,
    next_id: AtomicU64,
}

impl FanOut {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler. The returned id is used to unsubscribe.
    ///
    /// The handler runs on its own delivery thread and sees frames in
    /// capture order.
    pub fn subscribe<F>(&self, mut handler: F) -> u64
    where
        F: FnMut(AudioFrame) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let queue = Arc::new(SubscriberQueue::new());

        let worker_queue = Arc::clone(&queue);
        let thread = thread::Builder::new()
            .name(format!("verdure-sub-{id}"))
            .spawn(move || {
                while let Some(frame) = worker_queue.pop() {
                    handler(frame);
                }
            })
            .expect("failed to spawn subscriber delivery thread");

        let mut slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.push(Slot {
            id,
            queue,
            thread: Some(thread),
        });
        id
    }

    /// Remove a subscriber and join its delivery thread.
    ///
    /// Returns whether the id was registered.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let slot = {
            let mut slots = match self.slots.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let index = slots.iter().position(|s| s.id == id);
            index.map(|i| slots.swap_remove(i))
        };

        let Some(mut slot) = slot else {
            return false;
        };
        slot.queue.close();
        if let Some(thread) = slot.thread.take() {
            let _ = thread.join();
        }
        true
    }

    /// Deliver one frame to every subscriber.
    pub fn dispatch(&self, frame: &AudioFrame) {
        let slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for slot in slots.iter() {
            slot.queue.push(frame.clone(), slot.id);
        }
    }

    /// Number of active subscribers.
    pub fn len(&self) -> usize {
        match self.slots.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Whether there are no subscribers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total frames dropped across all subscribers (for diagnostics).
    pub fn dropped_frames(&self) -> u64 {
        let slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots
            .iter()
            .map(|s| s.queue.dropped.load(Ordering::Relaxed))
            .sum()
    }
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FanOut {
    fn drop(&mut self) {
        let mut slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for slot in slots.iter_mut() {
            slot.queue.close();
            if let Some(thread) = slot.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn frame(seq: i16) -> AudioFrame {
        AudioFrame::new(vec![seq; 4], 16_000, 1)
    }

    #[test]
    fn frames_arrive_in_capture_order_without_duplication() {
        let fanout = FanOut::new();
        let (tx, rx) = mpsc::channel();
        let id = fanout.subscribe(move |f| {
            tx.send(f.pcm[0]).unwrap();
        });

        for seq in 0..5 {
            fanout.dispatch(&frame(seq));
        }

        let mut received = Vec::new();
        for _ in 0..5 {
            received.push(rx.recv_timeout(Duration::from_secs(1)).unwrap());
        }
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
        assert!(fanout.unsubscribe(id));
    }

    #[test]
    fn each_subscriber_receives_every_frame() {
        let fanout = FanOut::new();
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        fanout.subscribe(move |f| tx_a.send(f.pcm[0]).unwrap());
        fanout.subscribe(move |f| tx_b.send(f.pcm[0]).unwrap());

        fanout.dispatch(&frame(7));

        assert_eq!(rx_a.recv_timeout(Duration::from_secs(1)).unwrap(), 7);
        assert_eq!(rx_b.recv_timeout(Duration::from_secs(1)).unwrap(), 7);
    }

    #[test]
    fn blocked_subscriber_overflows_by_dropping_oldest() {
        let fanout = FanOut::new();

        // A handler that never returns until released.
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (seen_tx, seen_rx) = mpsc::channel();
        fanout.subscribe(move |f| {
            // Block on the first frame; record everything that gets through.
            seen_tx.send(f.pcm[0]).unwrap();
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        });

        // Frame 0 is picked up by the delivery thread and blocks the handler.
        fanout.dispatch(&frame(0));
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(1)).unwrap(), 0);

        // Overfill the 8-slot queue while the handler is stuck.
        for seq in 1..=12 {
            fanout.dispatch(&frame(seq));
        }
        // 12 frames into 8 slots: 4 dropped, all from the oldest end.
        assert_eq!(fanout.dropped_frames(), 4);

        // A second subscriber added now is unaffected by the stuck one. The
        // probe frame displaces one more frame (5) from the stuck queue.
        let (tx_b, rx_b) = mpsc::channel();
        fanout.subscribe(move |f| tx_b.send(f.pcm[0]).unwrap());
        fanout.dispatch(&frame(99));
        assert_eq!(rx_b.recv_timeout(Duration::from_secs(1)).unwrap(), 99);
        assert_eq!(fanout.dropped_frames(), 5);

        // Release the stuck handler; the survivors must be the newest frames
        // in order — never a reordered or duplicated sequence.
        drop(release_tx);
        let mut rest = Vec::new();
        while let Ok(v) = seen_rx.recv_timeout(Duration::from_secs(1)) {
            rest.push(v);
        }
        assert_eq!(rest, vec![6, 7, 8, 9, 10, 11, 12, 99]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let fanout = FanOut::new();
        let (tx, rx) = mpsc::channel();
        let id = fanout.subscribe(move |f| {
            let _ = tx.send(f.pcm[0]);
        });

        fanout.dispatch(&frame(1));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 1);

        assert!(fanout.unsubscribe(id));
        assert!(!fanout.unsubscribe(id), "second unsubscribe is a no-op");
        assert!(fanout.is_empty());

        fanout.dispatch(&frame(2));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
