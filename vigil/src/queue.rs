// vigil/src/queue.rs
//
// Bounded dispatch queue between frame extraction and network fan-out.
// Strict FIFO, fixed capacity; a full queue suspends the (blocking)
// extraction thread — this is the pipeline's only backpressure point.
// Dropping the sender closes the queue: consumers drain what remains and
// then observe end-of-stream.

use tokio::sync::mpsc;

use crate::events::Frame;

pub fn bounded(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FrameSender { tx }, FrameReceiver { rx })
}

pub struct FrameSender {
    tx: mpsc::Sender<Frame>,
}

impl FrameSender {
    /// Blocking enqueue for the extraction thread. Suspends while the queue
    /// is full; returns the frame back if the consumer side is gone.
    pub fn enqueue_blocking(&self, frame: Frame) -> Result<(), Frame> {
        self.tx.blocking_send(frame).map_err(|e| e.0)
    }

    /// Non-blocking enqueue. `Err` carries the frame back when the queue is
    /// full or closed.
    pub fn try_enqueue(&self, frame: Frame) -> Result<(), Frame> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(f) => f,
            mpsc::error::TrySendError::Closed(f) => f,
        })
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

pub struct FrameReceiver {
    rx: mpsc::Receiver<Frame>,
}

impl FrameReceiver {
    /// Await the next frame; `None` once the producer is dropped and the
    /// queue has drained.
    pub async fn dequeue(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;

    fn frame(id: u64) -> Frame {
        Frame {
            frame_id: id,
            motion_score: 42.0,
            payload: Bytes::from_static(b"\xff\xd8jpeg"),
            camera_id: "cam-1".into(),
            zone_id: "z-1".into(),
            location: "east gate".into(),
            captured_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn holds_at_most_capacity_frames() {
        let (tx, mut rx) = bounded(3);
        for id in 0..3 {
            tx.try_enqueue(frame(id)).unwrap();
        }
        // 4th frame has nowhere to go until a dequeue happens.
        assert!(tx.try_enqueue(frame(3)).is_err());
        assert_eq!(rx.dequeue().await.unwrap().frame_id, 0);
        tx.try_enqueue(frame(3)).unwrap();
    }

    #[tokio::test]
    async fn fifo_order_and_end_of_stream() {
        let (tx, mut rx) = bounded(5);
        for id in 0..4 {
            tx.try_enqueue(frame(id)).unwrap();
        }
        drop(tx);
        for id in 0..4 {
            assert_eq!(rx.dequeue().await.unwrap().frame_id, id);
        }
        assert!(rx.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn blocked_producer_resumes_after_dequeue() {
        let (tx, mut rx) = bounded(1);
        tx.try_enqueue(frame(0)).unwrap();

        let producer = tokio::task::spawn_blocking(move || tx.enqueue_blocking(frame(1)));
        // The producer is suspended on the full queue until we consume.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(rx.dequeue().await.unwrap().frame_id, 0);
        producer.await.unwrap().unwrap();
        assert_eq!(rx.dequeue().await.unwrap().frame_id, 1);
    }
}
