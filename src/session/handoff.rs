//! Bounded hand-off points between the emulation thread and its consumers.
//! The emulation side never blocks on a consumer except to get an empty
//! frame buffer back.

use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Observer, Producer, Split},
};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

use super::cancel::CancelToken;
use crate::nes::screen::VirtualScreen;

pub const AUDIO_QUEUE_BLOCKS: usize = 2;

/// Emulation side of the frame rendezvous: one buffer being drawn, the
/// other either ready for the consumer or waiting in the empty slot.
pub struct FrameProducer {
    current: Option<Box<VirtualScreen>>,
    empty: Receiver<Box<VirtualScreen>>,
    ready: SyncSender<Box<VirtualScreen>>,
    delivered: u64,
    dropped: u64,
}

/// Render side: takes filled buffers and hands them back once copied.
pub struct FrameConsumer {
    ready: Receiver<Box<VirtualScreen>>,
    empty: SyncSender<Box<VirtualScreen>>,
}

pub fn frame_exchange() -> (FrameProducer, FrameConsumer) {
    let (empty_tx, empty_rx) = mpsc::sync_channel(1);
    let (ready_tx, ready_rx) = mpsc::sync_channel(1);
    // The second buffer starts in the empty slot, which has room for it.
    let _ = empty_tx.try_send(Box::new(VirtualScreen::new()));
    (
        FrameProducer {
            current: Some(Box::new(VirtualScreen::new())),
            empty: empty_rx,
            ready: ready_tx,
            delivered: 0,
            dropped: 0,
        },
        FrameConsumer {
            ready: ready_rx,
            empty: empty_tx,
        },
    )
}

impl FrameProducer {
    /// The buffer the PPU should draw into, waiting for the consumer to
    /// return one if both are out. `None` once `cancel` fires or the
    /// consumer is gone with both buffers.
    pub fn acquire(&mut self, cancel: &CancelToken, poll: Duration) -> Option<&mut VirtualScreen> {
        if self.current.is_none() {
            loop {
                if cancel.is_cancelled() {
                    return None;
                }
                match self.empty.recv_timeout(poll) {
                    Ok(buffer) => {
                        self.current = Some(buffer);
                        break;
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return None,
                }
            }
        }
        self.current.as_deref_mut()
    }

    /// Offers the finished buffer without blocking. When the consumer has not
    /// taken the previous frame the buffer is kept and drawn over.
    pub fn offer(&mut self) -> bool {
        let Some(buffer) = self.current.take() else {
            return false;
        };
        match self.ready.try_send(buffer) {
            Ok(()) => {
                self.delivered += 1;
                true
            }
            Err(TrySendError::Full(buffer)) | Err(TrySendError::Disconnected(buffer)) => {
                self.current = Some(buffer);
                self.dropped += 1;
                false
            }
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameConsumer {
    pub fn try_take(&self) -> Option<Box<VirtualScreen>> {
        self.ready.try_recv().ok()
    }

    pub fn take_timeout(&self, timeout: Duration) -> Option<Box<VirtualScreen>> {
        self.ready.recv_timeout(timeout).ok()
    }

    pub fn give_back(&self, buffer: Box<VirtualScreen>) {
        let _ = self.empty.try_send(buffer);
    }

    /// Copies the newest ready frame into `out` and returns its buffer.
    pub fn copy_latest(&self, out: &mut VirtualScreen) -> bool {
        match self.try_take() {
            Some(buffer) => {
                out.copy_from(&buffer);
                self.give_back(buffer);
                true
            }
            None => false,
        }
    }
}

pub struct AudioProducer {
    queue: HeapProd<Vec<f32>>,
    delivered: u64,
    dropped: u64,
}

pub struct AudioConsumer {
    queue: HeapCons<Vec<f32>>,
}

pub fn audio_queue(capacity: usize) -> (AudioProducer, AudioConsumer) {
    let (queue, consumer) = HeapRb::<Vec<f32>>::new(capacity.max(1)).split();
    (
        AudioProducer {
            queue,
            delivered: 0,
            dropped: 0,
        },
        AudioConsumer { queue: consumer },
    )
}

impl AudioProducer {
    /// Drops the block when the consumer is behind.
    pub fn push(&mut self, block: Vec<f32>) -> bool {
        if self.queue.try_push(block).is_ok() {
            self.delivered += 1;
            return true;
        }
        self.dropped += 1;
        if self.dropped.is_power_of_two() {
            warn!(dropped = self.dropped, "audio consumer falling behind");
        }
        false
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl AudioConsumer {
    pub fn pop(&mut self) -> Option<Vec<f32>> {
        self.queue.try_pop()
    }

    pub fn queued(&self) -> usize {
        self.queue.occupied_len()
    }
}

/// What observers such as recorders receive.
#[derive(Debug, Clone)]
pub enum MediaEvent {
    Frame { number: u64, pixels: Arc<[u32]> },
    Audio(Arc<[f32]>),
}

/// Observer list shared by every run of a session. The lock only guards the
/// list; delivery happens on a snapshot with the lock released.
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Arc<Mutex<ListenerList>>,
}

#[derive(Default)]
struct ListenerList {
    next_id: u64,
    entries: Vec<(u64, SyncSender<MediaEvent>)>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, capacity: usize) -> Receiver<MediaEvent> {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        if let Ok(mut list) = self.inner.lock() {
            let id = list.next_id;
            list.next_id += 1;
            list.entries.push((id, tx));
        }
        rx
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|list| list.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sends to every listener without blocking and returns how many were
    /// full. Listeners whose receiver is gone are removed.
    pub fn publish(&self, event: &MediaEvent) -> u64 {
        let snapshot = match self.inner.lock() {
            Ok(list) if !list.entries.is_empty() => list.entries.clone(),
            _ => return 0,
        };

        let mut full = 0;
        let mut gone = Vec::new();
        for (id, listener) in &snapshot {
            match listener.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => full += 1,
                Err(TrySendError::Disconnected(_)) => gone.push(*id),
            }
        }

        if !gone.is_empty() {
            if let Ok(mut list) = self.inner.lock() {
                list.entries.retain(|(id, _)| !gone.contains(id));
            }
        }
        full
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_is_retained_until_consumer_drains() {
        let cancel = CancelToken::new();
        let poll = Duration::from_millis(1);
        let (mut producer, consumer) = frame_exchange();

        producer.acquire(&cancel, poll).unwrap().set_pixel(0, 0, 1);
        assert!(producer.offer());
        producer.acquire(&cancel, poll).unwrap().set_pixel(0, 0, 2);
        // Ready slot still holds the first frame.
        assert!(!producer.offer());
        assert_eq!(producer.dropped(), 1);
        assert_eq!(producer.acquire(&cancel, poll).unwrap().pixel(0, 0), 2);

        let first = consumer.try_take().unwrap();
        assert_eq!(first.pixel(0, 0), 1);
        consumer.give_back(first);
        assert!(producer.offer());
        assert_eq!(consumer.try_take().unwrap().pixel(0, 0), 2);
        assert_eq!(producer.delivered(), 2);
    }

    #[test]
    fn acquire_gives_up_when_cancelled() {
        let cancel = CancelToken::new();
        let poll = Duration::from_millis(1);
        let (mut producer, consumer) = frame_exchange();
        assert!(producer.offer());
        producer.acquire(&cancel, poll).unwrap();
        let _held = consumer.try_take().unwrap();
        assert!(producer.offer());
        // One buffer is held by the consumer, the other waits in the ready slot.
        cancel.cancel();
        assert!(producer.acquire(&cancel, poll).is_none());
    }

    #[test]
    fn audio_queue_drops_under_backpressure() {
        let (mut producer, mut consumer) = audio_queue(AUDIO_QUEUE_BLOCKS);
        assert!(producer.push(vec![0.1; 4]));
        assert!(producer.push(vec![0.2; 4]));
        assert!(!producer.push(vec![0.3; 4]));
        assert_eq!(producer.dropped(), 1);
        assert_eq!(consumer.queued(), 2);
        assert_eq!(consumer.pop().unwrap()[0], 0.1);
        assert!(producer.push(vec![0.4; 4]));
    }

    #[test]
    fn listeners_never_block_and_forget_closed_receivers() {
        let listeners = Listeners::new();
        let slow = listeners.subscribe(1);
        let gone = listeners.subscribe(1);
        drop(gone);

        let event = MediaEvent::Audio(Arc::from([0.5f32; 8]));
        assert_eq!(listeners.publish(&event), 0);
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners.publish(&event), 1);
        assert!(matches!(slow.try_recv(), Ok(MediaEvent::Audio(_))));
    }
}
