use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;

use super::{BrokerError, BrokerResult, Delivery, Envelope, MessageBroker};
use crate::core::Disposition;

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Delivery>,
    unacked: HashMap<u64, Delivery>,
    settlements: Vec<(u64, Disposition)>,
    next_tag: u64,
    closed: bool,
}

impl QueueState {
    fn enqueue(&mut self, body: Vec<u8>, redelivered: bool, front: bool) {
        self.next_tag += 1;
        let delivery = Delivery {
            tag: self.next_tag,
            body,
            redelivered,
        };
        if front {
            self.ready.push_front(delivery);
        } else {
            self.ready.push_back(delivery);
        }
    }
}

/// In-process queue with manual acknowledgment. Clones share one queue.
///
/// After [`close`](MemoryBroker::close) the consumer still gets everything that is ready,
/// including requeued deliveries, and then sees the end of the subscription.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_raw(&self, body: impl Into<Vec<u8>>) {
        self.state.lock().enqueue(body.into(), false, false);
        self.notify.notify_one();
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn settlements(&self) -> Vec<(u64, Disposition)> {
        self.state.lock().settlements.clone()
    }

    pub fn ready_count(&self) -> usize {
        self.state.lock().ready.len()
    }

    pub fn unacked_count(&self) -> usize {
        self.state.lock().unacked.len()
    }

    fn settle(&self, tag: u64, disposition: Disposition) -> BrokerResult<()> {
        let mut state = self.state.lock();
        let delivery = state
            .unacked
            .remove(&tag)
            .ok_or_else(|| BrokerError::Channel(format!("unknown delivery tag {}", tag)))?;
        state.settlements.push((tag, disposition));

        if disposition == Disposition::Requeue {
            state.enqueue(delivery.body, true, true);
            drop(state);
            self.notify.notify_one();
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn receive(&mut self) -> Option<BrokerResult<Delivery>> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(delivery) = state.ready.pop_front() {
                    state.unacked.insert(delivery.tag, delivery.clone());
                    return Some(Ok(delivery));
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    async fn ack(&self, tag: u64) -> BrokerResult<()> {
        self.settle(tag, Disposition::Ack)
    }

    async fn nack(&self, tag: u64, requeue: bool) -> BrokerResult<()> {
        let disposition = if requeue {
            Disposition::Requeue
        } else {
            Disposition::Discard
        };
        self.settle(tag, disposition)
    }

    async fn publish(&self, envelope: &Envelope) -> BrokerResult<()> {
        self.push_raw(envelope.to_vec()?);
        Ok(())
    }
}
