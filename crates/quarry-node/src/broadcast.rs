//! In-process block/transaction fan-out.

use quarry_core::traits::Broadcaster;
use quarry_core::types::{Block, Transaction};
use tokio::sync::broadcast;
use tracing::debug;

/// Default event buffer per subscriber.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum ChainEvent {
    NewBlock(Block),
    NewTransaction(Transaction),
}

/// [`Broadcaster`] publishing [`ChainEvent`]s on a tokio broadcast channel.
///
/// Events sent while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<ChainEvent>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn publish(&self, event: ChainEvent) {
        if self.tx.send(event).is_err() {
            debug!("no subscribers for chain event");
        }
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn broadcast_block(&self, block: &Block) {
        self.publish(ChainEvent::NewBlock(block.clone()));
    }

    fn broadcast_transaction(&self, tx: &Transaction) {
        self.publish(ChainEvent::NewTransaction(tx.clone()));
    }
}
