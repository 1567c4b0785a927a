pub mod chain_client;
pub mod head_subscription;
pub mod block_poller;
pub mod deduplicator;
pub mod gap_scanner;
pub mod transaction_filter;
pub mod block_processor;
pub mod token_metadata;

pub use chain_client::ChainClient;
pub use head_subscription::{ConnectionState, HeadSubscription, SubscriptionHealth, SubscriptionStatus};
pub use block_poller::BlockPoller;
pub use deduplicator::Deduplicator;
pub use gap_scanner::{BackfillPlan, GapScanner, GapTracker};
pub use block_processor::{BlockProcessor, ProcessedBlock};
pub use token_metadata::{TokenInfo, TokenMetadataCache};

use serde::Serialize;

/// Which producer discovered a candidate height
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HeightSource {
    Subscription,
    Poller,
    GapScanner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeightEvent {
    pub height: u64,
    pub source: HeightSource,
}
