use std::sync::Arc;

use crate::blockchain::{transaction_filter, ChainClient};
use crate::error::{Result, RpcError};
use crate::logging::LogContext;
use crate::models::{MatchEvent, WatchList};

/// Outcome of fetching and filtering one height
#[derive(Debug, Clone)]
pub struct ProcessedBlock {
    pub height: u64,
    pub transaction_count: usize,
    pub matches: Vec<MatchEvent>,
}

pub struct BlockProcessor {
    chain_client: Arc<ChainClient>,
    watch_list: Arc<WatchList>,
}

impl BlockProcessor {
    pub fn new(chain_client: Arc<ChainClient>, watch_list: Arc<WatchList>) -> Self {
        Self {
            chain_client,
            watch_list,
        }
    }

    /// Fetch a height and match every transaction against the watch list.
    ///
    /// A height the node does not know yet is an error, the caller decides
    /// whether to try again later.
    pub async fn process_height(&self, height: u64) -> Result<ProcessedBlock> {
        let block = self
            .chain_client
            .get_block(height)
            .await?
            .ok_or(RpcError::BlockNotFound { block_number: height })?;

        let matches = transaction_filter::match_block(&block, &self.watch_list);

        LogContext::new("block_processor", "process_height")
            .with_block_number(height)
            .with_metadata("transaction_count", serde_json::json!(block.transactions.len()))
            .with_metadata("match_count", serde_json::json!(matches.len()))
            .trace("Block filtered");

        Ok(ProcessedBlock {
            height,
            transaction_count: block.transactions.len(),
            matches,
        })
    }

    pub fn chain_client(&self) -> &Arc<ChainClient> {
        &self.chain_client
    }
}
