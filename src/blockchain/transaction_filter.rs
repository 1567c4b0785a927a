use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::models::{Block, MatchDirection, MatchEvent, Transaction, TransactionKind, WatchList};

/// Known 4-byte function selectors
static SELECTORS: Lazy<HashMap<[u8; 4], TransactionKind>> = Lazy::new(|| {
    let mut selectors = HashMap::new();

    // ERC-20 / BEP-20
    selectors.insert([0xa9, 0x05, 0x9c, 0xbb], TransactionKind::TokenTransfer); // transfer
    selectors.insert([0x23, 0xb8, 0x72, 0xdd], TransactionKind::TokenTransfer); // transferFrom
    selectors.insert([0x09, 0x5e, 0xa7, 0xb3], TransactionKind::TokenApproval); // approve

    // Uniswap V2 style routers (PancakeSwap)
    for selector in [
        [0x7f, 0xf3, 0x6a, 0xb5], // swapExactETHForTokens
        [0x38, 0xed, 0x17, 0x39], // swapExactTokensForTokens
        [0x18, 0xcb, 0xaf, 0xe5], // swapExactTokensForETH
        [0xfb, 0x3b, 0xdb, 0x41], // swapETHForExactTokens
        [0x88, 0x03, 0xdb, 0xee], // swapTokensForExactTokens
        [0x4a, 0x25, 0xd9, 0x4a], // swapTokensForExactETH
        [0x5c, 0x11, 0xd7, 0x95], // swapExactTokensForTokensSupportingFeeOnTransferTokens
        [0xb6, 0xf9, 0xde, 0x95], // swapExactETHForTokensSupportingFeeOnTransferTokens
        [0x79, 0x1a, 0xc9, 0x47], // swapExactTokensForETHSupportingFeeOnTransferTokens
    ] {
        selectors.insert(selector, TransactionKind::Swap);
    }

    selectors
});

/// Best-effort label for a transaction; never decides whether it matches
pub fn classify_kind(tx: &Transaction) -> TransactionKind {
    if tx.to.is_none() {
        return TransactionKind::ContractCreation;
    }
    if tx.input.is_empty() {
        return TransactionKind::NativeTransfer;
    }

    tx.selector()
        .and_then(|selector| SELECTORS.get(&selector).copied())
        .unwrap_or(TransactionKind::ContractCall)
}

/// Match a transaction's sender and recipient against the watch list
pub fn match_transaction(tx: &Transaction, watch_list: &WatchList) -> Option<(MatchDirection, String)> {
    let from = tx.from.to_lowercase();
    let from_watched = watch_list.contains(&from);

    // Contract creations have no recipient to match on
    let to = tx.to.as_ref().map(|to| to.to_lowercase());
    let to_watched = to.as_ref().map(|to| watch_list.contains(to)).unwrap_or(false);

    match (from_watched, to_watched) {
        (true, true) => Some((MatchDirection::Both, from)),
        (true, false) => Some((MatchDirection::FromWatched, from)),
        (false, true) => to.map(|to| (MatchDirection::ToWatched, to)),
        (false, false) => None,
    }
}

/// All watch-list matches of a block, in block order, at most one per transaction
pub fn match_block(block: &Block, watch_list: &WatchList) -> Vec<MatchEvent> {
    if watch_list.is_empty() {
        return Vec::new();
    }

    block
        .transactions
        .iter()
        .filter_map(|tx| {
            match_transaction(tx, watch_list).map(|(direction, wallet)| MatchEvent {
                transaction: tx.clone(),
                block_height: block.height,
                block_timestamp: block.timestamp,
                direction,
                kind: classify_kind(tx),
                wallet,
            })
        })
        .collect()
}
