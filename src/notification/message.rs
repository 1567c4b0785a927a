use chrono::{TimeZone, Utc};

use crate::blockchain::token_metadata::{decode_token_call, TokenInfo};
use crate::config::NotificationConfig;
use crate::models::{format_units, short_address, MatchDirection, MatchEvent, TransactionKind};

/// A rendered alert, ready for any sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub text: String,
    /// Transaction the alert is about, if any
    pub tx_hash: Option<String>,
}

fn emoji(event: &MatchEvent) -> &'static str {
    if event.kind.is_token_interaction() || event.kind == TransactionKind::Swap {
        return "🚀";
    }
    match event.direction {
        MatchDirection::ToWatched => "💰",
        MatchDirection::FromWatched => "📤",
        MatchDirection::Both => "🔔",
    }
}

fn direction_text(direction: MatchDirection) -> &'static str {
    match direction {
        MatchDirection::FromWatched => "outgoing",
        MatchDirection::ToWatched => "incoming",
        MatchDirection::Both => "internal",
    }
}

fn block_time(timestamp: u64) -> String {
    Utc.timestamp_opt(timestamp as i64, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// First notification sent for every match
pub fn format_match_alert(event: &MatchEvent, config: &NotificationConfig) -> Alert {
    let tx = &event.transaction;
    let emoji = emoji(event);
    let counterparty = match event.direction {
        MatchDirection::FromWatched | MatchDirection::Both => tx.to.as_deref().map(short_address),
        MatchDirection::ToWatched => Some(short_address(&tx.from)),
    }
    .unwrap_or_else(|| "contract creation".to_string());

    let text = format!(
        "### {emoji} Wallet activity\n\n\
         **Type**: {kind} ({direction})\n\
         **Wallet**: `{wallet}`\n\
         **Counterparty**: `{counterparty}`\n\
         **Amount**: {amount} {symbol}\n\
         **Block**: {height}\n\
         **Time**: {time}\n\n\
         🔗 [View transaction]({explorer}{hash})",
        emoji = emoji,
        kind = event.kind.label(),
        direction = direction_text(event.direction),
        wallet = short_address(&event.wallet),
        counterparty = counterparty,
        amount = format_units(tx.value, config.native_decimals),
        symbol = config.native_symbol,
        height = event.block_height,
        time = block_time(event.block_timestamp),
        explorer = config.explorer_tx_url,
        hash = tx.hash,
    );

    Alert {
        title: format!("{} BSC wallet watcher", emoji),
        text,
        tx_hash: Some(tx.hash.clone()),
    }
}

/// Follow-up for token interactions once the contract's metadata is known
pub fn format_token_alert(event: &MatchEvent, token: &TokenInfo, config: &NotificationConfig) -> Alert {
    let tx = &event.transaction;
    let mut text = format!(
        "### 🔥 Token activity details\n\n\
         **Type**: {kind}\n\
         **Wallet**: `{wallet}`\n\
         **Token**: {name} ({symbol})\n\
         **Contract**: `{contract}`\n",
        kind = event.kind.label(),
        wallet = short_address(&event.wallet),
        name = if token.name.is_empty() { "Unknown" } else { token.name.as_str() },
        symbol = if token.symbol.is_empty() { "UNKNOWN" } else { token.symbol.as_str() },
        contract = token.address,
    );

    if let Some(call) = decode_token_call(&tx.input) {
        let label = if event.kind == TransactionKind::TokenApproval { "Spender" } else { "Recipient" };
        text.push_str(&format!(
            "**{}**: `{}`\n**Amount**: {} {}\n",
            label,
            short_address(&call.counterparty),
            format_units(call.amount, token.decimals),
            token.symbol,
        ));
    }

    text.push_str(&format!(
        "**Transaction**: `{hash}`\n\
         **Block**: {height}\n\n\
         🔗 **Links**\n\
         - [View transaction]({explorer}{hash})\n\
         - [DEXTools](https://www.dextools.io/app/bnb/pair-explorer/{contract})\n\
         - [PancakeSwap](https://pancakeswap.finance/swap?outputCurrency={contract})",
        hash = tx.hash,
        height = event.block_height,
        explorer = config.explorer_tx_url,
        contract = token.address,
    ));

    Alert {
        title: "🚀 Token activity details".to_string(),
        text,
        tx_hash: Some(tx.hash.clone()),
    }
}

pub fn format_startup_alert(wallet_count: usize, chain_height: u64, endpoint: &str) -> Alert {
    Alert {
        title: "🚀 BSC wallet watcher started".to_string(),
        text: format!(
            "### 🟢 BSC wallet watcher started\n\n\
             **Started**: {}\n\
             **Watched wallets**: {}\n\
             **Chain height**: {}\n\
             **RPC endpoint**: {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            wallet_count,
            chain_height,
            endpoint,
        ),
        tx_hash: None,
    }
}
