use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::error::ProcessingError;

/// A fully fetched block; immutable once produced by the chain client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub height: u64,
    pub hash: Option<String>,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    /// `None` for contract creation
    pub to: Option<String>,
    pub value: U256,
    /// Empty for plain value transfers
    pub input: Vec<u8>,
}

impl Transaction {
    /// First four bytes of the calldata
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.input.get(..4).map(|s| [s[0], s[1], s[2], s[3]])
    }
}

/// Which side of a transaction touched the watch list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchDirection {
    FromWatched,
    ToWatched,
    /// Self-transfer between watched wallets
    Both,
}

impl MatchDirection {
    pub fn label(&self) -> &'static str {
        match self {
            MatchDirection::FromWatched => "out",
            MatchDirection::ToWatched => "in",
            MatchDirection::Both => "internal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    NativeTransfer,
    TokenTransfer,
    TokenApproval,
    Swap,
    ContractCall,
    ContractCreation,
}

impl TransactionKind {
    pub fn label(&self) -> &'static str {
        match self {
            TransactionKind::NativeTransfer => "Native transfer",
            TransactionKind::TokenTransfer => "Token transfer",
            TransactionKind::TokenApproval => "Token approval",
            TransactionKind::Swap => "Swap",
            TransactionKind::ContractCall => "Contract call",
            TransactionKind::ContractCreation => "Contract creation",
        }
    }

    /// Kinds that target a token contract worth a metadata lookup
    pub fn is_token_interaction(&self) -> bool {
        matches!(self, TransactionKind::TokenTransfer | TransactionKind::TokenApproval)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchEvent {
    pub transaction: Transaction,
    pub block_height: u64,
    pub block_timestamp: u64,
    pub direction: MatchDirection,
    pub kind: TransactionKind,
    /// The watched address that triggered the match (the sender for `Both`)
    pub wallet: String,
}

/// Parse a `0x` quantity into a u64, rejecting overflow and non-hex input
pub fn parse_hex_u64(value: &str) -> Result<u64, ProcessingError> {
    let digits = strip_0x(value);
    if digits.is_empty() {
        return Err(ProcessingError::BlockParsing(format!("empty quantity: {:?}", value)));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| ProcessingError::BlockParsing(format!("invalid quantity {:?}: {}", value, e)))
}

/// Parse a `0x` quantity into a U256
pub fn parse_hex_u256(value: &str) -> Result<U256, ProcessingError> {
    let digits = strip_0x(value);
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    if digits.len() > 64 {
        return Err(ProcessingError::AmountParsing(format!("quantity overflows 256 bits: {}", value)));
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| ProcessingError::AmountParsing(format!("invalid quantity {:?}: {:?}", value, e)))
}

/// Decode `0x`-prefixed data; odd length input is left padded
pub fn decode_hex_data(value: &str) -> Result<Vec<u8>, ProcessingError> {
    let digits = strip_0x(value);
    let decoded = if digits.len() % 2 == 1 {
        hex::decode(format!("0{}", digits))
    } else {
        hex::decode(digits)
    };
    decoded.map_err(|e| ProcessingError::TransactionParsing(format!("invalid hex data: {}", e)))
}

fn strip_0x(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

/// Render an integer amount with `decimals` places, e.g. 10^18 wei -> "1.0"
pub fn format_units(value: U256, decimals: u32) -> String {
    if decimals == 0 {
        return value.to_string();
    }

    let divisor = U256::exp10(decimals as usize);
    let (whole, fraction) = value.div_mod(divisor);

    let fraction = format!("{:0>width$}", fraction.to_string(), width = decimals as usize);
    let trimmed = fraction.trim_end_matches('0');
    if trimmed.is_empty() {
        format!("{}.0", whole)
    } else {
        format!("{}.{}", whole, trimmed)
    }
}

/// `0x1234...abcd` style abbreviation for alert text
pub fn short_address(address: &str) -> String {
    if address.len() <= 12 {
        return address.to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}
