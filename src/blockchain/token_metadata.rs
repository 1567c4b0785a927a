use log::debug;
use primitive_types::U256;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::blockchain::ChainClient;
use crate::error::ProcessingError;

const NAME_SELECTOR: [u8; 4] = [0x06, 0xfd, 0xde, 0x03];
const SYMBOL_SELECTOR: [u8; 4] = [0x95, 0xd8, 0x9b, 0x41];
const DECIMALS_SELECTOR: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];

const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
const TRANSFER_FROM_SELECTOR: [u8; 4] = [0x23, 0xb8, 0x72, 0xdd];
const APPROVE_SELECTOR: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];

const UNKNOWN_NAME: &str = "Unknown";
const UNKNOWN_SYMBOL: &str = "UNKNOWN";
const DEFAULT_DECIMALS: u32 = 18;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenInfo {
    pub address: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u32,
}

/// Recipient (or spender) and amount decoded from ERC-20 calldata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCall {
    pub counterparty: String,
    pub amount: U256,
}

/// Decode `transfer`, `transferFrom` and `approve` arguments
pub fn decode_token_call(input: &[u8]) -> Option<TokenCall> {
    let selector: [u8; 4] = input.get(..4)?.try_into().ok()?;
    let args = &input[4..];

    let (address_word, amount_word) = match selector {
        TRANSFER_SELECTOR | APPROVE_SELECTOR => (0, 1),
        TRANSFER_FROM_SELECTOR => (1, 2),
        _ => return None,
    };

    let address = word(args, address_word)?;
    let amount = word(args, amount_word)?;

    Some(TokenCall {
        counterparty: format!("0x{}", hex::encode(&address[12..])),
        amount: U256::from_big_endian(amount),
    })
}

fn word(data: &[u8], index: usize) -> Option<&[u8]> {
    data.get(index * 32..(index + 1) * 32)
}

/// Decode an ABI `string` return value; `bytes32` returns are accepted too
pub fn decode_abi_string(data: &[u8]) -> std::result::Result<String, ProcessingError> {
    if data.len() == 32 {
        let end = data.iter().position(|b| *b == 0).unwrap_or(32);
        return Ok(String::from_utf8_lossy(&data[..end]).trim().to_string());
    }

    let offset = abi_usize(data, 0)?;
    let length = abi_usize(data, offset)?;
    let start = offset + 32;
    let bytes = data
        .get(start..start + length)
        .ok_or_else(|| ProcessingError::AbiDecoding(format!("string of {} bytes out of bounds", length)))?;

    Ok(String::from_utf8_lossy(bytes).trim().to_string())
}

pub fn decode_abi_uint(data: &[u8]) -> std::result::Result<U256, ProcessingError> {
    let word = word(data, 0)
        .ok_or_else(|| ProcessingError::AbiDecoding(format!("expected 32 bytes, got {}", data.len())))?;
    Ok(U256::from_big_endian(word))
}

fn abi_usize(data: &[u8], position: usize) -> std::result::Result<usize, ProcessingError> {
    let word = data
        .get(position..position + 32)
        .ok_or_else(|| ProcessingError::AbiDecoding(format!("no word at offset {}", position)))?;
    let value = U256::from_big_endian(word);
    if value > U256::from(u32::MAX) {
        return Err(ProcessingError::AbiDecoding(format!("offset {} too large", value)));
    }
    Ok(value.as_usize())
}

/// `name`/`symbol`/`decimals` lookups with a time-bounded cache.
///
/// Each field falls back on its own when the call reverts or does not decode,
/// so non-standard tokens still get a details alert. A lookup where nothing
/// resolved is not cached.
pub struct TokenMetadataCache {
    chain_client: Arc<ChainClient>,
    ttl: Duration,
    entries: Mutex<HashMap<String, (TokenInfo, Instant)>>,
}

impl TokenMetadataCache {
    pub fn new(chain_client: Arc<ChainClient>, ttl: Duration) -> Self {
        Self {
            chain_client,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached(&self, address: &str) -> Option<TokenInfo> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&address.to_lowercase())
            .filter(|(_, fetched_at)| fetched_at.elapsed() < self.ttl)
            .map(|(info, _)| info.clone())
    }

    pub async fn get(&self, address: &str) -> TokenInfo {
        let address = address.to_lowercase();
        if let Some(info) = self.cached(&address) {
            return info;
        }

        let name = self
            .read(&address, &NAME_SELECTOR, decode_abi_string)
            .await
            .filter(|name| !name.is_empty());
        let symbol = self
            .read(&address, &SYMBOL_SELECTOR, decode_abi_string)
            .await
            .filter(|symbol| !symbol.is_empty());
        let decimals = self
            .read(&address, &DECIMALS_SELECTOR, decode_abi_uint)
            .await
            .filter(|decimals| *decimals <= U256::from(77u32))
            .map(|decimals| decimals.as_u32());

        let resolved = name.is_some() || symbol.is_some() || decimals.is_some();
        let info = TokenInfo {
            address: address.clone(),
            name: name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            symbol: symbol.unwrap_or_else(|| UNKNOWN_SYMBOL.to_string()),
            decimals: decimals.unwrap_or(DEFAULT_DECIMALS),
        };

        if resolved {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.retain(|_, (_, fetched_at)| fetched_at.elapsed() < self.ttl);
            entries.insert(address, (info.clone(), Instant::now()));
        }

        info
    }

    async fn read<T>(
        &self,
        address: &str,
        selector: &[u8; 4],
        decode: impl FnOnce(&[u8]) -> std::result::Result<T, ProcessingError>,
    ) -> Option<T> {
        let data = match self.chain_client.eth_call(address, selector).await {
            Ok(data) => data,
            Err(e) => {
                debug!("eth_call 0x{} on {} failed: {}", hex::encode(selector), address, e);
                return None;
            }
        };
        decode(&data)
            .map_err(|e| debug!("Undecodable 0x{} result from {}: {}", hex::encode(selector), address, e))
            .ok()
    }
}
