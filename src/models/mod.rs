pub mod transaction;
pub mod watch_list;

pub use transaction::{
    Block, MatchDirection, MatchEvent, Transaction, TransactionKind, format_units, short_address,
};
pub use watch_list::{validate_address, WatchList};
