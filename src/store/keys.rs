//! Well-known store keys written by trackers and read by the miner.

/// Gas price in wei, `0x`-prefixed hex.
pub const GAS_PRICE: &str = "gas_price";
/// Account balance in wei, `0x`-prefixed hex.
pub const BALANCE: &str = "balance";
/// Current challenge hash, `0x`-prefixed 32 byte hex.
pub const CURRENT_CHALLENGE: &str = "current_challenge";
pub const REQUEST_ID: &str = "request_id";
pub const DIFFICULTY: &str = "difficulty";
/// Raw query string of the current request.
pub const QUERY_STRING: &str = "query_string";
pub const GRANULARITY: &str = "granularity";
pub const TOTAL_TIP: &str = "total_tip";

/// Keys the miner needs before it can build a work snapshot.
pub const CHALLENGE_KEYS: [&str; 6] = [
    CURRENT_CHALLENGE,
    REQUEST_ID,
    DIFFICULTY,
    QUERY_STRING,
    GRANULARITY,
    TOTAL_TIP,
];
