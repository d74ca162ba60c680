//! System-wide constants for the DexCore settlement core.

/// Exchange split used when no params have ever been stored (basis points).
pub const DEFAULT_SPLIT_BPS: u16 = 500;

/// Upper bound for any split (basis points).
pub const MAX_SPLIT_BPS: u16 = 10_000;

/// Maximum length of a caller-supplied external order id.
pub const MAX_EXTERNAL_ID_LENGTH: usize = 100;

/// Module account receiving the exchange split of every fee.
pub const DEFAULT_FEE_COLLECTOR: &str = "fee_collector";

/// Prefix of derived market accounts (`market/<id>`).
pub const MARKET_ACCOUNT_PREFIX: &str = "market/";

/// Prefix of every hold reason placed by this module.
pub const HOLD_REASON_PREFIX: &str = "dexcore";

/// Commitments released per store scan when a market is closed.
pub const DEFAULT_RELEASE_BATCH_SIZE: usize = 500;

/// Source tag passed to the valuation recorder.
pub const DEFAULT_NAV_SOURCE: &str = "dexcore";

/// Tag on commitment releases triggered by closing a market.
pub const CLOSE_MARKET_TAG: &str = "GovCloseMarket";
