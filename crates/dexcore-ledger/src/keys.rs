//! Keyspace codec.
//!
//! Every key starts with a one-byte entity type. Fixed-width integers are
//! big-endian (market id 4 bytes, order id 8 bytes) and variable-length
//! fields come last, so prefix scans over the fixed part are well defined.
//!
//! | Entity | Key | Value |
//! |---|---|---|
//! | Default split | `0x00 "split"` | 2-byte bps |
//! | Denom split | `0x00 "split" denom` | 2-byte bps |
//! | Flat fee | `0x01 market subtype denom` | amount string |
//! | Ratio | `0x01 market subtype price_denom 0x1E fee_denom` | `price 0x1E fee` |
//! | Market flag | `0x01 market subtype` | empty |
//! | Required attributes | `0x01 market 0x09 attr_kind` | attrs joined by `0x1E` |
//! | Order | `0x02 order_id kind` | order payload |
//! | Market → order | `0x03 market order_id` | empty |
//! | Owner → order | `0x04 len owner order_id` | empty |
//! | Asset → order | `0x05 denom kind order_id` | empty |
//! | Known market | `0x07 market` | empty |
//! | Last order id | `0x08` | 8-byte id |
//! | External id → order | `0x09 market external_id` | 8-byte id |
//! | Commitment | `0x63 market owner` | coins string |

use dexcore_types::{AccountId, DexError, MarketId, OrderId, OrderKind, Result};
use rust_decimal::Decimal;

pub const KEY_TYPE_PARAMS: u8 = 0x00;
pub const KEY_TYPE_MARKET: u8 = 0x01;
pub const KEY_TYPE_ORDER: u8 = 0x02;
pub const KEY_TYPE_MARKET_TO_ORDER_INDEX: u8 = 0x03;
pub const KEY_TYPE_ADDRESS_TO_ORDER_INDEX: u8 = 0x04;
pub const KEY_TYPE_ASSET_TO_ORDER_INDEX: u8 = 0x05;
pub const KEY_TYPE_KNOWN_MARKET_ID: u8 = 0x07;
pub const KEY_TYPE_LAST_ORDER_ID: u8 = 0x08;
pub const KEY_TYPE_MARKET_EXTERNAL_ID_TO_ORDER_INDEX: u8 = 0x09;
pub const KEY_TYPE_COMMITMENT: u8 = 0x63;

/// Separates the two denoms of a ratio key and the two amounts of a ratio value.
pub const RECORD_SEPARATOR: u8 = 0x1E;

const PARAM_SPLIT: &[u8] = b"split";

/// Entry types stored under a market's prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketSubtype {
    CreateAskFlat,
    CreateBidFlat,
    SellerSettlementFlat,
    SellerSettlementRatio,
    BuyerSettlementFlat,
    BuyerSettlementRatio,
    NotAcceptingOrders,
    UserSettle,
    ReqAttr,
    AcceptingCommitments,
    CreateCommitmentFlat,
}

impl MarketSubtype {
    #[must_use]
    pub fn byte(self) -> u8 {
        match self {
            Self::CreateAskFlat => 0x00,
            Self::CreateBidFlat => 0x01,
            Self::SellerSettlementFlat => 0x02,
            Self::SellerSettlementRatio => 0x03,
            Self::BuyerSettlementFlat => 0x04,
            Self::BuyerSettlementRatio => 0x05,
            Self::NotAcceptingOrders => 0x06,
            Self::UserSettle => 0x07,
            Self::ReqAttr => 0x09,
            Self::AcceptingCommitments => 0x0A,
            Self::CreateCommitmentFlat => 0x0B,
        }
    }
}

/// Which action a required-attribute list gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    CreateAsk,
    CreateBid,
    CreateCommitment,
}

impl AttrKind {
    #[must_use]
    pub fn byte(self) -> u8 {
        match self {
            Self::CreateAsk => OrderKind::Ask.type_byte(),
            Self::CreateBid => OrderKind::Bid.type_byte(),
            Self::CreateCommitment => KEY_TYPE_COMMITMENT,
        }
    }
}

impl From<OrderKind> for AttrKind {
    fn from(kind: OrderKind) -> Self {
        match kind {
            OrderKind::Ask => Self::CreateAsk,
            OrderKind::Bid => Self::CreateBid,
        }
    }
}

fn key_with_capacity(capacity: usize, type_byte: u8) -> Vec<u8> {
    let mut key = Vec::with_capacity(capacity + 1);
    key.push(type_byte);
    key
}

/// Account bytes with a one-byte length prefix.
fn length_prefixed(account: &AccountId) -> Result<Vec<u8>> {
    let bytes = account.as_bytes();
    let invalid = |reason: &str| DexError::InvalidAddress {
        address: account.clone(),
        reason: reason.to_string(),
    };
    if bytes.is_empty() {
        return Err(invalid("address cannot be empty"));
    }
    let len = u8::try_from(bytes.len()).map_err(|_| invalid("address length exceeds 255 bytes"))?;
    let mut rv = Vec::with_capacity(bytes.len() + 1);
    rv.push(len);
    rv.extend_from_slice(bytes);
    Ok(rv)
}

fn order_id_from_tail(key: &[u8]) -> Option<OrderId> {
    let start = key.len().checked_sub(8)?;
    let bytes: [u8; 8] = key[start..].try_into().ok()?;
    Some(OrderId::from_be_bytes(bytes))
}

// ---------------------------------------------------------------------------
// Params
// ---------------------------------------------------------------------------

/// `0x00 "split"`: prefix of every split entry, and the default split key.
#[must_use]
pub fn key_param_split_default() -> Vec<u8> {
    let mut key = key_with_capacity(PARAM_SPLIT.len(), KEY_TYPE_PARAMS);
    key.extend_from_slice(PARAM_SPLIT);
    key
}

/// `0x00 "split" denom`.
#[must_use]
pub fn key_param_split(denom: &str) -> Vec<u8> {
    let mut key = key_param_split_default();
    key.extend_from_slice(denom.as_bytes());
    key
}

/// Denom of a split key, `None` for the default split key.
#[must_use]
pub fn parse_param_split_key(key: &[u8]) -> Option<String> {
    let prefix = key_param_split_default();
    let rest = key.strip_prefix(prefix.as_slice())?;
    if rest.is_empty() {
        return None;
    }
    String::from_utf8(rest.to_vec()).ok()
}

#[must_use]
pub fn encode_split(split: u16) -> Vec<u8> {
    split.to_be_bytes().to_vec()
}

pub fn decode_split(value: &[u8]) -> Result<u16> {
    let bytes: [u8; 2] = value.try_into().map_err(|_| DexError::CorruptValue {
        entity: "split param".into(),
        reason: format!("expected 2 bytes, got {}", value.len()),
    })?;
    Ok(u16::from_be_bytes(bytes))
}

// ---------------------------------------------------------------------------
// Markets
// ---------------------------------------------------------------------------

/// `0x01 market`.
#[must_use]
pub fn key_prefix_market(market_id: MarketId) -> Vec<u8> {
    let mut key = key_with_capacity(4, KEY_TYPE_MARKET);
    key.extend_from_slice(&market_id.to_be_bytes());
    key
}

/// `0x01 market subtype`: flag keys and fee-table prefixes.
#[must_use]
pub fn key_market_subtype(market_id: MarketId, subtype: MarketSubtype) -> Vec<u8> {
    let mut key = key_prefix_market(market_id);
    key.push(subtype.byte());
    key
}

/// `0x01 market subtype denom`.
#[must_use]
pub fn key_market_flat_fee(market_id: MarketId, subtype: MarketSubtype, denom: &str) -> Vec<u8> {
    let mut key = key_market_subtype(market_id, subtype);
    key.extend_from_slice(denom.as_bytes());
    key
}

/// `0x01 market subtype price_denom 0x1E`: every ratio for one price denom.
#[must_use]
pub fn key_prefix_market_ratio_for_price_denom(
    market_id: MarketId,
    subtype: MarketSubtype,
    price_denom: &str,
) -> Vec<u8> {
    let mut key = key_market_flat_fee(market_id, subtype, price_denom);
    key.push(RECORD_SEPARATOR);
    key
}

/// `0x01 market subtype price_denom 0x1E fee_denom`.
#[must_use]
pub fn key_market_ratio(
    market_id: MarketId,
    subtype: MarketSubtype,
    price_denom: &str,
    fee_denom: &str,
) -> Vec<u8> {
    let mut key = key_prefix_market_ratio_for_price_denom(market_id, subtype, price_denom);
    key.extend_from_slice(fee_denom.as_bytes());
    key
}

/// Split a ratio key suffix (after the subtype byte) into its two denoms.
#[must_use]
pub fn parse_ratio_key_suffix(suffix: &[u8]) -> Option<(String, String)> {
    let pos = suffix.iter().position(|b| *b == RECORD_SEPARATOR)?;
    let price = String::from_utf8(suffix[..pos].to_vec()).ok()?;
    let fee = String::from_utf8(suffix[pos + 1..].to_vec()).ok()?;
    if price.is_empty() || fee.is_empty() {
        return None;
    }
    Some((price, fee))
}

#[must_use]
pub fn encode_ratio_value(price_amount: Decimal, fee_amount: Decimal) -> Vec<u8> {
    let mut value = price_amount.normalize().to_string().into_bytes();
    value.push(RECORD_SEPARATOR);
    value.extend_from_slice(fee_amount.normalize().to_string().as_bytes());
    value
}

pub fn decode_ratio_value(value: &[u8]) -> Result<(Decimal, Decimal)> {
    let corrupt = |reason: String| DexError::CorruptValue {
        entity: "fee ratio".into(),
        reason,
    };
    let pos = value
        .iter()
        .position(|b| *b == RECORD_SEPARATOR)
        .ok_or_else(|| corrupt("missing record separator".into()))?;
    let parse = |bytes: &[u8]| -> Result<Decimal> {
        let text = std::str::from_utf8(bytes).map_err(|e| corrupt(e.to_string()))?;
        text.parse::<Decimal>().map_err(|e| corrupt(format!("{text:?}: {e}")))
    };
    Ok((parse(&value[..pos])?, parse(&value[pos + 1..])?))
}

/// `0x01 market 0x09 attr_kind`.
#[must_use]
pub fn key_market_req_attr(market_id: MarketId, kind: AttrKind) -> Vec<u8> {
    let mut key = key_market_subtype(market_id, MarketSubtype::ReqAttr);
    key.push(kind.byte());
    key
}

#[must_use]
pub fn encode_req_attrs(attrs: &[String]) -> Vec<u8> {
    attrs.join(&char::from(RECORD_SEPARATOR).to_string()).into_bytes()
}

#[must_use]
pub fn decode_req_attrs(value: &[u8]) -> Vec<String> {
    value
        .split(|b| *b == RECORD_SEPARATOR)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect()
}

/// `0x07 market`.
#[must_use]
pub fn key_known_market(market_id: MarketId) -> Vec<u8> {
    let mut key = key_with_capacity(4, KEY_TYPE_KNOWN_MARKET_ID);
    key.extend_from_slice(&market_id.to_be_bytes());
    key
}

#[must_use]
pub fn parse_known_market_key(key: &[u8]) -> Option<MarketId> {
    let rest = key.strip_prefix(&[KEY_TYPE_KNOWN_MARKET_ID])?;
    let bytes: [u8; 4] = rest.try_into().ok()?;
    Some(MarketId::from_be_bytes(bytes))
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// `0x08`.
#[must_use]
pub fn key_last_order_id() -> Vec<u8> {
    vec![KEY_TYPE_LAST_ORDER_ID]
}

/// `0x02`: every order.
#[must_use]
pub fn key_prefix_orders() -> Vec<u8> {
    vec![KEY_TYPE_ORDER]
}

/// `0x02 order_id`: the (single) record for an id, whatever its kind.
#[must_use]
pub fn key_prefix_order(order_id: OrderId) -> Vec<u8> {
    let mut key = key_with_capacity(9, KEY_TYPE_ORDER);
    key.extend_from_slice(&order_id.to_be_bytes());
    key
}

/// `0x02 order_id kind`.
#[must_use]
pub fn key_order(order_id: OrderId, kind: OrderKind) -> Vec<u8> {
    let mut key = key_prefix_order(order_id);
    key.push(kind.type_byte());
    key
}

/// Order id and raw kind byte of an order key.
#[must_use]
pub fn parse_order_key(key: &[u8]) -> Option<(OrderId, u8)> {
    let rest = key.strip_prefix(&[KEY_TYPE_ORDER])?;
    if rest.len() != 9 {
        return None;
    }
    let bytes: [u8; 8] = rest[..8].try_into().ok()?;
    Some((OrderId::from_be_bytes(bytes), rest[8]))
}

/// `0x03 market`.
#[must_use]
pub fn key_prefix_market_to_order(market_id: MarketId) -> Vec<u8> {
    let mut key = key_with_capacity(12, KEY_TYPE_MARKET_TO_ORDER_INDEX);
    key.extend_from_slice(&market_id.to_be_bytes());
    key
}

/// `0x03 market order_id`.
#[must_use]
pub fn key_market_to_order(market_id: MarketId, order_id: OrderId) -> Vec<u8> {
    let mut key = key_prefix_market_to_order(market_id);
    key.extend_from_slice(&order_id.to_be_bytes());
    key
}

/// `0x04 len owner`.
///
/// # Errors
/// [`DexError::InvalidAddress`] if `owner` is empty or longer than 255 bytes.
pub fn key_prefix_address_to_order(owner: &AccountId) -> Result<Vec<u8>> {
    let prefixed = length_prefixed(owner)?;
    let mut key = key_with_capacity(prefixed.len() + 8, KEY_TYPE_ADDRESS_TO_ORDER_INDEX);
    key.extend_from_slice(&prefixed);
    Ok(key)
}

/// `0x04 len owner order_id`.
pub fn key_address_to_order(owner: &AccountId, order_id: OrderId) -> Result<Vec<u8>> {
    let mut key = key_prefix_address_to_order(owner)?;
    key.extend_from_slice(&order_id.to_be_bytes());
    Ok(key)
}

/// `0x05 denom`. Also matches longer denoms; use [`parse_asset_to_order_key`]
/// to keep only exact matches.
#[must_use]
pub fn key_prefix_asset_to_order(denom: &str) -> Vec<u8> {
    let mut key = key_with_capacity(denom.len() + 9, KEY_TYPE_ASSET_TO_ORDER_INDEX);
    key.extend_from_slice(denom.as_bytes());
    key
}

/// `0x05 denom kind`.
#[must_use]
pub fn key_prefix_asset_to_order_kind(denom: &str, kind: OrderKind) -> Vec<u8> {
    let mut key = key_prefix_asset_to_order(denom);
    key.push(kind.type_byte());
    key
}

/// `0x05 denom kind order_id`.
#[must_use]
pub fn key_asset_to_order(denom: &str, kind: OrderKind, order_id: OrderId) -> Vec<u8> {
    let mut key = key_prefix_asset_to_order_kind(denom, kind);
    key.extend_from_slice(&order_id.to_be_bytes());
    key
}

/// Order id of an asset index key, only if the key belongs to exactly `denom`.
#[must_use]
pub fn parse_asset_to_order_key(key: &[u8], denom: &str) -> Option<(OrderKind, OrderId)> {
    let prefix = key_prefix_asset_to_order(denom);
    let rest = key.strip_prefix(prefix.as_slice())?;
    if rest.len() != 9 {
        return None;
    }
    let kind = OrderKind::try_from(rest[0]).ok()?;
    Some((kind, order_id_from_tail(rest)?))
}

/// Order id at the end of a market or owner index key.
#[must_use]
pub fn parse_index_order_id(key: &[u8]) -> Option<OrderId> {
    order_id_from_tail(key)
}

/// `0x09 market`.
#[must_use]
pub fn key_prefix_market_external_id(market_id: MarketId) -> Vec<u8> {
    let mut key = key_with_capacity(4, KEY_TYPE_MARKET_EXTERNAL_ID_TO_ORDER_INDEX);
    key.extend_from_slice(&market_id.to_be_bytes());
    key
}

/// `0x09 market external_id`.
#[must_use]
pub fn key_market_external_id(market_id: MarketId, external_id: &str) -> Vec<u8> {
    let mut key = key_prefix_market_external_id(market_id);
    key.extend_from_slice(external_id.as_bytes());
    key
}

#[must_use]
pub fn encode_order_id(order_id: OrderId) -> Vec<u8> {
    order_id.to_be_bytes().to_vec()
}

pub fn decode_order_id(value: &[u8]) -> Result<OrderId> {
    let bytes: [u8; 8] = value.try_into().map_err(|_| DexError::CorruptValue {
        entity: "order id".into(),
        reason: format!("expected 8 bytes, got {}", value.len()),
    })?;
    Ok(OrderId::from_be_bytes(bytes))
}

// ---------------------------------------------------------------------------
// Commitments
// ---------------------------------------------------------------------------

/// `0x63`: every commitment.
#[must_use]
pub fn key_prefix_commitments() -> Vec<u8> {
    vec![KEY_TYPE_COMMITMENT]
}

/// `0x63 market`.
#[must_use]
pub fn key_prefix_commitments_for_market(market_id: MarketId) -> Vec<u8> {
    let mut key = key_with_capacity(4, KEY_TYPE_COMMITMENT);
    key.extend_from_slice(&market_id.to_be_bytes());
    key
}

/// `0x63 market owner`.
#[must_use]
pub fn key_commitment(market_id: MarketId, account: &AccountId) -> Vec<u8> {
    let mut key = key_prefix_commitments_for_market(market_id);
    key.extend_from_slice(account.as_bytes());
    key
}

#[must_use]
pub fn parse_commitment_key(key: &[u8]) -> Option<(MarketId, AccountId)> {
    let rest = key.strip_prefix(&[KEY_TYPE_COMMITMENT])?;
    if rest.len() <= 4 {
        return None;
    }
    let market: [u8; 4] = rest[..4].try_into().ok()?;
    let account = String::from_utf8(rest[4..].to_vec()).ok()?;
    Some((MarketId::from_be_bytes(market), AccountId(account)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_key_layout() {
        let key = key_order(OrderId(0x0102), OrderKind::Bid);
        assert_eq!(key, vec![0x02, 0, 0, 0, 0, 0, 0, 0x01, 0x02, 0x01]);
        assert_eq!(parse_order_key(&key), Some((OrderId(0x0102), 0x01)));
        assert!(key.starts_with(&key_prefix_order(OrderId(0x0102))));
    }

    #[test]
    fn market_index_layout() {
        let key = key_market_to_order(MarketId(3), OrderId(7));
        assert_eq!(key, vec![0x03, 0, 0, 0, 3, 0, 0, 0, 0, 0, 0, 0, 7]);
        assert_eq!(parse_index_order_id(&key), Some(OrderId(7)));
    }

    #[test]
    fn owner_index_is_length_prefixed() {
        let key = key_address_to_order(&AccountId::from("abc"), OrderId(1)).unwrap();
        assert_eq!(&key[..5], &[0x04, 3, b'a', b'b', b'c']);
        assert_eq!(parse_index_order_id(&key), Some(OrderId(1)));
        // "ab" must not be a prefix of "abc"'s entries.
        let short = key_prefix_address_to_order(&AccountId::from("ab")).unwrap();
        assert!(!key.starts_with(&short));
    }

    #[test]
    fn owner_index_rejects_unencodable_addresses() {
        let longest = AccountId::from("a".repeat(255).as_str());
        let key = key_address_to_order(&longest, OrderId(1)).unwrap();
        assert_eq!(key[1], 255);
        assert_eq!(key.len(), 1 + 1 + 255 + 8);

        let too_long = AccountId::from("a".repeat(256).as_str());
        let err = key_address_to_order(&too_long, OrderId(1)).unwrap_err();
        assert!(matches!(err, DexError::InvalidAddress { .. }), "Got: {err}");
        assert!(err.to_string().contains("exceeds 255 bytes"), "Got: {err}");

        let err = key_prefix_address_to_order(&AccountId::from("")).unwrap_err();
        assert!(matches!(err, DexError::InvalidAddress { .. }), "Got: {err}");
    }

    #[test]
    fn asset_index_layout_and_exact_denom_match() {
        let key = key_asset_to_order("apple", OrderKind::Ask, OrderId(5));
        let mut expected = vec![0x05];
        expected.extend_from_slice(b"apple");
        expected.push(0x00);
        expected.extend_from_slice(&5u64.to_be_bytes());
        assert_eq!(key, expected);
        assert_eq!(parse_asset_to_order_key(&key, "apple"), Some((OrderKind::Ask, OrderId(5))));

        let longer = key_asset_to_order("apples", OrderKind::Ask, OrderId(5));
        assert!(longer.starts_with(&key_prefix_asset_to_order("apple")));
        assert_eq!(parse_asset_to_order_key(&longer, "apple"), None);
    }

    #[test]
    fn split_keys() {
        assert_eq!(key_param_split_default(), b"\x00split".to_vec());
        assert_eq!(key_param_split("plum"), b"\x00splitplum".to_vec());
        assert_eq!(parse_param_split_key(&key_param_split("plum")), Some("plum".into()));
        assert_eq!(parse_param_split_key(&key_param_split_default()), None);
        assert_eq!(decode_split(&encode_split(500)).unwrap(), 500);
        assert!(decode_split(&[1]).is_err());
    }

    #[test]
    fn ratio_key_and_value() {
        let key = key_market_ratio(MarketId(1), MarketSubtype::SellerSettlementRatio, "plum", "fig");
        let prefix = key_market_subtype(MarketId(1), MarketSubtype::SellerSettlementRatio);
        assert_eq!(&key[..prefix.len()], prefix.as_slice());
        assert_eq!(
            parse_ratio_key_suffix(&key[prefix.len()..]),
            Some(("plum".into(), "fig".into()))
        );

        let value = encode_ratio_value(Decimal::from(30), Decimal::from(1));
        assert_eq!(value, b"30\x1e1".to_vec());
        assert_eq!(decode_ratio_value(&value).unwrap(), (Decimal::from(30), Decimal::from(1)));
        assert!(decode_ratio_value(b"30").is_err());
    }

    #[test]
    fn commitment_key_roundtrip() {
        let account = AccountId::from("addr1");
        let key = key_commitment(MarketId(2), &account);
        assert_eq!(&key[..5], &[0x63, 0, 0, 0, 2]);
        assert_eq!(parse_commitment_key(&key), Some((MarketId(2), account)));
    }

    #[test]
    fn req_attrs_roundtrip() {
        let attrs = vec!["kyc.passport".to_string(), "*.accredited".to_string()];
        assert_eq!(decode_req_attrs(&encode_req_attrs(&attrs)), attrs);
        assert!(decode_req_attrs(&[]).is_empty());
    }
}
