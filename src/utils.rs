//! Identifier helpers: order ids and bech32-encoded actor ids

use crate::types::TimeStamp;
use bech32::Bech32m;
use chrono::Utc;
use uuid7::uuid7;

/// Construct a unique actor id then encode using bech32.
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Produce a human-readable order id: creation timestamp plus an entropy
/// suffix drawn from a fresh uuid7. Collision handling lives in the caller,
/// which retries with a new suffix against the order store.
pub fn new_order_id(now: TimeStamp<Utc>) -> String {
    let stamp = now.to_datetime_utc().format("%Y%m%d%H%M%S");
    let uuid = uuid7();
    // the tail of a uuid7 is the random part; the timestamped head is
    // already carried by `stamp`
    let suffix = hex::encode(&uuid.as_bytes()[12..16]);

    format!("ORD-{stamp}-{suffix}")
}
