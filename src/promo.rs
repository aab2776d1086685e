//! Promotion records and the pure discount resolver.
//!
//! Promotion lifecycle (creation, activation, expiry flagging) is owned by
//! the admin side of the store; this subsystem only reads them at checkout.

use crate::error::{PromoRejection, StorageError};
use crate::types::{Money, TimeStamp};
use chrono::Utc;

#[derive(Debug, PartialEq, Eq, Clone, Copy, minicbor::Encode, minicbor::Decode)]
pub enum PromoStatus {
    #[n(0)]
    Active,
    #[n(1)]
    Inactive,
    #[n(2)]
    Expired,
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct Promotion {
    #[n(0)]
    pub promo_id: String,
    #[n(1)]
    pub discount_percent: u64,
    #[n(2)]
    pub status: PromoStatus,
    #[n(3)]
    pub start_date: TimeStamp<Utc>,
    #[n(4)]
    pub end_date: TimeStamp<Utc>,
}

/// Validate a promotion against the clock and compute the discount.
///
/// The discount is `floor(subtotal * percent / 100)`, always computed against
/// the pre-discount subtotal. Stateless and side-effect free.
pub fn resolve(
    promo: &Promotion,
    now: TimeStamp<Utc>,
    subtotal: Money,
) -> Result<Money, PromoRejection> {
    match promo.status {
        PromoStatus::Inactive => return Err(PromoRejection::Inactive),
        PromoStatus::Expired => return Err(PromoRejection::OutsideWindow),
        PromoStatus::Active => {}
    }

    if now < promo.start_date || now > promo.end_date {
        return Err(PromoRejection::OutsideWindow);
    }

    let discount = subtotal * promo.discount_percent / 100;
    // a percentage over 100 would otherwise drive the total negative
    Ok(discount.min(subtotal))
}

/// Read (and, for admin/test seeding, write) access to the promotions tree.
pub struct PromoDirectory {
    tree: sled::Tree,
}

impl PromoDirectory {
    pub fn open(db: &sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            tree: db.open_tree("promos")?,
        })
    }

    pub fn get(&self, promo_id: &str) -> Result<Option<Promotion>, StorageError> {
        match self.tree.get(promo_id.as_bytes())? {
            Some(raw) => Ok(Some(minicbor::decode(raw.as_ref())?)),
            None => Ok(None),
        }
    }

    pub fn install(&self, promo: &Promotion) -> Result<(), StorageError> {
        let cbor = minicbor::to_vec(promo).map_err(StorageError::encode)?;
        self.tree.insert(promo.promo_id.as_bytes(), cbor)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_promo(percent: u64) -> Promotion {
        Promotion {
            promo_id: "PROMO15".into(),
            discount_percent: percent,
            status: PromoStatus::Active,
            start_date: TimeStamp::new_with(2025, 1, 1, 0, 0, 0),
            end_date: TimeStamp::new_with(2025, 12, 31, 23, 59, 59),
        }
    }

    #[test]
    fn fifteen_percent_of_100000() {
        let now = TimeStamp::new_with(2025, 6, 1, 12, 0, 0);
        let discount = resolve(&active_promo(15), now, 100_000).unwrap();
        assert_eq!(discount, 15_000);
    }

    #[test]
    fn discount_floors_fractional_results() {
        let now = TimeStamp::new_with(2025, 6, 1, 12, 0, 0);
        // 15% of 99 is 14.85, floored to 14
        assert_eq!(resolve(&active_promo(15), now, 99).unwrap(), 14);
    }

    #[test]
    fn expired_status_is_rejected() {
        let mut promo = active_promo(15);
        promo.status = PromoStatus::Expired;

        let now = TimeStamp::new_with(2025, 6, 1, 12, 0, 0);
        assert_eq!(
            resolve(&promo, now, 100_000),
            Err(PromoRejection::OutsideWindow)
        );
    }

    #[test]
    fn inactive_status_is_rejected() {
        let mut promo = active_promo(15);
        promo.status = PromoStatus::Inactive;

        let now = TimeStamp::new_with(2025, 6, 1, 12, 0, 0);
        assert_eq!(resolve(&promo, now, 100_000), Err(PromoRejection::Inactive));
    }

    #[test]
    fn outside_window_is_rejected() {
        let promo = active_promo(15);

        let before = TimeStamp::new_with(2024, 12, 31, 23, 59, 59);
        let after = TimeStamp::new_with(2026, 1, 1, 0, 0, 0);

        assert_eq!(
            resolve(&promo, before, 100_000),
            Err(PromoRejection::OutsideWindow)
        );
        assert_eq!(
            resolve(&promo, after, 100_000),
            Err(PromoRejection::OutsideWindow)
        );
    }

    #[test]
    fn oversized_percentage_clamps_to_subtotal() {
        let now = TimeStamp::new_with(2025, 6, 1, 12, 0, 0);
        assert_eq!(resolve(&active_promo(150), now, 40_000).unwrap(), 40_000);
    }
}
