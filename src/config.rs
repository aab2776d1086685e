//! Static store configuration injected at startup.

use chrono::Duration;
use std::collections::BTreeMap;

/// A bank/transfer account buyers can pay into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentAccount {
    pub label: String,
    pub account_no: String,
    pub holder: String,
}

/// Storefront-wide settings. The payment-account directory is data handed in
/// at startup, keyed by the method name buyers select at confirmation.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub payment_accounts: BTreeMap<String, PaymentAccount>,
    /// How long a `pending` order may wait for payment proof.
    pub pending_window: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            payment_accounts: BTreeMap::new(),
            pending_window: Duration::minutes(30),
        }
    }
}

impl StoreConfig {
    pub fn with_account(mut self, method: &str, account: PaymentAccount) -> Self {
        self.payment_accounts.insert(method.to_string(), account);
        self
    }

    pub fn knows_method(&self, method: &str) -> bool {
        self.payment_accounts.contains_key(method)
    }
}
