//! Cart lines and the dual-backend cart store.
//!
//! A guest browses with an ephemeral in-memory cart; an authenticated buyer
//! gets a durable sled-backed cart keyed by their id. The store depends only
//! on the [`CartBackend`] trait and swaps implementation when the identity
//! changes. The previous backend's lines are discarded on the swap, never
//! merged - the authoritative cart is whichever backing store matches the
//! current identity.

use crate::error::{CartError, StorageError};
use crate::types::Money;
use std::collections::BTreeMap;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex, PoisonError};

/// What a cart line points at: a catalog product, or a synthetic id for a
/// custom service request (banner printing, design work and the like).
#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode)]
pub enum ProductRef {
    #[n(0)]
    Catalog {
        #[n(0)]
        category: String,
        #[n(1)]
        product_id: String,
    },
    #[n(1)]
    Service {
        #[n(0)]
        request_id: String,
    },
}

impl ProductRef {
    /// Storage key for the line. Two lines with the same key are the same
    /// product and merge by quantity.
    pub fn key(&self) -> String {
        match self {
            ProductRef::Catalog {
                category,
                product_id,
            } => format!("catalog/{category}/{product_id}"),
            ProductRef::Service { request_id } => format!("service/{request_id}"),
        }
    }
}

/// Free-form specification attached to a custom service line.
#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct ServiceDetail {
    #[n(0)]
    pub material: String,
    #[n(1)]
    pub attachments: Vec<String>,
    #[n(2)]
    pub notes: String,
}

#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct CartLine {
    #[n(0)]
    pub product_ref: ProductRef,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub unit_price: Money,
    #[n(3)]
    pub quantity: u32,
    #[n(4)]
    pub selected: bool,
    #[n(5)]
    pub custom_detail: Option<ServiceDetail>,
}

impl CartLine {
    pub fn new(product_ref: ProductRef, name: &str, unit_price: Money, quantity: u32) -> Self {
        Self {
            product_ref,
            name: name.to_string(),
            unit_price,
            quantity,
            selected: true,
            custom_detail: None,
        }
    }

    pub fn with_detail(mut self, detail: ServiceDetail) -> Self {
        self.custom_detail = Some(detail);
        self
    }
}

/// Backing store for one buyer's cart. Mutations are write-through: a failed
/// write returns the error and leaves nothing applied.
pub trait CartBackend: Send {
    fn lines(&self) -> Result<Vec<CartLine>, CartError>;
    fn get(&self, key: &str) -> Result<Option<CartLine>, CartError>;
    fn put(&self, line: &CartLine) -> Result<(), CartError>;
    fn delete(&self, key: &str) -> Result<(), CartError>;
    /// Push-based view: the receiver gets the full line set now and after
    /// every change.
    fn watch(&self) -> Receiver<Vec<CartLine>>;
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ephemeral cart for anonymous sessions. Lost when the session ends.
#[derive(Default)]
pub struct MemoryCart {
    lines: Mutex<BTreeMap<String, CartLine>>,
    watchers: Mutex<Vec<Sender<Vec<CartLine>>>>,
}

impl MemoryCart {
    pub fn new() -> Self {
        Self::default()
    }

    fn broadcast(&self) {
        let snapshot: Vec<CartLine> = lock(&self.lines).values().cloned().collect();
        // drop watchers whose receiver went away
        lock(&self.watchers).retain(|tx| tx.send(snapshot.clone()).is_ok());
    }
}

impl CartBackend for MemoryCart {
    fn lines(&self) -> Result<Vec<CartLine>, CartError> {
        Ok(lock(&self.lines).values().cloned().collect())
    }

    fn get(&self, key: &str) -> Result<Option<CartLine>, CartError> {
        Ok(lock(&self.lines).get(key).cloned())
    }

    fn put(&self, line: &CartLine) -> Result<(), CartError> {
        lock(&self.lines).insert(line.product_ref.key(), line.clone());
        self.broadcast();
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CartError> {
        lock(&self.lines).remove(key);
        self.broadcast();
        Ok(())
    }

    fn watch(&self) -> Receiver<Vec<CartLine>> {
        let (tx, rx) = channel();
        let snapshot: Vec<CartLine> = lock(&self.lines).values().cloned().collect();
        if tx.send(snapshot).is_ok() {
            lock(&self.watchers).push(tx);
        }
        rx
    }
}

/// Durable cart for authenticated buyers, stored under a per-buyer prefix in
/// the shared `carts` tree. Watchers are fed from sled's own change
/// subscription, so updates from a second session of the same buyer show up
/// here too.
pub struct SledCart {
    tree: sled::Tree,
    buyer_id: String,
}

impl SledCart {
    pub fn open(db: &sled::Db, buyer_id: &str) -> Result<Self, CartError> {
        let tree = db.open_tree("carts").map_err(StorageError::from)?;
        Ok(Self {
            tree,
            buyer_id: buyer_id.to_string(),
        })
    }

    fn prefix(&self) -> String {
        format!("{}/", self.buyer_id)
    }

    fn storage_key(&self, line_key: &str) -> Vec<u8> {
        format!("{}/{line_key}", self.buyer_id).into_bytes()
    }

    fn list(tree: &sled::Tree, prefix: &str) -> Result<Vec<CartLine>, CartError> {
        let mut lines = Vec::new();
        for item in tree.scan_prefix(prefix.as_bytes()) {
            let (_, raw) = item.map_err(StorageError::from)?;
            let line: CartLine = minicbor::decode(raw.as_ref()).map_err(StorageError::from)?;
            lines.push(line);
        }
        Ok(lines)
    }
}

impl CartBackend for SledCart {
    fn lines(&self) -> Result<Vec<CartLine>, CartError> {
        Self::list(&self.tree, &self.prefix())
    }

    fn get(&self, key: &str) -> Result<Option<CartLine>, CartError> {
        match self
            .tree
            .get(self.storage_key(key))
            .map_err(StorageError::from)?
        {
            Some(raw) => Ok(Some(
                minicbor::decode(raw.as_ref()).map_err(StorageError::from)?,
            )),
            None => Ok(None),
        }
    }

    fn put(&self, line: &CartLine) -> Result<(), CartError> {
        let cbor = minicbor::to_vec(line).map_err(StorageError::encode)?;
        self.tree
            .insert(self.storage_key(&line.product_ref.key()), cbor)
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CartError> {
        self.tree
            .remove(self.storage_key(key))
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn watch(&self) -> Receiver<Vec<CartLine>> {
        let (tx, rx) = channel();
        let tree = self.tree.clone();
        let prefix = self.prefix();
        let mut subscriber = tree.watch_prefix(prefix.as_bytes());

        std::thread::spawn(move || {
            match Self::list(&tree, &prefix) {
                Ok(snapshot) => {
                    if tx.send(snapshot).is_err() {
                        return;
                    }
                }
                Err(err) => tracing::warn!(%prefix, error = %err, "cart watch: initial read failed"),
            }
            while (&mut subscriber).next().is_some() {
                match Self::list(&tree, &prefix) {
                    Ok(snapshot) => {
                        if tx.send(snapshot).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(%prefix, error = %err, "cart watch: re-read failed")
                    }
                }
            }
        });

        rx
    }
}

/// Whose cart we are looking at.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Identity {
    Anonymous,
    Authenticated(String),
}

/// The buyer-facing cart API. Holds whichever backend matches the current
/// identity and swaps it when the identity changes.
pub struct CartStore {
    db: Arc<sled::Db>,
    identity: Identity,
    backend: Box<dyn CartBackend>,
}

impl CartStore {
    /// A fresh store starts anonymous with an empty ephemeral cart.
    pub fn new(db: Arc<sled::Db>) -> Self {
        Self {
            db,
            identity: Identity::Anonymous,
            backend: Box::new(MemoryCart::new()),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Switch to the buyer's durable cart. Whatever the guest cart held is
    /// dropped; the durable cart is authoritative from here on.
    pub fn sign_in(&mut self, buyer_id: &str) -> Result<(), CartError> {
        self.backend = Box::new(SledCart::open(&self.db, buyer_id)?);
        self.identity = Identity::Authenticated(buyer_id.to_string());
        Ok(())
    }

    /// Back to an empty ephemeral cart. The durable cart stays put for the
    /// next sign-in.
    pub fn sign_out(&mut self) {
        self.backend = Box::new(MemoryCart::new());
        self.identity = Identity::Anonymous;
    }

    /// Add a line. A line with the same product key absorbs the quantity;
    /// otherwise the line is inserted selected. Stock checks are the
    /// caller's job (against the catalog) before calling this.
    pub fn add_line(&self, line: CartLine) -> Result<(), CartError> {
        let key = line.product_ref.key();
        match self.backend.get(&key)? {
            Some(mut existing) => {
                existing.quantity += line.quantity.max(1);
                self.backend.put(&existing)
            }
            None => {
                let mut line = line;
                line.quantity = line.quantity.max(1);
                line.selected = true;
                self.backend.put(&line)
            }
        }
    }

    /// `all` deletes the line outright; otherwise the quantity drops by one
    /// and the line is deleted when it reaches zero. Quantity never rests
    /// at zero.
    pub fn remove_line(&self, key: &str, all: bool) -> Result<(), CartError> {
        let Some(mut line) = self.backend.get(key)? else {
            return Ok(());
        };

        if all || line.quantity <= 1 {
            self.backend.delete(key)
        } else {
            line.quantity -= 1;
            self.backend.put(&line)
        }
    }

    /// Quantities below one are clamped to a no-op rather than an error.
    pub fn set_quantity(&self, key: &str, qty: u32) -> Result<(), CartError> {
        if qty < 1 {
            return Ok(());
        }
        let Some(mut line) = self.backend.get(key)? else {
            return Ok(());
        };
        line.quantity = qty;
        self.backend.put(&line)
    }

    pub fn toggle_selected(&self, key: &str) -> Result<(), CartError> {
        let Some(mut line) = self.backend.get(key)? else {
            return Ok(());
        };
        line.selected = !line.selected;
        self.backend.put(&line)
    }

    pub fn select_all(&self, selected: bool) -> Result<(), CartError> {
        for mut line in self.backend.lines()? {
            if line.selected != selected {
                line.selected = selected;
                self.backend.put(&line)?;
            }
        }
        Ok(())
    }

    pub fn lines(&self) -> Result<Vec<CartLine>, CartError> {
        self.backend.lines()
    }

    /// The lines that will participate in the next checkout.
    pub fn selected_lines(&self) -> Result<Vec<CartLine>, CartError> {
        Ok(self
            .backend
            .lines()?
            .into_iter()
            .filter(|l| l.selected)
            .collect())
    }

    pub fn watch(&self) -> Receiver<Vec<CartLine>> {
        self.backend.watch()
    }

    /// Delete the given lines; used by checkout once an order is durably
    /// created. Best-effort from the caller's point of view.
    pub(crate) fn consume(&self, keys: &[String]) -> Result<(), CartError> {
        for key in keys {
            self.backend.delete(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mug_line(qty: u32) -> CartLine {
        CartLine::new(
            ProductRef::Catalog {
                category: "mugs".into(),
                product_id: "mug-01".into(),
            },
            "Custom mug",
            35_000,
            qty,
        )
    }

    #[test]
    fn same_product_merges_by_quantity() {
        let cart = MemoryCart::new();
        let db = Arc::new(sled::Config::new().temporary(true).open().unwrap());
        let store = CartStore {
            db,
            identity: Identity::Anonymous,
            backend: Box::new(cart),
        };

        store.add_line(mug_line(2)).unwrap();
        store.add_line(mug_line(3)).unwrap();

        let lines = store.lines().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 5);
    }

    #[test]
    fn removing_last_unit_deletes_the_line() {
        let db = Arc::new(sled::Config::new().temporary(true).open().unwrap());
        let store = CartStore::new(db);

        store.add_line(mug_line(1)).unwrap();
        store
            .remove_line(&mug_line(1).product_ref.key(), false)
            .unwrap();

        assert!(store.lines().unwrap().is_empty());
    }

    #[test]
    fn set_quantity_below_one_is_a_no_op() {
        let db = Arc::new(sled::Config::new().temporary(true).open().unwrap());
        let store = CartStore::new(db);

        store.add_line(mug_line(4)).unwrap();
        store.set_quantity(&mug_line(4).product_ref.key(), 0).unwrap();

        assert_eq!(store.lines().unwrap()[0].quantity, 4);
    }

    #[test]
    fn sign_in_discards_guest_lines() {
        let db = Arc::new(sled::Config::new().temporary(true).open().unwrap());
        let mut store = CartStore::new(db);

        store.add_line(mug_line(2)).unwrap();
        store.sign_in("buyer_1abc").unwrap();

        assert!(store.lines().unwrap().is_empty());
        assert_eq!(
            store.identity(),
            &Identity::Authenticated("buyer_1abc".into())
        );
    }

    #[test]
    fn durable_cart_survives_sign_out_and_back_in() {
        let db = Arc::new(sled::Config::new().temporary(true).open().unwrap());
        let mut store = CartStore::new(db);

        store.sign_in("buyer_1abc").unwrap();
        store.add_line(mug_line(2)).unwrap();

        store.sign_out();
        assert!(store.lines().unwrap().is_empty());

        store.sign_in("buyer_1abc").unwrap();
        assert_eq!(store.lines().unwrap().len(), 1);
    }

    #[test]
    fn watch_pushes_snapshots_on_mutation() {
        let db = Arc::new(sled::Config::new().temporary(true).open().unwrap());
        let store = CartStore::new(db);

        let rx = store.watch();
        assert!(rx.recv().unwrap().is_empty()); // initial snapshot

        store.add_line(mug_line(1)).unwrap();
        let snapshot = rx.recv().unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].quantity, 1);
    }
}
