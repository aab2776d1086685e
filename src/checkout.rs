//! Checkout orchestration: selected cart lines in, draft order out.

use crate::cart::{CartLine, CartStore};
use crate::error::{CheckoutError, PromoRejection};
use crate::order::{BuyerInfo, Order, OrderLine, OrderStatus};
use crate::promo::{self, PromoDirectory};
use crate::service::OrderService;
use crate::types::{Actor, Money, TimeStamp};
use crate::utils;
use chrono::Utc;
use std::sync::Arc;

/// The suffix space is probabilistic, so an id collision is retryable with a
/// fresh suffix rather than fatal.
const MAX_ID_ATTEMPTS: u32 = 8;

pub struct Checkout {
    service: Arc<OrderService>,
    promos: PromoDirectory,
}

/// Copy one selected cart line into a frozen order line. Later catalog price
/// changes must never reach back into an existing order, so the unit price is
/// taken from the line as it stands now.
fn snapshot_line(line: &CartLine) -> OrderLine {
    OrderLine {
        name: line.name.clone(),
        unit_price: line.unit_price,
        quantity: line.quantity,
        line_subtotal: line.unit_price * Money::from(line.quantity),
        custom_detail: line.custom_detail.clone(),
    }
}

impl Checkout {
    pub fn new(db: &Arc<sled::Db>, service: Arc<OrderService>) -> Result<Self, CheckoutError> {
        Ok(Self {
            service,
            promos: PromoDirectory::open(db)?,
        })
    }

    pub fn promos(&self) -> &PromoDirectory {
        &self.promos
    }

    /// Turn the buyer's selected lines into one new draft order.
    ///
    /// A rejected promo code fails the call without creating anything; the
    /// caller decides whether to resubmit without the code (discount is never
    /// silently dropped). On success the consumed cart lines are deleted
    /// best-effort - the order is the source of truth from here on, so a
    /// failed cart cleanup is logged and not rolled back.
    pub fn create_draft(
        &self,
        cart: &CartStore,
        buyer: BuyerInfo,
        promo_code: Option<&str>,
        now: TimeStamp<Utc>,
    ) -> Result<String, CheckoutError> {
        let selected = cart.selected_lines()?;
        if selected.is_empty() {
            return Err(CheckoutError::EmptySelection);
        }

        let lines: Vec<OrderLine> = selected.iter().map(snapshot_line).collect();
        let subtotal: Money = lines.iter().map(|l| l.line_subtotal).sum();

        let discount = match promo_code {
            None => 0,
            Some(code) => {
                let promotion = self
                    .promos
                    .get(code)?
                    .ok_or(PromoRejection::NotFound)?;
                promo::resolve(&promotion, now, subtotal)?
            }
        };

        let mut order = Order {
            order_id: String::new(),
            buyer_id: buyer.buyer_id.clone(),
            contact: buyer,
            lines,
            subtotal,
            discount,
            total: subtotal - discount,
            status: OrderStatus::Draft,
            payment_method: None,
            payment_proof: None,
            expires_at: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let mut attempts = 0;
        loop {
            order.order_id = utils::new_order_id(now);
            if self.service.try_insert(&order)? {
                break;
            }
            attempts += 1;
            if attempts >= MAX_ID_ATTEMPTS {
                return Err(CheckoutError::IdentifierCollision { attempts });
            }
        }

        // first history entry goes through the state machine's own
        // entry-write step, same guarded path as every later transition
        let actor = Actor::Buyer(order.buyer_id.clone());
        self.service
            .record_creation(&order.order_id, actor, now)?;

        let consumed: Vec<String> = selected.iter().map(|l| l.product_ref.key()).collect();
        if let Err(err) = cart.consume(&consumed) {
            tracing::warn!(order_id = %order.order_id, error = %err, "cart cleanup after checkout failed");
        }

        Ok(order.order_id)
    }

    /// Buyer picks a payment method and places the order: `draft -> pending`,
    /// arming the payment deadline. The method must exist in the store's
    /// payment-account directory.
    pub fn confirm_payment(
        &self,
        order_id: &str,
        method: &str,
        actor: Actor,
        now: TimeStamp<Utc>,
    ) -> Result<Order, CheckoutError> {
        if !self.service.config().knows_method(method) {
            return Err(CheckoutError::UnknownPaymentMethod(method.to_string()));
        }

        let method = method.to_string();
        let order = self.service.transition_with(
            order_id,
            OrderStatus::Pending,
            actor,
            now,
            &move |order| order.payment_method = Some(method.clone()),
        )?;
        Ok(order)
    }
}
