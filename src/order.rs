//! Order documents and the status transition table.

use crate::cart::ServiceDetail;
use crate::ledger::HistoryEntry;
use crate::types::{Money, TimeStamp};
use chrono::Utc;

/// Lifecycle stages of an order. The allowed moves between them are fixed;
/// see [`OrderStatus::allowed_targets`].
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, minicbor::Encode, minicbor::Decode)]
pub enum OrderStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    Pending,
    #[n(2)]
    WaitingVerification,
    #[n(3)]
    Confirmed,
    #[n(4)]
    Processing,
    #[n(5)]
    Shipped,
    #[n(6)]
    Delivered,
    #[n(7)]
    Completed,
    #[n(8)]
    Rejected,
    #[n(9)]
    Expired,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 10] = [
        OrderStatus::Draft,
        OrderStatus::Pending,
        OrderStatus::WaitingVerification,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Completed,
        OrderStatus::Rejected,
        OrderStatus::Expired,
    ];

    pub fn allowed_targets(self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Draft => &[OrderStatus::Pending],
            OrderStatus::Pending => &[OrderStatus::WaitingVerification, OrderStatus::Expired],
            OrderStatus::WaitingVerification => &[OrderStatus::Confirmed, OrderStatus::Rejected],
            OrderStatus::Confirmed => &[OrderStatus::Processing],
            OrderStatus::Processing => &[OrderStatus::Shipped],
            OrderStatus::Shipped => &[OrderStatus::Delivered],
            OrderStatus::Delivered => &[OrderStatus::Completed],
            OrderStatus::Completed | OrderStatus::Rejected | OrderStatus::Expired => &[],
        }
    }

    pub fn can_become(self, target: OrderStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// No further transition leaves these states (admin override aside).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

/// One frozen line of an order. Written once at checkout, never recomputed
/// from the catalog afterwards.
#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct OrderLine {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub unit_price: Money,
    #[n(2)]
    pub quantity: u32,
    #[n(3)]
    pub line_subtotal: Money,
    #[n(4)]
    pub custom_detail: Option<ServiceDetail>,
}

/// Shipping/contact details frozen into the order at checkout.
#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct BuyerInfo {
    #[n(0)]
    pub buyer_id: String,
    #[n(1)]
    pub recipient: String,
    #[n(2)]
    pub phone: String,
    #[n(3)]
    pub address: String,
}

#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct Order {
    #[n(0)]
    pub order_id: String,
    #[n(1)]
    pub buyer_id: String,
    #[n(2)]
    pub contact: BuyerInfo,
    #[n(3)]
    pub lines: Vec<OrderLine>,
    #[n(4)]
    pub subtotal: Money,
    #[n(5)]
    pub discount: Money,
    #[n(6)]
    pub total: Money,
    #[n(7)]
    pub status: OrderStatus,
    #[n(8)]
    pub payment_method: Option<String>,
    #[n(9)]
    pub payment_proof: Option<String>,
    /// Present if and only if `status` is `Pending`.
    #[n(10)]
    pub expires_at: Option<TimeStamp<Utc>>,
    /// Denormalized copy for fast reads; the authoritative record is the
    /// audit ledger.
    #[n(11)]
    pub history: Vec<HistoryEntry>,
    #[n(12)]
    pub created_at: TimeStamp<Utc>,
    #[n(13)]
    pub updated_at: TimeStamp<Utc>,
}

impl Order {
    pub fn is_past_deadline(&self, now: TimeStamp<Utc>) -> bool {
        matches!(self.expires_at, Some(deadline) if now > deadline)
    }
}
