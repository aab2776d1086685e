//! Walkthrough of the full order lifecycle against a throwaway sled database:
//! cart -> draft -> pending -> proof upload -> admin confirmation, plus a
//! second order that runs out the payment clock.
//!
//! Run with `cargo run --example checkout`.

use std::sync::Arc;

use printflow::{
    cart::{CartLine, CartStore, ProductRef},
    checkout::Checkout,
    config::{PaymentAccount, StoreConfig},
    order::BuyerInfo,
    promo::{PromoStatus, Promotion},
    service::OrderService,
    types::{Actor, TimeStamp},
    utils,
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "printflow=debug".into()),
        )
        .init();

    let dir = tempfile::tempdir()?;
    let db = Arc::new(sled::open(dir.path().join("printflow-demo.db"))?);

    let config = StoreConfig::default().with_account(
        "bank_transfer",
        PaymentAccount {
            label: "BCA".into(),
            account_no: "1234567890".into(),
            holder: "Printshop".into(),
        },
    );
    let service = Arc::new(OrderService::new(&db, config)?);
    let checkout = Checkout::new(&db, Arc::clone(&service))?;

    checkout.promos().install(&Promotion {
        promo_id: "GRANDOPEN".into(),
        discount_percent: 15,
        status: PromoStatus::Active,
        start_date: TimeStamp::new_with(2025, 1, 1, 0, 0, 0),
        end_date: TimeStamp::new_with(2025, 12, 31, 23, 59, 59),
    })?;

    let buyer_id = utils::new_uuid_to_bech32("buyer_")?;
    let mut cart = CartStore::new(Arc::clone(&db));
    cart.sign_in(&buyer_id)?;

    let updates = cart.watch();

    cart.add_line(CartLine::new(
        ProductRef::Catalog {
            category: "stickers".into(),
            product_id: "stk-07".into(),
        },
        "Vinyl sticker sheet",
        50_000,
        2,
    ))?;

    if let Ok(snapshot) = updates.recv() {
        println!("cart snapshot pushed to watcher: {} line(s)", snapshot.len());
    }

    let now = TimeStamp::new_with(2025, 6, 10, 10, 0, 0);
    let buyer = BuyerInfo {
        buyer_id: buyer_id.clone(),
        recipient: "Ayu".into(),
        phone: "+62-812-0000".into(),
        address: "Jl. Cihampelas 10, Bandung".into(),
    };

    let order_id = checkout.create_draft(&cart, buyer.clone(), Some("GRANDOPEN"), now)?;
    let order = service.get(&order_id)?;
    println!(
        "draft {order_id}: subtotal {} - discount {} = total {}",
        order.subtotal, order.discount, order.total
    );

    let order = checkout.confirm_payment(&order_id, "bank_transfer", Actor::Buyer(buyer_id.clone()), now)?;
    println!(
        "order placed, pay before {:?}",
        order.expires_at.map(|t| t.to_datetime_utc())
    );

    let later = now + chrono::Duration::minutes(12);
    let order = service.upload_proof(&order_id, "proofs/tf-123.jpg", Actor::Buyer(buyer_id.clone()), later)?;
    println!("proof uploaded, status {:?}", order.status);

    let order = service.transition(
        &order_id,
        printflow::order::OrderStatus::Confirmed,
        Actor::Admin("admin_1".into()),
        later + chrono::Duration::minutes(5),
        None,
    )?;
    println!("admin confirmed, status {:?}", order.status);

    println!("\naudit trail for {order_id}:");
    for entry in service.history_for(&order_id)? {
        println!(
            "  {:?} by {} at {}",
            entry.status,
            entry.actor.id(),
            entry.timestamp.to_datetime_utc()
        );
    }

    // a second order left unpaid

    cart.add_line(CartLine::new(
        ProductRef::Catalog {
            category: "mugs".into(),
            product_id: "mug-01".into(),
        },
        "Custom mug",
        35_000,
        1,
    ))?;
    let forgotten = checkout.create_draft(&cart, buyer, None, now)?;
    checkout.confirm_payment(&forgotten, "bank_transfer", Actor::Buyer(buyer_id), now)?;

    let past_deadline = now + chrono::Duration::minutes(45);
    let swept = service.sweep_expired(past_deadline)?;
    println!("\nsweep at +45m expired: {swept:?}");
    println!(
        "{} is now {:?}",
        forgotten,
        service.get(&forgotten)?.status
    );

    Ok(())
}
