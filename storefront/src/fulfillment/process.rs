//! The fulfillment effect: resolve lines, build the order, commit.

use super::{FulfillmentAction, FulfillmentEnvironment};
use crate::orders::{
    new_order, CartRelease, CommitOutcome, FulfillmentReceipt, OrderCommit, OrderError, StockPolicy,
};
use crate::payment::PaymentConfirmation;
use crate::types::{
    CheckoutId, Money, Order, OrderLine, OrderNumber, OrderStatus, Product, ProductId,
};
use std::collections::HashMap;
use uuid::Uuid;

/// Cart line to be bought
struct Purchase {
    product_id: ProductId,
    unit_price: Money,
    quantity: u32,
}

/// Where the lines to buy come from
enum Lines {
    Found(Vec<Purchase>, Option<CheckoutId>),
    Missing(&'static str),
}

enum Outcome {
    Committed(Order),
    Duplicate(Option<OrderNumber>),
    Nothing(&'static str),
}

/// Runs one fulfillment attempt and turns its outcome into a result action.
#[tracing::instrument(
    skip(env, confirmation),
    fields(session_id = %confirmation.session_id, event_id = %confirmation.event_id)
)]
pub(super) async fn fulfill(
    env: &FulfillmentEnvironment,
    delivery: Uuid,
    confirmation: PaymentConfirmation,
) -> FulfillmentAction {
    let session_id = confirmation.session_id.clone();

    match attempt(env, &confirmation).await {
        Ok(Outcome::Committed(order)) if order.status == OrderStatus::NeedsReview => {
            tracing::warn!(
                order_number = %order.order_number,
                shortfalls = ?order.shortfalls,
                "Order committed with stock shortfalls, needs review"
            );
            FulfillmentAction::ManualReviewRequired {
                delivery,
                session_id,
                order_number: order.order_number,
            }
        },
        Ok(Outcome::Committed(order)) => {
            tracing::info!(
                order_number = %order.order_number,
                total = %order.total,
                "Order fulfilled"
            );
            FulfillmentAction::Fulfilled {
                delivery,
                session_id,
                order_number: order.order_number,
            }
        },
        Ok(Outcome::Duplicate(order_number)) => {
            tracing::info!(?order_number, "Session already fulfilled");
            FulfillmentAction::AlreadyFulfilled {
                delivery,
                session_id,
                order_number,
            }
        },
        Ok(Outcome::Nothing(reason)) => {
            tracing::warn!(reason, "Payment acknowledged without an order");
            FulfillmentAction::NothingToFulfill {
                delivery,
                session_id,
                reason: reason.to_string(),
            }
        },
        Err(error) => {
            tracing::error!(%error, "Fulfillment failed, rolled back");
            FulfillmentAction::FulfillmentErrored {
                delivery,
                session_id,
                error: error.to_string(),
            }
        },
    }
}

async fn attempt(
    env: &FulfillmentEnvironment,
    confirmation: &PaymentConfirmation,
) -> Result<Outcome, OrderError> {
    if let Some(order_number) = env.orders.find_by_payment(&confirmation.session_id).await? {
        return Ok(Outcome::Duplicate(Some(order_number)));
    }

    let (purchases, checkout_id) = match resolve_lines(env, confirmation).await? {
        Lines::Found(purchases, checkout_id) => (purchases, checkout_id),
        Lines::Missing(reason) => return Ok(Outcome::Nothing(reason)),
    };
    if purchases.is_empty() {
        return Ok(Outcome::Nothing("cart is empty"));
    }

    let ids: Vec<ProductId> = purchases.iter().map(|p| p.product_id).collect();
    let products: HashMap<ProductId, Product> = env
        .inventory
        .products(&ids)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let mut lines = Vec::with_capacity(purchases.len());
    for purchase in &purchases {
        let Some(product) = products.get(&purchase.product_id) else {
            tracing::warn!(product_id = %purchase.product_id, "Dropping line for deleted product");
            continue;
        };
        lines.push(OrderLine::new(
            purchase.product_id,
            product.name.clone(),
            purchase.unit_price,
            purchase.quantity,
        ));
    }
    if lines.is_empty() {
        return Ok(Outcome::Nothing("no purchasable products"));
    }

    let now = env.clock().now();
    let order = new_order(
        env.order_numbers.next(now),
        confirmation.user_id.clone(),
        lines,
        confirmation.shipping_address.clone(),
        None,
        Some(confirmation.session_id.clone()),
        now,
    );

    if let Some(charged) = confirmation.amount_total {
        if charged != order.total {
            tracing::warn!(
                %charged,
                total = %order.total,
                "Charged amount differs from order total"
            );
        }
    }

    let purchased = order.lines.iter().map(|l| (l.product_id, l.quantity)).collect();
    let outcome = env
        .orders
        .commit(OrderCommit {
            order,
            receipt: Some(FulfillmentReceipt {
                session_id: confirmation.session_id.clone(),
                event_id: confirmation.event_id.clone(),
            }),
            stock_policy: StockPolicy::Review,
            cart_release: Some(CartRelease {
                cart_id: confirmation.cart_id,
                purchased,
            }),
            checkout_id,
        })
        .await?;

    Ok(match outcome {
        CommitOutcome::Committed(order) => Outcome::Committed(order),
        CommitOutcome::Duplicate { order_number } => Outcome::Duplicate(Some(order_number)),
    })
}

/// Lines of the frozen snapshot when it matches the confirmation, else of
/// the live cart. A snapshot another session already consumed is never
/// bought twice.
async fn resolve_lines(
    env: &FulfillmentEnvironment,
    confirmation: &PaymentConfirmation,
) -> Result<Lines, OrderError> {
    if let Some(checkout_id) = confirmation.checkout_id {
        match env.checkouts.snapshot(checkout_id).await? {
            Some(snapshot)
                if snapshot.user_id == confirmation.user_id
                    && snapshot.cart_id == confirmation.cart_id =>
            {
                if snapshot.consumed {
                    // No receipt for this session, so another one used it
                    tracing::warn!(
                        %checkout_id,
                        fulfilled_by = ?snapshot.session_id,
                        "Snapshot already consumed"
                    );
                    return Ok(Lines::Missing("checkout already fulfilled"));
                }
                let purchases = snapshot
                    .lines
                    .into_iter()
                    .map(|line| Purchase {
                        product_id: line.product_id,
                        unit_price: line.unit_price,
                        quantity: line.quantity,
                    })
                    .collect();
                return Ok(Lines::Found(purchases, Some(checkout_id)));
            },
            Some(_) => tracing::warn!(%checkout_id, "Snapshot does not match session metadata"),
            None => tracing::warn!(%checkout_id, "Snapshot not found, using live cart"),
        }
    }

    let cart = env
        .carts
        .find(confirmation.cart_id)
        .await?
        .filter(|cart| cart.user_id == confirmation.user_id);

    Ok(match cart {
        Some(cart) => {
            let purchases = cart
                .items()
                .iter()
                .map(|item| Purchase {
                    product_id: item.product_id,
                    unit_price: item.price,
                    quantity: item.quantity,
                })
                .collect();
            Lines::Found(purchases, None)
        },
        None => Lines::Missing("cart not found"),
    })
}
