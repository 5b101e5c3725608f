//! Unit tests for the fulfillment reducer and its effect.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code

use super::*;
use crate::cart::CartRepository;
use crate::checkout::CheckoutRepository;
use crate::inventory::InventoryLedger;
use crate::orders::{OrderRepository, SequentialOrderNumbers};
use crate::payment::PaymentConfirmation;
use crate::storage::InMemoryShop;
use crate::types::{
    Cart, CartId, CheckoutId, CheckoutSnapshot, Money, OrderNumber, OrderStatus, Product,
    ProductId, ShippingAddress, UserId,
};
use std::sync::Arc;
use storefront_core::environment::Clock;
use storefront_core::reducer::Reducer;
use storefront_testing::{assertions, test_clock, ReducerTest};
use uuid::Uuid;

fn environment(shop: &Arc<InMemoryShop>) -> FulfillmentEnvironment {
    FulfillmentEnvironment::new(
        shop.clone(),
        shop.clone(),
        shop.clone(),
        shop.clone(),
        Arc::new(SequentialOrderNumbers::new()),
        Arc::new(test_clock()),
    )
}

fn product(name: &str, price: i64, stock: u32) -> Product {
    Product {
        id: ProductId::new(),
        name: name.to_string(),
        description: String::new(),
        images: vec![],
        price: Money::from_cents(price),
        stock,
        category: "misc".to_string(),
        is_active: true,
    }
}

fn confirmation(session_id: &str, user: &UserId, cart_id: CartId) -> PaymentConfirmation {
    PaymentConfirmation {
        event_id: format!("evt_{session_id}"),
        session_id: session_id.to_string(),
        user_id: user.clone(),
        cart_id,
        checkout_id: None,
        amount_total: None,
        shipping_address: ShippingAddress::default(),
    }
}

fn confirm(session_id: &str) -> FulfillmentAction {
    FulfillmentAction::ConfirmPayment {
        delivery: Uuid::new_v4(),
        confirmation: confirmation(session_id, &UserId::new("u1"), CartId::new()),
    }
}

fn in_flight(session_id: &str) -> FulfillmentState {
    let mut state = FulfillmentState::default();
    let env = environment(&Arc::new(InMemoryShop::new()));
    let _ = FulfillmentReducer::new().reduce(&mut state, confirm(session_id), &env);
    state
}

/// Shop with `{A: 2 @ $10, B: 1 @ $5}` in u1's cart
async fn seeded_shop() -> (Arc<InMemoryShop>, UserId, Cart, Product, Product) {
    let shop = Arc::new(InMemoryShop::new());
    let user = UserId::new("u1");
    let a = product("A", 1000, 10);
    let b = product("B", 500, 10);
    shop.insert_product(a.clone());
    shop.insert_product(b.clone());

    let mut cart = Cart::new(user.clone(), test_clock().now());
    cart.add(a.id, 2, a.price);
    cart.add(b.id, 1, b.price);
    let cart = shop.save(&cart).await.unwrap();
    (shop, user, cart, a, b)
}

async fn run(
    state: &mut FulfillmentState,
    env: &FulfillmentEnvironment,
    action: FulfillmentAction,
) -> FulfillmentAction {
    let reducer = FulfillmentReducer::new();
    let effects = reducer.reduce(state, action, env);
    let result = assertions::run_first_future(effects)
        .await
        .expect("every confirmation is answered");
    let _ = reducer.reduce(state, result.clone(), env);
    result
}

// ============================================================================
// Reducer (state machine) tests
// ============================================================================

#[test]
fn first_confirmation_marks_session_fulfilling() {
    ReducerTest::new(FulfillmentReducer::new())
        .with_env(environment(&Arc::new(InMemoryShop::new())))
        .given_state(FulfillmentState::default())
        .when_action(confirm("cs_1"))
        .then_state(|state| {
            assert!(state.is_in_flight("cs_1"));
            assert_eq!(state.in_flight(), 1);
        })
        .then_effects(|effects| {
            assertions::assert_effects_count(effects, 1);
            assertions::assert_has_future_effect(effects);
        })
        .run();
}

#[tokio::test]
async fn concurrent_delivery_is_in_progress() {
    let env = environment(&Arc::new(InMemoryShop::new()));
    let mut state = in_flight("cs_1");
    let action = confirm("cs_1");
    let delivery = action.delivery();

    let effects = FulfillmentReducer::new().reduce(&mut state, action, &env);
    let result = assertions::run_first_future(effects).await.unwrap();

    assert_eq!(
        result,
        FulfillmentAction::InProgress {
            delivery,
            session_id: "cs_1".to_string()
        }
    );
    assert!(state.is_in_flight("cs_1"));
}

#[test]
fn errored_attempt_resets_the_session() {
    ReducerTest::new(FulfillmentReducer::new())
        .with_env(environment(&Arc::new(InMemoryShop::new())))
        .given_state(in_flight("cs_1"))
        .when_action(FulfillmentAction::FulfillmentErrored {
            delivery: Uuid::new_v4(),
            session_id: "cs_1".to_string(),
            error: "storage unavailable".to_string(),
        })
        .then_state(|state| {
            assert!(!state.is_in_flight("cs_1"));
            assert!(state.is_empty());
        })
        .then_effects(assertions::assert_no_effects)
        .run();
}

#[test]
fn every_final_result_releases_the_session() {
    let finals = [
        FulfillmentAction::Fulfilled {
            delivery: Uuid::new_v4(),
            session_id: "cs_1".to_string(),
            order_number: OrderNumber::new("ORD-1"),
        },
        FulfillmentAction::AlreadyFulfilled {
            delivery: Uuid::new_v4(),
            session_id: "cs_1".to_string(),
            order_number: None,
        },
        FulfillmentAction::NothingToFulfill {
            delivery: Uuid::new_v4(),
            session_id: "cs_1".to_string(),
            reason: "cart not found".to_string(),
        },
        FulfillmentAction::ManualReviewRequired {
            delivery: Uuid::new_v4(),
            session_id: "cs_1".to_string(),
            order_number: OrderNumber::new("ORD-1"),
        },
    ];

    for result in finals {
        ReducerTest::new(FulfillmentReducer::new())
            .with_env(environment(&Arc::new(InMemoryShop::new())))
            .given_state(in_flight("cs_1"))
            .when_action(result)
            .then_state(|state| assert!(state.is_empty()))
            .then_effects(assertions::assert_no_effects)
            .run();
    }
}

#[test]
fn another_deliverys_answer_keeps_the_session_in_flight() {
    ReducerTest::new(FulfillmentReducer::new())
        .with_env(environment(&Arc::new(InMemoryShop::new())))
        .given_state(in_flight("cs_1"))
        .when_action(FulfillmentAction::InProgress {
            delivery: Uuid::new_v4(),
            session_id: "cs_1".to_string(),
        })
        .then_state(|state| assert!(state.is_in_flight("cs_1")))
        .run();
}

#[tokio::test]
async fn finished_sessions_are_not_retained() {
    let shop = Arc::new(InMemoryShop::new());
    let env = environment(&shop);
    let user = UserId::new("u1");
    let mut state = FulfillmentState::default();

    for i in 0..100 {
        let result = run(
            &mut state,
            &env,
            FulfillmentAction::ConfirmPayment {
                delivery: Uuid::new_v4(),
                confirmation: confirmation(&format!("cs_{i}"), &user, CartId::new()),
            },
        )
        .await;
        assert!(matches!(result, FulfillmentAction::NothingToFulfill { .. }));
    }

    assert!(state.is_empty());
    assert_eq!(state.in_flight(), 0);
}

// ============================================================================
// Effect tests (in-memory shop)
// ============================================================================

#[tokio::test]
async fn fulfils_the_live_cart() {
    let (shop, user, cart, a, b) = seeded_shop().await;
    let env = environment(&shop);
    let mut state = FulfillmentState::default();

    let result = run(
        &mut state,
        &env,
        FulfillmentAction::ConfirmPayment {
            delivery: Uuid::new_v4(),
            confirmation: confirmation("cs_1", &user, cart.id),
        },
    )
    .await;

    let FulfillmentAction::Fulfilled { order_number, .. } = result else {
        panic!("expected Fulfilled, got {result:?}");
    };
    let order = shop.get(&order_number).await.unwrap().unwrap();
    assert_eq!(order.total, Money::from_cents(2500));
    assert_eq!(order.lines[0].subtotal, Money::from_cents(2000));
    assert_eq!(order.lines[1].subtotal, Money::from_cents(500));
    assert_eq!(order.lines[0].name, "A");
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_session_id.as_deref(), Some("cs_1"));
    assert_eq!(order.shipping_address.street, "N/A");

    assert_eq!(shop.product(a.id).await.unwrap().unwrap().stock, 8);
    assert_eq!(shop.product(b.id).await.unwrap().unwrap().stock, 9);
    let cart = shop.find_by_user(&user).await.unwrap().unwrap();
    assert!(cart.is_empty());
    assert_eq!(cart.total(), Money::ZERO);

    assert!(state.is_empty());
}

#[tokio::test]
async fn fulfils_the_frozen_snapshot_and_keeps_later_additions() {
    let (shop, user, cart, a, b) = seeded_shop().await;
    let env = environment(&shop);

    let snapshot = CheckoutSnapshot::freeze(
        CheckoutId::new(),
        &cart,
        |id| if id == a.id { "A".into() } else { "B".into() },
        test_clock().now(),
    );
    shop.save_snapshot(&snapshot).await.unwrap();

    // The user keeps shopping after paying
    let mut live = shop.find_by_user(&user).await.unwrap().unwrap();
    live.add(a.id, 1, a.price);
    shop.save(&live).await.unwrap();

    let mut confirmation = confirmation("cs_1", &user, cart.id);
    confirmation.checkout_id = Some(snapshot.id);
    let result = run(
        &mut FulfillmentState::default(),
        &env,
        FulfillmentAction::ConfirmPayment {
            delivery: Uuid::new_v4(),
            confirmation,
        },
    )
    .await;

    let FulfillmentAction::Fulfilled { order_number, .. } = result else {
        panic!("expected Fulfilled, got {result:?}");
    };
    let order = shop.get(&order_number).await.unwrap().unwrap();
    assert_eq!(order.total, Money::from_cents(2500));
    assert_eq!(shop.product(a.id).await.unwrap().unwrap().stock, 8);
    assert_eq!(shop.product(b.id).await.unwrap().unwrap().stock, 9);

    let live = shop.find_by_user(&user).await.unwrap().unwrap();
    assert_eq!(live.items().len(), 1);
    assert_eq!(live.items()[0].quantity, 1);
    assert_eq!(live.total(), Money::from_cents(1000));
    assert!(shop.snapshot(snapshot.id).await.unwrap().unwrap().consumed);
}

#[tokio::test]
async fn consumed_snapshot_is_not_bought_twice() {
    let (shop, user, cart, a, _b) = seeded_shop().await;
    let env = environment(&shop);

    let mut snapshot =
        CheckoutSnapshot::freeze(CheckoutId::new(), &cart, |_| "line".into(), test_clock().now());
    snapshot.session_id = Some("cs_1".to_string());
    snapshot.consumed = true;
    shop.save_snapshot(&snapshot).await.unwrap();

    let mut confirmation = confirmation("cs_2", &user, cart.id);
    confirmation.checkout_id = Some(snapshot.id);
    let result = run(
        &mut FulfillmentState::default(),
        &env,
        FulfillmentAction::ConfirmPayment {
            delivery: Uuid::new_v4(),
            confirmation,
        },
    )
    .await;

    let FulfillmentAction::NothingToFulfill { reason, .. } = result else {
        panic!("expected NothingToFulfill, got {result:?}");
    };
    assert_eq!(reason, "checkout already fulfilled");
    assert!(shop.list_for_user(&user).await.unwrap().is_empty());
    assert_eq!(shop.product(a.id).await.unwrap().unwrap().stock, 10);
    assert_eq!(shop.find_by_user(&user).await.unwrap().unwrap().items().len(), 2);
}

#[tokio::test]
async fn durable_receipt_makes_a_fresh_process_idempotent() {
    let (shop, user, cart, a, _b) = seeded_shop().await;
    let env = environment(&shop);

    let first = run(
        &mut FulfillmentState::default(),
        &env,
        FulfillmentAction::ConfirmPayment {
            delivery: Uuid::new_v4(),
            confirmation: confirmation("cs_1", &user, cart.id),
        },
    )
    .await;
    assert!(matches!(first, FulfillmentAction::Fulfilled { .. }));

    // New process: empty in-memory state
    let second = run(
        &mut FulfillmentState::default(),
        &env,
        FulfillmentAction::ConfirmPayment {
            delivery: Uuid::new_v4(),
            confirmation: confirmation("cs_1", &user, cart.id),
        },
    )
    .await;

    assert!(matches!(
        second,
        FulfillmentAction::AlreadyFulfilled { order_number: Some(_), .. }
    ));
    assert_eq!(shop.list_for_user(&user).await.unwrap().len(), 1);
    assert_eq!(shop.product(a.id).await.unwrap().unwrap().stock, 8);
}

#[tokio::test]
async fn missing_cart_is_acknowledged_without_an_order() {
    let shop = Arc::new(InMemoryShop::new());
    let env = environment(&shop);
    let user = UserId::new("u1");
    let mut state = FulfillmentState::default();

    let result = run(
        &mut state,
        &env,
        FulfillmentAction::ConfirmPayment {
            delivery: Uuid::new_v4(),
            confirmation: confirmation("cs_1", &user, CartId::new()),
        },
    )
    .await;

    assert!(matches!(
        result,
        FulfillmentAction::NothingToFulfill { ref reason, .. } if reason == "cart not found"
    ));
    assert!(state.is_empty());
    assert!(shop.list_for_user(&user).await.unwrap().is_empty());
}

#[tokio::test]
async fn deleted_products_are_dropped() {
    let (shop, user, cart, a, b) = seeded_shop().await;
    shop.delete_product(b.id);

    let result = run(
        &mut FulfillmentState::default(),
        &environment(&shop),
        FulfillmentAction::ConfirmPayment {
            delivery: Uuid::new_v4(),
            confirmation: confirmation("cs_1", &user, cart.id),
        },
    )
    .await;

    let FulfillmentAction::Fulfilled { order_number, .. } = result else {
        panic!("expected Fulfilled, got {result:?}");
    };
    let order = shop.get(&order_number).await.unwrap().unwrap();
    assert_eq!(order.lines.len(), 1);
    assert_eq!(order.lines[0].product_id, a.id);
    assert_eq!(order.total, Money::from_cents(2000));

    shop.delete_product(a.id);
    let result = run(
        &mut FulfillmentState::default(),
        &environment(&shop),
        FulfillmentAction::ConfirmPayment {
            delivery: Uuid::new_v4(),
            confirmation: confirmation("cs_2", &user, cart.id),
        },
    )
    .await;
    // The cart was released by the first order
    assert!(matches!(result, FulfillmentAction::NothingToFulfill { .. }));
}

#[tokio::test]
async fn shortfall_needs_review_and_never_underflows() {
    let shop = Arc::new(InMemoryShop::new());
    let user = UserId::new("u1");
    let scarce = product("Scarce", 1000, 1);
    shop.insert_product(scarce.clone());
    let mut cart = Cart::new(user.clone(), test_clock().now());
    cart.add(scarce.id, 3, scarce.price);
    let cart = shop.save(&cart).await.unwrap();

    let mut state = FulfillmentState::default();
    let result = run(
        &mut state,
        &environment(&shop),
        FulfillmentAction::ConfirmPayment {
            delivery: Uuid::new_v4(),
            confirmation: confirmation("cs_1", &user, cart.id),
        },
    )
    .await;

    let FulfillmentAction::ManualReviewRequired { order_number, .. } = result else {
        panic!("expected ManualReviewRequired, got {result:?}");
    };
    let order = shop.get(&order_number).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::NeedsReview);
    assert_eq!(order.shortfalls, vec![scarce.id]);
    assert_eq!(shop.product(scarce.id).await.unwrap().unwrap().stock, 1);
    assert!(state.is_empty());
}

#[tokio::test]
async fn store_failure_rolls_back_and_allows_retry() {
    let (shop, user, cart, a, _b) = seeded_shop().await;
    let env = environment(&shop);
    let mut state = FulfillmentState::default();
    shop.fail_next_commit();

    let first = run(
        &mut state,
        &env,
        FulfillmentAction::ConfirmPayment {
            delivery: Uuid::new_v4(),
            confirmation: confirmation("cs_1", &user, cart.id),
        },
    )
    .await;

    assert!(matches!(first, FulfillmentAction::FulfillmentErrored { .. }));
    assert!(!state.is_in_flight("cs_1"));
    assert!(shop.list_for_user(&user).await.unwrap().is_empty());
    assert_eq!(shop.product(a.id).await.unwrap().unwrap().stock, 10);
    assert_eq!(shop.find_by_user(&user).await.unwrap().unwrap().items().len(), 2);

    let retry = run(
        &mut state,
        &env,
        FulfillmentAction::ConfirmPayment {
            delivery: Uuid::new_v4(),
            confirmation: confirmation("cs_1", &user, cart.id),
        },
    )
    .await;
    assert!(matches!(retry, FulfillmentAction::Fulfilled { .. }));
    assert_eq!(shop.product(a.id).await.unwrap().unwrap().stock, 8);
}

#[tokio::test]
async fn store_answers_each_delivery_through_the_broadcast() {
    let (shop, user, cart, _a, _b) = seeded_shop().await;
    let store = fulfillment_store(environment(&shop));

    let delivery = Uuid::new_v4();
    let result = store
        .send_and_wait_for(
            FulfillmentAction::ConfirmPayment {
                delivery,
                confirmation: confirmation("cs_1", &user, cart.id),
            },
            |action| action.answers(delivery),
            std::time::Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert!(matches!(result, FulfillmentAction::Fulfilled { .. }));

    let delivery = Uuid::new_v4();
    let duplicate = store
        .send_and_wait_for(
            FulfillmentAction::ConfirmPayment {
                delivery,
                confirmation: confirmation("cs_1", &user, cart.id),
            },
            |action| action.answers(delivery),
            std::time::Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert!(matches!(duplicate, FulfillmentAction::AlreadyFulfilled { .. }));
    assert_eq!(shop.list_for_user(&user).await.unwrap().len(), 1);
}
