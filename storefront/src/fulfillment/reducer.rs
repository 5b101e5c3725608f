//! Reducer for payment fulfillment.

use super::process;
use super::{FulfillmentAction, FulfillmentEnvironment};
use std::collections::HashSet;
use storefront_core::{effect::Effect, reducer::Reducer, smallvec, SmallVec};

/// Checkout sessions with a fulfillment effect running in this process.
///
/// Finished sessions are not kept: the durable receipt answers later
/// duplicates, so the set only ever holds work in flight.
#[derive(Debug, Clone, Default)]
pub struct FulfillmentState {
    fulfilling: HashSet<String>,
}

impl FulfillmentState {
    /// True while a fulfillment effect runs for the session
    #[must_use]
    pub fn is_in_flight(&self, session_id: &str) -> bool {
        self.fulfilling.contains(session_id)
    }

    /// Number of sessions being fulfilled
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.fulfilling.len()
    }

    /// True when nothing is being fulfilled
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fulfilling.is_empty()
    }
}

/// Reducer for payment fulfillment.
///
/// `ConfirmPayment` is answered in every case by exactly one result action
/// carrying the same delivery id. `InProgress` is decided here and still
/// emitted through an effect so the waiting handler sees it on the store's
/// action broadcast.
#[derive(Debug, Clone, Copy, Default)]
pub struct FulfillmentReducer;

impl FulfillmentReducer {
    /// Create a new fulfillment reducer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Reducer for FulfillmentReducer {
    type State = FulfillmentState;
    type Action = FulfillmentAction;
    type Environment = FulfillmentEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            FulfillmentAction::ConfirmPayment {
                delivery,
                confirmation,
            } => {
                let session_id = confirmation.session_id.clone();
                if !state.fulfilling.insert(session_id.clone()) {
                    return smallvec![respond(FulfillmentAction::InProgress {
                        delivery,
                        session_id,
                    })];
                }

                let env = env.clone();
                smallvec![Effect::Future(Box::pin(async move {
                    Some(process::fulfill(&env, delivery, confirmation).await)
                }))]
            },

            // Another delivery's answer; the running effect still owns the session
            FulfillmentAction::InProgress { .. } => smallvec![Effect::None],

            // One effect runs per session, so any other result ends it
            result => {
                state.fulfilling.remove(result.session_id());
                smallvec![Effect::None]
            },
        }
    }
}

fn respond(action: FulfillmentAction) -> Effect<FulfillmentAction> {
    Effect::Future(Box::pin(async move { Some(action) }))
}
