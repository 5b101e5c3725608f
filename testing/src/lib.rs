//! # Storefront Testing
//!
//! Testing utilities and helpers for storefront reducers.
//!
//! This crate provides:
//! - Mock implementations of Environment traits
//! - A Given-When-Then harness for reducers
//! - Assertion helpers for effects
//!
//! ## Example
//!
//! ```ignore
//! use storefront_testing::{test_clock, ReducerTest};
//!
//! ReducerTest::new(FulfillmentReducer::new())
//!     .with_env(test_environment())
//!     .given_state(FulfillmentState::default())
//!     .when_action(confirm_payment("cs_1"))
//!     .then_state(|state| assert!(state.is_in_flight("cs_1")))
//!     .run();
//! ```

use chrono::{DateTime, Utc};
use storefront_core::environment::Clock;


/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use storefront_testing::mocks::FixedClock;
    /// use storefront_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }

        /// Create a fixed clock at a unix timestamp (seconds)
        #[must_use]
        pub fn at_unix(seconds: i64) -> Self {
            Self::new(DateTime::<Utc>::from_timestamp(seconds, 0).unwrap_or_default())
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::at_unix(1_735_689_600)
    }
}

pub use mocks::{FixedClock, test_clock};
pub use reducer_test::{ReducerTest, assertions};
