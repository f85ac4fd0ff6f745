// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0

//! System abstractions for cross-platform compatibility.
//!
//! The queue measures how long the producer spends blocked on backpressure.
//! `std::time::Instant` panics on wasm32, so that target uses `web_time` instead.

pub mod time {
    //! Time abstractions for cross-platform compatibility.

    #[cfg(not(target_arch = "wasm32"))]
    pub use std::time::{Duration, Instant};

    #[cfg(target_arch = "wasm32")]
    pub use web_time::{Duration, Instant};
}
