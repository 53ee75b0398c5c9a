//! The purchase flow: search, fare selection, passenger data, checkout,
//! and payment, run in order by the controller over a scripted browser
//! surface.

pub mod controller;
pub mod error;

mod checkout;
mod driver;
mod fares;
mod passengers;
mod search;

pub use controller::{
    FlowController, PaymentOutcome, RunOutcome, StageDriver, StageOutcome,
};
pub use driver::PurchaseDriver;
pub use error::{FlowError, FlowResult};

use std::time::Duration;

use tokio::time::sleep;

/// Fixed settle pause between scripted interactions.
pub(crate) async fn wait_ms(ms: u64) {
    sleep(Duration::from_millis(ms)).await;
}
