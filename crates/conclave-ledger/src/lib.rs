pub mod bus;
pub mod ledger;

pub use bus::{Bus, BoxFuture, Handler, Replay, SubscriptionToken};
pub use ledger::Ledger;
