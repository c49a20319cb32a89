pub mod clock;
pub mod filter;
pub mod geo;
pub mod history;
pub mod location;
pub mod persistence;
pub mod pricing;
pub mod ride;
pub mod runner;
pub mod service;
pub mod trace;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;
