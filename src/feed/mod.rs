pub mod fixtures;
pub mod provider;
pub mod the_odds_api;

pub use fixtures::FixtureProvider;
pub use provider::OddsProvider;
pub use the_odds_api::{TheOddsApi, TheOddsApiSettings};
