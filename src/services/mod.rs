pub mod aggregator;
pub mod game_query;
pub mod gatekeeper;
pub mod power;
pub mod registry;
