//! Gateway: wires the Mattermost channel, dispatcher, and health endpoint together and
//! runs them until a shutdown signal arrives.

mod health;
mod server;

pub use health::{serve_health, HealthState};
pub use server::run_gateway;
