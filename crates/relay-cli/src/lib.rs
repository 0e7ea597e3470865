//! Command-line host for the relay orchestrator: clap surface, tracing
//! bootstrap, NDJSON ingress, and dry-run/HTTP outbound transports.

mod app;
mod bootstrap;
pub mod cli_args;
pub mod inbound;
pub mod transports;

pub use app::run_cli;
pub use bootstrap::init_tracing;
pub use cli_args::Cli;
