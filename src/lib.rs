// Query mix test driver - library root

pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod executor;
pub mod mock_server;
pub mod orchestrator;
pub mod pool;
pub mod qualification;
pub mod query;
pub mod querymix;
pub mod rampup;
pub mod report;
pub mod usecase;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
