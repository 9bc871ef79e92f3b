//! Production runner for favobft validators.
//!
//! Wraps the synchronous [`favo_bft::BftState`] in a tokio task:
//!
//! - [`ProductionRunner`]: event loop that executes the state machine's actions
//! - [`TimerManager`]: tokio-task timers with stale-fire suppression
//! - [`LocalNetwork`]: in-process broadcast between validators
//! - [`Mempool`]: shared transaction pool and hashing executor
//! - [`Devnet`]: a whole validator network inside one process
//! - [`NodeConfig`]: TOML configuration for the `favo` binary
//!
//! # Example
//!
//! ```no_run
//! use favo_production::{Devnet, NodeConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let devnet = Devnet::start(&NodeConfig::default())?;
//! devnet.wait_for_height(5, Duration::from_secs(30)).await?;
//! for report in devnet.reports() {
//!     println!("{report}");
//! }
//! devnet.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod devnet;
mod mempool;
mod network;
mod runner;
mod telemetry;
mod timers;

pub use config::{ConsensusSection, DevnetSection, NodeConfig, NodeConfigError, NodeSection};
pub use devnet::{devnet_keypair, Devnet, DevnetError, NodeReport};
pub use mempool::Mempool;
pub use network::LocalNetwork;
pub use runner::{ProductionRunner, ProductionRunnerBuilder, RunnerError, ShutdownHandle};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryError};
pub use timers::{TimerFired, TimerManager};
