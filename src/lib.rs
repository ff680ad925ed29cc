//! dnspilot - a self-healing DNS forwarding relay.
//!
//! The relay forwards client DNS queries verbatim to the active resolver
//! group. Alongside it, a controller grades the active resolver and the
//! configured candidates and moves the relay to a better group when the
//! active one degrades, within a bounded switch rate.
//!
//! # Library Usage
//!
//! ```ignore
//! use dnspilot::{ConfigLoader, DnsPilot};
//!
//! let pilot = DnsPilot::new(ConfigLoader::load_default()?);
//! let addr = pilot.start("auto").await?;
//! let mut events = pilot.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Run the relay, letting the selector choose the group
//! dnspilot run
//! dnspilot run --group B
//!
//! # Grade a single resolver
//! dnspilot check 1.1.1.1
//! dnspilot check 8.8.8.8 --quick --format json
//!
//! # Rank all candidates
//! dnspilot select --peak
//!
//! # Diagnostics
//! dnspilot peak
//! dnspilot ping
//! ```

pub mod cli;
pub mod config;
pub mod control;
pub mod dns;
pub mod error;
pub mod events;
pub mod pilot;
pub mod relay;

// Re-export commonly used types
pub use cli::{Cli, Commands, OutputFormat};
pub use config::{ConfigLoader, PilotConfig};
pub use control::{PeakSchedule, SwitchController};
pub use dns::{CandidateSelector, HistoryStore, QualityGrader, QualityResult, QualityScorer};
pub use error::{Error, Result};
pub use events::{EventBus, StatusEvent};
pub use pilot::DnsPilot;
pub use relay::RelayEngine;
