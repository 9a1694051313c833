//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → SchedulerConfig (validated, immutable)
//!     → handed to Scheduler, which derives each component's settings
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a new Scheduler
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::CircuitBreakerConfig;
pub use schema::ObservabilityConfig;
pub use schema::SchedulerConfig;
pub use schema::SelectionConfig;
pub use schema::SlotConfig;
pub use schema::StoreConfig;
pub use schema::WaitQueueConfig;
