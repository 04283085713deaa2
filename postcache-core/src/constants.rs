//! Constants for postcache
//!
//! Defaults for the eviction sweeper and the names of the environment
//! variables that override them.

// ============================================================================
// SWEEPER DEFAULTS
// ============================================================================

/// Default interval between sweeps in seconds
pub const DEFAULT_SWEEPER_PERIOD_SECS: u64 = 3;

/// Default delay before the first sweep in milliseconds
pub const DEFAULT_SWEEPER_INITIAL_DELAY_MS: u64 = 1000;

/// Whether the sweeper runs unless configured otherwise
pub const DEFAULT_SWEEPER_ENABLED: bool = true;

/// Whether each eviction is logged at info level
pub const DEFAULT_SWEEPER_LOG_EVICTIONS: bool = true;

// ============================================================================
// ENVIRONMENT VARIABLES
// ============================================================================

pub const ENV_SWEEPER_ENABLED: &str = "POSTCACHE_SWEEPER_ENABLED";
pub const ENV_SWEEPER_PERIOD_SECS: &str = "POSTCACHE_SWEEPER_PERIOD_SECS";
pub const ENV_SWEEPER_INITIAL_DELAY_MS: &str = "POSTCACHE_SWEEPER_INITIAL_DELAY_MS";
pub const ENV_SWEEPER_LOG_EVICTIONS: &str = "POSTCACHE_SWEEPER_LOG_EVICTIONS";
