//! Configuration for the TDDF pipeline
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use uuid::Uuid;

/// Shared pipeline configuration, common to every subcommand
#[derive(Parser, Debug, Clone)]
pub struct Args {
    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "tddf_pipeline")]
    pub mongodb_db: String,

    /// Claim owner identity recorded on every line this worker claims.
    /// Defaults to hostname plus a random suffix so parallel workers on one
    /// host stay distinguishable.
    #[arg(long, env = "WORKER_OWNER", default_value_t = default_owner())]
    pub owner: String,

    /// Default lines per processing batch
    #[arg(long, env = "BATCH_SIZE", default_value = "500")]
    pub batch_size: u32,

    /// Minutes before a Processing claim is considered abandoned
    #[arg(long, env = "LOCK_STALE_MINUTES", default_value = "30")]
    pub stale_after_minutes: i64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Default worker identity: hostname plus a short random suffix
pub fn default_owner() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "worker".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", host, &suffix[..8])
}

impl Args {
    /// Staleness window as a duration
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_after_minutes)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("BATCH_SIZE must be at least 1".to_string());
        }
        if self.stale_after_minutes <= 0 {
            return Err("LOCK_STALE_MINUTES must be positive".to_string());
        }
        if self.owner.trim().is_empty() {
            return Err("WORKER_OWNER must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            mongodb_uri: "mongodb://localhost:27017".to_string(),
            mongodb_db: "tddf_pipeline".to_string(),
            owner: "test-worker".to_string(),
            batch_size: 500,
            stale_after_minutes: 30,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn valid_defaults_pass() {
        assert!(base_args().validate().is_ok());
    }

    #[test]
    fn rejects_zero_batch_and_window() {
        let mut args = base_args();
        args.batch_size = 0;
        assert!(args.validate().is_err());

        let mut args = base_args();
        args.stale_after_minutes = 0;
        assert!(args.validate().is_err());
    }

    #[test]
    fn default_owner_carries_random_suffix() {
        let a = default_owner();
        let b = default_owner();
        assert_ne!(a, b);
        assert!(a.contains('-'));
    }
}
