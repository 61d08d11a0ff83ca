//! Server configuration from flags and `HANDOFF_*` environment variables

use chrono::Duration;
use clap::Parser;

use crate::review::links::{max_ttl, MAX_TTL_DAYS};
use crate::review::EngineConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "handoff")]
#[command(about = "Handoff server - delivery and review lifecycle for outsourced creative production")]
#[command(version)]
pub struct Config {
    /// SQLite database URL
    #[arg(long, env = "HANDOFF_DATABASE_URL", default_value = "sqlite:handoff.db")]
    pub database_url: String,

    /// Address to listen on
    #[arg(long, env = "HANDOFF_BIND", default_value = "0.0.0.0:3000")]
    pub bind: String,

    /// Database pool size
    #[arg(long, env = "HANDOFF_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Lifetime of review links issued without an explicit TTL
    #[arg(long, env = "HANDOFF_REVIEW_LINK_TTL_HOURS", default_value_t = 168)]
    pub review_link_ttl_hours: i64,

    /// Create internal tracking links for member decisions made without one
    #[arg(
        long,
        env = "HANDOFF_AUDIT_LINKS",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub audit_links: bool,

    /// Seconds between lateness reconciliation runs; 0 disables the job
    #[arg(long, env = "HANDOFF_RECONCILE_INTERVAL_SECS", default_value_t = 0)]
    pub reconcile_interval_secs: u64,
}

impl Config {
    pub fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        if self.review_link_ttl_hours <= 0 {
            anyhow::bail!("--review-link-ttl-hours must be positive");
        }
        let default_link_ttl = Duration::try_hours(self.review_link_ttl_hours)
            .filter(|ttl| *ttl <= max_ttl())
            .ok_or_else(|| {
                anyhow::anyhow!("--review-link-ttl-hours cannot exceed {} days", MAX_TTL_DAYS)
            })?;
        Ok(EngineConfig {
            default_link_ttl,
            audit_links: self.audit_links,
        })
    }

    pub fn reconcile_interval(&self) -> Option<std::time::Duration> {
        (self.reconcile_interval_secs > 0)
            .then(|| std::time::Duration::from_secs(self.reconcile_interval_secs))
    }
}
