//! Configuration types.

/// Where a restart from the completed state lands.
///
/// Source flows disagreed on whether a restart re-sends the full welcome or
/// jumps straight to the first question. We support both and default to the
/// first question with its prompt inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartTarget {
    /// Back to the welcome state (index 0); the welcome sequence is re-sent.
    Welcome,
    /// Straight to question 1 (index 1) with its prompt appended to the
    /// restart confirmation.
    FirstQuestion,
}

/// What to do when a store write fails mid-turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFailurePolicy {
    /// Log the failure and keep answering. The user always gets a coherent
    /// reply, at the cost of state possibly not advancing.
    Lenient,
    /// Fail the turn with a database error so the client can retry.
    Strict,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Where a restart from `Completed` lands.
    pub restart_target: RestartTarget,
    /// Policy for store write failures during a conversational turn.
    pub write_failure_policy: WriteFailurePolicy,
    /// Whether answers with a validator attached (e.g. location) are checked.
    pub validate_answers: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            restart_target: RestartTarget::FirstQuestion,
            write_failure_policy: WriteFailurePolicy::Lenient,
            validate_answers: true,
        }
    }
}

/// Application configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP bind port.
    pub port: u16,
    /// Path to the libSQL database file.
    pub db_path: String,
    /// Days without survey completion before a user's digest is paused.
    pub sweep_threshold_days: i64,
    /// How often the in-process sweep task runs, in seconds. 0 disables it
    /// (external cron hits the HTTP endpoint instead).
    pub sweep_interval_secs: u64,
    /// API key required by the cron endpoint.
    pub internal_api_key: Option<String>,
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Load configuration from environment variables, with defaults matching
    /// the production deployment.
    pub fn from_env() -> Self {
        let port = std::env::var("WEEKENDER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let db_path = std::env::var("WEEKENDER_DB_PATH")
            .unwrap_or_else(|_| "./data/weekender.db".to_string());

        let sweep_threshold_days = std::env::var("WEEKENDER_SWEEP_THRESHOLD_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let sweep_interval_secs = std::env::var("WEEKENDER_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let internal_api_key = std::env::var("INTERNAL_API_KEY").ok();

        let write_failure_policy = match std::env::var("WEEKENDER_STRICT_WRITES").as_deref() {
            Ok("1") | Ok("true") => WriteFailurePolicy::Strict,
            _ => WriteFailurePolicy::Lenient,
        };

        Self {
            port,
            db_path,
            sweep_threshold_days,
            sweep_interval_secs,
            internal_api_key,
            engine: EngineConfig {
                write_failure_policy,
                ..EngineConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_engine_config() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.restart_target, RestartTarget::FirstQuestion);
        assert_eq!(cfg.write_failure_policy, WriteFailurePolicy::Lenient);
        assert!(cfg.validate_answers);
    }
}
