//! Configuration handling for the NL2SQL gateway.
//!
//! Process-level settings come from CLI arguments and environment variables.
//! Data source and model settings arrive per request as JSON and are not part
//! of this configuration.

use std::time::Duration;

use clap::Parser;

use crate::agent::{AgentOptions, DEFAULT_MAX_ATTEMPTS, DEFAULT_RESULT_NUM_LIMIT};
use crate::db::QueryExecutor;
use crate::db::executor::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_QUERY_TIMEOUT_SECS};

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;

/// Configuration for the NL2SQL gateway.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "nl2sql-gateway",
    about = "HTTP gateway that answers natural-language questions with SQL against your data sources",
    version,
    author
)]
pub struct Config {
    /// HTTP host to bind to
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "NL2SQL_HOST")]
    pub host: String,

    /// HTTP port to bind to
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "NL2SQL_PORT")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "NL2SQL_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "NL2SQL_JSON_LOGS")]
    pub json_logs: bool,

    /// Generation attempts per natural-language query
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, env = "NL2SQL_MAX_ATTEMPTS")]
    pub max_attempts: usize,

    /// Default row cap for generated queries (0 disables the cap)
    #[arg(long, default_value_t = DEFAULT_RESULT_NUM_LIMIT, env = "NL2SQL_RESULT_NUM_LIMIT")]
    pub result_num_limit: u64,

    /// Timeout in seconds for one language model call
    #[arg(long, default_value_t = DEFAULT_LLM_TIMEOUT_SECS, env = "NL2SQL_LLM_TIMEOUT")]
    pub llm_timeout_secs: u64,

    /// Timeout in seconds for opening a database connection
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS, env = "NL2SQL_CONNECT_TIMEOUT")]
    pub connect_timeout_secs: u64,

    /// Timeout in seconds for one SQL statement
    #[arg(long, default_value_t = DEFAULT_QUERY_TIMEOUT_SECS, env = "NL2SQL_QUERY_TIMEOUT")]
    pub query_timeout_secs: u64,
}

impl Config {
    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            host: DEFAULT_HTTP_HOST.to_string(),
            port: DEFAULT_HTTP_PORT,
            log_level: "info".to_string(),
            json_logs: false,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            result_num_limit: DEFAULT_RESULT_NUM_LIMIT,
            llm_timeout_secs: DEFAULT_LLM_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
        }
    }

    /// Validate values clap cannot check on its own.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }
        if self.llm_timeout_secs == 0 {
            return Err("llm_timeout_secs must be greater than 0".to_string());
        }
        if self.connect_timeout_secs == 0 {
            return Err("connect_timeout_secs must be greater than 0".to_string());
        }
        if self.query_timeout_secs == 0 {
            return Err("query_timeout_secs must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn executor(&self) -> QueryExecutor {
        QueryExecutor::new(
            Duration::from_secs(self.connect_timeout_secs),
            Duration::from_secs(self.query_timeout_secs),
        )
    }

    /// Agent settings; `result_num_limit` may be overridden per request.
    pub fn agent_options(&self) -> AgentOptions {
        AgentOptions {
            max_attempts: self.max_attempts,
            result_num_limit: self.result_num_limit,
            ..AgentOptions::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default_config();
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.result_num_limit, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_args() {
        let config = Config::parse_from([
            "nl2sql-gateway",
            "--host",
            "0.0.0.0",
            "--port",
            "3000",
            "--max-attempts",
            "4",
            "--json-logs",
        ]);
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert_eq!(config.max_attempts, 4);
        assert!(config.json_logs);
        assert_eq!(config.agent_options().max_attempts, 4);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = Config::default_config();
        config.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_executor_timeouts() {
        let mut config = Config::default_config();
        config.connect_timeout_secs = 3;
        config.query_timeout_secs = 7;
        let executor = config.executor();
        assert_eq!(executor.connect_timeout(), Duration::from_secs(3));
        assert_eq!(executor.query_timeout(), Duration::from_secs(7));
    }
}
