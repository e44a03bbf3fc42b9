//! CLI argument parsing for the capture daemon
//!
//! Every option has an `ADWATCH_*` environment fallback so deployments can
//! configure the daemon through the environment alone.

use clap::{Parser, Subcommand};

/// adwatch - change-data-capture for Active Directory
///
/// Polls a domain controller for objects whose uSNChanged exceeds the
/// committed watermark and persists versioned snapshots plus per-attribute
/// change records into PostgreSQL.
#[derive(Parser, Debug)]
#[command(name = "adwatchd")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Base DN of the domain, e.g. DC=corp,DC=example
    #[arg(long, env = "ADWATCH_BASE_DN")]
    pub base_dn: String,

    /// FQDN of the domain controller to poll
    #[arg(long, env = "ADWATCH_CONTROLLER_FQDN")]
    pub controller_fqdn: String,

    /// Bind username
    #[arg(long, env = "ADWATCH_USERNAME")]
    pub username: String,

    /// Bind password
    #[arg(long, env = "ADWATCH_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Page size for paged searches
    #[arg(long, default_value = "1000", env = "ADWATCH_PAGE_SIZE")]
    pub page_size: u32,

    /// PostgreSQL DSN of the capture database
    #[arg(long, env = "ADWATCH_DSN")]
    pub dsn: Option<String>,

    /// PostgreSQL DSN with rights to drop and create databases
    #[arg(long, env = "ADWATCH_MANAGEMENT_DSN")]
    pub management_dsn: Option<String>,

    /// Milliseconds to sleep between capture cycles
    #[arg(long, default_value = "1000", env = "ADWATCH_POLL_INTERVAL_MS")]
    pub poll_interval_ms: u64,

    /// Deadline in seconds for one batch transaction
    #[arg(long, default_value = "30", env = "ADWATCH_BATCH_TIMEOUT_SECS")]
    pub batch_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the capture loop (the default)
    Run {
        /// Apply the capture schema before starting
        #[arg(long)]
        init_schema: bool,
    },
    /// Fetch entries matching a filter and pretty-print them
    Dump {
        /// LDAP filter to match
        #[arg(default_value = "(objectClass=*)")]
        filter: String,
    },
    /// Drop and recreate the capture database, then apply the schema.
    /// Destructive; requires --management-dsn.
    ResetDb,
}

impl Cli {
    /// Reject configurations that cannot work before any connection is
    /// attempted.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_dn.trim().is_empty() {
            return Err("base DN must not be empty".into());
        }
        if self.controller_fqdn.trim().is_empty() {
            return Err("controller FQDN must not be empty".into());
        }
        if self.username.trim().is_empty() {
            return Err("username must not be empty".into());
        }
        if self.password.is_empty() {
            return Err("password must not be empty".into());
        }
        if self.page_size == 0 {
            return Err("page size must be at least 1".into());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll interval must be at least 1ms".into());
        }
        match &self.command {
            None | Some(Command::Run { .. }) => {
                if self.dsn.as_deref().map(str::trim).unwrap_or_default().is_empty() {
                    return Err("--dsn is required to run the capture loop".into());
                }
            }
            Some(Command::ResetDb) => {
                if self.dsn.is_none() {
                    return Err("--dsn is required for reset-db".into());
                }
                if self.management_dsn.is_none() {
                    return Err("--management-dsn is required for reset-db".into());
                }
            }
            Some(Command::Dump { .. }) => {}
        }
        Ok(())
    }

    /// LDAP URL of the configured controller.
    pub fn ldap_url(&self) -> String {
        format!("ldap://{}:389", self.controller_fqdn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            base_dn: "DC=corp,DC=example".into(),
            controller_fqdn: "dc01.corp.example".into(),
            username: "svc-adwatch".into(),
            password: "hunter2".into(),
            page_size: 1000,
            dsn: Some("postgres://adwatch:pw@localhost/adwatch".into()),
            management_dsn: None,
            poll_interval_ms: 1000,
            batch_timeout_secs: 30,
            log_level: "info".into(),
            command: None,
        }
    }

    #[test]
    fn test_valid_configuration() {
        assert!(base_cli().validate().is_ok());
    }

    #[test]
    fn test_empty_base_dn_rejected() {
        let mut cli = base_cli();
        cli.base_dn = " ".into();
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let mut cli = base_cli();
        cli.page_size = 0;
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_run_requires_dsn() {
        let mut cli = base_cli();
        cli.dsn = None;
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_dump_does_not_require_dsn() {
        let mut cli = base_cli();
        cli.dsn = None;
        cli.command = Some(Command::Dump {
            filter: "(objectClass=*)".into(),
        });
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_reset_db_requires_management_dsn() {
        let mut cli = base_cli();
        cli.command = Some(Command::ResetDb);
        assert!(cli.validate().is_err());
        cli.management_dsn = Some("postgres://postgres:pw@localhost/postgres".into());
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_ldap_url() {
        assert_eq!(base_cli().ldap_url(), "ldap://dc01.corp.example:389");
    }
}
