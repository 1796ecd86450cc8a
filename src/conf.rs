use crate::projection::MissingHeaderPolicy;
use crate::routing::{RouteSpec, RoutingTable};
use anyhow::Context;
use std::env::VarError;

#[derive(Debug, Clone)]
pub struct Config {
    pub source_dsn: String,
    pub source_queue: String,
    pub target_dsn: String,
    pub target_exchange: String,
    pub target_routing_key: String,
    pub health_port: u16,
    pub routes: Vec<RouteSpec>,
    pub missing_header_policy: MissingHeaderPolicy,
}

impl Config {
    /// Build a configuration from environment variables.
    ///
    /// Required variables: `SOURCE_DSN`, `TARGET_DSN`.
    /// Optional variables: `SOURCE_QUEUE`, `TARGET_EXCHANGE`, `TARGET_ROUTING_KEY`,
    /// `HEALTH_PORT`, `PROJECTION_ROUTES`, `MISSING_HEADER_POLICY`.
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing, if
    /// `PROJECTION_ROUTES` or `MISSING_HEADER_POLICY` are malformed, or if
    /// `HEALTH_PORT` cannot be parsed to a valid `u16` when provided.
    pub fn from_env() -> anyhow::Result<Self> {
        let routes = match std::env::var("PROJECTION_ROUTES") {
            Ok(raw) => RouteSpec::parse_list(&raw).context("Invalid PROJECTION_ROUTES")?,
            Err(VarError::NotPresent) => RouteSpec::defaults(),
            Err(e) => return Err(e).context("Invalid PROJECTION_ROUTES"),
        };

        let missing_header_policy = match std::env::var("MISSING_HEADER_POLICY") {
            Ok(raw) => raw
                .parse::<MissingHeaderPolicy>()
                .context("Invalid MISSING_HEADER_POLICY")?,
            Err(VarError::NotPresent) => MissingHeaderPolicy::default(),
            Err(e) => return Err(e).context("Invalid MISSING_HEADER_POLICY"),
        };

        let health_port = match std::env::var("HEALTH_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("Invalid HEALTH_PORT '{raw}'"))?,
            Err(VarError::NotPresent) => 8080,
            Err(e) => return Err(e).context("Invalid HEALTH_PORT"),
        };

        Ok(Self {
            source_dsn: std::env::var("SOURCE_DSN")
                .context("SOURCE_DSN environment variable not set")?,
            source_queue: std::env::var("SOURCE_QUEUE")
                .unwrap_or_else(|_| "seq_report".to_string()),
            target_dsn: std::env::var("TARGET_DSN")
                .context("TARGET_DSN environment variable not set")?,
            target_exchange: std::env::var("TARGET_EXCHANGE")
                .unwrap_or_else(|_| "seq_report_xchg".to_string()),
            target_routing_key: std::env::var("TARGET_ROUTING_KEY")
                .unwrap_or_else(|_| "projected".to_string()),
            health_port,
            routes,
            missing_header_policy,
        })
    }

    /// Build the routing table described by this configuration.
    ///
    /// # Errors
    /// Returns an error if the configured routes contain duplicates or none at all.
    pub fn routing_table(&self) -> anyhow::Result<RoutingTable> {
        let table = RoutingTable::from_routes(self.routes.clone(), self.missing_header_policy)
            .context("Invalid projection routes")?;
        anyhow::ensure!(!table.is_empty(), "No projection routes configured");
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::HeaderKey;
    use std::sync::{Mutex, OnceLock};

    // Global mutex to serialize environment-variable dependent tests
    static ENV_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_MUTEX.get_or_init(|| Mutex::new(()))
    }

    fn clear_env() {
        for (k, _) in std::env::vars_os() {
            match k.to_str().unwrap_or_default() {
                "SOURCE_DSN" | "SOURCE_QUEUE" | "TARGET_DSN" | "TARGET_EXCHANGE"
                | "TARGET_ROUTING_KEY" | "HEALTH_PORT" | "PROJECTION_ROUTES"
                | "MISSING_HEADER_POLICY" => {
                    unsafe { std::env::remove_var(k) };
                }
                _ => {}
            }
        }
    }

    fn set_required() {
        unsafe { std::env::set_var("SOURCE_DSN", "amqp://src") };
        unsafe { std::env::set_var("TARGET_DSN", "amqp://dst") };
    }

    #[test]
    fn from_env_errors_when_required_missing() {
        let _g = env_lock().lock().unwrap();
        clear_env();

        let err = Config::from_env().unwrap_err();
        assert!(format!("{err:#}").contains("SOURCE_DSN"));

        unsafe { std::env::set_var("SOURCE_DSN", "amqp://host") };
        let err = Config::from_env().unwrap_err();
        assert!(format!("{err:#}").contains("TARGET_DSN"));
    }

    #[test]
    fn from_env_uses_defaults_for_optionals() {
        let _g = env_lock().lock().unwrap();
        clear_env();
        set_required();

        let cfg = Config::from_env().expect("should parse");
        assert_eq!(cfg.source_queue, "seq_report");
        assert_eq!(cfg.target_exchange, "seq_report_xchg");
        assert_eq!(cfg.target_routing_key, "projected");
        assert_eq!(cfg.health_port, 8080);
        assert_eq!(cfg.routes, RouteSpec::defaults());
        assert_eq!(cfg.missing_header_policy, MissingHeaderPolicy::Empty);

        let table = cfg.routing_table().unwrap();
        assert!(table.get("ena-ftp-dir").is_some());
        assert!(table.get("seq-report-path").is_some());
    }

    #[test]
    fn from_env_parses_overrides() {
        let _g = env_lock().lock().unwrap();
        clear_env();
        set_required();

        unsafe { std::env::set_var("SOURCE_QUEUE", "q1") };
        unsafe { std::env::set_var("TARGET_EXCHANGE", "ex1") };
        unsafe { std::env::set_var("TARGET_ROUTING_KEY", "rk1") };
        unsafe { std::env::set_var("HEALTH_PORT", "9000") };
        unsafe { std::env::set_var("PROJECTION_ROUTES", "dir=enaFtpSeqRepDir") };
        unsafe { std::env::set_var("MISSING_HEADER_POLICY", "reject") };

        let cfg = Config::from_env().expect("should parse");
        assert_eq!(cfg.source_queue, "q1");
        assert_eq!(cfg.target_exchange, "ex1");
        assert_eq!(cfg.target_routing_key, "rk1");
        assert_eq!(cfg.health_port, 9000);
        assert_eq!(
            cfg.routes,
            vec![RouteSpec::new("dir", HeaderKey::ENA_FTP_SEQ_REP_DIR)]
        );
        assert_eq!(cfg.missing_header_policy, MissingHeaderPolicy::Reject);
    }

    #[test]
    fn from_env_rejects_bad_values() {
        let _g = env_lock().lock().unwrap();
        clear_env();
        set_required();

        unsafe { std::env::set_var("MISSING_HEADER_POLICY", "ignore") };
        let err = Config::from_env().unwrap_err();
        assert!(format!("{err:#}").contains("MISSING_HEADER_POLICY"));

        unsafe { std::env::remove_var("MISSING_HEADER_POLICY") };
        unsafe { std::env::set_var("PROJECTION_ROUTES", "dir") };
        let err = Config::from_env().unwrap_err();
        assert!(format!("{err:#}").contains("PROJECTION_ROUTES"));

        unsafe { std::env::remove_var("PROJECTION_ROUTES") };
        unsafe { std::env::set_var("HEALTH_PORT", "not-a-port") };
        let err = Config::from_env().unwrap_err();
        assert!(format!("{err:#}").contains("HEALTH_PORT"));
    }

    #[cfg(unix)]
    #[test]
    fn from_env_rejects_non_utf8_values() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let _g = env_lock().lock().unwrap();
        clear_env();
        set_required();

        let garbled = OsStr::from_bytes(b"rej\xffect");
        unsafe { std::env::set_var("MISSING_HEADER_POLICY", garbled) };
        let err = Config::from_env().unwrap_err();
        assert!(format!("{err:#}").contains("MISSING_HEADER_POLICY"));

        unsafe { std::env::remove_var("MISSING_HEADER_POLICY") };
        unsafe { std::env::set_var("PROJECTION_ROUTES", garbled) };
        let err = Config::from_env().unwrap_err();
        assert!(format!("{err:#}").contains("PROJECTION_ROUTES"));
    }

    #[test]
    fn routing_table_requires_at_least_one_route() {
        let _g = env_lock().lock().unwrap();
        clear_env();
        set_required();
        unsafe { std::env::set_var("PROJECTION_ROUTES", " , ") };

        let cfg = Config::from_env().expect("should parse");
        assert!(cfg.routing_table().is_err());
    }
}
