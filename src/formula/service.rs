//! Service descriptor: the contract with the host's service supervisor.

use serde::Serialize;
use std::path::PathBuf;

/// How the supervisor should run a package's long-lived process. Purely
/// declarative; writing supervisor config files is the host's business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSpec {
    /// Full command line, program first.
    pub run: Vec<String>,
    pub environment: Vec<(String, String)>,
    /// Restart the process whenever it exits.
    pub keep_alive: bool,
    pub log_path: PathBuf,
    pub error_log_path: PathBuf,
    pub working_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_spec_serializes_for_info_output() {
        let spec = ServiceSpec {
            run: vec!["/opt/kegs/opt/postgresql@16/bin/postgres".into(), "-D".into(), "/opt/kegs/var/postgresql@16".into()],
            environment: vec![("LC_ALL".into(), "C".into())],
            keep_alive: true,
            log_path: PathBuf::from("/opt/kegs/var/log/postgresql@16.log"),
            error_log_path: PathBuf::from("/opt/kegs/var/log/postgresql@16.log"),
            working_dir: PathBuf::from("/opt/kegs"),
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["keep_alive"], true);
        assert_eq!(json["run"][1], "-D");
    }
}
