use std::net::SocketAddr;
use std::path::PathBuf;

/// Configuration for the lord (central coordinator) process.
#[derive(Debug, Clone)]
pub struct LordConfig {
    pub listen_addr: SocketAddr,
    /// Spare frontier nodes to keep lord-side at launch, beyond the one
    /// node handed to each vassal. These seed the first steal requests.
    pub min_nodes_to_save: usize,
    /// Deadline for each lord-to-vassal RPC (steal, bound push, job start).
    pub rpc_timeout_ms: u64,
    /// Transport failures tolerated per steal candidate within one
    /// ask-for-work request before the job is declared failed.
    pub max_failed_steal_attempts: u32,
    /// Where to write the final per-job stats report. None disables it.
    pub stats_path: Option<PathBuf>,
}

impl Default for LordConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:50200"
                .parse()
                .expect("default listen address is valid"),
            min_nodes_to_save: 0,
            rpc_timeout_ms: 5_000,
            max_failed_steal_attempts: 3,
            stats_path: None,
        }
    }
}

impl LordConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_min_nodes_to_save(mut self, n: usize) -> Self {
        self.min_nodes_to_save = n;
        self
    }

    pub fn with_rpc_timeout_ms(mut self, ms: u64) -> Self {
        self.rpc_timeout_ms = ms;
        self
    }

    pub fn with_stats_path(mut self, path: PathBuf) -> Self {
        self.stats_path = Some(path);
        self
    }
}

/// Configuration for a vassal (worker) process.
#[derive(Debug, Clone)]
pub struct VassalConfig {
    pub vassal_id: u64,
    pub listen_addr: SocketAddr,
    /// Host the lord should use to reach this vassal. Usually the listen
    /// host, but differs behind NAT or in containers.
    pub advertise_host: String,
    /// Lord address in host:port form.
    pub lord_addr: String,
    /// Local evaluation parallelism.
    pub num_slots: u32,
    /// Attempts to register with the lord before giving up.
    pub register_attempts: u32,
    /// Delay between registration attempts.
    pub register_retry_ms: u64,
}

impl Default for VassalConfig {
    fn default() -> Self {
        Self {
            vassal_id: 1,
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:50201"
                .parse()
                .expect("default listen address is valid"),
            advertise_host: "127.0.0.1".to_string(),
            lord_addr: "127.0.0.1:50200".to_string(),
            num_slots: 1,
            register_attempts: 10,
            register_retry_ms: 500,
        }
    }
}

impl VassalConfig {
    pub fn new(vassal_id: u64, listen_addr: SocketAddr, lord_addr: String) -> Self {
        Self {
            vassal_id,
            advertise_host: listen_addr.ip().to_string(),
            listen_addr,
            lord_addr,
            ..Default::default()
        }
    }

    pub fn with_num_slots(mut self, slots: u32) -> Self {
        self.num_slots = slots;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lord_config_default() {
        let cfg = LordConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:50200");
        assert_eq!(cfg.min_nodes_to_save, 0);
        assert_eq!(cfg.rpc_timeout_ms, 5_000);
        assert_eq!(cfg.max_failed_steal_attempts, 3);
        assert!(cfg.stats_path.is_none());
    }

    #[test]
    fn lord_config_builders() {
        let cfg = LordConfig::new("10.0.0.1:9000".parse().unwrap())
            .with_min_nodes_to_save(4)
            .with_rpc_timeout_ms(250)
            .with_stats_path(PathBuf::from("/tmp/stats.log"));
        assert_eq!(cfg.listen_addr.to_string(), "10.0.0.1:9000");
        assert_eq!(cfg.min_nodes_to_save, 4);
        assert_eq!(cfg.rpc_timeout_ms, 250);
        assert_eq!(cfg.stats_path, Some(PathBuf::from("/tmp/stats.log")));
    }

    #[test]
    fn vassal_config_new() {
        let addr: SocketAddr = "192.168.1.5:7000".parse().unwrap();
        let cfg = VassalConfig::new(7, addr, "192.168.1.1:50200".to_string());
        assert_eq!(cfg.vassal_id, 7);
        assert_eq!(cfg.listen_addr, addr);
        assert_eq!(cfg.advertise_host, "192.168.1.5");
        assert_eq!(cfg.lord_addr, "192.168.1.1:50200");
        assert_eq!(cfg.num_slots, 1);
    }

    #[test]
    fn vassal_config_with_num_slots() {
        let cfg = VassalConfig::default().with_num_slots(8);
        assert_eq!(cfg.num_slots, 8);
    }
}
