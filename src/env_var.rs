use std::sync::OnceLock;

use serde::Deserialize;

fn default_deadlock_timeout() -> f64 {
    600.0
}

fn default_backend() -> String {
    "local".to_owned()
}

fn default_shared_windows() -> bool {
    true
}

fn default_max_contig_elements() -> usize {
    i32::MAX as usize
}

fn default_completion_delay() -> usize {
    0
}

#[derive(Deserialize, Debug)]
pub struct Config {
    /// A general timeout in seconds for collective rendezvous which may indicate a deadlock, default: 600.0 seconds
    #[serde(default = "default_deadlock_timeout")]
    pub deadlock_timeout: f64,

    /// The transport backend to use
    /// local -- in-process fabric simulating every unit inside one process
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Route get/put between units on the same node through direct memory copies, default: true
    #[serde(default = "default_shared_windows")]
    pub shared_windows: bool,

    /// Largest element count a single transport call accepts, default: i32::MAX
    #[serde(default = "default_max_contig_elements")]
    pub max_contig_elements: usize,

    /// Number of units the local backend places on each simulated node, default: all units on one node
    pub units_per_node: Option<usize>,

    /// Number of polls a local backend request reports as still in flight, default: 0
    #[serde(default = "default_completion_delay")]
    pub completion_delay: usize,

    /// flag used to print warnings when a handle with in-flight requests is dropped. Default: true
    pub dropped_handle_warning: Option<bool>,
}

/// Get the current Environment Variable configuration
pub fn config() -> &'static Config {
    static CONFIG: OnceLock<Config> = OnceLock::new();
    CONFIG.get_or_init(|| match envy::prefixed("PGAS_").from_env::<Config>() {
        Ok(config) => config,
        Err(error) => panic!("{}", error),
    })
}
