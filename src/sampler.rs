//! Host metric sampling for the agent

use serde_json::json;
use sysinfo::System;

use crate::Payload;

/// Anything that can produce a metric bag on demand
pub trait MetricSource: Send {
    fn sample(&mut self) -> Payload;
}

/// Samples the local host through `sysinfo`
///
/// The `System` is kept between samples so CPU usage is measured over the
/// reporting interval instead of a single refresh.
pub struct SystemSampler {
    sys: System,
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_usage();
        Self { sys }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for SystemSampler {
    fn sample(&mut self) -> Payload {
        self.sys.refresh_memory();
        self.sys.refresh_cpu_usage();

        let load = System::load_average();

        Payload::from([
            ("hostname".to_string(), json!(System::host_name())),
            ("platform".to_string(), json!(std::env::consts::OS)),
            ("os_version".to_string(), json!(System::long_os_version())),
            ("arch".to_string(), json!(System::cpu_arch())),
            ("uptime".to_string(), json!(System::uptime())),
            (
                "loadavg".to_string(),
                json!([load.one, load.five, load.fifteen]),
            ),
            ("totalmem".to_string(), json!(self.sys.total_memory())),
            ("freemem".to_string(), json!(self.sys.available_memory())),
            ("cpus".to_string(), json!(self.sys.cpus().len())),
            ("cpu_usage".to_string(), json!(self.sys.global_cpu_usage())),
        ])
    }
}
