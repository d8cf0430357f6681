use serde::{Deserialize, Serialize};
use sysinfo::System;
use log::{debug, info};

/// Hosts below this much memory are treated as constrained
const CONSTRAINED_MEMORY_BYTES: u64 = 4 * 1024 * 1024 * 1024; // 4GB
/// Hosts with this many logical CPUs or fewer are treated as constrained
const CONSTRAINED_CPU_COUNT: usize = 2;

/// Device class requested by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Auto,
    Constrained,
    Standard,
}

impl std::str::FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(DeviceClass::Auto),
            "constrained" | "mobile" => Ok(DeviceClass::Constrained),
            "standard" | "desktop" => Ok(DeviceClass::Standard),
            other => Err(format!("unknown device class: {}", other)),
        }
    }
}

/// Runtime environment the session runs on; derived once, never mutated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceProfile {
    pub is_constrained: bool,
}

impl DeviceProfile {
    pub const CONSTRAINED: DeviceProfile = DeviceProfile { is_constrained: true };
    pub const STANDARD: DeviceProfile = DeviceProfile { is_constrained: false };

    /// Resolve a device class into a profile, inspecting the host for `Auto`
    pub fn detect(class: DeviceClass) -> Self {
        let profile = match class {
            DeviceClass::Constrained => Self::CONSTRAINED,
            DeviceClass::Standard => Self::STANDARD,
            DeviceClass::Auto => {
                let mut system = System::new();
                system.refresh_memory();
                let total_memory = system.total_memory();
                let cpus = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                debug!("Host resources: {} bytes memory, {} logical CPUs", total_memory, cpus);
                Self::from_resources(total_memory, cpus)
            }
        };

        info!("Device profile: {}", if profile.is_constrained { "constrained" } else { "standard" });
        profile
    }

    /// Classify from raw host resources. Unknown memory (0) does not count as constrained.
    pub fn from_resources(total_memory_bytes: u64, cpu_count: usize) -> Self {
        let low_memory = total_memory_bytes > 0 && total_memory_bytes < CONSTRAINED_MEMORY_BYTES;
        let few_cpus = cpu_count <= CONSTRAINED_CPU_COUNT;
        DeviceProfile {
            is_constrained: low_memory || few_cpus,
        }
    }
}
