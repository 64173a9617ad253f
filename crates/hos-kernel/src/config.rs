//! Kernel configuration

use serde::{Deserialize, Serialize};

/// Total emulated DRAM and how it is split between the physical regions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryArrange {
    #[default]
    Mib4096,
    Mib6144,
    Mib8192,
}

/// Byte sizes of the four physical regions, laid out in this order from
/// physical address zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSizes {
    pub application: u64,
    pub applet: u64,
    pub service: u64,
    pub nv_services: u64,
}

const MIB: u64 = 1024 * 1024;

const APPLET_REGION_SIZE: u64 = 0x1FB0_0000;
const SERVICE_REGION_SIZE: u64 = 0x0800_0000;
const NV_SERVICES_REGION_SIZE: u64 = 0x0200_0000;

impl MemoryArrange {
    pub fn dram_size(self) -> u64 {
        match self {
            Self::Mib4096 => 4096 * MIB,
            Self::Mib6144 => 6144 * MIB,
            Self::Mib8192 => 8192 * MIB,
        }
    }

    pub fn region_sizes(self) -> RegionSizes {
        RegionSizes {
            application: self.dram_size()
                - APPLET_REGION_SIZE
                - SERVICE_REGION_SIZE
                - NV_SERVICES_REGION_SIZE,
            applet: APPLET_REGION_SIZE,
            service: SERVICE_REGION_SIZE,
            nv_services: NV_SERVICES_REGION_SIZE,
        }
    }
}

/// Kernel configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub memory_arrange: MemoryArrange,
    /// Cores reported to capability parsing; service processes are pinned
    /// to the last one.
    pub cpu_core_count: u32,
    /// Handle table capacity for processes without a size descriptor.
    pub default_handle_table_size: usize,
    /// How long shutdown waits for the termination thread to start.
    pub termination_start_timeout_ms: u64,
    /// Entries kept in the kernel audit log.
    pub kernel_log_capacity: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            memory_arrange: MemoryArrange::default(),
            cpu_core_count: 4,
            default_handle_table_size: 1024,
            termination_start_timeout_ms: 1000,
            kernel_log_capacity: 1000,
        }
    }
}
