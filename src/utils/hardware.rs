use serde::Serialize;
use sysinfo::System;

/// Resources of the machine generating the load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HostInfo {
    pub cpu_cores: u64,
    pub total_memory_mb: u64,
    pub available_memory_mb: u64,
}

pub fn get_hardware_info() -> HostInfo {
    let mut sys = System::new_all();
    sys.refresh_all();

    HostInfo {
        cpu_cores: sys.cpus().len() as u64,
        total_memory_mb: sys.total_memory() / 1024 / 1024,
        available_memory_mb: sys.available_memory() / 1024 / 1024,
    }
}
