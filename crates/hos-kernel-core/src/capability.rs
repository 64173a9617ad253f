//! Kernel capability descriptors
//!
//! A process is created with a list of `u32` capability descriptors. The
//! descriptor type is the number of trailing one bits; the remaining bits
//! are the payload. This module parses the list into [`KernelCapabilities`],
//! whose [`SvcMask`] gates every supervisor call the process makes.
//!
//! # Security Properties (Verification Targets)
//!
//! 1. **Fail Closed**: a syscall not named by any mask descriptor is denied
//! 2. **No Duplicate Slots**: each mask index and each singleton descriptor
//!    may appear once

use core::fmt;

use hos_ipc::capability::{
    SYSCALLS_PER_MASK, TYPE_CORE_PRIORITY, TYPE_DEBUG_FLAGS, TYPE_HANDLE_TABLE_SIZE,
    TYPE_INTERRUPT_PAIR, TYPE_KERNEL_VERSION, TYPE_MAP_IO_PAGE, TYPE_MAP_RANGE,
    TYPE_MAP_REGION, TYPE_PADDING, TYPE_PROGRAM_TYPE, TYPE_SYSCALL_MASK,
};
use hos_ipc::svc::SVC_COUNT;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lowest (numerically largest) thread priority.
pub const LOWEST_THREAD_PRIORITY: u32 = 63;

/// 128-bit set of permitted supervisor calls.
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SvcMask([u64; 2]);

impl SvcMask {
    pub const fn empty() -> Self {
        Self([0; 2])
    }

    /// Every supervisor call permitted.
    pub const fn all() -> Self {
        Self([u64::MAX; 2])
    }

    pub fn from_ids(ids: &[u32]) -> Self {
        let mut mask = Self::empty();
        for id in ids {
            mask.insert(*id);
        }
        mask
    }

    pub fn insert(&mut self, id: u32) {
        if id < SVC_COUNT {
            self.0[(id / 64) as usize] |= 1 << (id % 64);
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        id < SVC_COUNT && self.0[(id / 64) as usize] & (1 << (id % 64)) != 0
    }

    pub fn count(&self) -> u32 {
        self.0[0].count_ones() + self.0[1].count_ones()
    }

    /// Encode as syscall mask descriptors, one per non-empty 24-bit group.
    pub fn to_descriptors(&self) -> alloc::vec::Vec<u32> {
        let mut out = alloc::vec::Vec::new();
        for index in 0..SVC_COUNT.div_ceil(SYSCALLS_PER_MASK) {
            let mut bits = 0u32;
            for bit in 0..SYSCALLS_PER_MASK {
                if self.contains(index * SYSCALLS_PER_MASK + bit) {
                    bits |= 1 << bit;
                }
            }
            if bits != 0 {
                out.push((index << 29) | (bits << 5) | 0xF);
            }
        }
        out
    }
}

impl fmt::Debug for SvcMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SvcMask({:#018x}{:016x})", self.0[1], self.0[0])
    }
}

/// Capability parsing errors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// Two descriptors claim the same slot, or a range is inverted.
    #[error("invalid combination in descriptor {0:#010x}")]
    InvalidCombination(u32),
    /// A core outside the machine was requested.
    #[error("invalid cpu core in descriptor {0:#010x}")]
    InvalidCpuCore(u32),
    /// A descriptor payload uses reserved values.
    #[error("reserved value in descriptor {0:#010x}")]
    ReservedValue(u32),
    /// The descriptor type is unknown.
    #[error("unknown capability descriptor {0:#010x}")]
    InvalidCapability(u32),
}

impl CapabilityError {
    pub fn result_code(self) -> hos_ipc::ResultCode {
        use hos_ipc::result::kernel;
        match self {
            Self::InvalidCombination(_) => kernel::INVALID_COMBINATION,
            Self::InvalidCpuCore(_) => kernel::INVALID_CPU_CORE,
            Self::ReservedValue(_) => kernel::RESERVED_VALUE,
            Self::InvalidCapability(_) => kernel::INVALID_CAPABILITY,
        }
    }
}

/// Parsed capabilities of one process
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelCapabilities {
    pub svc_mask: SvcMask,
    /// Bit n set: the process may run threads on core n.
    pub core_mask: u64,
    /// Bit n set: the process may create threads at priority n.
    pub priority_mask: u64,
    pub handle_table_size: Option<u16>,
    pub kernel_release: Option<u32>,
    pub program_type: u32,
    pub debug_flags: u32,
}

impl Default for KernelCapabilities {
    fn default() -> Self {
        Self {
            svc_mask: SvcMask::empty(),
            core_mask: 0,
            priority_mask: 0,
            handle_table_size: None,
            kernel_release: None,
            program_type: 0,
            debug_flags: 0,
        }
    }
}

impl KernelCapabilities {
    /// Parse a descriptor list for a machine with `core_count` cores.
    pub fn parse(descriptors: &[u32], core_count: u32) -> Result<Self, CapabilityError> {
        let mut caps = Self::default();
        let mut seen_masks = 0u32;
        let mut seen_core_priority = false;
        let mut i = 0;

        while i < descriptors.len() {
            let cap = descriptors[i];
            i += 1;
            match cap.trailing_ones() {
                TYPE_CORE_PRIORITY => {
                    if seen_core_priority {
                        return Err(CapabilityError::InvalidCombination(cap));
                    }
                    seen_core_priority = true;
                    caps.parse_core_priority(cap, core_count)?;
                }
                TYPE_SYSCALL_MASK => {
                    let index = cap >> 29;
                    if seen_masks & (1 << index) != 0 {
                        return Err(CapabilityError::InvalidCombination(cap));
                    }
                    seen_masks |= 1 << index;
                    let bits = (cap >> 5) & 0xFF_FFFF;
                    for bit in 0..SYSCALLS_PER_MASK {
                        if bits & (1 << bit) != 0 {
                            let id = index * SYSCALLS_PER_MASK + bit;
                            if id >= SVC_COUNT {
                                return Err(CapabilityError::ReservedValue(cap));
                            }
                            caps.svc_mask.insert(id);
                        }
                    }
                }
                TYPE_MAP_RANGE => {
                    // Physical ranges come as a pair of descriptors.
                    match descriptors.get(i) {
                        Some(next) if next.trailing_ones() == TYPE_MAP_RANGE => i += 1,
                        _ => return Err(CapabilityError::InvalidCombination(cap)),
                    }
                }
                TYPE_MAP_IO_PAGE | TYPE_MAP_REGION | TYPE_INTERRUPT_PAIR | TYPE_PADDING => {}
                TYPE_PROGRAM_TYPE => {
                    caps.program_type = (cap >> 14) & 0x7;
                }
                TYPE_KERNEL_VERSION => {
                    if caps.kernel_release.replace(cap >> 15).is_some() {
                        return Err(CapabilityError::InvalidCombination(cap));
                    }
                }
                TYPE_HANDLE_TABLE_SIZE => {
                    let size = ((cap >> 16) & 0x3FF) as u16;
                    if caps.handle_table_size.replace(size).is_some() {
                        return Err(CapabilityError::InvalidCombination(cap));
                    }
                }
                TYPE_DEBUG_FLAGS => {
                    caps.debug_flags = (cap >> 17) & 0x3;
                }
                _ => return Err(CapabilityError::InvalidCapability(cap)),
            }
        }

        Ok(caps)
    }

    fn parse_core_priority(&mut self, cap: u32, core_count: u32) -> Result<(), CapabilityError> {
        let lowest_priority = (cap >> 4) & 0x3F;
        let highest_priority = (cap >> 10) & 0x3F;
        let min_core = (cap >> 16) & 0xFF;
        let max_core = (cap >> 24) & 0xFF;

        if highest_priority > lowest_priority || min_core > max_core {
            return Err(CapabilityError::InvalidCombination(cap));
        }
        if max_core >= core_count {
            return Err(CapabilityError::InvalidCpuCore(cap));
        }

        self.priority_mask = range_mask(highest_priority, lowest_priority);
        self.core_mask = range_mask(min_core, max_core);
        Ok(())
    }

    pub fn allows_svc(&self, id: u32) -> bool {
        self.svc_mask.contains(id)
    }

    pub fn allows_priority(&self, priority: u32) -> bool {
        priority <= LOWEST_THREAD_PRIORITY && self.priority_mask & (1 << priority) != 0
    }

    /// Encode a core/priority descriptor.
    pub const fn core_priority_descriptor(
        highest_priority: u32,
        lowest_priority: u32,
        min_core: u32,
        max_core: u32,
    ) -> u32 {
        (max_core << 24) | (min_core << 16) | (highest_priority << 10) | (lowest_priority << 4) | 0x7
    }

    /// Encode a handle table size descriptor.
    pub const fn handle_table_descriptor(size: u16) -> u32 {
        ((size as u32 & 0x3FF) << 16) | 0x7FFF
    }
}

/// Bits `low..=high` set.
fn range_mask(low: u32, high: u32) -> u64 {
    let width = high - low + 1;
    let bits = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
    bits << low
}

#[cfg(test)]
mod tests {
    use super::*;
    use hos_ipc::capability::{service_core_priority, SERVICE_DEFAULT};
    use hos_ipc::svc;

    fn service_caps() -> KernelCapabilities {
        let mut descriptors = alloc::vec![service_core_priority(4)];
        descriptors.extend_from_slice(&SERVICE_DEFAULT);
        KernelCapabilities::parse(&descriptors, 4).unwrap()
    }

    #[test]
    fn test_service_defaults_parse() {
        let caps = service_caps();
        assert_eq!(caps.handle_table_size, Some(0x100));
        assert_eq!(caps.core_mask, 1 << 3);
        assert!(caps.allows_priority(44));
        assert!(caps.allows_priority(24));
        assert!(!caps.allows_priority(23));
        assert!(caps.kernel_release.is_some());
    }

    #[test]
    fn test_service_defaults_syscall_mask() {
        let caps = service_caps();
        assert!(caps.allows_svc(svc::SIGNAL_EVENT));
        assert!(caps.allows_svc(svc::WAIT_SYNCHRONIZATION));
        assert!(caps.allows_svc(svc::SEND_SYNC_REQUEST));
        assert!(caps.allows_svc(svc::CREATE_EVENT));
        assert!(!caps.allows_svc(0));
        assert!(!caps.allows_svc(svc::MAP_TRANSFER_MEMORY));
    }

    #[test]
    fn test_duplicate_mask_index_rejected() {
        let result = KernelCapabilities::parse(&[0x1FFF_FFCF, 0x0000_002F], 4);
        assert_eq!(result, Err(CapabilityError::InvalidCombination(0x2F)));
    }

    #[test]
    fn test_core_outside_machine_rejected() {
        let cap = KernelCapabilities::core_priority_descriptor(24, 63, 0, 4);
        assert_eq!(
            KernelCapabilities::parse(&[cap], 4),
            Err(CapabilityError::InvalidCpuCore(cap))
        );
    }

    #[test]
    fn test_inverted_priority_rejected() {
        let cap = KernelCapabilities::core_priority_descriptor(40, 30, 0, 0);
        assert_eq!(
            KernelCapabilities::parse(&[cap], 4),
            Err(CapabilityError::InvalidCombination(cap))
        );
    }

    #[test]
    fn test_unknown_descriptor_rejected() {
        // 17 trailing ones names no descriptor type.
        let cap = 0x0001_FFFF;
        assert_eq!(
            KernelCapabilities::parse(&[cap], 4),
            Err(CapabilityError::InvalidCapability(cap))
        );
    }

    #[test]
    fn test_svc_mask_descriptor_roundtrip() {
        let mask = SvcMask::from_ids(&[svc::CREATE_EVENT, svc::SIGNAL_EVENT, 0x7F]);
        let caps = KernelCapabilities::parse(&mask.to_descriptors(), 4).unwrap();
        assert_eq!(caps.svc_mask, mask);
        assert_eq!(caps.svc_mask.count(), 3);
    }

    #[test]
    fn test_handle_table_descriptor() {
        let caps =
            KernelCapabilities::parse(&[KernelCapabilities::handle_table_descriptor(32)], 4)
                .unwrap();
        assert_eq!(caps.handle_table_size, Some(32));
    }

    #[test]
    fn test_empty_list_denies_everything() {
        let caps = KernelCapabilities::parse(&[], 4).unwrap();
        assert_eq!(caps.svc_mask.count(), 0);
        assert!(!caps.allows_priority(44));
    }
}
