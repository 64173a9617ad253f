//! Kernel capability descriptor constants
//!
//! A capability descriptor is a `u32` whose type is encoded by the number of
//! trailing one bits. The values passed by service bootstrap code are listed
//! in [`SERVICE_DEFAULT`].

/// Trailing-ones count for the core/priority descriptor.
pub const TYPE_CORE_PRIORITY: u32 = 3;
/// Trailing-ones count for a syscall mask descriptor.
pub const TYPE_SYSCALL_MASK: u32 = 4;
/// Trailing-ones count for a mapped physical range (consumes two descriptors).
pub const TYPE_MAP_RANGE: u32 = 6;
/// Trailing-ones count for a mapped IO page.
pub const TYPE_MAP_IO_PAGE: u32 = 7;
/// Trailing-ones count for a mapped region.
pub const TYPE_MAP_REGION: u32 = 10;
/// Trailing-ones count for an interrupt pair.
pub const TYPE_INTERRUPT_PAIR: u32 = 11;
/// Trailing-ones count for the program type.
pub const TYPE_PROGRAM_TYPE: u32 = 13;
/// Trailing-ones count for the kernel version.
pub const TYPE_KERNEL_VERSION: u32 = 14;
/// Trailing-ones count for the handle table size.
pub const TYPE_HANDLE_TABLE_SIZE: u32 = 15;
/// Trailing-ones count for debug flags.
pub const TYPE_DEBUG_FLAGS: u32 = 16;
/// An all-ones word is padding.
pub const TYPE_PADDING: u32 = 32;

/// Syscalls per mask descriptor.
pub const SYSCALLS_PER_MASK: u32 = 24;

/// Descriptors granted to every HLE service host process, minus the
/// core/priority word which depends on the core count
/// (see [`service_core_priority`]).
pub const SERVICE_DEFAULT: [u32; 5] = [
    0x1FFF_FFCF,
    0x207F_FFEF,
    0x47E0_060F,
    0x0048_BFFF,
    0x0100_7FFF,
];

/// Core/priority descriptor for service host processes: pinned to the last
/// core, priorities 24 through 63.
pub const fn service_core_priority(core_count: u32) -> u32 {
    let max_core = core_count.saturating_sub(1);
    (max_core << 24) + (max_core << 16) + 0x63F7
}
