//! Supervisor call numbers
//!
//! Each id indexes one bit of a process's syscall mask. The numbering
//! follows the guest kernel ABI; ids above [`SVC_COUNT`] do not exist.

/// Number of supervisor call slots covered by the syscall mask.
pub const SVC_COUNT: u32 = 0x80;

pub const SET_HEAP_SIZE: u32 = 0x01;
pub const SET_MEMORY_PERMISSION: u32 = 0x02;
pub const EXIT_PROCESS: u32 = 0x07;
pub const CREATE_THREAD: u32 = 0x08;
pub const START_THREAD: u32 = 0x09;
pub const EXIT_THREAD: u32 = 0x0A;
pub const SLEEP_THREAD: u32 = 0x0B;
pub const SIGNAL_EVENT: u32 = 0x11;
pub const CLEAR_EVENT: u32 = 0x12;
pub const MAP_SHARED_MEMORY: u32 = 0x13;
pub const UNMAP_SHARED_MEMORY: u32 = 0x14;
pub const CREATE_TRANSFER_MEMORY: u32 = 0x15;
pub const CLOSE_HANDLE: u32 = 0x16;
pub const RESET_SIGNAL: u32 = 0x17;
pub const WAIT_SYNCHRONIZATION: u32 = 0x18;
pub const GET_SYSTEM_TICK: u32 = 0x1E;
pub const CONNECT_TO_NAMED_PORT: u32 = 0x1F;
pub const SEND_SYNC_REQUEST: u32 = 0x21;
pub const GET_PROCESS_ID: u32 = 0x24;
pub const OUTPUT_DEBUG_STRING: u32 = 0x27;
pub const CREATE_EVENT: u32 = 0x45;
pub const MAP_TRANSFER_MEMORY: u32 = 0x51;
pub const UNMAP_TRANSFER_MEMORY: u32 = 0x52;

/// Human-readable name for log lines.
pub fn name(id: u32) -> &'static str {
    match id {
        SET_HEAP_SIZE => "SetHeapSize",
        SET_MEMORY_PERMISSION => "SetMemoryPermission",
        EXIT_PROCESS => "ExitProcess",
        CREATE_THREAD => "CreateThread",
        START_THREAD => "StartThread",
        EXIT_THREAD => "ExitThread",
        SLEEP_THREAD => "SleepThread",
        SIGNAL_EVENT => "SignalEvent",
        CLEAR_EVENT => "ClearEvent",
        MAP_SHARED_MEMORY => "MapSharedMemory",
        UNMAP_SHARED_MEMORY => "UnmapSharedMemory",
        CREATE_TRANSFER_MEMORY => "CreateTransferMemory",
        CLOSE_HANDLE => "CloseHandle",
        RESET_SIGNAL => "ResetSignal",
        WAIT_SYNCHRONIZATION => "WaitSynchronization",
        GET_SYSTEM_TICK => "GetSystemTick",
        CONNECT_TO_NAMED_PORT => "ConnectToNamedPort",
        SEND_SYNC_REQUEST => "SendSyncRequest",
        GET_PROCESS_ID => "GetProcessId",
        OUTPUT_DEBUG_STRING => "OutputDebugString",
        CREATE_EVENT => "CreateEvent",
        MAP_TRANSFER_MEMORY => "MapTransferMemory",
        UNMAP_TRANSFER_MEMORY => "UnmapTransferMemory",
        _ => "Unknown",
    }
}
