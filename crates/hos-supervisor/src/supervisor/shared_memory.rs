//! Shared memory layout
//!
//! HID, font, IIRS and time shared memory are carved from the NvServices
//! region back to back, followed by the applet capture buffer. Guests get
//! read-only mappings of the shared blocks.

use std::sync::Arc;

use hos_kernel::{
    KernelContext, KernelError, MemoryPermission, MemoryRegionKind, SharedMemory, TransferMemory,
};

use crate::constants::{APPLET_CAPTURE_BUFFER_SIZE, FONT_SIZE, HID_SIZE, IIRS_SIZE, TIME_SIZE};

pub struct SharedMemoryLayout {
    pub hid: Arc<SharedMemory>,
    pub font: Arc<SharedMemory>,
    pub iirs: Arc<SharedMemory>,
    pub time: Arc<SharedMemory>,
    pub applet_capture_buffer: Arc<TransferMemory>,
}

impl SharedMemoryLayout {
    /// # Errors
    /// * `OutOfMemory` - the NvServices region cannot hold the layout
    pub fn allocate(kernel: &KernelContext) -> Result<Self, KernelError> {
        let hal = kernel.hal();
        let region = kernel.region(MemoryRegionKind::NvServices);
        let shared = |size| {
            SharedMemory::allocate(
                Arc::clone(hal),
                region,
                size,
                MemoryPermission::READ_WRITE,
                MemoryPermission::READ,
            )
        };

        let hid = shared(HID_SIZE)?;
        let font = shared(FONT_SIZE)?;
        let iirs = shared(IIRS_SIZE)?;
        let time = shared(TIME_SIZE)?;
        let capture_pages = region.allocate(hal, APPLET_CAPTURE_BUFFER_SIZE / hos_hal::PAGE_SIZE)?;
        let applet_capture_buffer =
            TransferMemory::from_pages(Arc::clone(hal), capture_pages, MemoryPermission::READ_WRITE);

        Ok(Self {
            hid,
            font,
            iirs,
            time,
            applet_capture_buffer,
        })
    }

    /// The shared blocks in layout order.
    pub fn blocks(&self) -> [(&'static str, &Arc<SharedMemory>); 4] {
        [
            ("hid", &self.hid),
            ("font", &self.font),
            ("iirs", &self.iirs),
            ("time", &self.time),
        ]
    }
}
