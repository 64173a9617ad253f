//! Shared memory
//!
//! Physical pages mapped into one or more processes with a fixed
//! permission. Host drivers (HID, fonts, time) write the contents directly;
//! guests map it read-only.

use std::sync::Arc;

use hos_hal::HAL;
use hos_kernel_core::{MemoryPermission, ObjectKind};

use super::ObjectHeader;
use crate::error::KernelError;
use crate::memory::{AllocatedPages, Mapping, MemoryRegion, MemoryState, PageList};
use crate::process::Process;

pub struct SharedMemory {
    header: ObjectHeader,
    hal: Arc<dyn HAL>,
    backing: Arc<AllocatedPages>,
    owner_permission: MemoryPermission,
    user_permission: MemoryPermission,
}

impl SharedMemory {
    /// Wrap an existing allocation.
    pub fn new(
        hal: Arc<dyn HAL>,
        backing: Arc<AllocatedPages>,
        owner_permission: MemoryPermission,
        user_permission: MemoryPermission,
    ) -> Arc<Self> {
        Arc::new(Self {
            header: ObjectHeader::new(ObjectKind::SharedMemory),
            hal,
            backing,
            owner_permission,
            user_permission,
        })
    }

    /// Allocate `size` bytes (rounded up to pages) from `region`.
    pub fn allocate(
        hal: Arc<dyn HAL>,
        region: &Arc<MemoryRegion>,
        size: u64,
        owner_permission: MemoryPermission,
        user_permission: MemoryPermission,
    ) -> Result<Arc<Self>, KernelError> {
        let pages = crate::memory::page_align_up(size) / hos_hal::PAGE_SIZE;
        let backing = region.allocate(&hal, pages)?;
        Ok(Self::new(hal, backing, owner_permission, user_permission))
    }

    pub fn header(&self) -> &ObjectHeader {
        &self.header
    }

    pub fn size(&self) -> u64 {
        self.backing.size()
    }

    /// Physical address of the first page.
    pub fn physical_address(&self) -> u64 {
        self.backing.address()
    }

    pub fn page_list(&self) -> &PageList {
        self.backing.page_list()
    }

    pub fn owner_permission(&self) -> MemoryPermission {
        self.owner_permission
    }

    /// Permission granted to processes mapping the object.
    pub fn permission(&self) -> MemoryPermission {
        self.user_permission
    }

    /// Map the whole object into `process`.
    ///
    /// An `address` of zero picks a free range in the alias region. The
    /// requested permission may narrow but never widen the granted one;
    /// [`MemoryPermission::DONT_CARE`] takes the granted permission.
    ///
    /// # Errors
    /// * `InvalidSize` - `size` differs from the object size
    /// * `InvalidMemoryState` - permission exceeds the grant, or the range
    ///   overlaps an existing mapping
    pub fn map(
        &self,
        process: &Process,
        address: u64,
        size: u64,
        permission: MemoryPermission,
    ) -> Result<u64, KernelError> {
        let permission = if permission == MemoryPermission::DONT_CARE {
            self.user_permission
        } else {
            permission
        };
        if !permission.is_subset_of(self.user_permission) {
            return Err(KernelError::InvalidMemoryState);
        }
        if size != self.size() {
            return Err(KernelError::InvalidSize(size));
        }
        process.map_alias(address, size, |address| {
            Mapping::new(
                address,
                self.page_list().clone(),
                permission,
                MemoryState::Shared,
            )
            .with_object(self.header.id())
            .with_backing(Arc::clone(&self.backing))
        })
    }

    /// Remove a mapping made by [`SharedMemory::map`].
    ///
    /// # Errors
    /// * `InvalidMemoryState` - the object is not mapped at `address`
    pub fn unmap(&self, process: &Process, address: u64, size: u64) -> Result<(), KernelError> {
        process.unmap_object(address, size, self.header.id())?;
        Ok(())
    }

    /// Read the contents from the host side.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), KernelError> {
        self.page_list().read(&*self.hal, offset, buf)
    }

    /// Write the contents from the host side.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), KernelError> {
        self.page_list().write(&*self.hal, offset, data)
    }
}
