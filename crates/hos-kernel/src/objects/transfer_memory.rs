//! Transfer memory
//!
//! Lends existing memory to another process. Unlike shared memory, the
//! permission can be changed after creation with [`TransferMemory::protect`],
//! which also updates every live mapping.

use std::sync::{Arc, Mutex, Weak};

use hos_hal::HAL;
use hos_kernel_core::{MemoryPermission, ObjectKind};

use super::ObjectHeader;
use crate::error::KernelError;
use crate::lock;
use crate::memory::{AllocatedPages, Mapping, MemoryState, PageList};
use crate::process::Process;

pub struct TransferMemory {
    header: ObjectHeader,
    hal: Arc<dyn HAL>,
    pages: PageList,
    backing: Vec<Arc<AllocatedPages>>,
    permission: Mutex<MemoryPermission>,
    mappings: Mutex<Vec<(Weak<Process>, u64)>>,
}

impl TransferMemory {
    /// Lend a whole host allocation.
    pub fn from_pages(
        hal: Arc<dyn HAL>,
        backing: Arc<AllocatedPages>,
        permission: MemoryPermission,
    ) -> Arc<Self> {
        let pages = backing.page_list().clone();
        Self::build(hal, pages, vec![backing], permission)
    }

    /// Lend `address..address + size` of `process`'s heap.
    ///
    /// # Errors
    /// * `InvalidMemoryState` - the range is not fully mapped heap memory
    pub fn from_process(
        process: &Process,
        address: u64,
        size: u64,
        permission: MemoryPermission,
    ) -> Result<Arc<Self>, KernelError> {
        if size == 0 {
            return Err(KernelError::InvalidSize(0));
        }
        let (pages, backing) = process.page_list(address, size)?;
        Ok(Self::build(
            Arc::clone(process.hal()),
            pages,
            backing,
            permission,
        ))
    }

    fn build(
        hal: Arc<dyn HAL>,
        pages: PageList,
        backing: Vec<Arc<AllocatedPages>>,
        permission: MemoryPermission,
    ) -> Arc<Self> {
        Arc::new(Self {
            header: ObjectHeader::new(ObjectKind::TransferMemory),
            hal,
            pages,
            backing,
            permission: Mutex::new(permission),
            mappings: Mutex::new(Vec::new()),
        })
    }

    pub fn header(&self) -> &ObjectHeader {
        &self.header
    }

    pub fn size(&self) -> u64 {
        self.pages.size()
    }

    pub fn page_list(&self) -> &PageList {
        &self.pages
    }

    pub fn permission(&self) -> MemoryPermission {
        *lock(&self.permission)
    }

    /// Map into `process`; an `address` of zero picks one.
    ///
    /// # Errors
    /// * `InvalidSize` - `size` differs from the object size
    /// * `InvalidMemoryState` - permission exceeds the current one, or the
    ///   range overlaps an existing mapping
    pub fn map(
        &self,
        process: &Arc<Process>,
        address: u64,
        size: u64,
        permission: MemoryPermission,
    ) -> Result<u64, KernelError> {
        let granted = self.permission();
        let permission = if permission == MemoryPermission::DONT_CARE {
            granted
        } else {
            permission
        };
        if !permission.is_subset_of(granted) {
            return Err(KernelError::InvalidMemoryState);
        }
        if size != self.size() {
            return Err(KernelError::InvalidSize(size));
        }
        let address = process.map_alias(address, size, |address| {
            self.backing.iter().fold(
                Mapping::new(address, self.pages.clone(), permission, MemoryState::Transfer)
                    .with_object(self.header.id()),
                |mapping, backing| mapping.with_backing(Arc::clone(backing)),
            )
        })?;
        lock(&self.mappings).push((Arc::downgrade(process), address));
        Ok(address)
    }

    /// # Errors
    /// * `InvalidMemoryState` - the object is not mapped at `address`
    pub fn unmap(
        &self,
        process: &Arc<Process>,
        address: u64,
        size: u64,
    ) -> Result<(), KernelError> {
        process.unmap_object(address, size, self.header.id())?;
        lock(&self.mappings).retain(|(owner, mapped)| {
            !(*mapped == address && owner.upgrade().is_some_and(|p| Arc::ptr_eq(&p, process)))
        });
        Ok(())
    }

    /// Change the permission of the object and of every live mapping.
    pub fn protect(&self, permission: MemoryPermission) -> Result<(), KernelError> {
        if permission == MemoryPermission::DONT_CARE {
            return Err(KernelError::InvalidPermission);
        }
        *lock(&self.permission) = permission;
        let mut mappings = lock(&self.mappings);
        mappings.retain(|(owner, _)| owner.strong_count() > 0);
        for (owner, address) in mappings.iter() {
            if let Some(process) = owner.upgrade() {
                // Already unmapped by process teardown.
                let _ = process.set_mapping_permission(*address, permission);
            }
        }
        Ok(())
    }

    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), KernelError> {
        self.pages.read(&*self.hal, offset, buf)
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), KernelError> {
        self.pages.write(&*self.hal, offset, data)
    }
}
