//! Per-process address space
//!
//! Tracks which guest virtual ranges are backed by which physical pages.
//! Mappings never overlap; all addresses and sizes are page aligned.
//!
//! ```text
//! 0x00_0800_0000  code
//! 0x01_0000_0000  thread local storage (one page per thread)
//! 0x10_0000_0000  alias region: shared and transfer memory
//! 0x20_0000_0000  heap
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use hos_kernel_core::{MemoryPermission, ObjectId};
use serde::{Deserialize, Serialize};

use super::{is_page_aligned, AllocatedPages, PageList};
use crate::error::KernelError;

pub const CODE_REGION_BASE: u64 = 0x0800_0000;
pub const TLS_REGION_BASE: u64 = 0x1_0000_0000;
pub const TLS_REGION_SIZE: u64 = 0x1000_0000;
pub const ALIAS_REGION_BASE: u64 = 0x10_0000_0000;
pub const ALIAS_REGION_SIZE: u64 = 0x10_0000_0000;
pub const HEAP_REGION_BASE: u64 = 0x20_0000_0000;
pub const HEAP_REGION_SIZE: u64 = 0x10_0000_0000;

/// What a mapping is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryState {
    Code,
    /// Heap memory owned by the process.
    Normal,
    ThreadLocal,
    Shared,
    Transfer,
}

/// Access kind checked against a mapping's permission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// One mapped guest range.
#[derive(Clone, Debug)]
pub struct Mapping {
    pub address: u64,
    pub size: u64,
    pub permission: MemoryPermission,
    pub state: MemoryState,
    pub pages: PageList,
    /// Object the pages belong to (shared or transfer memory).
    pub object: Option<ObjectId>,
    /// Allocations kept alive while the mapping exists.
    backing: Vec<Arc<AllocatedPages>>,
}

impl Mapping {
    pub fn new(
        address: u64,
        pages: PageList,
        permission: MemoryPermission,
        state: MemoryState,
    ) -> Self {
        Self {
            address,
            size: pages.size(),
            permission,
            state,
            pages,
            object: None,
            backing: Vec::new(),
        }
    }

    /// Map a whole allocation, keeping it alive while mapped.
    pub fn owned(
        address: u64,
        backing: Arc<AllocatedPages>,
        permission: MemoryPermission,
        state: MemoryState,
    ) -> Self {
        Self::new(address, backing.page_list().clone(), permission, state).with_backing(backing)
    }

    pub fn with_object(mut self, object: ObjectId) -> Self {
        self.object = Some(object);
        self
    }

    pub fn with_backing(mut self, backing: Arc<AllocatedPages>) -> Self {
        self.backing.push(backing);
        self
    }

    pub fn end(&self) -> u64 {
        self.address + self.size
    }

    fn contains(&self, address: u64) -> bool {
        address >= self.address && address < self.end()
    }
}

/// Guest virtual address space of one process.
#[derive(Debug, Default)]
pub struct AddressSpace {
    mappings: BTreeMap<u64, Mapping>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `mapping`.
    ///
    /// # Errors
    /// * `InvalidAddress` - address not page aligned
    /// * `InvalidSize` - empty mapping
    /// * `InvalidMemoryState` - overlaps an existing mapping
    pub fn map(&mut self, mapping: Mapping) -> Result<(), KernelError> {
        if !is_page_aligned(mapping.address) {
            return Err(KernelError::InvalidAddress(mapping.address));
        }
        if mapping.size == 0 {
            return Err(KernelError::InvalidSize(0));
        }
        if mapping.address.checked_add(mapping.size).is_none()
            || !self.is_free(mapping.address, mapping.size)
        {
            return Err(KernelError::InvalidMemoryState);
        }
        self.mappings.insert(mapping.address, mapping);
        Ok(())
    }

    /// Remove the mapping installed exactly at `address` with `size` for
    /// `object`.
    ///
    /// # Errors
    /// * `InvalidMemoryState` - no such mapping
    pub fn unmap(
        &mut self,
        address: u64,
        size: u64,
        object: Option<ObjectId>,
    ) -> Result<Mapping, KernelError> {
        match self.mappings.get(&address) {
            Some(m) if m.size == size && m.object == object => {}
            _ => return Err(KernelError::InvalidMemoryState),
        }
        self.mappings
            .remove(&address)
            .ok_or(KernelError::InvalidMemoryState)
    }

    /// True when nothing is mapped in `address..address + size`.
    pub fn is_free(&self, address: u64, size: u64) -> bool {
        let end = address.saturating_add(size);
        match self.mappings.range(..end).next_back() {
            Some((_, last)) => last.end() <= address,
            None => true,
        }
    }

    /// Lowest free page-aligned range of `size` bytes inside
    /// `base..base + region_size`.
    pub fn find_free(&self, base: u64, region_size: u64, size: u64) -> Result<u64, KernelError> {
        let limit = base + region_size;
        let mut cursor = base;
        for mapping in self.mappings.range(base..limit).map(|(_, m)| m) {
            if mapping.address >= cursor + size {
                break;
            }
            cursor = cursor.max(mapping.end());
        }
        if cursor + size <= limit {
            Ok(cursor)
        } else {
            Err(KernelError::OutOfMemory)
        }
    }

    pub fn mapping_at(&self, address: u64) -> Option<&Mapping> {
        self.mappings
            .range(..=address)
            .next_back()
            .map(|(_, m)| m)
            .filter(|m| m.contains(address))
    }

    /// Change the permission of the mapping starting at `address`.
    pub fn set_permission(
        &mut self,
        address: u64,
        permission: MemoryPermission,
    ) -> Result<(), KernelError> {
        let mapping = self
            .mappings
            .get_mut(&address)
            .ok_or(KernelError::InvalidMemoryState)?;
        mapping.permission = permission;
        Ok(())
    }

    /// Physical pages backing a fully mapped normal (heap) range, with the
    /// allocations that own them.
    pub fn page_list(
        &self,
        address: u64,
        size: u64,
    ) -> Result<(PageList, Vec<Arc<AllocatedPages>>), KernelError> {
        if !is_page_aligned(address) || !is_page_aligned(size) {
            return Err(KernelError::InvalidAddress(address));
        }
        let mut list = PageList::new();
        let mut owners: Vec<Arc<AllocatedPages>> = Vec::new();
        let mut cursor = address;
        let end = address + size;
        while cursor < end {
            let mapping = self
                .mapping_at(cursor)
                .ok_or(KernelError::InvalidMemoryState)?;
            if mapping.state != MemoryState::Normal {
                return Err(KernelError::InvalidMemoryState);
            }
            let offset = cursor - mapping.address;
            let len = (mapping.size - offset).min(end - cursor);
            list.extend_from(&mapping.pages, offset, len);
            for backing in &mapping.backing {
                if !owners.iter().any(|o| Arc::ptr_eq(o, backing)) {
                    owners.push(Arc::clone(backing));
                }
            }
            cursor += len;
        }
        Ok((list, owners))
    }

    /// Split `address..address + len` into physical chunks.
    ///
    /// # Errors
    /// * `InvalidAddress` - part of the range is unmapped
    /// * `InvalidPermission` - a mapping forbids `access`
    pub fn translate(
        &self,
        address: u64,
        len: u64,
        access: Access,
    ) -> Result<Vec<(u64, usize)>, KernelError> {
        let end = address
            .checked_add(len)
            .ok_or(KernelError::InvalidAddress(address))?;
        let mut chunks = Vec::new();
        let mut cursor = address;
        while cursor < end {
            let mapping = self
                .mapping_at(cursor)
                .ok_or(KernelError::InvalidAddress(cursor))?;
            let permitted = match access {
                Access::Read => mapping.permission.readable(),
                Access::Write => mapping.permission.writable(),
            };
            if !permitted {
                return Err(KernelError::InvalidPermission);
            }
            let offset = cursor - mapping.address;
            let (physical, contiguous) = mapping
                .pages
                .locate(offset)
                .ok_or(KernelError::InvalidAddress(cursor))?;
            let len = contiguous.min(mapping.size - offset).min(end - cursor);
            chunks.push((physical, len as usize));
            cursor += len;
        }
        Ok(chunks)
    }

    pub fn mappings(&self) -> impl Iterator<Item = &Mapping> {
        self.mappings.values()
    }

    pub fn mapped_size(&self) -> u64 {
        self.mappings.values().map(|m| m.size).sum()
    }

    /// Remove every mapping. Owned pages return to their region once the
    /// returned mappings are dropped.
    pub fn clear(&mut self) -> Vec<Mapping> {
        std::mem::take(&mut self.mappings).into_values().collect()
    }
}
