//! Physical memory management
//!
//! DRAM is split into four contiguous regions. Each region hands out page
//! runs first-fit; an [`AllocatedPages`] returns its run when dropped, so
//! pages live exactly as long as the last mapping or object using them.

mod address_space;

pub use address_space::{
    Access, AddressSpace, Mapping, MemoryState, ALIAS_REGION_BASE, ALIAS_REGION_SIZE,
    CODE_REGION_BASE, HEAP_REGION_BASE, HEAP_REGION_SIZE, TLS_REGION_BASE, TLS_REGION_SIZE,
};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use hos_hal::{HAL, PAGE_SIZE};
use serde::{Deserialize, Serialize};

use crate::config::MemoryArrange;
use crate::error::KernelError;
use crate::lock;

/// Physical memory region kinds, in physical address order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MemoryRegionKind {
    Application,
    Applet,
    Service,
    /// Shared buffers owned by host-implemented drivers (HID, fonts, time).
    NvServices,
}

impl MemoryRegionKind {
    pub const ALL: [Self; 4] = [
        Self::Application,
        Self::Applet,
        Self::Service,
        Self::NvServices,
    ];
}

/// A run of physical pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub address: u64,
    pub pages: u64,
}

impl PageRange {
    pub fn size(&self) -> u64 {
        self.pages * PAGE_SIZE
    }
}

/// An ordered list of physical page runs backing one contiguous guest
/// range.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageList {
    ranges: Vec<PageRange>,
}

impl PageList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `pages` pages starting at physical `address`, merging with the
    /// previous run when contiguous.
    pub fn add_range(&mut self, address: u64, pages: u64) {
        if pages == 0 {
            return;
        }
        if let Some(last) = self.ranges.last_mut() {
            if last.address + last.size() == address {
                last.pages += pages;
                return;
            }
        }
        self.ranges.push(PageRange { address, pages });
    }

    /// Append the runs of `other` covering `offset..offset + size`.
    pub fn extend_from(&mut self, other: &PageList, offset: u64, size: u64) {
        let mut cursor = offset;
        let end = offset + size;
        while cursor < end {
            match other.locate(cursor) {
                Some((address, contiguous)) => {
                    let len = contiguous.min(end - cursor);
                    self.add_range(address, len / PAGE_SIZE);
                    cursor += len;
                }
                None => return,
            }
        }
    }

    pub fn ranges(&self) -> &[PageRange] {
        &self.ranges
    }

    pub fn page_count(&self) -> u64 {
        self.ranges.iter().map(|r| r.pages).sum()
    }

    /// Total size in bytes; always the sum of the runs.
    pub fn size(&self) -> u64 {
        self.page_count() * PAGE_SIZE
    }

    /// Physical address of byte `offset` and how many bytes follow it
    /// contiguously.
    pub fn locate(&self, offset: u64) -> Option<(u64, u64)> {
        let mut base = 0;
        for range in &self.ranges {
            if offset < base + range.size() {
                let within = offset - base;
                return Some((range.address + within, range.size() - within));
            }
            base += range.size();
        }
        None
    }
}

impl PageList {
    /// Copy `buf.len()` bytes starting at byte `offset` of the list.
    pub fn read(&self, hal: &dyn HAL, offset: u64, buf: &mut [u8]) -> Result<(), KernelError> {
        self.check_bounds(offset, buf.len())?;
        let mut done = 0;
        while done < buf.len() {
            let (address, contiguous) = self
                .locate(offset + done as u64)
                .ok_or(KernelError::InvalidSize(offset))?;
            let len = (contiguous as usize).min(buf.len() - done);
            hal.read_memory(address, &mut buf[done..done + len])?;
            done += len;
        }
        Ok(())
    }

    /// Copy `data` to byte `offset` of the list.
    pub fn write(&self, hal: &dyn HAL, offset: u64, data: &[u8]) -> Result<(), KernelError> {
        self.check_bounds(offset, data.len())?;
        let mut done = 0;
        while done < data.len() {
            let (address, contiguous) = self
                .locate(offset + done as u64)
                .ok_or(KernelError::InvalidSize(offset))?;
            let len = (contiguous as usize).min(data.len() - done);
            hal.write_memory(address, &data[done..done + len])?;
            done += len;
        }
        Ok(())
    }

    fn check_bounds(&self, offset: u64, len: usize) -> Result<(), KernelError> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.size() => Ok(()),
            _ => Err(KernelError::InvalidSize(offset.saturating_add(len as u64))),
        }
    }
}

/// Round `value` up to a page boundary.
pub fn page_align_up(value: u64) -> u64 {
    value.div_ceil(PAGE_SIZE) * PAGE_SIZE
}

pub fn is_page_aligned(value: u64) -> bool {
    value % PAGE_SIZE == 0
}

/// A physical region with a first-fit page allocator.
#[derive(Debug)]
pub struct MemoryRegion {
    kind: MemoryRegionKind,
    address: u64,
    size: u64,
    /// Free runs keyed by start address, coalesced on release.
    free: Mutex<BTreeMap<u64, u64>>,
}

impl MemoryRegion {
    pub fn new(kind: MemoryRegionKind, address: u64, size: u64) -> Self {
        let mut free = BTreeMap::new();
        if size >= PAGE_SIZE {
            free.insert(address, size / PAGE_SIZE);
        }
        Self {
            kind,
            address,
            size,
            free: Mutex::new(free),
        }
    }

    /// Lay out all four regions for `arrange`, starting at physical zero.
    pub fn layout(arrange: MemoryArrange) -> Vec<Arc<MemoryRegion>> {
        let sizes = arrange.region_sizes();
        let mut address = 0;
        MemoryRegionKind::ALL
            .iter()
            .map(|&kind| {
                let size = match kind {
                    MemoryRegionKind::Application => sizes.application,
                    MemoryRegionKind::Applet => sizes.applet,
                    MemoryRegionKind::Service => sizes.service,
                    MemoryRegionKind::NvServices => sizes.nv_services,
                };
                let region = Arc::new(MemoryRegion::new(kind, address, size));
                address += size;
                region
            })
            .collect()
    }

    pub fn kind(&self) -> MemoryRegionKind {
        self.kind
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn free_pages(&self) -> u64 {
        lock(&self.free).values().sum()
    }

    /// Allocate `pages` contiguous pages, lowest address first, zeroed
    /// through `hal`.
    pub fn allocate(
        self: &Arc<Self>,
        hal: &Arc<dyn HAL>,
        pages: u64,
    ) -> Result<Arc<AllocatedPages>, KernelError> {
        if pages == 0 {
            return Err(KernelError::InvalidSize(0));
        }
        let address = {
            let mut free = lock(&self.free);
            let (&start, &run) = free
                .iter()
                .find(|(_, run)| **run >= pages)
                .ok_or(KernelError::OutOfMemory)?;
            free.remove(&start);
            if run > pages {
                free.insert(start + pages * PAGE_SIZE, run - pages);
            }
            start
        };
        hal.zero_memory(address, pages * PAGE_SIZE)?;

        let mut list = PageList::new();
        list.add_range(address, pages);
        Ok(Arc::new(AllocatedPages {
            list,
            region: Arc::clone(self),
        }))
    }

    fn release(&self, address: u64, pages: u64) {
        let mut free = lock(&self.free);
        let mut start = address;
        let mut run = pages;

        if let Some((&prev, &prev_run)) = free.range(..address).next_back() {
            if prev + prev_run * PAGE_SIZE == address {
                free.remove(&prev);
                start = prev;
                run += prev_run;
            }
        }
        let end = address + pages * PAGE_SIZE;
        if let Some(next_run) = free.remove(&end) {
            run += next_run;
        }
        free.insert(start, run);
    }
}

/// Pages owned by one allocation. Returned to the region on drop.
#[derive(Debug)]
pub struct AllocatedPages {
    list: PageList,
    region: Arc<MemoryRegion>,
}

impl AllocatedPages {
    pub fn page_list(&self) -> &PageList {
        &self.list
    }

    pub fn address(&self) -> u64 {
        self.list.ranges().first().map_or(0, |r| r.address)
    }

    pub fn size(&self) -> u64 {
        self.list.size()
    }

    pub fn region(&self) -> MemoryRegionKind {
        self.region.kind()
    }
}

impl Drop for AllocatedPages {
    fn drop(&mut self) {
        for range in self.list.ranges() {
            self.region.release(range.address, range.pages);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hos_hal::host::HostHal;

    fn hal() -> Arc<dyn HAL> {
        Arc::new(HostHal::new(0x10_0000))
    }

    #[test]
    fn test_page_list_merges_contiguous_runs() {
        let mut list = PageList::new();
        list.add_range(0x1000, 2);
        list.add_range(0x3000, 1);
        list.add_range(0x8000, 1);
        assert_eq!(list.ranges().len(), 2);
        assert_eq!(list.size(), 4 * PAGE_SIZE);
        assert_eq!(list.locate(0x2800), Some((0x3800, 0x800)));
        assert_eq!(list.locate(0x3000), Some((0x8000, 0x1000)));
        assert_eq!(list.locate(0x4000), None);
    }

    #[test]
    fn test_page_list_io_crosses_runs() {
        let hal = hal();
        let mut list = PageList::new();
        list.add_range(0x2000, 1);
        list.add_range(0x6000, 1);
        list.write(&*hal, 0xFFE, &[1, 2, 3, 4]).unwrap();

        let mut raw = [0u8; 2];
        hal.read_memory(0x6000, &mut raw).unwrap();
        assert_eq!(raw, [3, 4]);

        let mut buf = [0u8; 4];
        list.read(&*hal, 0xFFE, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        assert!(list.write(&*hal, 0x1FFF, &[0, 0]).is_err());
    }

    #[test]
    fn test_allocation_is_first_fit_and_released_on_drop() {
        let hal = hal();
        let region = Arc::new(MemoryRegion::new(MemoryRegionKind::Service, 0x1_0000, 0x8000));
        let a = region.allocate(&hal, 2).unwrap();
        let b = region.allocate(&hal, 2).unwrap();
        assert_eq!(a.address(), 0x1_0000);
        assert_eq!(b.address(), 0x1_2000);
        assert_eq!(region.free_pages(), 4);

        drop(a);
        drop(b);
        assert_eq!(region.free_pages(), 8);
        let whole = region.allocate(&hal, 8).unwrap();
        assert_eq!(whole.address(), 0x1_0000);
    }

    #[test]
    fn test_exhausted_region_reports_out_of_memory() {
        let hal = hal();
        let region = Arc::new(MemoryRegion::new(MemoryRegionKind::Service, 0, 0x2000));
        let _held = region.allocate(&hal, 2).unwrap();
        assert_eq!(region.allocate(&hal, 1).unwrap_err(), KernelError::OutOfMemory);
    }

    #[test]
    fn test_layout_is_contiguous() {
        let regions = MemoryRegion::layout(MemoryArrange::Mib4096);
        assert_eq!(regions.len(), 4);
        assert_eq!(regions[0].address(), 0);
        for pair in regions.windows(2) {
            assert_eq!(pair[0].address() + pair[0].size(), pair[1].address());
        }
        assert_eq!(regions[3].kind(), MemoryRegionKind::NvServices);
    }
}
