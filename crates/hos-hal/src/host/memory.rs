//! Sparse emulated DRAM.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{RwLock, PoisonError};

use crate::{check_range, HalError, PAGE_SIZE};

type Page = Box<[AtomicU8]>;

/// DRAM made of host pages allocated on first write.
///
/// Untouched pages read as zero. Bytes are individually atomic so that
/// unsynchronized guest accesses stay memory-safe on the host.
pub struct HostMemory {
    size: u64,
    pages: RwLock<HashMap<u64, Page>>,
}

impl HostMemory {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            pages: RwLock::new(HashMap::new()),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn resident_pages(&self) -> usize {
        self.pages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), HalError> {
        check_range(self.size, address, buf.len() as u64)?;
        let pages = self.pages.read().unwrap_or_else(PoisonError::into_inner);
        for_each_chunk(address, buf.len(), |page, offset, range| {
            let out = &mut buf[range];
            match pages.get(&page) {
                Some(bytes) => {
                    for (dst, src) in out.iter_mut().zip(&bytes[offset..]) {
                        *dst = src.load(Ordering::Relaxed);
                    }
                }
                None => out.fill(0),
            }
        });
        Ok(())
    }

    pub fn write(&self, address: u64, data: &[u8]) -> Result<(), HalError> {
        check_range(self.size, address, data.len() as u64)?;
        self.materialize(address, data.len());
        let pages = self.pages.read().unwrap_or_else(PoisonError::into_inner);
        for_each_chunk(address, data.len(), |page, offset, range| {
            if let Some(bytes) = pages.get(&page) {
                for (dst, src) in bytes[offset..].iter().zip(&data[range]) {
                    dst.store(*src, Ordering::Relaxed);
                }
            }
        });
        Ok(())
    }

    /// Zero a range. Whole pages are released back to the host.
    pub fn zero(&self, address: u64, len: u64) -> Result<(), HalError> {
        check_range(self.size, address, len)?;
        let mut pages = self.pages.write().unwrap_or_else(PoisonError::into_inner);
        for_each_chunk(address, len as usize, |page, offset, range| {
            if offset == 0 && range.len() == PAGE_SIZE as usize {
                pages.remove(&page);
            } else if let Some(bytes) = pages.get(&page) {
                for byte in &bytes[offset..offset + range.len()] {
                    byte.store(0, Ordering::Relaxed);
                }
            }
        });
        Ok(())
    }

    fn materialize(&self, address: u64, len: usize) {
        let missing = {
            let pages = self.pages.read().unwrap_or_else(PoisonError::into_inner);
            let mut missing = Vec::new();
            for_each_chunk(address, len, |page, _, _| {
                if !pages.contains_key(&page) {
                    missing.push(page);
                }
            });
            missing
        };
        if missing.is_empty() {
            return;
        }
        let mut pages = self.pages.write().unwrap_or_else(PoisonError::into_inner);
        for page in missing {
            pages.entry(page).or_insert_with(new_page);
        }
    }
}

fn new_page() -> Page {
    (0..PAGE_SIZE).map(|_| AtomicU8::new(0)).collect()
}

/// Split `address..address+len` at page boundaries and call
/// `f(page_number, offset_in_page, range_in_caller_buffer)` per piece.
fn for_each_chunk(
    address: u64,
    len: usize,
    mut f: impl FnMut(u64, usize, std::ops::Range<usize>),
) {
    let mut done = 0usize;
    while done < len {
        let current = address + done as u64;
        let page = current / PAGE_SIZE;
        let offset = (current % PAGE_SIZE) as usize;
        let chunk = (PAGE_SIZE as usize - offset).min(len - done);
        f(page, offset, done..done + chunk);
        done += chunk;
    }
}
