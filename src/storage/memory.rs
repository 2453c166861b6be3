use std::collections::BTreeMap;

use crate::error::Result;
use crate::storage::page::PageId;
use crate::storage::DiskManager;

/// An in-memory disk manager backed by an ordered map of page images,
/// keyed by page id. Pages that were never written read back as zeros.
#[derive(Debug)]
pub struct Memory {
    pages: BTreeMap<PageId, Vec<u8>>,
}

impl Memory {
    pub fn new() -> Memory {
        Memory { pages: BTreeMap::new() }
    }
}

impl DiskManager for Memory {
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        buf.fill(0);
        if let Some(data) = self.pages.get(&page_id) {
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
        }
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        self.pages.insert(page_id, data.to_vec());
        Ok(())
    }

    fn deallocate_page(&mut self, page_id: PageId) -> Result<()> {
        self.pages.remove(&page_id);
        Ok(())
    }
}
