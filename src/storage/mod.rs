use std::fmt::Debug;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;
use crate::storage::page::PageId;

pub mod buffer;
pub mod hashtable;
pub mod memory;
pub mod page;

/// A disk collaborator the buffer pool moves page images through. Reads and
/// writes address whole pages by page id; page id allocation itself lives in
/// the buffer pool, the disk is only told when an id is given up.
/// The trait is designed as `trait object` compatible so the pool can own
/// any implementation behind a `Box<dyn DiskManager>`.
pub trait DiskManager: Debug + Send + Sync {
    /// Read the stored page image into buf. A page that was never written
    /// (or was deallocated) reads back as all zeros.
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()>;

    /// Write the page image to storage, replacing any previous image.
    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()>;

    /// Drop the page image from storage. The pool calls this when a page is
    /// deleted; the id may be handed out again later.
    fn deallocate_page(&mut self, page_id: PageId) -> Result<()>;
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DiskType {
    Memory,
}

pub fn new_disk(typ: DiskType) -> Result<Box<dyn DiskManager>> {
    match typ {
        DiskType::Memory => Ok(Box::new(memory::Memory::new())),
    }
}
