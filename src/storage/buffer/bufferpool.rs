use std::sync::{Arc, Mutex};

use log::debug;

use crate::config::Config;
use crate::error::Result;
use crate::storage::buffer::replacer::SyncLruKReplacer;
use crate::storage::buffer::Replacer;
use crate::storage::hashtable::ExtendibleHashTable;
use crate::storage::page::{FrameId, Page, PageId, INVALID_PAGE_ID};
use crate::storage::DiskManager;

/// Default number of slots per page table hash bucket.
const BUCKET_SIZE: usize = 4;

/// The buffer pool is responsible for moving physical pages back and forth
/// from main memory to disk. It allows a DBMS to support databases that are
/// larger than the amount of memory available to the system.
///
/// The buffer pool's operations are transparent to other parts in the system.
/// For example, the system asks the buffer pool for a page using its unique
/// identifier (page_id) and it does not know whether that page is already in
/// memory or whether the system has to retrieve it from disk.
struct BufferPool {
    pool_size: usize,
    /// disk collaborator pages are read from and written back to.
    disk: Box<dyn DiskManager>,
    /// array of buffer pool pages. use the array index as
    /// FrameId, i.e., the FrameId is in range: [0, pool_size).
    pages: Vec<Arc<Page>>,
    /// page table for keeping track of buffer pool pages.
    page_table: ExtendibleHashTable<PageId, FrameId>,
    /// list of free frames that don't have any pages on them.
    free_list: Vec<FrameId>,
    /// Replacer to find unpinned pages for replacement.
    replacer: Arc<dyn Replacer>,
    /// The next page id to be allocated.
    next_page_id: PageId,
}

impl BufferPool {
    fn new(disk: Box<dyn DiskManager>, pool_size: usize, replacer_k: usize, bucket_size: usize) -> Self {
        let mut pages = Vec::with_capacity(pool_size);
        let mut free_list = Vec::with_capacity(pool_size);
        let page_table = ExtendibleHashTable::new(bucket_size);
        let replacer: Arc<dyn Replacer> = Arc::new(SyncLruKReplacer::new(replacer_k, pool_size));
        for i in 0..pool_size {
            pages.push(Arc::new(Page::new()));
            // initially, every page is in the free list
            free_list.push(i);
        }
        BufferPool { pool_size, disk, pages, page_table, free_list, replacer, next_page_id: 0 }
    }

    /// Pick a replacement frame from either the free list or the replacer
    /// (always find from the free list first) and hand it back empty: a
    /// dirty previous occupant is written back to disk, the old page is
    /// unlinked from the page table and the frame's memory and metadata are
    /// reset. Return None if every frame is in use and not evictable.
    fn take_frame(&mut self) -> Result<Option<FrameId>> {
        let frame_id = match self.free_list.pop() {
            Some(frame_id) => frame_id,
            None => match self.replacer.evict() {
                Some(frame_id) => frame_id,
                None => return Ok(None),
            },
        };

        let page = Arc::clone(&self.pages[frame_id]);
        let mut guard = page.write()?;
        if guard.id != INVALID_PAGE_ID {
            if guard.is_dirty {
                debug!("writing back dirty page {} before reusing frame {}", guard.id, frame_id);
                self.disk.write_page(guard.id, &guard.data)?;
            }
            // unlink the old page from page table
            self.page_table.remove(&guard.id);
        }
        guard.clear();

        Ok(Some(frame_id))
    }

    /// Create a new page in the buffer pool, return the newly created page or
    /// None if all frames are currently in use and not evictable(in another
    /// word, pinned).
    ///
    /// The new page starts out zero-filled with a freshly allocated page id
    /// and pin count 1. The frame access is recorded and the frame is pinned
    /// so that the replacer wouldn't evict it before the buffer pool
    /// manager "unpin" it.
    fn new_page(&mut self) -> Result<Option<Arc<Page>>> {
        let frame_id = match self.take_frame()? {
            Some(frame_id) => frame_id,
            None => return Ok(None),
        };

        let page = Arc::clone(&self.pages[frame_id]);
        let mut guard = page.write()?;
        // allocating new page id
        let new_page_id = self.allocate_page();
        guard.id = new_page_id;
        // pin the new page with initial value 1
        guard.pin_count = 1;
        // record frame access and pin the frame
        self.replacer.record_access(frame_id)?;
        self.replacer.set_evictable(frame_id, false)?;
        // link the new page with frame into page table
        self.page_table.insert(new_page_id, frame_id)?;

        drop(guard);
        Ok(Some(page))
    }

    /// Fetch the requested page with the given page id from the buffer pool.
    /// Return None if the page needs to be fetched from disk but all frames
    /// are currently in use and not evictable(in other words, pinned).
    ///
    /// First search for page_id in the buffer pool. On a hit the pin count
    /// goes up and the access is recorded. On a miss a replacement frame is
    /// taken from the free list or the replacer, the page content is read
    /// from disk and the page is linked into the page table pinned.
    fn fetch_page(&mut self, page_id: PageId) -> Result<Option<Arc<Page>>> {
        // check if page table has the page id
        if let Some(frame_id) = self.page_table.find(&page_id) {
            // we have the page frame in buffer pool already,
            // increase pin count, record frame access then
            // return it.
            let page = Arc::clone(&self.pages[frame_id]);
            let mut guard = page.write()?;
            guard.pin_count += 1;
            self.replacer.record_access(frame_id)?;
            self.replacer.set_evictable(frame_id, false)?;

            drop(guard);
            return Ok(Some(page));
        }

        let frame_id = match self.take_frame()? {
            Some(frame_id) => frame_id,
            None => return Ok(None),
        };

        let page = Arc::clone(&self.pages[frame_id]);
        let mut guard = page.write()?;
        // fetch the page content from disk
        self.disk.read_page(page_id, &mut guard.data)?;
        guard.id = page_id;
        guard.pin_count = 1;
        // record frame access and pin the frame
        self.replacer.record_access(frame_id)?;
        self.replacer.set_evictable(frame_id, false)?;
        // link the new page with frame into page table
        self.page_table.insert(page_id, frame_id)?;

        drop(guard);
        Ok(Some(page))
    }

    /// Unpin the target page from the buffer pool. If page_id is not in the
    /// buffer pool or its pin count is already 0, return false.
    ///
    /// Decrement the pin count of the page. If the pin count reaches 0, the
    /// frame becomes evictable by the replacer. is_dirty is OR-ed into the
    /// frame's dirty flag; unpinning never clears a dirty flag that an
    /// earlier writer set.
    fn unpin_page(&mut self, page_id: PageId, is_dirty: bool) -> Result<bool> {
        let frame_id = match self.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return Ok(false),
        };
        let page = Arc::clone(&self.pages[frame_id]);
        let mut guard = page.write()?;
        if guard.pin_count == 0 {
            return Ok(false);
        }
        guard.pin_count -= 1;
        if guard.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true)?;
        }
        guard.is_dirty = guard.is_dirty || is_dirty;
        Ok(true)
    }

    /// Flush the target page to disk regardless of the dirty flag.
    /// Unset the dirty flag of the page after flushing.
    ///
    /// Return false if the page cannot be found in the page table,
    /// true otherwise.
    fn flush_page(&mut self, page_id: PageId) -> Result<bool> {
        let frame_id = match self.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return Ok(false),
        };
        let page = Arc::clone(&self.pages[frame_id]);
        let mut guard = page.write()?;

        self.disk.write_page(guard.id, &guard.data)?;
        guard.is_dirty = false;

        Ok(true)
    }

    /// Flush every frame that holds a page to disk.
    fn flush_all_pages(&mut self) -> Result<()> {
        for frame_id in 0..self.pool_size {
            let page = Arc::clone(&self.pages[frame_id]);
            let mut guard = page.write()?;
            if guard.id == INVALID_PAGE_ID {
                continue;
            }
            self.disk.write_page(guard.id, &guard.data)?;
            guard.is_dirty = false;
        }
        Ok(())
    }

    /// Delete a page from the buffer pool. If the page is not in the buffer
    /// pool, do nothing and return true. If the page is pinned and cannot be
    /// deleted, return false immediately.
    ///
    /// After unlinking the page from the page table, stop tracking the frame
    /// in the replacer, reset the frame's memory and metadata and add the
    /// frame back to the free list. The disk collaborator is told the page
    /// id was given up.
    fn delete_page(&mut self, page_id: PageId) -> Result<bool> {
        let frame_id = match self.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return Ok(true),
        };
        let page = Arc::clone(&self.pages[frame_id]);
        let mut guard = page.write()?;
        if guard.pin_count > 0 {
            return Ok(false);
        }

        debug!("deleting page {} from frame {}", page_id, frame_id);
        // unlink the page from page table
        self.page_table.remove(&page_id);
        // remove frame access history from replacer
        self.replacer.remove(frame_id)?;
        // clean page frame
        guard.clear();
        // add back to free list
        self.free_list.push(frame_id);
        // the page id is given up
        self.disk.deallocate_page(page_id)?;

        Ok(true)
    }

    fn allocate_page(&mut self) -> PageId {
        let page_id = self.next_page_id;
        self.next_page_id += 1;
        page_id
    }
}

/// Buffer pool manager wrap buffer pool with a mutex for concurrent access,
/// basically all the heavy lifting happens in the buffer pool.
pub struct BufferPoolManager {
    /// hold the actual buffer pool protected by a mutex latch.
    inner: Arc<Mutex<BufferPool>>,
}

impl BufferPoolManager {
    pub fn new(disk: Box<dyn DiskManager>, pool_size: usize, replacer_k: usize) -> Self {
        let inner = BufferPool::new(disk, pool_size, replacer_k, BUCKET_SIZE);
        BufferPoolManager { inner: Arc::new(Mutex::new(inner)) }
    }

    /// Assemble a buffer pool from a configuration and a disk collaborator.
    pub fn with_config(cfg: &Config, disk: Box<dyn DiskManager>) -> Self {
        let inner = BufferPool::new(disk, cfg.pool_size, cfg.replacer_k, cfg.bucket_size);
        BufferPoolManager { inner: Arc::new(Mutex::new(inner)) }
    }

    /// Create a new page in the buffer pool, pinned. Ok(None) means every
    /// frame is in use and not evictable.
    pub fn new_page(&self) -> Result<Option<Arc<Page>>> {
        let mut inner = self.inner.lock()?;
        inner.new_page()
    }

    /// Fetch the requested page with the given page id from the buffer pool,
    /// pinned. Ok(None) means the page was not resident and every frame is in
    /// use and not evictable.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Option<Arc<Page>>> {
        let mut inner = self.inner.lock()?;
        inner.fetch_page(page_id)
    }

    /// Unpin the target page from the buffer pool, marking it dirty when the
    /// caller modified it. Return false if the page is unknown or its pin
    /// count is already 0.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<bool> {
        let mut inner = self.inner.lock()?;
        inner.unpin_page(page_id, is_dirty)
    }

    /// Flush the target page to disk regardless of the dirty flag.
    /// Unset the dirty flag of the page after flushing.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.inner.lock()?;
        inner.flush_page(page_id)
    }

    /// Flush every frame that holds a page to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner.flush_all_pages()
    }

    /// Delete a page from the buffer pool. If the page is not in the buffer
    /// pool, do nothing and return true. If the page is pinned, return false.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.inner.lock()?;
        inner.delete_page(page_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::MutexGuard;

    use crate::storage::memory::Memory;
    use crate::storage::page::PAGE_SIZE;
    use crate::storage::{new_disk, DiskType};

    use super::*;

    /// Disk double that records every page write so tests can observe
    /// write-through.
    #[derive(Debug)]
    struct RecordingDisk {
        inner: Memory,
        writes: Arc<Mutex<Vec<PageId>>>,
        reads: Arc<Mutex<Vec<PageId>>>,
    }

    impl RecordingDisk {
        fn new() -> (Box<dyn DiskManager>, Arc<Mutex<Vec<PageId>>>, Arc<Mutex<Vec<PageId>>>) {
            let writes = Arc::new(Mutex::new(Vec::new()));
            let reads = Arc::new(Mutex::new(Vec::new()));
            let disk = RecordingDisk {
                inner: Memory::new(),
                writes: Arc::clone(&writes),
                reads: Arc::clone(&reads),
            };
            (Box::new(disk), writes, reads)
        }
    }

    impl DiskManager for RecordingDisk {
        fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
            self.reads.lock().unwrap().push(page_id);
            self.inner.read_page(page_id, buf)
        }

        fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
            self.writes.lock().unwrap().push(page_id);
            self.inner.write_page(page_id, data)
        }

        fn deallocate_page(&mut self, page_id: PageId) -> Result<()> {
            self.inner.deallocate_page(page_id)
        }
    }

    fn page_id(page: &Arc<Page>) -> PageId {
        page.read().unwrap().id
    }

    #[test]
    fn test_buffer_pool_basic() -> Result<()> {
        let disk = new_disk(DiskType::Memory)?;
        let buffer_pool_size = 10;
        let k = 5;
        let bpm = BufferPoolManager::new(disk, buffer_pool_size, k);

        // Scenario: The buffer pool is empty, we should be able to create a new page.
        let page0 = bpm.new_page()?.unwrap();
        let page0_id = page_id(&page0);

        // Scenario: Once we have a page, we should be able to read and write the content.
        let mut guard = page0.write()?;
        guard.data[..5].copy_from_slice(b"hello");
        drop(guard);
        let guard = page0.read()?;
        assert_eq!(b"hello", &guard.data[..5]);
        assert_eq!(PAGE_SIZE, guard.data.len());
        drop(guard);

        // Scenario: we should be able to create pages until we fill up the buffer pool.
        for _ in 1..buffer_pool_size {
            assert!(bpm.new_page()?.is_some());
        }
        // Scenario: once the buffer pool is full, we should not be able to create any
        // new page.
        for _ in buffer_pool_size..buffer_pool_size * 2 {
            assert!(bpm.new_page()?.is_none());
        }
        // Scenario: after unpinning pages {0, 1, 2, 3, 4} and pinning another 4 new pages,
        // there would still be one buffer page left for reading page 0.
        for i in 0..5 {
            assert_eq!(true, bpm.unpin_page(i, true)?);
        }
        for _ in 0..4 {
            assert!(bpm.new_page()?.is_some());
        }
        // Scenario: we should be able to fetch the data we wrote a while ago.
        let page0 = bpm.fetch_page(page0_id)?.unwrap();
        let guard = page0.read()?;
        assert_eq!(b"hello", &guard.data[..5]);
        drop(guard);
        // Scenario: if we unpin page 0 and then make a new page, all the buffer pages should
        // now be pinned. Fetching page 0 again should fail.
        assert_eq!(true, bpm.unpin_page(page0_id, true)?);
        assert!(bpm.new_page()?.is_some());
        assert!(bpm.fetch_page(page0_id)?.is_none());

        Ok(())
    }

    #[test]
    fn test_new_page_until_exhaustion() -> Result<()> {
        let disk = new_disk(DiskType::Memory)?;
        let bpm = BufferPoolManager::new(disk, 3, 2);

        // three frames, three pages with ascending ids
        for want in 0..3 {
            let page = bpm.new_page()?.unwrap();
            assert_eq!(want, page_id(&page));
        }
        // the fourth request finds every frame pinned
        assert!(bpm.new_page()?.is_none());

        Ok(())
    }

    #[test]
    fn test_unpin_then_evict_writes_back() -> Result<()> {
        let (disk, writes, _reads) = RecordingDisk::new();
        let bpm = BufferPoolManager::new(disk, 3, 2);

        let page0 = bpm.new_page()?.unwrap();
        let page0_id = page_id(&page0);
        let mut guard = page0.write()?;
        guard.data[..3].copy_from_slice(b"abc");
        drop(guard);
        bpm.new_page()?.unwrap();
        bpm.new_page()?.unwrap();

        // only page 0 is unpinned, so the next new page evicts it and its
        // dirty content goes to disk exactly once
        assert_eq!(true, bpm.unpin_page(page0_id, true)?);
        let page3 = bpm.new_page()?.unwrap();
        assert_eq!(3, page_id(&page3));
        assert_eq!(vec![page0_id], *writes.lock().unwrap());

        // every frame is pinned again, page 0 cannot come back in
        assert!(bpm.fetch_page(page0_id)?.is_none());

        // after an unpin there is a victim again and the write-back survived
        assert_eq!(true, bpm.unpin_page(1, false)?);
        let page0 = bpm.fetch_page(page0_id)?.unwrap();
        let guard = page0.read()?;
        assert_eq!(b"abc", &guard.data[..3]);

        Ok(())
    }

    #[test]
    fn test_unpin_keeps_dirty_flag() -> Result<()> {
        let disk = new_disk(DiskType::Memory)?;
        let bpm = BufferPoolManager::new(disk, 3, 2);

        let page = bpm.new_page()?.unwrap();
        let id = page_id(&page);

        // unknown page
        assert_eq!(false, bpm.unpin_page(42, false)?);

        // pin twice, then a clean unpin after a dirty one must not clear the flag
        bpm.fetch_page(id)?.unwrap();
        assert_eq!(true, bpm.unpin_page(id, true)?);
        assert_eq!(true, bpm.unpin_page(id, false)?);
        assert_eq!(true, page.read()?.is_dirty);

        // pin count is zero now, further unpins report failure
        assert_eq!(false, bpm.unpin_page(id, false)?);

        // flushing is the only way to clear the flag without eviction
        assert_eq!(true, bpm.flush_page(id)?);
        assert_eq!(false, page.read()?.is_dirty);

        Ok(())
    }

    #[test]
    fn test_delete_page() -> Result<()> {
        let (disk, _writes, reads) = RecordingDisk::new();
        let bpm = BufferPoolManager::new(disk, 3, 2);

        let page = bpm.new_page()?.unwrap();
        let id = page_id(&page);
        let mut guard = page.write()?;
        guard.data[..3].copy_from_slice(b"abc");
        drop(guard);

        // a pinned page cannot be deleted
        assert_eq!(false, bpm.delete_page(id)?);

        assert_eq!(true, bpm.unpin_page(id, false)?);
        assert_eq!(true, bpm.delete_page(id)?);

        // deleting a page that is not resident is a no-op success
        assert_eq!(true, bpm.delete_page(id)?);
        assert_eq!(true, bpm.delete_page(42)?);

        // the page left the page table: fetching it again goes to the disk,
        // which serves zeros for the deallocated id
        let page = bpm.fetch_page(id)?.unwrap();
        assert_eq!(vec![id], *reads.lock().unwrap());
        assert!(page.read()?.data.iter().all(|b| *b == 0));

        Ok(())
    }

    #[test]
    fn test_flush_all_pages() -> Result<()> {
        let (disk, writes, _reads) = RecordingDisk::new();
        let bpm = BufferPoolManager::new(disk, 3, 2);

        let mut ids = Vec::new();
        for i in 0..3 {
            let page = bpm.new_page()?.unwrap();
            let mut guard = page.write()?;
            guard.data[0] = i as u8 + 1;
            drop(guard);
            ids.push(page_id(&page));
            assert_eq!(true, bpm.unpin_page(ids[i], true)?);
        }

        // one write per resident page
        bpm.flush_all_pages()?;
        {
            let mut writes = writes.lock().unwrap();
            writes.sort();
            assert_eq!(ids, *writes);
        }

        // flushing an already clean page writes again and still reports true
        assert_eq!(true, bpm.flush_page(ids[0])?);
        assert_eq!(4, writes.lock().unwrap().len());

        // flushing an unknown page reports false
        assert_eq!(false, bpm.flush_page(42)?);

        Ok(())
    }

    /// Every frame is either in the free list or holds a live page that the
    /// page table resolves back to it.
    fn check_accounting(inner: &MutexGuard<'_, BufferPool>) {
        let mut occupied = 0;
        for (frame_id, page) in inner.pages.iter().enumerate() {
            let guard = page.read().unwrap();
            if guard.id == INVALID_PAGE_ID {
                assert!(inner.free_list.contains(&frame_id));
            } else {
                assert_eq!(Some(frame_id), inner.page_table.find(&guard.id));
                occupied += 1;
            }
        }
        assert_eq!(inner.pool_size, inner.free_list.len() + occupied);
    }

    #[test]
    fn test_frame_accounting() -> Result<()> {
        let disk = new_disk(DiskType::Memory)?;
        let bpm = BufferPoolManager::new(disk, 3, 2);

        check_accounting(&bpm.inner.lock()?);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let page = bpm.new_page()?.unwrap();
            ids.push(page_id(&page));
        }
        check_accounting(&bpm.inner.lock()?);

        bpm.unpin_page(ids[0], true)?;
        bpm.new_page()?.unwrap();
        check_accounting(&bpm.inner.lock()?);

        bpm.unpin_page(ids[1], false)?;
        bpm.delete_page(ids[1])?;
        check_accounting(&bpm.inner.lock()?);

        Ok(())
    }

    #[test]
    fn test_with_config() -> Result<()> {
        let cfg = Config::new("")?;
        let disk = new_disk(DiskType::Memory)?;
        let bpm = BufferPoolManager::with_config(&cfg, disk);

        let page = bpm.new_page()?.unwrap();
        assert_eq!(0, page_id(&page));

        Ok(())
    }
}
