use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::storage::buffer::Replacer;
use crate::storage::page::FrameId;

/// Eviction key of a candidate frame. Candidates order by larger backward
/// k-distance first, then by earlier first recorded access. A frame with
/// fewer than k recorded accesses gets the maximum distance, so the whole
/// under-sampled group orders by plain LRU on its earliest timestamp.
#[derive(Debug, Eq, PartialEq)]
struct KDistance {
    frame_id: FrameId,
    distance: u64,
    earliest_access_at: u64,
}

impl PartialOrd for KDistance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KDistance {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.distance.cmp(&other.distance).reverse() {
            Ordering::Equal => self.earliest_access_at.cmp(&other.earliest_access_at),
            other => other,
        }
    }
}

struct LruKNode {
    k: usize,
    frame_id: FrameId,
    is_evictable: bool,
    /// History of the last seen k access timestamps of the frame.
    /// Least recent timestamp stored in front.
    history: VecDeque<u64>,
}

impl LruKNode {
    fn new(frame_id: FrameId, k: usize) -> Self {
        assert!(k > 0, "replacer k should be larger than zero");
        LruKNode { history: VecDeque::with_capacity(k), k, frame_id, is_evictable: false }
    }

    fn record_access(&mut self, timestamp: u64) {
        if self.history.len() == self.k {
            self.history.pop_front();
        }
        self.history.push_back(timestamp)
    }

    fn k_distance(&self) -> KDistance {
        let earliest = self.history.front().unwrap_or(&0);
        if self.history.len() < self.k {
            return KDistance {
                frame_id: self.frame_id,
                distance: u64::MAX,
                earliest_access_at: *earliest,
            };
        }
        // the history holds exactly k timestamps once the window filled, so
        // front is the kth most recent access and back the most recent one.
        let latest = self.history.back().unwrap_or(&0);
        KDistance {
            frame_id: self.frame_id,
            distance: latest - earliest,
            earliest_access_at: *earliest,
        }
    }
}

/// LruKReplacer implements the LRU-k replacement policy.
///
/// The LRU-k algorithm evicts a frame whose backward k-distance is maximum of
/// all frames. Backward k-distance is computed as the difference in time between
/// the current timestamp and the timestamp of k-th previous access.
///
/// A frame with less than k history references is given +inf as its backward
/// k-distance. When multiple frames have +inf backward k-distance, the frame
/// with the earliest recorded access is the victim, which is classic LRU.
pub struct LruKReplacer {
    nodes: HashMap<FrameId, LruKNode>,
    current_timestamp: u64,
    current_size: usize,
    replacer_size: usize,
    k: usize,
}

impl LruKReplacer {
    pub fn new(k: usize, size: usize) -> Self {
        let nodes = HashMap::new();
        LruKReplacer { nodes, current_timestamp: 0, current_size: 0, replacer_size: size, k }
    }

    /// Valid frame ids are the pool's frame indexes, [0, replacer_size).
    fn check_frame_id(&self, frame_id: FrameId) -> Result<()> {
        if frame_id >= self.replacer_size {
            return Err(Error::InvalidFrame(frame_id));
        }
        Ok(())
    }

    /// Record the event that the given frame id is accessed at current timestamp.
    /// Create a new entry for access history if frame id has not been seen before;
    /// a new entry starts out non-evictable.
    pub fn record_access(&mut self, frame_id: FrameId) -> Result<()> {
        self.check_frame_id(frame_id)?;
        let k = self.k;
        let node = self.nodes.entry(frame_id).or_insert_with(|| LruKNode::new(frame_id, k));
        node.record_access(self.current_timestamp);
        self.current_timestamp += 1;
        Ok(())
    }

    /// Find the frame with the largest backward k-distance and evict that frame. Only
    /// frames that are marked as evictable are candidates for eviction.
    ///
    /// A frame with less than k historical references is given +inf as its backward
    /// k-distance. If multiple frames have inf backward k-distance, then evict the
    /// frame with the earliest recorded timestamp.
    ///
    /// Successful eviction of a frame decrements the size of the replacer and removes
    /// the frame's access history.
    ///
    /// Return the frame id if a frame is evicted successfully, None if no frames
    /// can be evicted.
    pub fn evict(&mut self) -> Option<FrameId> {
        let mut distances = vec![];
        for node in self.nodes.values() {
            if !node.is_evictable {
                continue;
            }
            distances.push(node.k_distance());
        }
        if distances.is_empty() {
            return None;
        }

        distances.sort();

        // we will always have at least one element here, it is
        // okay to use unwrap.
        let dist = distances.first().unwrap();
        let evicted = self.nodes.remove(&dist.frame_id).unwrap();
        self.current_size -= 1;

        Some(evicted.frame_id)
    }

    /// Toggle whether a frame is evictable or non-evictable. this function also
    /// controls the replacer size. Note that size is equal to number of evictable
    /// entries.
    ///
    /// If a frame was previously evictable and is to be set to non-evictable, then
    /// size should decrement. If a frame was previously non-evictable and is to be
    /// set evictable, then size should increment. An unchanged flag is a no-op.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) -> Result<()> {
        self.check_frame_id(frame_id)?;
        let node = self.nodes.get_mut(&frame_id).ok_or(Error::NotTracked(frame_id))?;
        if node.is_evictable == evictable {
            return Ok(());
        }

        node.is_evictable = evictable;
        if evictable {
            self.current_size += 1;
        } else {
            self.current_size -= 1;
        }
        Ok(())
    }

    /// Remove an evictable frame from the replacer, along with its access history,
    /// decrementing the replacer size.
    ///
    /// Note that this is different from evicting a frame, which always removes the
    /// frame with the largest backward k-distance. This function removes the
    /// specified frame id, no matter what its backward k-distance is.
    ///
    /// Removing a tracked but non-evictable frame fails with NotEvictable. If the
    /// specified frame is not found, do nothing without returning any error.
    pub fn remove(&mut self, frame_id: FrameId) -> Result<()> {
        self.check_frame_id(frame_id)?;
        let node = match self.nodes.get(&frame_id) {
            None => return Ok(()),
            Some(node) => node,
        };
        if !node.is_evictable {
            return Err(Error::NotEvictable(frame_id));
        }
        self.nodes.remove(&frame_id);
        self.current_size -= 1;
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.current_size
    }
}

/// SyncLruKReplacer implements the thread-safe version of the LRU-k replacement
/// policy, basically all the heavy lifting happens in the LruKReplacer.
pub struct SyncLruKReplacer {
    inner: Mutex<LruKReplacer>,
}

impl SyncLruKReplacer {
    pub fn new(k: usize, size: usize) -> Self {
        let inner = Mutex::new(LruKReplacer::new(k, size));
        SyncLruKReplacer { inner }
    }
}

impl Replacer for SyncLruKReplacer {
    fn record_access(&self, frame_id: FrameId) -> Result<()> {
        let mut guard = self.inner.lock()?;
        guard.record_access(frame_id)
    }

    fn evict(&self) -> Option<FrameId> {
        let mut guard = self.inner.lock().unwrap();
        guard.evict()
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) -> Result<()> {
        let mut guard = self.inner.lock()?;
        guard.set_evictable(frame_id, evictable)
    }

    fn remove(&self, frame_id: FrameId) -> Result<()> {
        let mut guard = self.inner.lock()?;
        guard.remove(frame_id)
    }

    fn size(&self) -> usize {
        let guard = self.inner.lock().unwrap();
        guard.size()
    }
}
