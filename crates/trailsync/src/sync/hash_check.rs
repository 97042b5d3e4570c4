use std::collections::BTreeMap;

use crate::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashVerdict {
    Match,
    Mismatch { frame: Frame, local: u64, remote: u64 },
    /// The frame has not been reached yet; the remote hash is kept until it is.
    Pending,
    /// The frame fell out of the local history before it could be compared.
    Unavailable,
}

/// Compares remote trailing-state hashes with the local ones.
///
/// The trailing state is final once it moves past a frame, so local hashes are remembered for a
/// bounded number of frames and remote hashes that arrive early are held until the trailing state
/// reaches them.
#[derive(Debug, Clone)]
pub struct HashVerifier {
    local: BTreeMap<Frame, u64>,
    remote: BTreeMap<Frame, u64>,
    history: usize,
}

impl HashVerifier {
    pub fn new(history: usize) -> Self {
        Self {
            local: BTreeMap::new(),
            remote: BTreeMap::new(),
            history: history.max(1),
        }
    }

    /// Records the local trailing hash for `frame`, resolving a held remote hash if present.
    pub fn observe(&mut self, frame: Frame, hash: u64) -> Option<HashVerdict> {
        self.local.insert(frame, hash);
        while self.local.len() > self.history {
            self.local.pop_first();
        }

        self.remote = self.remote.split_off(&frame);
        let remote = self.remote.remove(&frame)?;
        Some(compare(frame, hash, remote))
    }

    pub fn check(&mut self, frame: Frame, remote: u64) -> HashVerdict {
        if let Some(local) = self.local.get(&frame) {
            return compare(frame, *local, remote);
        }

        let newest = self.local.keys().next_back().copied();
        match newest {
            Some(newest) if frame < newest => HashVerdict::Unavailable,
            _ => {
                self.remote.insert(frame, remote);
                HashVerdict::Pending
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.remote.len()
    }

    pub fn clear(&mut self) {
        self.local.clear();
        self.remote.clear();
    }
}

fn compare(frame: Frame, local: u64, remote: u64) -> HashVerdict {
    if local == remote {
        HashVerdict::Match
    } else {
        HashVerdict::Mismatch {
            frame,
            local,
            remote,
        }
    }
}
