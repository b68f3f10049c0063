//! Fixed-capacity LRU dictionaries for field names, strings, and MACs.

use crate::DICT_SIZE;

#[derive(Clone, Debug)]
struct Entry {
    bytes: Vec<u8>,
    last_used: u64,
}

/// Outcome of [`Dictionary::get_or_add`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Upsert {
    /// Slot the value lives in, 0..=63.
    pub slot: u8,
    /// True if the value was inserted by this call.
    pub is_new: bool,
    /// True if the insert recycled an occupied slot. Any state keyed on the
    /// slot must be cleared by the caller.
    pub evicted: bool,
}

/// A 64-slot dictionary keyed by bytes with least-recently-used eviction.
///
/// Lookup is a linear scan; with at most 64 entries that beats maintaining
/// a side index on MCU-class targets. The usage counter is monotone and
/// bumped on every hit or insert, so encoder and decoder that see the same
/// event sequence evict identically.
#[derive(Clone, Debug)]
pub struct Dictionary {
    entries: [Option<Entry>; DICT_SIZE],
    usage: u64,
    bytes_held: usize,
}

impl Dictionary {
    pub fn new() -> Self {
        Self {
            entries: std::array::from_fn(|_| None),
            usage: 0,
            bytes_held: 0,
        }
    }

    /// Look the value up, inserting it if absent. On a miss with a full
    /// table, the entry with the smallest `last_used` is overwritten.
    pub fn get_or_add(&mut self, bytes: &[u8]) -> Upsert {
        self.usage += 1;
        for (i, entry) in self.entries.iter_mut().enumerate() {
            if let Some(e) = entry {
                if e.bytes == bytes {
                    e.last_used = self.usage;
                    return Upsert {
                        slot: i as u8,
                        is_new: false,
                        evicted: false,
                    };
                }
            }
        }

        // First empty slot wins; otherwise evict the LRU entry.
        let slot = match self.entries.iter().position(Option::is_none) {
            Some(i) => i,
            None => {
                let mut min_slot = 0;
                let mut min_usage = u64::MAX;
                for (i, entry) in self.entries.iter().enumerate() {
                    let used = entry.as_ref().map(|e| e.last_used).unwrap_or(0);
                    if used < min_usage {
                        min_usage = used;
                        min_slot = i;
                    }
                }
                min_slot
            }
        };

        let evicted = match self.entries[slot].take() {
            Some(old) => {
                self.bytes_held -= old.bytes.len();
                true
            }
            None => false,
        };
        self.bytes_held += bytes.len();
        self.entries[slot] = Some(Entry {
            bytes: bytes.to_vec(),
            last_used: self.usage,
        });
        Upsert {
            slot: slot as u8,
            is_new: true,
            evicted,
        }
    }

    /// Fetch a populated slot, bumping its usage. Returns `None` for an
    /// empty or out-of-range slot.
    pub fn get(&mut self, slot: u8) -> Option<&[u8]> {
        self.usage += 1;
        let usage = self.usage;
        match self.entries.get_mut(slot as usize)? {
            Some(e) => {
                e.last_used = usage;
                Some(&e.bytes)
            }
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes of entry text currently held.
    pub fn bytes_held(&self) -> usize {
        self.bytes_held
    }
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

/// The three independent dictionaries owned by one stream.
#[derive(Clone, Debug, Default)]
pub struct DictSet {
    pub fields: Dictionary,
    pub strings: Dictionary,
    pub macs: Dictionary,
}

impl DictSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_held(&self) -> usize {
        self.fields.bytes_held() + self.strings.bytes_held() + self.macs.bytes_held()
    }
}
