use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::hash::Hasher;

use twox_hash::XxHash64;

use crate::NodeAddr;

/// Number of points each member is given on the ring.
pub const DEFAULT_VIRTUAL_NODES: usize = 160;

#[derive(Debug, Clone)]
/// A consistent hash ring over a fixed set of node addresses.
///
/// Every member is placed on the ring many times (virtual nodes) to even out
/// the share of keys each member owns. The ring cannot be changed once built,
/// so a key always maps to the same member for the lifetime of the ring.
pub struct HashRing {
    /// Ring positions mapped to the index of the owning member.
    points: BTreeMap<u64, usize>,
    members: Vec<NodeAddr>,
}

impl HashRing {
    /// Builds a ring over the given members.
    ///
    /// Duplicate addresses are only added once.
    pub fn new<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeAddr>,
    {
        Self::with_virtual_nodes(members, DEFAULT_VIRTUAL_NODES)
    }

    /// Builds a ring placing each member `virtual_nodes` times.
    pub fn with_virtual_nodes<I, S>(members: I, virtual_nodes: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeAddr>,
    {
        let mut unique: Vec<NodeAddr> = Vec::new();
        for member in members {
            let member = member.into();
            if !unique.contains(&member) {
                unique.push(member);
            }
        }

        let mut points = BTreeMap::new();
        for (index, member) in unique.iter().enumerate() {
            for replica in 0..virtual_nodes.max(1) {
                let position = hash_key(format!("{member}#{replica}").as_bytes());

                // Colliding positions go to the smaller address so the ring
                // does not depend on the order members were given in.
                match points.entry(position) {
                    Entry::Vacant(entry) => {
                        entry.insert(index);
                    },
                    Entry::Occupied(mut entry) => {
                        if member < &unique[*entry.get()] {
                            entry.insert(index);
                        }
                    },
                }
            }
        }

        Self {
            points,
            members: unique,
        }
    }

    /// All members of the ring.
    pub fn members(&self) -> &[NodeAddr] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The member owning the given key.
    ///
    /// Returns `None` if the ring has no members.
    pub fn get(&self, key: &[u8]) -> Option<&NodeAddr> {
        self.owner_at(Self::position(key))
    }

    /// The position of a key on the ring.
    ///
    /// Keys at the same position always have the same owner.
    pub fn position(key: &[u8]) -> u64 {
        hash_key(key)
    }

    /// The member owning the given ring position.
    pub fn owner_at(&self, position: u64) -> Option<&NodeAddr> {
        self.points
            .range(position..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, &index)| &self.members[index])
    }
}

/// Hashes a key onto the ring using xxHash64.
fn hash_key(key: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(key);
    hasher.finish()
}
