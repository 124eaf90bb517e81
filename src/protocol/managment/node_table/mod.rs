//! Table of the nodes seen on the bus, keyed by the address they claimed.
//!
//! Every address claim is arbitrated here the same way the bus does it: the
//! lower NAME keeps a contested address. Entries carry a liveness countdown
//! refreshed by any traffic from the node; a silent node times out.
use super::iso_name::IsoName;
use crate::infra::slots::SlotTable;
use crate::infra::stats::{CommStats, Counter};

/// Default compiled capacity.
pub const NODES: usize = 32;

/// What changed in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeEvent {
    /// First claim seen from this NAME.
    NewNode,
    /// A known NAME claimed a different address.
    AddressChanged,
    /// The node lost its address to a lower NAME.
    BumpedOff,
    /// The node stopped talking.
    TimedOut,
}

/// One table change, reported to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeChange {
    pub event: NodeEvent,
    /// Address concerned (the new one for `AddressChanged`).
    pub address: u8,
    pub name: IsoName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    pub address: u8,
    pub name: IsoName,
    /// Ticks before the node is considered gone.
    pub liveness: u32,
}

pub struct NodeTable<const N: usize = NODES> {
    nodes: SlotTable<Node, N>,
}

impl<const N: usize> Default for NodeTable<N> {
    fn default() -> Self {
        Self::new(N)
    }
}

impl<const N: usize> NodeTable<N> {
    /// Table holding at most `max_nodes` entries (clamped to `N`).
    pub fn new(max_nodes: usize) -> Self {
        Self {
            nodes: SlotTable::with_limit(max_nodes),
        }
    }

    pub fn max_nodes(&self) -> usize {
        self.nodes.capacity()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().map(|(_, node)| node)
    }

    pub fn name_of(&self, address: u8) -> Option<IsoName> {
        self.nodes
            .find(|node| node.address == address)
            .map(|node| node.name)
    }

    pub fn address_of(&self, name: IsoName) -> Option<u8> {
        self.nodes.find(|node| node.name == name).map(|node| node.address)
    }

    pub fn contains_address(&self, address: u8) -> bool {
        self.nodes.find(|node| node.address == address).is_some()
    }

    /// Apply an address claim of `name` for `address`.
    pub fn observe(
        &mut self,
        address: u8,
        name: IsoName,
        liveness: u32,
        stats: &mut CommStats,
        mut sink: impl FnMut(NodeChange),
    ) {
        let by_name = self.nodes.position(|node| node.name == name);
        let by_address = self.nodes.position(|node| node.address == address);

        if let (Some(named), Some(addressed)) = (by_name, by_address) {
            if named == addressed {
                if let Some(node) = self.nodes.get_mut(named) {
                    node.liveness = liveness;
                }
                return;
            }
        }

        if let Some(index) = by_address {
            let Some(holder) = self.nodes.get(index).copied() else {
                return;
            };
            if !name.wins_over(&holder.name) {
                // The claimant loses and will move on; the holder stays.
                return;
            }
            self.nodes.remove(index);
            sink(NodeChange {
                event: NodeEvent::BumpedOff,
                address,
                name: holder.name,
            });
        }

        match by_name.and_then(|index| self.nodes.get_mut(index)) {
            Some(node) => {
                node.address = address;
                node.liveness = liveness;
                sink(NodeChange {
                    event: NodeEvent::AddressChanged,
                    address,
                    name,
                });
            }
            None => {
                let node = Node {
                    address,
                    name,
                    liveness,
                };
                if self.nodes.insert(node).is_err() {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("node table full, dropping node at {}", address);
                    stats.bump(Counter::NodeTableFull);
                    return;
                }
                sink(NodeChange {
                    event: NodeEvent::NewNode,
                    address,
                    name,
                });
            }
        }
    }

    /// Restart the liveness countdown of the node at `address`.
    pub fn refresh(&mut self, address: u8, liveness: u32) -> bool {
        match self.nodes.find_mut(|node| node.address == address) {
            Some(node) => {
                node.liveness = liveness;
                true
            }
            None => false,
        }
    }

    /// Drop the node at `address` without reporting it.
    pub fn forget(&mut self, address: u8) -> Option<Node> {
        let index = self.nodes.position(|node| node.address == address)?;
        self.nodes.remove(index)
    }

    /// Count every liveness down by one tick and remove expired nodes.
    pub fn tick(&mut self, mut sink: impl FnMut(NodeChange)) {
        self.nodes.retain(|node| {
            node.liveness = node.liveness.saturating_sub(1);
            if node.liveness > 0 {
                return true;
            }
            sink(NodeChange {
                event: NodeEvent::TimedOut,
                address: node.address,
                name: node.name,
            });
            false
        });
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
