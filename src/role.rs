use crate::{MAX_CHILDREN, SENSOR_ID};

/// Address the parent answers on.
pub const PARENT_ADDRESS: u8 = 0x70;
pub const CHILD_BASE_ADDRESS: u8 = 0x40;
pub const CHILD_ADDRESS_SHIFT: u8 = 2;

const PARENT_PIN: u8 = 0x08;
const INDEX_PINS: u8 = 0x07;

/// Per-boot identity, fixed once the role pins are read.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: u8,
    /// 0 for the parent, 1..=7 for children.
    pub index: u8,
    /// Number of children polled; always 0 on a child.
    pub children: u8,
}

impl NodeInfo {
    pub const fn parent(children: u8) -> Self {
        Self {
            id: SENSOR_ID,
            index: 0,
            children: if children as usize > MAX_CHILDREN { MAX_CHILDREN as u8 } else { children },
        }
    }

    pub const fn child(index: u8) -> Self {
        Self {
            id: SENSOR_ID,
            index,
            children: 0,
        }
    }

    pub const fn is_parent(&self) -> bool {
        self.index == 0
    }

    /// Nodes whose state this node aggregates, itself included.
    pub const fn nodes(&self) -> usize {
        1 + self.children as usize
    }

    pub const fn address(&self) -> u8 {
        if self.is_parent() {
            PARENT_ADDRESS
        } else {
            child_address(self.index)
        }
    }
}

/// Resolves the role from the (already inverted) 4-bit role pin pattern.
pub const fn resolve(pins: u8) -> NodeInfo {
    if pins & PARENT_PIN != 0 {
        NodeInfo::parent(pins & INDEX_PINS)
    } else {
        NodeInfo::child((pins & INDEX_PINS) + 1)
    }
}

/// Bus address of the child in slot `index` (1..=7).
pub const fn child_address(index: u8) -> u8 {
    CHILD_BASE_ADDRESS + (index << CHILD_ADDRESS_SHIFT)
}
