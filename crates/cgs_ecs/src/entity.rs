//! Packed entity handles.
//!
//! An [`Entity`] packs a 24-bit slot index and an 8-bit version into a
//! single `u32`. The version is bumped each time a slot is recycled, so a
//! stale handle held across a destroy can be detected cheaply.

const INDEX_BITS: u32 = 24;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;

/// Highest usable slot index. The all-ones pattern is reserved so that
/// `Entity::INVALID` can never collide with a live handle.
pub const MAX_ENTITY_INDEX: u32 = INDEX_MASK - 1;

/// Handle to an entity: 24-bit index, 8-bit version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity(u32);

impl Entity {
    /// The invalid sentinel handle.
    pub const INVALID: Entity = Entity(u32::MAX);

    /// Packs an index and version into a handle.
    pub const fn new(index: u32, version: u8) -> Self {
        Entity(((version as u32) << INDEX_BITS) | (index & INDEX_MASK))
    }

    /// Slot index portion of the handle.
    pub const fn index(self) -> u32 {
        self.0 & INDEX_MASK
    }

    /// Version portion of the handle.
    pub const fn version(self) -> u8 {
        (self.0 >> INDEX_BITS) as u8
    }

    /// True unless this is the invalid sentinel.
    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }

    /// Raw packed representation, for serialization.
    pub const fn to_bits(self) -> u32 {
        self.0
    }

    /// Rebuilds a handle from its packed representation.
    pub const fn from_bits(bits: u32) -> Self {
        Entity(bits)
    }
}

impl Default for Entity {
    fn default() -> Self {
        Entity::INVALID
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "entity({}v{})", self.index(), self.version())
        } else {
            write!(f, "entity(invalid)")
        }
    }
}
