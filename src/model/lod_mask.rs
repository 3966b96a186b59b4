//! LOD slots and their detail-level masks.

use super::format::{Family, LOD_SLOTS};
use crate::util::{Error, Result};

/// The seven LOD slots of a model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LodSlot {
    High = 0,
    Medium = 1,
    Low = 2,
    VeryLow = 3,
    ShadowHigh = 4,
    ShadowMedium = 5,
    ShadowLow = 6,
}

impl LodSlot {
    pub const ALL: [Self; LOD_SLOTS] = [
        Self::High,
        Self::Medium,
        Self::Low,
        Self::VeryLow,
        Self::ShadowHigh,
        Self::ShadowMedium,
        Self::ShadowLow,
    ];

    pub fn from_index(index: usize) -> Result<Self> {
        Self::ALL.get(index).copied().ok_or(Error::UnknownLodSlot(index))
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::VeryLow => "very_low",
            Self::ShadowHigh => "shadow_high",
            Self::ShadowMedium => "shadow_medium",
            Self::ShadowLow => "shadow_low",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }
}

const MASKS_A: [Option<u32>; LOD_SLOTS] = [Some(0x0F), Some(0x0E), Some(0x0C), Some(0x08), Some(0x10), None, None];
const MASKS_B: [Option<u32>; LOD_SLOTS] = [Some(0x1E), Some(0x1C), Some(0x18), Some(0x10), Some(0x01), None, None];

/// Fixed mask for a slot, if the family defines one.
pub fn derived_mask(family: Family, slot: usize) -> Result<Option<u32>> {
    LodSlot::from_index(slot)?;
    Ok(match family {
        Family::A => MASKS_A[slot],
        Family::B => MASKS_B[slot],
    })
}

/// Effective mask: the fixed one, or the stored one where none is defined.
pub fn resolve_mask(family: Family, slot: usize, raw: u32) -> Result<u32> {
    match derived_mask(family, slot)? {
        Some(mask) => Ok(mask),
        None => {
            tracing::debug!(?family, slot, raw, "no fixed LOD mask; using stored value");
            Ok(raw)
        }
    }
}
