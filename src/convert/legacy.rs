//! Material shim for converting Family B packages to the version 1 layout.
//!
//! Version 1 substances have no extra-flag word. The engine instead expects
//! damage and colour-mask variants as extra texture slots at fixed
//! positions, and a few type, mode and flag bits moved or dropped.

use crate::model::{Material, Substance, SubstanceExtra};

/// Substance byte a rule applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubstanceField {
    Flags,
    Mode,
    Kind,
}

/// When any bit of `mask` is set, clear the mask and OR in `replace`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemapRule {
    pub field: SubstanceField,
    pub mask: u8,
    pub replace: u8,
}

pub const LEGACY_REMAP: &[RemapRule] = &[
    // specular lives in bit 2 of the legacy flags
    RemapRule {
        field: SubstanceField::Flags,
        mask: 0x80,
        replace: 0x04,
    },
    // no per-substance lighting override
    RemapRule {
        field: SubstanceField::Flags,
        mask: 0x40,
        replace: 0x00,
    },
    // blended modes collapse to plain alpha
    RemapRule {
        field: SubstanceField::Mode,
        mask: 0x0C,
        replace: 0x01,
    },
    RemapRule {
        field: SubstanceField::Kind,
        mask: 0x10,
        replace: 0x00,
    },
];

impl RemapRule {
    pub fn apply(&self, substance: &mut Substance) {
        let value = match self.field {
            SubstanceField::Flags => &mut substance.flags,
            SubstanceField::Mode => &mut substance.mode,
            SubstanceField::Kind => &mut substance.kind,
        };
        if *value & self.mask != 0 {
            *value = (*value & !self.mask) | self.replace;
        }
    }
}

/// Texture slots a substance needs in the legacy layout.
pub fn legacy_slot_count(extra: SubstanceExtra) -> usize {
    let damage = extra.contains(SubstanceExtra::DAMAGE);
    let mask = extra.contains(SubstanceExtra::COLOR_MASK);
    match (damage, mask) {
        (true, true) => 4,
        (true, false) | (false, true) => 2,
        (false, false) => 1,
    }
}

/// Rewrite one substance for the legacy layout.
pub fn legacy_substance(substance: &Substance) -> Substance {
    let mut out = substance.clone();
    for rule in LEGACY_REMAP {
        rule.apply(&mut out);
    }
    let slots = legacy_slot_count(substance.extra);
    if let Some(base) = substance.textures.first() {
        for slot in out.textures.len()..slots {
            let mut copy = base.clone();
            copy.uid = base.uid.wrapping_add(slot as u32);
            out.textures.push(copy);
        }
    }
    out.extra = SubstanceExtra::empty();
    out.extra_unknown = 0;
    out
}

pub fn legacy_material(material: &Material) -> Material {
    Material {
        substances: material.substances.iter().map(legacy_substance).collect(),
        ..material.clone()
    }
}
