//! Material handle resolution across the packages of one file.

use std::collections::HashMap;

use super::material::{Material, MaterialHandle, MaterialSource};
use super::package::{ModelPackage, SubModel};
use crate::spooler::{context, SpoolerId, SpoolerTree};
use crate::util::{Error, Result};

/// Outcome of resolving one handle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Resolved<'a> {
    Material(&'a Material),
    /// The handle is the null sentinel.
    Null,
    Unresolved,
}

/// Looks materials up in the owning package, the vehicle globals package
/// and sibling packages keyed by the low half of their UID.
#[derive(Default)]
pub struct MaterialResolver<'a> {
    globals: Option<&'a ModelPackage>,
    packages: HashMap<u16, &'a ModelPackage>,
}

impl<'a> MaterialResolver<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_globals(mut self, globals: &'a ModelPackage) -> Self {
        self.globals = Some(globals);
        self
    }

    /// Make `package` addressable from its siblings.
    pub fn add_package(&mut self, package: &'a ModelPackage) {
        self.packages.insert(package.uid as u16, package);
    }

    /// Resolve `handle` as seen from `owner`.
    pub fn resolve(&self, owner: &'a ModelPackage, handle: MaterialHandle) -> Resolved<'a> {
        let table = match handle.source_kind(owner.uid) {
            MaterialSource::Null => return Resolved::Null,
            MaterialSource::Local => Some(owner),
            MaterialSource::Globals => self.globals,
            MaterialSource::Package(uid) => self.packages.get(&uid).copied(),
        };
        table
            .and_then(|pkg| pkg.materials.get(handle.index as usize))
            .map_or(Resolved::Unresolved, Resolved::Material)
    }

    /// Like [`resolve`](Self::resolve), logging misses and mapping them to no material.
    pub fn resolve_or_warn(&self, owner: &'a ModelPackage, handle: MaterialHandle) -> Option<&'a Material> {
        match self.resolve(owner, handle) {
            Resolved::Material(m) => Some(m),
            Resolved::Null => None,
            Resolved::Unresolved => {
                tracing::warn!(
                    package = owner.uid,
                    index = handle.index,
                    source = handle.source,
                    "unresolved material handle"
                );
                None
            }
        }
    }

    /// Submodels of `package` whose handle resolves to nothing.
    pub fn unresolved(&self, package: &'a ModelPackage) -> Vec<SubModel> {
        package
            .submodels()
            .filter(|sm| self.resolve(package, sm.material) == Resolved::Unresolved)
            .copied()
            .collect()
    }
}

impl ModelPackage {
    /// Encode, failing on the first handle `resolver` cannot resolve.
    pub fn save_strict(&self, resolver: &MaterialResolver<'_>) -> Result<Vec<u8>> {
        for sm in self.submodels() {
            if resolver.resolve(self, sm.material) == Resolved::Unresolved {
                return Err(Error::UnresolvedMaterial {
                    index: sm.material.index,
                    source_id: sm.material.source,
                });
            }
        }
        self.save()
    }
}

/// The model package buffer stored under a vehicle globals package, if any.
pub fn find_globals(tree: &SpoolerTree) -> Option<SpoolerId> {
    super::codec::find_model_packages(tree).into_iter().find(|&id| {
        tree.parent(id)
            .ok()
            .flatten()
            .and_then(|p| tree.get(p).ok())
            .is_some_and(|p| p.context() == context::VEHICLE_GLOBALS)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::package::quad_package;
    use crate::spooler::SpillPolicy;

    fn material(flags: u32) -> Material {
        Material {
            flags,
            ..Material::default()
        }
    }

    #[test]
    fn test_resolve_domains() {
        let mut owner = quad_package();
        owner.materials.push(material(1));
        let mut globals = quad_package();
        globals.uid = 0xCC00;
        globals.materials.push(material(2));
        let mut sibling = quad_package();
        sibling.uid = 0x0005_0042;
        sibling.materials.push(material(3));

        let mut resolver = MaterialResolver::new().with_globals(&globals);
        resolver.add_package(&sibling);

        let flags = |h| match resolver.resolve(&owner, h) {
            Resolved::Material(m) => Some(m.flags),
            _ => None,
        };
        assert_eq!(flags(MaterialHandle::local(0)), Some(1));
        assert_eq!(flags(MaterialHandle { index: 0, source: 0x1234 }), Some(1));
        assert_eq!(flags(MaterialHandle::globals(0)), Some(2));
        assert_eq!(flags(MaterialHandle { index: 0, source: 0x0042 }), Some(3));
        assert_eq!(resolver.resolve(&owner, MaterialHandle::NULL), Resolved::Null);
        assert_eq!(resolver.resolve(&owner, MaterialHandle::local(5)), Resolved::Unresolved);
        assert_eq!(resolver.resolve_or_warn(&owner, MaterialHandle { index: 0, source: 0x77 }), None);
    }

    #[test]
    fn test_strict_save() {
        let mut pkg = quad_package();
        let resolver = MaterialResolver::new();
        // null handles are fine
        pkg.save_strict(&resolver).unwrap();

        pkg.submodels_mut().next().unwrap().material = MaterialHandle::globals(0);
        assert_eq!(resolver.unresolved(&pkg).len(), 1);
        assert!(matches!(
            pkg.save_strict(&resolver),
            Err(Error::UnresolvedMaterial { index: 0, source_id: 0xCCCC })
        ));
        // lenient save still works
        pkg.save().unwrap();
    }

    #[test]
    fn test_find_globals() {
        let mut tree = SpoolerTree::with_root(context::SPOOLER_ROOT, 1, 4, SpillPolicy::default()).unwrap();
        let root = tree.root().unwrap();
        let body = tree
            .new_buffer(context::MODEL_PACKAGE_PC, 6, 4, quad_package().save().unwrap())
            .unwrap();
        tree.add_child(root, body).unwrap();
        assert_eq!(find_globals(&tree), None);

        let globals = tree.new_package(context::VEHICLE_GLOBALS, 0, 4).unwrap();
        let pkg = tree
            .new_buffer(context::MODEL_PACKAGE_PC, 6, 4, quad_package().save().unwrap())
            .unwrap();
        tree.add_child(globals, pkg).unwrap();
        tree.add_child(root, globals).unwrap();
        assert_eq!(find_globals(&tree), Some(pkg));
    }
}
