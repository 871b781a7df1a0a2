//! Symbolic reference resolution.
//!
//! Resolution happens lazily at first execution of the referencing
//! instruction and the result is cached on the reference itself, so the
//! slow path runs once per site. Failures surface as the linkage-error
//! guest exceptions, which means they route through the exception tables
//! like any other throw.

use crate::insn::{ClassRef, FieldRef, MethodRef};
use crate::mirror::{ClassMirror, FieldMirror, MethodMirror};
use crate::vm::Vm;
use crucible_core::VmResult;
use std::sync::Arc;

/// Resolves a class reference, caching on the site.
pub fn resolve_class(vm: &Vm, site: &ClassRef) -> VmResult<Arc<ClassMirror>> {
    if let Some(cached) = site.cached() {
        return Ok(cached.clone());
    }
    let class = vm.find_class(&site.name)?;
    Ok(site.fill(class).clone())
}

/// Resolves a field reference to its declaring class and mirror.
///
/// The declaring class matters for statics: an inherited static field is
/// stored in the region of the class that declares it, not the class the
/// instruction names.
pub fn resolve_field(
    vm: &Vm,
    site: &FieldRef,
) -> VmResult<(Arc<ClassMirror>, Arc<FieldMirror>)> {
    if let Some((class, field)) = site.cached() {
        return Ok((class.clone(), field.clone()));
    }
    let owner = vm.find_class(&site.owner)?;
    let field = owner.find_field(&site.name).ok_or_else(|| {
        vm.raise(
            "java/lang/NoSuchFieldError",
            Some(format!("{}.{}", site.owner, site.name)),
        )
    })?;
    let declarer = owner.declarer_of(&field);
    let (class, field) = site.fill((declarer, field));
    Ok((class.clone(), field.clone()))
}

/// Resolves a method reference, caching on the site.
pub fn resolve_method(
    vm: &Vm,
    site: &MethodRef,
) -> VmResult<(Arc<ClassMirror>, Arc<MethodMirror>)> {
    if let Some((class, method)) = site.cached() {
        return Ok((class.clone(), method.clone()));
    }
    let owner = vm.find_class(&site.owner)?;
    let method = owner.find_method(&site.name, &site.desc).ok_or_else(|| {
        vm.raise(
            "java/lang/NoSuchMethodError",
            Some(format!("{}.{}{}", site.owner, site.name, site.desc)),
        )
    })?;
    let (class, method) = site.fill((owner, method));
    Ok((class.clone(), method.clone()))
}

/// Virtual dispatch: selects the implementation for the receiver's
/// dynamic class, falling back to the statically resolved method.
pub fn select_virtual(
    receiver_class: &Arc<ClassMirror>,
    resolved: &Arc<MethodMirror>,
) -> Arc<MethodMirror> {
    receiver_class
        .find_method(&resolved.name, &resolved.raw_desc)
        .unwrap_or_else(|| resolved.clone())
}
