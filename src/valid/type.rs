use super::{check_width, Validator};

impl Validator {
    pub(super) fn validate_types(&mut self, module: &crate::Module) {
        use crate::TypeInner as Ti;

        for (handle, ty) in module.types.iter() {
            let mut valid = true;
            // A compound type may only refer to types validated before it,
            // which also rules out self-references and cycles.
            let mut check_base = |validator: &mut Self, base: crate::Handle<crate::Type>| {
                if module.types.try_get(base).is_none() {
                    validator.module_error(format!(
                        "type {:?} refers to type {:?}, which is out of range",
                        handle, base
                    ));
                    false
                } else if !validator.valid_types.contains(base.index()) {
                    validator.module_error(format!(
                        "type {:?} refers to type {:?}, which is not declared before it",
                        handle, base
                    ));
                    false
                } else {
                    true
                }
            };

            match ty.inner {
                Ti::Scalar { kind, width } | Ti::Vector { kind, width, .. } => {
                    if !check_width(kind, width) {
                        self.module_error(format!(
                            "type {:?} has invalid width {} for {:?}",
                            handle, width, kind
                        ));
                        valid = false;
                    }
                }
                Ti::Matrix { width, .. } => {
                    if !check_width(crate::ScalarKind::Float, width) {
                        self.module_error(format!(
                            "matrix type {:?} has invalid width {}",
                            handle, width
                        ));
                        valid = false;
                    }
                }
                Ti::Atomic { kind, width } => match kind {
                    crate::ScalarKind::Sint | crate::ScalarKind::Uint => {
                        if !check_width(kind, width) {
                            self.module_error(format!(
                                "atomic type {:?} has invalid width {}",
                                handle, width
                            ));
                            valid = false;
                        }
                    }
                    crate::ScalarKind::Float | crate::ScalarKind::Bool => {
                        self.module_error(format!(
                            "atomic type {:?} must wrap an integer scalar, not {:?}",
                            handle, kind
                        ));
                        valid = false;
                    }
                },
                Ti::Pointer { base, space: _ } => {
                    valid &= check_base(self, base);
                }
                Ti::ValuePointer { .. } => {
                    self.module_error(format!(
                        "type {:?} is a value pointer, which may not appear in the type arena",
                        handle
                    ));
                    valid = false;
                }
                Ti::Array { base, size, stride } => {
                    valid &= check_base(self, base);
                    if stride == 0 {
                        self.module_error(format!("array type {:?} has zero stride", handle));
                        valid = false;
                    }
                    if let crate::ArraySize::Constant(0) = size {
                        self.module_error(format!("array type {:?} has zero size", handle));
                        valid = false;
                    }
                }
                Ti::Struct { ref members, .. } => {
                    let mut names = crate::FastHashSet::default();
                    for (index, member) in members.iter().enumerate() {
                        valid &= check_base(self, member.ty);
                        match member.name {
                            Some(ref name) if !name.is_empty() => {
                                if !names.insert(name.as_str()) {
                                    self.module_error(format!(
                                        "struct type {:?} has a duplicate member name {:?}",
                                        handle, name
                                    ));
                                    valid = false;
                                }
                            }
                            _ => {
                                self.module_error(format!(
                                    "member {} of struct type {:?} has no name",
                                    index, handle
                                ));
                                valid = false;
                            }
                        }
                    }
                }
                Ti::Image { .. } | Ti::Sampler { .. } => {}
            }

            if valid {
                self.valid_types.insert(handle.index());
            }
        }
    }

    pub(super) fn validate_constants(&mut self, module: &crate::Module) {
        use crate::TypeInner as Ti;

        for (handle, constant) in module.constants.iter() {
            let ty = match module.types.try_get(constant.ty) {
                Some(ty) => ty,
                None => {
                    self.module_error(format!(
                        "constant {:?} has an out of range type {:?}",
                        handle, constant.ty
                    ));
                    continue;
                }
            };
            match constant.inner {
                crate::ConstantInner::Scalar { width, value } => {
                    let kind = match value {
                        crate::ScalarValue::Sint(_) => crate::ScalarKind::Sint,
                        crate::ScalarValue::Uint(_) => crate::ScalarKind::Uint,
                        crate::ScalarValue::Float(_) => crate::ScalarKind::Float,
                        crate::ScalarValue::Bool(_) => crate::ScalarKind::Bool,
                    };
                    if !check_width(kind, width) {
                        self.module_error(format!(
                            "constant {:?} has invalid width {} for {:?}",
                            handle, width, kind
                        ));
                    }
                    match ty.inner {
                        Ti::Scalar {
                            kind: ty_kind,
                            width: ty_width,
                        } if ty_kind == kind && ty_width == width => {}
                        _ => self.module_error(format!(
                            "scalar constant {:?} disagrees with its type {:?}",
                            handle, constant.ty
                        )),
                    }
                }
                crate::ConstantInner::Composite { ref components } => {
                    for &component in components {
                        if component >= handle {
                            self.module_error(format!(
                                "constant {:?} refers to component {:?}, which is not declared before it",
                                handle, component
                            ));
                        }
                    }
                    let component_types: Option<Vec<_>> = components
                        .iter()
                        .map(|&component| {
                            module.constants.try_get(component).map(|c| c.ty)
                        })
                        .collect();
                    let component_types = match component_types {
                        Some(tys) => tys,
                        None => continue,
                    };
                    match ty.inner {
                        Ti::Struct { ref members, .. } => {
                            if members.len() != components.len() {
                                self.module_error(format!(
                                    "composite constant {:?} has {} components, but its struct type has {} members",
                                    handle, components.len(), members.len()
                                ));
                            } else {
                                for (member, &comp_ty) in members.iter().zip(&component_types) {
                                    if member.ty != comp_ty {
                                        self.module_error(format!(
                                            "composite constant {:?} has a component of type {:?} where {:?} is expected",
                                            handle, comp_ty, member.ty
                                        ));
                                    }
                                }
                            }
                        }
                        Ti::Array {
                            base,
                            size: crate::ArraySize::Constant(count),
                            ..
                        } => {
                            if components.len() as u32 != count {
                                self.module_error(format!(
                                    "composite constant {:?} has {} components, but its array type has {}",
                                    handle, components.len(), count
                                ));
                            }
                            for &comp_ty in &component_types {
                                if comp_ty != base {
                                    self.module_error(format!(
                                        "composite constant {:?} has a component of type {:?} where {:?} is expected",
                                        handle, comp_ty, base
                                    ));
                                }
                            }
                        }
                        Ti::Vector { size, kind, width } => {
                            if components.len() != size as usize {
                                self.module_error(format!(
                                    "composite constant {:?} has {} components, but its vector type has {}",
                                    handle, components.len(), size as u32
                                ));
                            }
                            for &comp_ty in &component_types {
                                match module.types.try_get(comp_ty).map(|t| &t.inner) {
                                    Some(&Ti::Scalar {
                                        kind: ck,
                                        width: cw,
                                    }) if ck == kind && cw == width => {}
                                    _ => self.module_error(format!(
                                        "vector constant {:?} has a non-matching component type {:?}",
                                        handle, comp_ty
                                    )),
                                }
                            }
                        }
                        Ti::Matrix { columns, .. } => {
                            if components.len() != columns as usize {
                                self.module_error(format!(
                                    "composite constant {:?} has {} components, but its matrix type has {} columns",
                                    handle, components.len(), columns as u32
                                ));
                            }
                        }
                        _ => self.module_error(format!(
                            "composite constant {:?} disagrees with its type {:?}",
                            handle, constant.ty
                        )),
                    }
                }
            }
        }
    }
}
