//! Building structure types from vtable descriptions.
//! 
//! For a class `NS::Foo`, two structures are defined:
//! 
//! ```txt
//! struct NS::Foo {
//!     struct NS::vtable_for_Foo* vtable;
//! }
//! 
//! struct NS::vtable_for_Foo {      // pointed at offset sizeof(rtti)
//!     struct typeinfo_ptr rtti;
//!     fn NS::Foo::bar()* bar;
//!     void* __cxa_pure_virtual;
//! }
//! ```

use log::debug;

use crate::demangle::{Demangled, Demangler, Name};
use crate::descriptor::VTableDescriptor;
use crate::error::{Error, Result};
use crate::ty::{StructType, Type, TypeSystem};


/// The two structures built for a single vtable description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltVTable {
    /// Demangled name of the class, also the name of the class 
    /// structure.
    pub class_name: Name,
    /// Name of the vtable structure.
    pub vtable_name: Name,
    pub class: StructType,
    pub vtable: StructType,
    /// Number of slots typed as `void*` because no function type
    /// could be derived from their symbol.
    pub fallback_fields: usize,
}

/// Define the typeinfo pointer structure placed in front of every
/// vtable: the offset to the top of the object and the pointer to
/// the typeinfo.
pub fn build_typeinfo_ptr(types: &mut TypeSystem, name: &str) -> Result<StructType> {
    let offset_to_top = Type::int(4).ok_or_else(|| Error::UnsizedField {
        structure: name.to_string(),
        field: "offset_to_top".to_string(),
    })?;
    let mut builder = types.define_new_struct(name);
    builder
        .field("offset_to_top", offset_to_top)?
        .field("typeinfo", Type::VOID.pointer())?;
    Ok(builder.build())
}

/// Define the class and vtable structures of a vtable description.
/// 
/// Only the primary vftable is used. A slot whose symbol can't be
/// demangled is typed as `void*` and named after its raw symbol, 
/// but a class name that can't be demangled is an error.
pub fn build_vtable_type<D: Demangler>(
    types: &mut TypeSystem,
    demangler: &D,
    vtable_prefix: &str,
    descriptor: &VTableDescriptor,
    typeinfo_ptr: StructType,
) -> Result<BuiltVTable> {

    let mangled = descriptor.mangled_class_name();
    let class_name = demangler.demangle(&mangled)
        .ok_or_else(|| Error::Demangle(mangled.clone()))?
        .name;
    let vtable_name = class_name.with_last_prefixed(vtable_prefix);

    if descriptor.vftables.len() > 1 {
        debug!("{class_name}: ignoring {} secondary vftables", descriptor.vftables.len() - 1);
    }

    // Function types must be registered before borrowing the 
    // type system for building.
    let mut fallback_fields = 0;
    let mut fields = Vec::with_capacity(descriptor.primary_vftable().len());
    for symbol in descriptor.primary_vftable() {
        let (name, ty) = match demangler.demangle(symbol) {
            Some(Demangled { name, signature: Some(signature) }) => {
                (name.last().to_string(), types.new_function(signature).to_type())
            }
            Some(Demangled { name, signature: None }) => {
                debug!("{class_name}: no function type for {symbol}");
                fallback_fields += 1;
                (name.last().to_string(), Type::VOID)
            }
            None => {
                debug!("{class_name}: failed to demangle {symbol}");
                fallback_fields += 1;
                (symbol.clone(), Type::VOID)
            }
        };
        fields.push((name, ty.pointer()));
    }

    let vtable = {
        let mut builder = types.define_new_struct(vtable_name.to_string());
        let header = builder.field("rtti", typeinfo_ptr.to_type())?.width();
        for (name, ty) in fields {
            builder.field(name, ty)?;
        }
        // Vtable pointers go past the typeinfo.
        builder.pointer_offset(header);
        builder.build()
    };

    let class = {
        let mut builder = types.define_new_struct(class_name.to_string());
        builder.field("vtable", vtable.to_type().pointer())?;
        builder.build()
    };

    Ok(BuiltVTable {
        class_name,
        vtable_name,
        class,
        vtable,
        fallback_fields,
    })

}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::demangle::GnuDemangler;
    use crate::ty::DataType;

    fn descriptor(name: &str, slots: &[&str]) -> VTableDescriptor {
        VTableDescriptor::new(name, vec![slots.iter().map(|s| s.to_string()).collect()])
    }

    #[test]
    fn header_is_first_and_slots_follow() {
        for pointer_size in [4, 8] {
            let mut types = TypeSystem::new(pointer_size);
            let ti = build_typeinfo_ptr(&mut types, "typeinfo_ptr").unwrap();
            let (header_size, _) = types.layout(ti.to_type()).unwrap();

            let built = build_vtable_type(&mut types, &GnuDemangler, "vtable_for_", 
                &descriptor("3Foo", &["_ZN3Foo1aEv", "_ZN3Foo1bEi"]), ti).unwrap();

            let vtable = types.struct_def(built.vtable).unwrap();
            let fields = vtable.fields();
            assert_eq!(fields[0].name(), "rtti");
            assert_eq!(fields[0].offset(), 0);
            assert_eq!(fields[0].ty(), ti.to_type());
            assert_eq!(fields[1].offset(), header_size);
            assert_eq!(fields[2].offset(), header_size + pointer_size);
            assert_eq!(vtable.pointer_offset(), header_size);
            assert_eq!(built.fallback_fields, 0);
        }
    }

    #[test]
    fn slots_are_typed_from_signatures() {
        let mut types = TypeSystem::new(8);
        let ti = build_typeinfo_ptr(&mut types, "typeinfo_ptr").unwrap();
        let built = build_vtable_type(&mut types, &GnuDemangler, "vtable_for_", 
            &descriptor("3Foo", &["_ZN3Foo1bEi"]), ti).unwrap();

        let field = types.struct_def(built.vtable).unwrap().field("b").unwrap();
        let DataType::Function(func) = field.ty().data_type else {
            panic!("expected a function pointer, got {:?}", field.ty());
        };
        assert_eq!(field.ty().pointer_level, 1);
        assert_eq!(types.function_def(func).unwrap().signature(), "Foo::b(int)");
    }

    #[test]
    fn undemangled_slot_falls_back_to_void_pointer() {
        let mut types = TypeSystem::new(8);
        let ti = build_typeinfo_ptr(&mut types, "typeinfo_ptr").unwrap();
        let built = build_vtable_type(&mut types, &GnuDemangler, "vtable_for_",
            &descriptor("3Foo", &["__cxa_pure_virtual", "_ZN3Foo1aEv"]), ti).unwrap();

        let vtable = types.struct_def(built.vtable).unwrap();
        assert_eq!(vtable.fields()[1].name(), "__cxa_pure_virtual");
        assert_eq!(vtable.fields()[1].ty(), Type::VOID.pointer());
        assert_eq!(vtable.fields()[2].name(), "a");
        assert_eq!(built.fallback_fields, 1);
    }

    #[test]
    fn thunk_slot_falls_back_to_void_pointer() {
        let mut types = TypeSystem::new(8);
        let ti = build_typeinfo_ptr(&mut types, "typeinfo_ptr").unwrap();
        let built = build_vtable_type(&mut types, &GnuDemangler, "vtable_for_",
            &descriptor("3Foo", &["_ZThn8_N3Foo3barEv"]), ti).unwrap();

        let slot = types.struct_def(built.vtable).unwrap().field("bar").unwrap();
        assert_eq!(slot.ty(), Type::VOID.pointer());
        assert_eq!(built.fallback_fields, 1);
    }

    #[test]
    fn class_points_to_vtable() {
        let mut types = TypeSystem::new(8);
        let ti = build_typeinfo_ptr(&mut types, "typeinfo_ptr").unwrap();
        let built = build_vtable_type(&mut types, &GnuDemangler, "vtable_for_",
            &descriptor("N2NS3FooE", &[]), ti).unwrap();

        assert_eq!(built.class_name.to_string(), "NS::Foo");
        assert_eq!(built.vtable_name.to_string(), "NS::vtable_for_Foo");
        assert_eq!(types.get_struct("NS::Foo"), Some(built.class));
        assert_eq!(types.get_struct("NS::vtable_for_Foo"), Some(built.vtable));

        let class = types.struct_def(built.class).unwrap();
        assert_eq!(class.fields().len(), 1);
        assert_eq!(class.fields()[0].name(), "vtable");
        assert_eq!(class.fields()[0].ty(), built.vtable.to_type().pointer());

        // Only the typeinfo header without slots.
        assert_eq!(types.struct_def(built.vtable).unwrap().fields().len(), 1);
    }

    #[test]
    fn undemangled_class_is_an_error() {
        let mut types = TypeSystem::new(8);
        let ti = build_typeinfo_ptr(&mut types, "typeinfo_ptr").unwrap();
        let err = build_vtable_type(&mut types, &GnuDemangler, "vtable_for_",
            &descriptor("!!", &[]), ti).unwrap_err();
        assert!(matches!(err, Error::Demangle(ref sym) if sym == "_Z!!"));
    }

}
