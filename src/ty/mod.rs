//! Data type system.
//! 
//! This is the type database of an analysis session, structures
//! are registered by name and can therefore be referenced before
//! being defined, they stay opaque until a [`StructBuilder`] 
//! defines them. All mutations can be grouped in undo actions,
//! see [`TypeSystem::begin_undo_actions`].

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::{self, Write as _};

use crate::error::{Error, Result};

mod undo;
pub use undo::UndoState;

mod display;
pub use display::TypeDisplay;


/// A structure for querying [`DataType`]'s properties, such
/// as size, alignement.
#[derive(Debug)]
pub struct TypeSystem {
    /// Size of pointers on this system, in bytes.
    pointer_size: u32,
    /// All registered types, this is the part of the type
    /// system that is saved and restored by undo actions.
    registry: Registry,
    /// Stack of currently open undo actions.
    undo: undo::UndoStack,
}

/// Registered types of a type system.
#[derive(Debug, Clone, Default)]
struct Registry {
    /// Registered structure types.
    structs: Vec<StructDef>,
    /// Association between structure names and their index
    /// in the structure vector.
    structs_named: HashMap<String, u32>,
    /// Registered function types.
    functions: Vec<FunctionDef>,
    /// Association between function signatures and their index
    /// in the function vector.
    functions_named: HashMap<String, u32>,
}

impl TypeSystem {

    pub fn new(pointer_size: u32) -> Self {
        Self {
            pointer_size,
            registry: Registry::default(),
            undo: undo::UndoStack::default(),
        }
    }

    #[inline]
    pub fn pointer_size(&self) -> u32 {
        self.pointer_size
    }

    /// Get the layout of a type, consisting of its size and
    /// alignment returned in a tuple (in this order).
    /// 
    /// The size follow the same specification as Rust's one:
    /// > This is the offset in bytes between successive 
    /// > elements in an array with that item type including
    /// > alignment padding
    /// 
    /// The size and alignment depends on the type system 
    /// because the pointer size is depending on the system.
    /// Functions and opaque structures have no layout, they
    /// can only be used behind a pointer.
    /// 
    /// The values are returned in bytes.
    pub fn layout(&self, ty: Type) -> Option<(u32, u32)> {
        
        let (size, align) = if ty.pointer_level > 0 {
            (self.pointer_size, self.pointer_size)
        } else {
            match ty.data_type {
                DataType::Void => (0, 0),
                DataType::Byte => (1, 1),
                DataType::Word => (2, 2),
                DataType::Dword => (4, 4),
                DataType::Qword => (8, 8),
                DataType::Function(_) => return None,
                DataType::Struct(handle) => {
                    let s = self.registry.structs.get(handle.0 as usize)?;
                    if s.opaque {
                        return None;
                    }
                    (s.size, s.align)
                }
            }
        };

        Some((size * ty.array_len as u32, align))

    }

    /// Get a struct type from its name, if no structure is found,
    /// None is returned.
    pub fn get_struct(&self, name: &str) -> Option<StructType> {
        self.registry.structs_named.get(name).copied().map(StructType)
    }

    /// Get the definition of a structure type.
    pub fn struct_def(&self, ty: StructType) -> Option<&StructDef> {
        self.registry.structs.get(ty.0 as usize)
    }

    /// Iterate over all registered structures, opaque ones included.
    pub fn iter_structs(&self) -> impl Iterator<Item = (StructType, &StructDef)> + '_ {
        self.registry.structs.iter()
            .enumerate()
            .map(|(idx, def)| (StructType(idx as u32), def))
    }

    /// Create a new structure given its name. If a structure already
    /// exists with this name, the current type is returned. This is
    /// how named type references are obtained: the returned handle
    /// stays valid when the structure is (re)defined.
    /// 
    /// The created structure is "opaque".
    pub fn new_struct<S: Into<String>>(&mut self, name: S) -> StructType {
        let name: String = name.into();
        let registry = &mut self.registry;
        match registry.structs_named.entry(name.clone()) {
            Entry::Occupied(o) => StructType(*o.into_mut()),
            Entry::Vacant(v) => {
                let idx = registry.structs.len() as u32;
                registry.structs.push(StructDef::new_opaque(name));
                v.insert(idx);
                StructType(idx)
            }
        }
    }

    /// Given a created structure, returns a builder for constructing 
    /// it. Returns None if the given structure type does not exists 
    /// in this type system.
    #[must_use]
    pub fn define_struct(&mut self, ty: StructType) -> Option<StructBuilder<'_>> {
        if (ty.0 as usize) < self.registry.structs.len() {
            Some(StructBuilder::new(self, ty))
        } else {
            None
        }
    }

    /// Combine [`Self::new_struct`] and [`Self::define_struct`].
    #[must_use]
    pub fn define_new_struct<S: Into<String>>(&mut self, name: S) -> StructBuilder<'_> {
        let ty = self.new_struct(name);
        StructBuilder::new(self, ty)
    }

    /// Register a function type from its signature, functions with
    /// the same signature share the same type.
    pub fn new_function<S: Into<String>>(&mut self, signature: S) -> FunctionType {
        let signature: String = signature.into();
        let registry = &mut self.registry;
        match registry.functions_named.entry(signature.clone()) {
            Entry::Occupied(o) => FunctionType(*o.into_mut()),
            Entry::Vacant(v) => {
                let idx = registry.functions.len() as u32;
                registry.functions.push(FunctionDef { signature });
                v.insert(idx);
                FunctionType(idx)
            }
        }
    }

    /// Get the definition of a function type.
    pub fn function_def(&self, ty: FunctionType) -> Option<&FunctionDef> {
        self.registry.functions.get(ty.0 as usize)
    }

    /// Return a displayable wrapper that resolves structure names
    /// and function signatures of the given type.
    #[inline]
    pub fn display(&self, ty: Type) -> TypeDisplay<'_> {
        TypeDisplay::new(self, ty)
    }

}


/// A builder that should be used to define a structure.
pub struct StructBuilder<'a> {
    /// The type system back reference, used when defining fields.
    system: &'a mut TypeSystem,
    /// The actual structure type being built.
    ty: StructType,
    /// Current packing status for next fields.
    packed: bool,
    /// Current size of the structure.
    size: u32,
    /// Current alignment of the structure.
    align: u32,
    /// Offset where pointers to this structure points to.
    pointer_offset: u32,
    /// All field definitions.
    fields: Vec<FieldDef>,
}

impl<'a> StructBuilder<'a> {

    fn new(system: &'a mut TypeSystem, ty: StructType) -> Self {
        Self {
            system,
            ty,
            packed: false,
            size: 0,
            align: 0,
            pointer_offset: 0,
            fields: Vec::new(),
        }
    }

    /// Make the next fields packed after the current ones,
    /// no padding will be added and fields might be
    /// misaligned.
    #[inline]
    pub fn packed(&mut self) -> &mut Self {
        self.packed = true;
        self
    }

    /// Make the next fields padded in order to be aligned
    /// to their type's alignment. **This is the default
    /// behaviour.**
    #[inline]
    pub fn padded(&mut self) -> &mut Self {
        self.packed = false;
        self
    }

    /// Set the offset, from the start of the structure, that
    /// pointers to this structure actually point to. This is 
    /// typically used for vtables, which are pointed past their 
    /// header.
    #[inline]
    pub fn pointer_offset(&mut self, offset: u32) -> &mut Self {
        self.pointer_offset = offset;
        self
    }

    /// Current size of the structure, without trailing padding.
    #[inline]
    pub fn width(&self) -> u32 {
        self.size
    }

    /// Add a field to this struct, using the current alignment
    /// configuration. The field type must have a known layout.
    pub fn field<S: Into<String>>(&mut self, name: S, ty: Type) -> Result<&mut Self> {
        
        let name: String = name.into();

        let Some((ty_size, ty_align)) = self.system.layout(ty) else {
            let structure = self.system.registry.structs[self.ty.0 as usize].name.clone();
            return Err(Error::UnsizedField { structure, field: name });
        };

        if !self.packed && ty_align != 0 {
            let field_misalignment = self.size % ty_align;
            if field_misalignment != 0 {
                let field_misalignment = ty_align - field_misalignment; 
                self.size += field_misalignment;
            }
        }

        if ty_align > self.align {
            self.align = ty_align;
        }

        self.fields.push(FieldDef { 
            offset: self.size, 
            name, 
            ty,
        });

        self.size += ty_size;

        Ok(self)

    }

    /// Finally build the structure, applying all changes
    /// to the real structure definition.
    pub fn build(&mut self) -> StructType {

        // Same as for fields, we pad the size of this structure.
        if self.align != 0 {
            let struct_misalignment = self.size % self.align;
            if struct_misalignment != 0 {
                let struct_misalignment = self.align - struct_misalignment;
                self.size += struct_misalignment;
            }
        }

        let def = &mut self.system.registry.structs[self.ty.0 as usize];

        def.fields.splice(.., self.fields.iter().cloned());
        def.opaque = false;
        def.size = self.size;
        def.align = self.align;
        def.pointer_offset = self.pointer_offset;

        self.ty

    }

}


/// An opaque pointer to a structure definition. 
/// This type is defined to be small, and to fit in 
/// the small [`DataType`] enumeration and can be 
/// promoted to using `into` implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructType(u32);

impl StructType {

    /// Convert this struct type to an usable type.
    pub const fn to_type(self) -> Type {
        DataType::Struct(self).to_type()
    }

}


/// An opaque pointer to a function definition, see [`StructType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionType(u32);

impl FunctionType {

    /// Convert this function type to an usable type.
    pub const fn to_type(self) -> Type {
        DataType::Function(self).to_type()
    }

}


/// All real types, no indirection can be defined using this
/// enumeration, look at [`Type`] for full type definition,
/// with optionnal indirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// No byte, used to represent no data returned by function.
    Void,
    /// A single byte.
    Byte,
    /// Integer of 2 bytes.
    Word,
    /// Integer of 4 bytes.
    Dword,
    /// Integer of 8 bytes.
    Qword,
    /// A struct type.
    Struct(StructType),
    /// A function type, only usable behind a pointer.
    Function(FunctionType),
}

impl DataType {

    /// Convert this data type to an usable type.
    pub const fn to_type(self) -> Type {
        Type {
            data_type: self,
            pointer_level: 0,
            array_len: 1,
        }
    }

}


/// A type that optionnaly wraps a primitive type behind a given
/// level of indirection.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Type {
    /// The type pointed by if there are indirection,
    /// or the type itself it not.
    pub data_type: DataType,
    /// If greater than 0, this indicates that the type
    /// is a pointer of a specific level to the data type.
    /// Level 1 means `type*`, 2 means `type**` and so on.
    pub pointer_level: u8,
    /// The length of the array. Used to define an array
    /// type, note that multidimensionnal arrays is not
    /// currently possible, and that an array length of
    /// 1 is not considered as an array, and 0 as invalid.
    pub array_len: u16,
}

impl Type {

    pub const VOID: Self = DataType::Void.to_type();
    pub const BYTE: Self = DataType::Byte.to_type();
    pub const WORD: Self = DataType::Word.to_type();
    pub const DWORD: Self = DataType::Dword.to_type();
    pub const QWORD: Self = DataType::Qword.to_type();

    /// Return a new type that is a pointer to the data type,
    /// of the given level. Level 0 means that it's not a pointer.
    pub const fn to_pointer(&self, level: u8) -> Self {
        Self {
            data_type: self.data_type,
            pointer_level: level,
            array_len: self.array_len,
        }
    }

    /// Return a pointer to this type, adding one level of 
    /// indirection.
    pub const fn pointer(&self) -> Self {
        self.to_pointer(self.pointer_level + 1)
    }

    pub const fn to_array(&self, len: u16) -> Self {
        Self {
            data_type: self.data_type,
            pointer_level: self.pointer_level,
            array_len: len,
        }
    }

    /// Integer type of the given width in bytes, if supported.
    pub fn int(size: u16) -> Option<Self> {
        match size {
            1 => Some(Self::BYTE),
            2 => Some(Self::WORD),
            4 => Some(Self::DWORD),
            8 => Some(Self::QWORD),
            _ => None,
        }
    }

}

impl From<DataType> for Type {
    fn from(ty: DataType) -> Self {
        ty.to_type()
    }
}

impl From<StructType> for Type {
    fn from(ty: StructType) -> Self {
        ty.to_type()
    }
}

impl From<FunctionType> for Type {
    fn from(ty: FunctionType) -> Self {
        ty.to_type()
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {

        f.write_str(match self.data_type {
            DataType::Void => "void",
            DataType::Byte => "byte",
            DataType::Word => "word",
            DataType::Dword => "dword",
            DataType::Qword => "qword",
            DataType::Struct(_) => "struct",
            DataType::Function(_) => "fn",
        })?;

        for _ in 0..self.pointer_level {
            f.write_char('*')?;
        }

        if self.array_len > 1 {
            write!(f, "[{}]", self.array_len)?;
        }

        Ok(())

    }
}


/// Represent the complex definition of a structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDef {
    /// Type name.
    name: String,
    /// Fields of this structure type.
    fields: Vec<FieldDef>,
    /// This structure is opaque. Can only be used behind a
    /// pointer.
    opaque: bool,
    /// Size of this structure, in bytes.
    size: u32,
    /// Alignment of this structure, in bytes.
    align: u32,
    /// Offset where pointers to this structure points to.
    pointer_offset: u32,
}

/// Represent the complex definition of a structure field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Offset of the field.
    offset: u32,
    /// Name of the field.
    name: String,
    /// Type of the field.
    ty: Type,
}

/// Represent a function type, known by its demangled signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDef {
    signature: String,
}

impl StructDef {

    fn new_opaque(name: String) -> Self {
        Self {
            name,
            fields: Vec::new(),
            opaque: true,
            size: 0,
            align: 0,
            pointer_offset: 0,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    #[inline]
    pub fn is_opaque(&self) -> bool {
        self.opaque
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn align(&self) -> u32 {
        self.align
    }

    #[inline]
    pub fn pointer_offset(&self) -> u32 {
        self.pointer_offset
    }

    /// Find a field by its name, the first one is returned if
    /// multiple fields share the same name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

}

impl FieldDef {

    #[inline]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn ty(&self) -> Type {
        self.ty
    }

}

impl FunctionDef {

    #[inline]
    pub fn signature(&self) -> &str {
        &self.signature
    }

}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn fields_are_padded_to_their_alignment() {
        let mut types = TypeSystem::new(8);
        let ty = types.define_new_struct("header")
            .field("offset_to_top", Type::DWORD).unwrap()
            .field("typeinfo", Type::VOID.pointer()).unwrap()
            .build();
        let def = types.struct_def(ty).unwrap();
        assert!(!def.is_opaque());
        assert_eq!(def.fields()[0].offset(), 0);
        assert_eq!(def.fields()[1].offset(), 8);
        assert_eq!((def.size(), def.align()), (16, 8));
        assert_eq!(types.layout(ty.to_type()), Some((16, 8)));
    }

    #[test]
    fn packed_fields_and_trailing_padding() {
        let mut types = TypeSystem::new(4);
        let ty = types.define_new_struct("packed")
            .packed()
            .field("a", Type::BYTE).unwrap()
            .field("b", Type::DWORD).unwrap()
            .padded()
            .field("c", Type::BYTE.to_array(3)).unwrap()
            .build();
        let def = types.struct_def(ty).unwrap();
        let offsets: Vec<u32> = def.fields().iter().map(FieldDef::offset).collect();
        assert_eq!(offsets, [0, 1, 5]);
        assert_eq!(def.size(), 8);
    }

    #[test]
    fn named_reference_resolves_after_definition() {
        let mut types = TypeSystem::new(8);
        let inner = types.new_struct("inner");
        assert_eq!(types.layout(inner.to_type()), None);
        assert_eq!(types.layout(inner.to_type().pointer()), Some((8, 8)));

        let outer = types.define_new_struct("outer")
            .field("inner", inner.to_type().pointer()).unwrap()
            .build();

        types.define_struct(inner).unwrap()
            .field("value", Type::QWORD).unwrap()
            .pointer_offset(8)
            .build();

        assert_eq!(types.new_struct("inner"), inner);
        assert_eq!(types.get_struct("outer"), Some(outer));
        assert_eq!(types.struct_def(inner).unwrap().pointer_offset(), 8);
        assert_eq!(types.layout(inner.to_type()), Some((8, 8)));
    }

    #[test]
    fn unsized_field_is_an_error() {
        let mut types = TypeSystem::new(8);
        let func = types.new_function("Foo::bar()");
        let opaque = types.new_struct("opaque");
        let mut builder = types.define_new_struct("broken");
        assert!(matches!(
            builder.field("f", func.to_type()),
            Err(Error::UnsizedField { ref field, .. }) if field == "f"
        ));
        assert!(builder.field("o", opaque.to_type()).is_err());
        assert!(builder.field("p", func.to_type().pointer()).is_ok());
    }

    #[test]
    fn integers_by_width() {
        let types = TypeSystem::new(8);
        for width in [1, 2, 4, 8] {
            let ty = Type::int(width).unwrap();
            assert_eq!(types.layout(ty), Some((width as u32, width as u32)));
        }
        assert_eq!(Type::int(3), None);
        assert_eq!(Type::int(16), None);
    }

    #[test]
    fn functions_are_shared_by_signature() {
        let mut types = TypeSystem::new(8);
        let a = types.new_function("Foo::bar()");
        let b = types.new_function("Foo::bar()");
        let c = types.new_function("Foo::baz(int)");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(types.function_def(c).unwrap().signature(), "Foo::baz(int)");
    }

}
