use std::fmt::{self, Write};

use super::{TypeSystem, Type, DataType};


/// Display a type with structure names and function signatures
/// resolved through a type system.
pub struct TypeDisplay<'a> {
    system: &'a TypeSystem,
    ty: Type,
}

impl<'a> TypeDisplay<'a> {

    #[inline]
    pub(super) fn new(system: &'a TypeSystem, ty: Type) -> Self {
        Self { system, ty }
    }

}

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {

        match self.ty.data_type {
            DataType::Void => f.write_str("void")?,
            DataType::Byte => f.write_str("int8_t")?,
            DataType::Word => f.write_str("int16_t")?,
            DataType::Dword => f.write_str("int32_t")?,
            DataType::Qword => f.write_str("int64_t")?,
            DataType::Struct(handle) => match self.system.struct_def(handle) {
                Some(def) => write!(f, "struct {}", def.name())?,
                None => write!(f, "struct #{}", handle.0)?,
            }
            DataType::Function(handle) => match self.system.function_def(handle) {
                Some(def) => write!(f, "fn {}", def.signature())?,
                None => write!(f, "fn #{}", handle.0)?,
            }
        }

        for _ in 0..self.ty.pointer_level {
            f.write_char('*')?;
        }

        if self.ty.array_len > 1 {
            write!(f, "[{}]", self.ty.array_len)?;
        }

        Ok(())

    }
}
