//! Human readable listings of extracted vtables and built types.

use std::fmt;

use colored::Colorize;

use crate::extract::{TypeInfo, TypeInfoClass, VTable};
use crate::ty::{StructType, TypeSystem};


struct TypeInfoDisplay<'a> {
    typeinfo: &'a TypeInfo,
    indent: usize,
}

impl fmt::Display for TypeInfoDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {

        let prefix = "\t".repeat(self.indent);
        writeln!(f, "{prefix}type: {}", self.typeinfo.class_name().cyan())?;
        writeln!(f, "{prefix}name: _Z{}", self.typeinfo.name)?;

        match &self.typeinfo.class {
            TypeInfoClass::Class => {}
            TypeInfoClass::SiClass { base } => {
                if let Some(base) = base {
                    write!(f, "{}", TypeInfoDisplay { typeinfo: base, indent: self.indent + 1 })?;
                }
            }
            TypeInfoClass::VmiClass { flags, bases, .. } => {
                writeln!(f, "{prefix}flags: 0x{flags:X}")?;
                for base in bases {
                    writeln!(f, "{prefix}base at offset {} (flags 0x{:02X}):", base.offset, base.flags)?;
                    match &base.base {
                        Some(typeinfo) => write!(f, "{}", TypeInfoDisplay { typeinfo, indent: self.indent + 1 })?,
                        None => writeln!(f, "{prefix}\t{}", "external".dimmed())?,
                    }
                }
            }
        }

        Ok(())

    }
}


/// Display a vtable group, with its typeinfo and its slots.
pub struct VTableDisplay<'a>(pub &'a VTable);

impl fmt::Display for VTableDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {

        let vtable = self.0;
        writeln!(f, "{} = 0x{:08x}", vtable.symbol.bold(), vtable.address)?;
        writeln!(f, "\ttypeinfo:")?;
        write!(f, "{}", TypeInfoDisplay { typeinfo: &vtable.typeinfo, indent: 2 })?;

        let primary_len = vtable.vftables.first().map(Vec::len).unwrap_or(0);
        writeln!(f, "\tnumber of vtable methods: {primary_len}")?;

        for (index, vftable) in vtable.vftables.iter().enumerate() {
            if index != 0 {
                writeln!(f, "\tsecondary vftable #{index}:")?;
            }
            for (member, name) in vftable.iter().enumerate() {
                writeln!(f, "\t{} is at offset {} (member# {member})", name.yellow(), member as u64 * vtable.pointer_size)?;
            }
        }

        Ok(())

    }
}


/// Display a structure definition with the offset and type of each
/// of its fields.
pub struct StructDisplay<'a> {
    pub system: &'a TypeSystem,
    pub ty: StructType,
}

impl fmt::Display for StructDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {

        let Some(def) = self.system.struct_def(self.ty) else {
            return writeln!(f, "{}", "<undefined struct>".red());
        };

        write!(f, "{} {}", "struct".blue(), def.name().bold())?;
        if def.is_opaque() {
            return writeln!(f, " {}", "// opaque".dimmed());
        }

        let mut comment = format!("// size 0x{:X}", def.size());
        if def.pointer_offset() != 0 {
            comment.push_str(&format!(", pointed at +0x{:X}", def.pointer_offset()));
        }
        writeln!(f, " {{ {}", comment.dimmed())?;

        for field in def.fields() {
            writeln!(f, "    +0x{:02X} {} {};", field.offset(), self.system.display(field.ty()), field.name())?;
        }

        writeln!(f, "}}")

    }
}


pub fn print_vtables(vtables: &[VTable]) {
    for vtable in vtables {
        print!("{}", VTableDisplay(vtable));
    }
}

pub fn print_struct(system: &TypeSystem, ty: StructType) {
    print!("{}", StructDisplay { system, ty });
}
