//! Bindings of a Mach-O image.
//!
//! Pointers to symbols of other images (like `__cxa_pure_virtual` or
//! the vtables of RTTI classes) are zero in the file and filled by
//! dyld, the bind opcodes of `LC_DYLD_INFO` tell which symbol is
//! bound to which address. Decoding of the opcodes is left to
//! goblin's bind interpreter.

use std::collections::BTreeMap;

use goblin::mach::load_command::CommandVariant;
use goblin::mach::MachO;
use log::debug;

use crate::error::{Error, Result};


/// Read the regular and lazy bindings of a Mach-O image, the raw
/// symbol names are associated to the address of the bound pointer.
pub fn read_bindings(data: &[u8]) -> Result<BTreeMap<u64, String>> {

    let macho = MachO::parse(data, 0)?;

    let has_dyld_info = macho.load_commands.iter().any(|command| {
        matches!(command.command, CommandVariant::DyldInfo(_) | CommandVariant::DyldInfoOnly(_))
    });

    if !has_dyld_info {
        return Err(Error::MissingDyldInfo);
    }

    let imports = macho.imports()?;
    debug!("decoded {} bindings", imports.len());

    // Lazy binds come after regular ones, the last bind of a pointer wins.
    Ok(imports.into_iter()
        .map(|import| (import.address, import.name.to_string()))
        .collect())

}
