//! # VTable types importer
//! 
//! This crate recovers C++ class layouts from binaries. Vtables 
//! are first extracted from a Mach-O binary into a JSON description,
//! which is then imported as structure types into the type system
//! of an analysis session: for each class, a structure holding the
//! vtable pointer and a structure for the vtable itself, with one
//! function pointer per virtual method.
//! 
//! The import runs in undo actions of the type system, so it either
//! defines every type of the description or none.

use std::path::Path;

pub mod ty;
pub mod demangle;
pub mod descriptor;
pub mod builder;
pub mod import;
pub mod plugin;
pub mod extract;
pub mod print;

mod error;
pub use error::{Error, Result};

use descriptor::VTableFile;
use import::{ImportReport, Importer};
use ty::TypeSystem;


/// Extract the description of all vtables of a Mach-O binary.
pub fn extract(data: &[u8]) -> Result<VTableFile> {
    let extractor = extract::VTableExtractor::parse(data)?;
    Ok(extract::to_file(&extractor.get_vtables()))
}

/// Import a vtables description file into the given type system,
/// with default options.
pub fn import<P: AsRef<Path>>(types: &mut TypeSystem, path: P) -> Result<ImportReport> {
    Importer::default().import_file(types, path)
}
