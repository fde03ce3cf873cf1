//! Error type shared by the whole crate.

use thiserror::Error;


/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All errors that can be raised while extracting vtables from a
/// binary or importing them into a type system.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed vtable description: {0}")]
    Json(#[from] serde_json::Error),
    /// The class symbol of a vtable description cannot be demangled.
    #[error("failed to demangle `{0}`")]
    Demangle(String),
    /// Two descriptions of the same import produce the same type name.
    #[error("type `{name}` is produced by more than one vtable description")]
    DuplicateType { name: String },
    #[error("field `{field}` of `{structure}` has a type of unknown layout")]
    UnsizedField { structure: String, field: String },
    /// An undo state was committed or reverted out of order.
    #[error("undo state is not the innermost open one")]
    UndoState,
    #[error("command `{0}` is already registered")]
    DuplicateCommand(String),
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("object parse error: {0}")]
    Object(#[from] object::read::Error),
    #[error("mach-o parse error: {0}")]
    Goblin(#[from] goblin::error::Error),
    #[error("unsupported binary format: {0}")]
    UnsupportedFormat(String),
    #[error("no dyld info, can't get bindings")]
    MissingDyldInfo,
    #[error("address 0x{0:08X} is not mapped")]
    UnmappedAddress(u64),
    /// The first word of a typeinfo is not bound to any RTTI class.
    #[error("there should be a typeinfo class symbol at 0x{0:08X}")]
    MissingTypeInfoClass(u64),
    #[error("unknown RTTI type: {0}")]
    UnknownTypeInfo(String),
    /// A symbol starts in the middle of a vtable header.
    #[error("symbol found inside vtable header at 0x{0:08X}")]
    SymbolInHeader(u64),
    #[error("malformed binary: {0}")]
    Malformed(String),
}
