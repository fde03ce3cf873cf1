//! JSON description of vtables, this is the format written by the
//! extractor and read by the importer.
//! 
//! ```json
//! {
//!   "vtables": [
//!     {
//!       "typeinfo": { "name": "N2NS3FooE" },
//!       "vftables": [ ["_ZN2NS3Foo3barEv", "__cxa_pure_virtual"] ]
//!     }
//!   ]
//! }
//! ```

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;


/// Root of a vtables description file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VTableFile {
    pub vtables: Vec<VTableDescriptor>,
}

/// Description of the vtable of a single class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VTableDescriptor {
    /// Address of the vtable symbol in the binary, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<u64>,
    /// Typeinfo of the class owning the vtable.
    pub typeinfo: TypeInfoDescriptor,
    /// All virtual function tables, the first one is the primary
    /// table and the others are secondary tables of multiple
    /// inheritance. Each table lists the mangled symbols of its
    /// slots, in order.
    #[serde(default)]
    pub vftables: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeInfoDescriptor {
    /// The typeinfo name, this is the mangled class name without
    /// its leading `_Z`.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TypeInfoKind>,
    /// Flags of a multiple inheritance typeinfo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bases: Vec<BaseClassDescriptor>,
}

/// Kind of class typeinfo, as defined by the Itanium C++ ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeInfoKind {
    /// `__class_type_info`, a class without base.
    Class,
    /// `__si_class_type_info`, single public non-virtual base.
    SiClass,
    /// `__vmi_class_type_info`, any other inheritance.
    VmiClass,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseClassDescriptor {
    /// Typeinfo name of the base, unknown if the base typeinfo
    /// is defined outside of the binary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub flags: u8,
}

impl VTableFile {

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Write this file as pretty-printed JSON.
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

}

impl VTableDescriptor {

    /// Create a descriptor with only the fields needed to import it.
    pub fn new<S: Into<String>>(typeinfo_name: S, vftables: Vec<Vec<String>>) -> Self {
        Self {
            address: None,
            typeinfo: TypeInfoDescriptor {
                name: typeinfo_name.into(),
                kind: None,
                flags: None,
                bases: Vec::new(),
            },
            vftables,
        }
    }

    /// The mangled symbol of the class.
    pub fn mangled_class_name(&self) -> String {
        format!("_Z{}", self.typeinfo.name)
    }

    /// Symbols of the primary vftable, empty if there is no table.
    pub fn primary_vftable(&self) -> &[String] {
        self.vftables.first().map(Vec::as_slice).unwrap_or(&[])
    }

}
