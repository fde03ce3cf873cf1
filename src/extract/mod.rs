//! Extraction of vtables from Mach-O binaries.
//! 
//! Every `_ZTV` symbol is a vtable group, made of a primary vtable
//! and, for classes with multiple inheritance, secondary vtables.
//! Each vtable has the following layout (Itanium C++ ABI):
//! 
//! ```txt
//!  ┌──────────────────────┐
//!  │ vcall/vbase offsets  │ (only with virtual bases)
//!  ├──────────────────────┤
//!  │ offset to top        │
//!  ├──────────────────────┤
//!  │ typeinfo pointer     │ → _ZTI...
//!  ├──────────────────────┤ ← object's vtable pointer
//!  │ virtual function 0   │
//!  │ ...                  │
//!  └──────────────────────┘
//! ```
//! 
//! Slots are resolved from the local symbols they point to, or from
//! the symbol bound by dyld when the function lives in another image.

use log::{debug, warn};

use crate::descriptor::{BaseClassDescriptor, TypeInfoDescriptor, TypeInfoKind, VTableDescriptor, VTableFile};
use crate::error::{Error, Result};

mod bind;

mod image;
pub use image::{Image, Region, fixup_symbol_name};


/// Typeinfo graphs deeper than this are considered malformed.
const MAX_TYPEINFO_DEPTH: usize = 64;


/// A parsed class typeinfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// Mangled name of the class, without the leading `_Z`.
    pub name: String,
    pub class: TypeInfoClass,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeInfoClass {
    /// Class without base.
    Class,
    /// Class with a single, public and non-virtual base.
    SiClass {
        base: Option<Box<TypeInfo>>,
    },
    /// Class with any other kind of inheritance.
    VmiClass {
        flags: u32,
        base_count: u32,
        bases: Vec<VmiBase>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmiBase {
    /// The base typeinfo, if it's defined in this image.
    pub base: Option<Box<TypeInfo>>,
    pub flags: u8,
    /// Offset of the base in the class.
    pub offset: i64,
}

impl TypeInfo {

    /// Return true if this typeinfo or any of its single inheritance 
    /// bases has multiple inheritance, in which case the vtable group
    /// has secondary vtables.
    pub fn has_vmi(&self) -> bool {
        match &self.class {
            TypeInfoClass::Class => false,
            TypeInfoClass::SiClass { base } => base.as_ref().is_some_and(|base| base.has_vmi()),
            TypeInfoClass::VmiClass { .. } => true,
        }
    }

    /// Name of the RTTI class of this typeinfo.
    pub fn class_name(&self) -> &'static str {
        match self.class {
            TypeInfoClass::Class => "CLASS_TYPE_INFO",
            TypeInfoClass::SiClass { .. } => "SI_CLASS_TYPE_INFO",
            TypeInfoClass::VmiClass { .. } => "VMI_CLASS_TYPE_INFO",
        }
    }

    pub fn to_descriptor(&self) -> TypeInfoDescriptor {
        let (kind, flags, bases) = match &self.class {
            TypeInfoClass::Class => (TypeInfoKind::Class, None, Vec::new()),
            TypeInfoClass::SiClass { base } => {
                let bases = vec![BaseClassDescriptor {
                    name: base.as_ref().map(|base| base.name.clone()),
                    offset: 0,
                    flags: 0,
                }];
                (TypeInfoKind::SiClass, None, bases)
            }
            TypeInfoClass::VmiClass { flags, bases, .. } => {
                let bases = bases.iter()
                    .map(|base| BaseClassDescriptor {
                        name: base.base.as_ref().map(|base| base.name.clone()),
                        offset: base.offset,
                        flags: base.flags,
                    })
                    .collect();
                (TypeInfoKind::VmiClass, Some(*flags), bases)
            }
        };
        TypeInfoDescriptor {
            name: self.name.clone(),
            kind: Some(kind),
            flags,
            bases,
        }
    }

}


/// A vtable group found in a binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VTable {
    /// The `_ZTV` symbol of the group.
    pub symbol: String,
    pub address: u64,
    /// Size of the slots, in bytes.
    pub pointer_size: u64,
    pub typeinfo: TypeInfo,
    /// Symbols of the slots of each vtable, the primary one first.
    pub vftables: Vec<Vec<String>>,
}

impl VTable {

    pub fn to_descriptor(&self) -> VTableDescriptor {
        VTableDescriptor {
            address: Some(self.address),
            typeinfo: self.typeinfo.to_descriptor(),
            vftables: self.vftables.clone(),
        }
    }

}

/// Build the description file of the given vtables.
pub fn to_file(vtables: &[VTable]) -> VTableFile {
    VTableFile {
        vtables: vtables.iter().map(VTable::to_descriptor).collect(),
    }
}


/// Result of scanning the slots of a single vtable.
#[derive(Debug)]
struct VfTableScan {
    methods: Vec<String>,
    /// The scan stopped on an unknown slot, which may be the header
    /// of a secondary vtable.
    may_continue: bool,
}


pub struct VTableExtractor {
    image: Image,
}

impl VTableExtractor {

    /// Load the image of a Mach-O binary.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(Self::from_image(Image::parse(data)?))
    }

    #[inline]
    pub fn from_image(image: Image) -> Self {
        Self { image }
    }

    #[inline]
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Extract all vtables of the image, vtables that can't be parsed
    /// are skipped.
    pub fn get_vtables(&self) -> Vec<VTable> {
        self.image.symbols()
            .filter(|(_, name)| name.starts_with("_ZTV"))
            .filter_map(|(addr, name)| match self.get_vtable(addr) {
                Ok(vtable) => Some(vtable),
                Err(e) => {
                    warn!("skipping {name} at 0x{addr:08X}: {e}");
                    None
                }
            })
            .collect()
    }

    /// Extract the vtable group starting at the given address.
    pub fn get_vtable(&self, addr: u64) -> Result<VTable> {

        let pointer_size = self.image.pointer_size();

        let (typeinfo_addr, vftable_addr) = self.find_typeinfo(addr)?;
        let typeinfo = self.parse_typeinfo(typeinfo_addr)?;
        let primary = self.scan_vftable(vftable_addr);

        let mut current_addr = vftable_addr + primary.methods.len() as u64 * pointer_size;
        let mut more = primary.may_continue && typeinfo.has_vmi();
        let mut vftables = vec![primary.methods];

        while more {
            let Ok((_, vftable_addr)) = self.find_typeinfo(current_addr) else {
                break;
            };
            let secondary = self.scan_vftable(vftable_addr);
            debug!("secondary vftable at 0x{vftable_addr:08X} with {} slots", secondary.methods.len());
            current_addr = vftable_addr + secondary.methods.len() as u64 * pointer_size;
            more = secondary.may_continue;
            vftables.push(secondary.methods);
        }

        Ok(VTable {
            symbol: self.image.symbol(addr).unwrap_or_default().to_string(),
            address: addr,
            pointer_size,
            typeinfo,
            vftables,
        })

    }

    /// Parse the typeinfo at the given address.
    pub fn parse_typeinfo(&self, addr: u64) -> Result<TypeInfo> {
        self.parse_typeinfo_at_depth(addr, 0)
    }

    fn parse_typeinfo_at_depth(&self, addr: u64, depth: usize) -> Result<TypeInfo> {

        if depth > MAX_TYPEINFO_DEPTH {
            return Err(Error::Malformed(format!("typeinfo graph too deep at 0x{addr:08X}")));
        }

        let pointer_size = self.image.pointer_size();

        // The first word points in the vtable of the RTTI class, it's
        // bound by dyld because the class is in the C++ runtime.
        let class = self.image.binding(addr).ok_or(Error::MissingTypeInfoClass(addr))?;
        let name_addr = self.image.read_pointer(addr + pointer_size)?;
        let name = self.image.read_cstr(name_addr)?;

        let class = if class.ends_with("__si_class_type_infoE") {
            let base_addr = self.image.read_pointer(addr + 2 * pointer_size)?;
            let base = if base_addr != 0 {
                Some(Box::new(self.parse_typeinfo_at_depth(base_addr, depth + 1)?))
            } else {
                None
            };
            TypeInfoClass::SiClass { base }
        } else if class.ends_with("__vmi_class_type_infoE") {

            let flags = self.image.read_u32(addr + 2 * pointer_size)?;
            let base_count = self.image.read_u32(addr + 2 * pointer_size + 4)?;
            let bases_addr = addr + 2 * pointer_size + 8;

            let mut bases = Vec::with_capacity(base_count.min(16) as usize);
            for i in 0..u64::from(base_count) {
                let entry_addr = bases_addr + i * 2 * pointer_size;
                // The base may be defined in another image.
                let base = self.image.read_pointer(entry_addr).ok()
                    .and_then(|base_addr| self.parse_typeinfo_at_depth(base_addr, depth + 1).ok())
                    .map(Box::new);
                let offset_flags = self.image.read_signed_pointer(entry_addr + pointer_size)?;
                bases.push(VmiBase {
                    base,
                    // Lower octet is flags, the rest is offset.
                    flags: (offset_flags & 0xFF) as u8,
                    offset: offset_flags >> 8,
                });
            }

            TypeInfoClass::VmiClass { flags, base_count, bases }

        } else if class.ends_with("__class_type_infoE") {
            TypeInfoClass::Class
        } else {
            return Err(Error::UnknownTypeInfo(class.to_string()));
        };

        Ok(TypeInfo { name, class })

    }

    /// Starting from the address of a vtable, skip the header until the
    /// typeinfo pointer is found. Returns the typeinfo address and the
    /// address of the first slot.
    fn find_typeinfo(&self, addr: u64) -> Result<(u64, u64)> {

        let pointer_size = self.image.pointer_size();
        // Skip the offset to top.
        let mut location = addr + pointer_size;

        loop {

            // Padding may be read as a header, stop if we entered
            // another object.
            if self.image.symbol(location).is_some() {
                return Err(Error::SymbolInHeader(location));
            }

            let typeinfo_addr = self.image.read_pointer(location)?;
            location += pointer_size;

            if self.image.symbol(typeinfo_addr).is_some_and(|name| name.starts_with("_ZTI")) {
                return Ok((typeinfo_addr, location));
            }

        }

    }

    /// Scan all slots of a vtable.
    fn scan_vftable(&self, vftable_addr: u64) -> VfTableScan {

        let pointer_size = self.image.pointer_size();
        let mut methods = Vec::new();
        let mut addr = vftable_addr;

        loop {

            // Another vtable has most likely started.
            if self.image.symbol(addr).is_some() {
                return VfTableScan { methods, may_continue: false };
            }

            let Ok(target) = self.image.read_pointer(addr) else {
                return VfTableScan { methods, may_continue: false };
            };

            // Pure virtual functions and functions from other images
            // are bound by dyld.
            let symbol = self.image.symbol(target)
                .filter(|&name| name != "dyld_stub_binder")
                .or_else(|| self.image.binding(addr));

            match symbol {
                Some(name) => {
                    methods.push(name.to_string());
                    addr += pointer_size;
                }
                None => return VfTableScan { methods, may_continue: true },
            }

        }

    }

}
