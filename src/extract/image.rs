//! Loaded image of a binary: mapped data, symbols and bindings
//! indexed by virtual address.

use std::collections::BTreeMap;

use object::{BinaryFormat, Object, ObjectSection, ObjectSymbol};

use crate::error::{Error, Result};

use super::bind;


/// A contiguous block of mapped data.
#[derive(Debug, Clone)]
pub struct Region {
    pub address: u64,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct Image {
    /// Size of pointers in the image, in bytes.
    pointer_size: u64,
    little_endian: bool,
    /// Data of all sections that have content in the file.
    regions: Vec<Region>,
    /// Defined symbols by address.
    symbols: BTreeMap<u64, String>,
    /// Symbols bound by the dynamic loader, by the address of
    /// the bound pointer.
    bindings: BTreeMap<u64, String>,
}

impl Image {

    /// Load a Mach-O image.
    pub fn parse(data: &[u8]) -> Result<Self> {

        let file = object::File::parse(data)?;
        if file.format() != BinaryFormat::MachO {
            return Err(Error::UnsupportedFormat(format!("{:?}", file.format())));
        }

        let pointer_size = if file.is_64() { 8 } else { 4 };

        let mut regions = Vec::new();
        for section in file.sections() {
            // Zero fill sections have no data, nothing to read there.
            match section.data() {
                Ok(data) if !data.is_empty() => regions.push(Region { 
                    address: section.address(), 
                    data: data.to_vec(),
                }),
                _ => {}
            }
        }

        let mut symbols = BTreeMap::new();
        for symbol in file.symbols() {
            if !symbol.is_definition() {
                continue;
            }
            match symbol.name() {
                Ok(name) if !name.is_empty() => {
                    symbols.insert(symbol.address(), fixup_symbol_name(name).to_string());
                }
                _ => {}
            }
        }

        let bindings = bind::read_bindings(data)?
            .into_iter()
            .map(|(addr, name)| (addr, fixup_symbol_name(&name).to_string()))
            .collect();

        Ok(Self {
            pointer_size,
            little_endian: file.is_little_endian(),
            regions,
            symbols,
            bindings,
        })

    }

    /// Create a little endian image from already loaded parts, 
    /// symbol names should already be fixed up.
    pub fn from_parts(
        pointer_size: u64, 
        regions: Vec<Region>, 
        symbols: BTreeMap<u64, String>, 
        bindings: BTreeMap<u64, String>,
    ) -> Self {
        Self {
            pointer_size,
            little_endian: true,
            regions,
            symbols,
            bindings,
        }
    }

    #[inline]
    pub fn pointer_size(&self) -> u64 {
        self.pointer_size
    }

    /// Name of the symbol defined at the given address.
    pub fn symbol(&self, addr: u64) -> Option<&str> {
        self.symbols.get(&addr).map(String::as_str)
    }

    /// Name of the symbol bound to the pointer at the given address.
    pub fn binding(&self, addr: u64) -> Option<&str> {
        self.bindings.get(&addr).map(String::as_str)
    }

    /// Iterate over all defined symbols, by increasing address.
    pub fn symbols(&self) -> impl Iterator<Item = (u64, &str)> + '_ {
        self.symbols.iter().map(|(addr, name)| (*addr, name.as_str()))
    }

    fn region(&self, addr: u64) -> Result<(&Region, usize)> {
        self.regions.iter()
            .find_map(|region| {
                let offset = addr.checked_sub(region.address)?;
                let offset = usize::try_from(offset).ok()?;
                (offset < region.data.len()).then_some((region, offset))
            })
            .ok_or(Error::UnmappedAddress(addr))
    }

    pub fn read_bytes(&self, addr: u64, len: usize) -> Result<&[u8]> {
        let (region, offset) = self.region(addr)?;
        region.data.get(offset..offset + len).ok_or(Error::UnmappedAddress(addr))
    }

    pub fn read_u32(&self, addr: u64) -> Result<u32> {
        let bytes: [u8; 4] = self.read_bytes(addr, 4)?
            .try_into()
            .map_err(|_| Error::UnmappedAddress(addr))?;
        Ok(if self.little_endian { u32::from_le_bytes(bytes) } else { u32::from_be_bytes(bytes) })
    }

    pub fn read_u64(&self, addr: u64) -> Result<u64> {
        let bytes: [u8; 8] = self.read_bytes(addr, 8)?
            .try_into()
            .map_err(|_| Error::UnmappedAddress(addr))?;
        Ok(if self.little_endian { u64::from_le_bytes(bytes) } else { u64::from_be_bytes(bytes) })
    }

    /// Read a pointer-sized unsigned integer.
    pub fn read_pointer(&self, addr: u64) -> Result<u64> {
        if self.pointer_size == 4 {
            self.read_u32(addr).map(u64::from)
        } else {
            self.read_u64(addr)
        }
    }

    /// Read a pointer-sized signed integer.
    pub fn read_signed_pointer(&self, addr: u64) -> Result<i64> {
        if self.pointer_size == 4 {
            self.read_u32(addr).map(|v| v as i32 as i64)
        } else {
            self.read_u64(addr).map(|v| v as i64)
        }
    }

    /// Read a nul-terminated string.
    pub fn read_cstr(&self, addr: u64) -> Result<String> {
        let (region, offset) = self.region(addr)?;
        let data = &region.data[offset..];
        let len = data.iter().position(|&b| b == 0)
            .ok_or_else(|| Error::Malformed(format!("unterminated string at 0x{addr:08X}")))?;
        Ok(String::from_utf8_lossy(&data[..len]).into_owned())
    }

}

/// Remove the leading underscore that Mach-O adds to C symbols.
pub fn fixup_symbol_name(name: &str) -> &str {
    name.strip_prefix('_').unwrap_or(name)
}
