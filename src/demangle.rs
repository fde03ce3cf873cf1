//! Symbol demangling.
//! 
//! The importer only needs two things from a mangled symbol: its
//! name, possibly qualified, and a signature that can be used as a
//! function type. The [`Demangler`] trait abstracts this, the
//! default implementation is [`GnuDemangler`] for symbols mangled
//! by GNU v3 (Itanium) compilers.

use std::fmt;

use cpp_demangle::{DemangleOptions, Symbol};


/// A symbol name, that is either a simple name or a sequence of
/// namespace components where the last one is the actual name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Name {
    Simple(String),
    Qualified(Vec<String>),
}

impl Name {

    /// Create a name from its components, a single component gives
    /// a simple name.
    pub fn from_components(mut components: Vec<String>) -> Self {
        if components.len() == 1 {
            Self::Simple(components.remove(0))
        } else {
            Self::Qualified(components)
        }
    }

    /// The last component of the name, this is the name without
    /// its namespaces.
    pub fn last(&self) -> &str {
        match self {
            Self::Simple(name) => name,
            Self::Qualified(components) => components.last().map(String::as_str).unwrap_or(""),
        }
    }

    pub fn components(&self) -> &[String] {
        match self {
            Self::Simple(name) => std::slice::from_ref(name),
            Self::Qualified(components) => components,
        }
    }

    /// Return a copy of this name where only the last component
    /// is prefixed, namespaces are kept untouched.
    pub fn with_last_prefixed(&self, prefix: &str) -> Self {
        match self {
            Self::Simple(name) => Self::Simple(format!("{prefix}{name}")),
            Self::Qualified(components) => {
                let mut components = components.clone();
                if let Some(last) = components.last_mut() {
                    last.insert_str(0, prefix);
                }
                Self::Qualified(components)
            }
        }
    }

}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(name) => f.write_str(name),
            Self::Qualified(components) => {
                for (i, component) in components.iter().enumerate() {
                    if i != 0 {
                        f.write_str("::")?;
                    }
                    f.write_str(component)?;
                }
                Ok(())
            }
        }
    }
}


/// Result of a successful demangling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demangled {
    /// Name of the symbol.
    pub name: Name,
    /// Full signature of the function, if a function type can
    /// be derived from the symbol.
    pub signature: Option<String>,
}


/// A symbol demangler.
pub trait Demangler {

    /// Demangle the given symbol, returning None if the symbol
    /// cannot be demangled.
    fn demangle(&self, mangled: &str) -> Option<Demangled>;

}

impl<D: Demangler + ?Sized> Demangler for &'_ D {
    fn demangle(&self, mangled: &str) -> Option<Demangled> {
        Demangler::demangle(&**self, mangled)
    }
}


/// Demangler for GNU v3 mangled symbols.
#[derive(Debug, Default, Clone, Copy)]
pub struct GnuDemangler;

impl Demangler for GnuDemangler {

    fn demangle(&self, mangled: &str) -> Option<Demangled> {

        // Thunks adjust `this` before jumping to their target, they
        // are named after it but their own type is unknown.
        if let Some(target) = thunk_target(mangled) {
            let target = self.demangle(&target)?;
            return Some(Demangled { name: target.name, signature: None });
        }

        let symbol = Symbol::new(mangled).ok()?;
        let name = symbol.demangle(&DemangleOptions::new().no_params().no_return_type()).ok()?;

        let components = split_qualified(&name);
        if components.is_empty() {
            return None;
        }

        // Data symbols (typeinfo, plain names) have no parameters 
        // and therefore no function type.
        let signature = if mangled_has_params(&symbol) {
            symbol.demangle(&DemangleOptions::new()).ok()
        } else {
            None
        };

        Some(Demangled { 
            name: Name::from_components(components), 
            signature,
        })

    }

}

/// Return the mangled target of a thunk, that is the encoding that
/// follows the call offsets of `_ZTh`, `_ZTv` and `_ZTc` symbols.
fn thunk_target(mangled: &str) -> Option<String> {
    let special = mangled.strip_prefix("_ZT")?;
    let encoding = match special.strip_prefix('c') {
        // Covariant return thunks adjust both this and the result.
        Some(offsets) => skip_call_offset(skip_call_offset(offsets)?)?,
        None => skip_call_offset(special)?,
    };
    (!encoding.is_empty()).then(|| format!("_Z{encoding}"))
}

/// Skip a call offset, `h <offset> _` or `v <offset> _ <offset> _`.
fn skip_call_offset(mangled: &str) -> Option<&str> {
    if let Some(rest) = mangled.strip_prefix('h') {
        skip_offset(rest)
    } else if let Some(rest) = mangled.strip_prefix('v') {
        skip_offset(skip_offset(rest)?)
    } else {
        None
    }
}

/// Skip a possibly negative (`n` prefixed) number and its trailing `_`.
fn skip_offset(mangled: &str) -> Option<&str> {
    let number = mangled.strip_prefix('n').unwrap_or(mangled);
    let digits = number.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    number[digits..].strip_prefix('_')
}

/// Return true if the demangled symbol carries a parameter list.
fn mangled_has_params(symbol: &Symbol<&str>) -> bool {
    let with_params = symbol.demangle(&DemangleOptions::new().no_return_type());
    let without_params = symbol.demangle(&DemangleOptions::new().no_params().no_return_type());
    match (with_params, without_params) {
        (Ok(with_params), Ok(without_params)) => with_params != without_params,
        _ => false,
    }
}

/// Split a demangled name on its top-level `::` separators, template
/// arguments and parameter lists are kept whole.
pub fn split_qualified(name: &str) -> Vec<String> {

    let mut components = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let bytes = name.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'<' | b'(' => depth += 1,
            b'>' | b')' => depth = depth.saturating_sub(1),
            b':' if depth == 0 && bytes.get(i + 1) == Some(&b':') => {
                components.push(name[start..i].to_string());
                i += 2;
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    components.push(name[start..].to_string());
    components.retain(|component| !component.is_empty());
    components

}
