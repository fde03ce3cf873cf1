//! Importing a whole vtables description into a type system.
//! 
//! An import is atomic: it runs inside undo actions of the type 
//! system and either defines the structures of every description,
//! or leaves the type system untouched.

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::path::Path;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::builder::{self, BuiltVTable};
use crate::demangle::{Demangler, GnuDemangler};
use crate::descriptor::VTableFile;
use crate::error::{Error, Result};
use crate::ty::{TypeSystem, UndoState};


/// What to do when two descriptions of the same import produce
/// the same type name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Abort the import.
    #[default]
    Error,
    /// The last description wins.
    Overwrite,
}

/// Configuration of an import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Name of the structure placed in front of every vtable.
    pub typeinfo_struct_name: String,
    /// Prefix of vtable structure names.
    pub vtable_prefix: String,
    pub duplicates: DuplicatePolicy,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            typeinfo_struct_name: "typeinfo_ptr".to_string(),
            vtable_prefix: "vtable_for_".to_string(),
            duplicates: DuplicatePolicy::Error,
        }
    }
}


/// Undo actions over a type system, they are reverted when this
/// transaction is dropped without being committed.
pub struct Transaction<'a> {
    types: &'a mut TypeSystem,
    state: Option<UndoState>,
}

impl<'a> Transaction<'a> {

    pub fn begin(types: &'a mut TypeSystem) -> Self {
        let state = types.begin_undo_actions();
        Self { types, state: Some(state) }
    }

    /// Keep all modifications done through this transaction.
    pub fn commit(mut self) -> Result<()> {
        let state = self.state.as_ref().ok_or(Error::UndoState)?;
        self.types.commit_undo_actions(state)?;
        self.state = None;
        Ok(())
    }

}

impl Deref for Transaction<'_> {
    type Target = TypeSystem;
    fn deref(&self) -> &Self::Target {
        &*self.types
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.types
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            if let Err(e) = self.types.revert_undo_actions(&state) {
                warn!("failed to revert undo actions: {e}");
            }
        }
    }
}


/// State of an importer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    Idle,
    Importing,
    Committed,
    RolledBack,
}

/// Summary of a committed import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Structures built for each description, in order.
    pub structures: Vec<BuiltVTable>,
    /// Total number of slots typed as `void*`.
    pub fallback_fields: usize,
}


/// Imports vtables descriptions into a type system.
pub struct Importer<D = GnuDemangler> {
    demangler: D,
    options: ImportOptions,
    state: ImportState,
}

impl Default for Importer<GnuDemangler> {
    fn default() -> Self {
        Self::new(GnuDemangler, ImportOptions::default())
    }
}

impl<D: Demangler> Importer<D> {

    pub fn new(demangler: D, options: ImportOptions) -> Self {
        Self {
            demangler,
            options,
            state: ImportState::Idle,
        }
    }

    #[inline]
    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// State of the last import.
    #[inline]
    pub fn state(&self) -> ImportState {
        self.state
    }

    /// Read and import the given file. The file is entirely parsed
    /// before touching the type system.
    pub fn import_file<P: AsRef<Path>>(&mut self, types: &mut TypeSystem, path: P) -> Result<ImportReport> {
        let path = path.as_ref();
        debug!("reading vtables from {}", path.display());
        let file = VTableFile::from_path(path)?;
        self.import(types, &file)
    }

    /// Import all descriptions of the given file.
    pub fn import(&mut self, types: &mut TypeSystem, file: &VTableFile) -> Result<ImportReport> {

        info!("importing {} vtables", file.vtables.len());
        self.state = ImportState::Importing;

        let mut transaction = Transaction::begin(types);
        let result = self.import_all(&mut transaction, file)
            .and_then(|report| transaction.commit().map(|()| report));

        match result {
            Ok(report) => {
                self.state = ImportState::Committed;
                info!("imported {} vtables, {} slots without type", 
                    report.structures.len(), report.fallback_fields);
                Ok(report)
            }
            Err(e) => {
                self.state = ImportState::RolledBack;
                warn!("vtables import reverted: {e}");
                Err(e)
            }
        }

    }

    fn import_all(&self, types: &mut TypeSystem, file: &VTableFile) -> Result<ImportReport> {

        let mut report = ImportReport::default();
        if file.vtables.is_empty() {
            return Ok(report);
        }

        let typeinfo_ptr = builder::build_typeinfo_ptr(types, &self.options.typeinfo_struct_name)?;

        let mut names = HashSet::new();
        names.insert(self.options.typeinfo_struct_name.clone());

        for descriptor in &file.vtables {

            let built = builder::build_vtable_type(
                types, 
                &self.demangler, 
                &self.options.vtable_prefix, 
                descriptor, 
                typeinfo_ptr,
            )?;

            debug!("built {} with {} slots", built.class_name, descriptor.primary_vftable().len());

            for name in [built.class_name.to_string(), built.vtable_name.to_string()] {
                if !names.insert(name.clone()) {
                    match self.options.duplicates {
                        DuplicatePolicy::Error => return Err(Error::DuplicateType { name }),
                        DuplicatePolicy::Overwrite => warn!("type {name} redefined"),
                    }
                }
            }

            // An overwritten class is only reported once, by its last definition.
            report.structures.retain(|earlier| {
                earlier.class_name != built.class_name && earlier.vtable_name != built.vtable_name
            });
            report.structures.push(built);

        }

        report.fallback_fields = report.structures.iter().map(|built| built.fallback_fields).sum();
        Ok(report)

    }

}
