//! Integration tests of the vtables import, from a description file
//! on disk to the structures defined in the type system.

use std::io::Write;

use tempfile::NamedTempFile;

use vtimport::demangle::{Demangled, Demangler, GnuDemangler};
use vtimport::descriptor::VTableFile;
use vtimport::import::{DuplicatePolicy, ImportOptions, ImportState, Importer};
use vtimport::plugin::{self, Cancelled, CommandRegistry, FixedPath, ImportOutcome, PluginContext};
use vtimport::ty::{Type, TypeSystem};
use vtimport::{Error, Result};

const THREE_CLASSES: &str = r#"{
    "vtables": [
        {
            "typeinfo": { "name": "3Foo" },
            "vftables": [["_ZN3Foo1aEv", "_ZN3Foo1bEi"]]
        },
        {
            "typeinfo": { "name": "N2NS3BarE" },
            "vftables": [["_ZN2NS3Bar1aEv", "__cxa_pure_virtual"], ["_ZThn8_N2NS3Bar1aEv"]]
        },
        {
            "typeinfo": { "name": "3Baz" },
            "vftables": [[]]
        }
    ]
}"#;

fn description(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// A demangler that refuses one symbol.
struct Refuse(&'static str);

impl Demangler for Refuse {
    fn demangle(&self, mangled: &str) -> Option<Demangled> {
        if mangled == self.0 {
            None
        } else {
            GnuDemangler.demangle(mangled)
        }
    }
}

fn defined_structs(types: &TypeSystem) -> usize {
    types.iter_structs().filter(|(_, def)| !def.is_opaque()).count()
}

#[test]
fn import_all_descriptions() -> Result<()> {
    let file = description(THREE_CLASSES);
    let mut types = TypeSystem::new(8);
    let report = vtimport::import(&mut types, file.path())?;

    assert_eq!(report.structures.len(), 3);
    assert_eq!(report.fallback_fields, 1);
    for name in ["Foo", "vtable_for_Foo", "NS::Bar", "NS::vtable_for_Bar", "Baz", "vtable_for_Baz", "typeinfo_ptr"] {
        assert!(types.get_struct(name).is_some(), "missing {name}");
    }
    assert_eq!(defined_structs(&types), 7);
    assert_eq!(types.undo_depth(), 0);
    Ok(())
}

#[test]
fn failure_on_last_description_installs_nothing() {
    let file = description(THREE_CLASSES);
    let mut types = TypeSystem::new(8);
    types.define_new_struct("existing").field("a", Type::DWORD).unwrap().build();

    let mut importer = Importer::new(Refuse("_Z3Baz"), ImportOptions::default());
    let err = importer.import_file(&mut types, file.path()).unwrap_err();

    assert!(matches!(err, Error::Demangle(ref sym) if sym == "_Z3Baz"));
    assert_eq!(importer.state(), ImportState::RolledBack);
    assert!(types.get_struct("Foo").is_none());
    assert!(types.get_struct("NS::vtable_for_Bar").is_none());
    assert!(types.get_struct("typeinfo_ptr").is_none());
    assert!(types.get_struct("existing").is_some());
    assert_eq!(types.iter_structs().count(), 1);
    assert_eq!(types.undo_depth(), 0);
}

#[test]
fn header_then_slots() -> Result<()> {
    let file = description(THREE_CLASSES);
    for pointer_size in [4, 8] {
        let mut types = TypeSystem::new(pointer_size);
        let report = vtimport::import(&mut types, file.path())?;

        let header = types.get_struct("typeinfo_ptr").unwrap();
        let (header_size, _) = types.layout(header.to_type()).unwrap();
        assert_eq!(header_size, 2 * pointer_size);

        for built in &report.structures {
            let vtable = types.struct_def(built.vtable).unwrap();
            assert_eq!(vtable.fields()[0].name(), "rtti");
            assert_eq!(vtable.fields()[0].ty(), header.to_type());
            assert_eq!(vtable.pointer_offset(), header_size);
            if let Some(first_slot) = vtable.fields().get(1) {
                assert_eq!(first_slot.offset(), header_size);
            }
        }
    }
    Ok(())
}

#[test]
fn undemangled_slot_keeps_raw_symbol() -> Result<()> {
    let file = description(THREE_CLASSES);
    let mut types = TypeSystem::new(8);
    vtimport::import(&mut types, file.path())?;

    let vtable = types.get_struct("NS::vtable_for_Bar").unwrap();
    let vtable = types.struct_def(vtable).unwrap();
    // Secondary vftables are not imported.
    assert_eq!(vtable.fields().len(), 3);
    let slot = vtable.field("__cxa_pure_virtual").unwrap();
    assert_eq!(slot.ty(), Type::VOID.pointer());
    assert_eq!(slot.offset(), 24);
    Ok(())
}

#[test]
fn thunk_slot_is_untyped() -> Result<()> {
    let json = r#"{
        "vtables": [
            { "typeinfo": { "name": "3Qux" }, "vftables": [["_ZN3Qux1aEv", "_ZThn8_N3Qux3barEv", "_ZTv0_n24_N3Qux3bazEv"]] }
        ]
    }"#;
    let file = description(json);
    let mut types = TypeSystem::new(8);
    let report = vtimport::import(&mut types, file.path())?;
    assert_eq!(report.fallback_fields, 2);

    let vtable = types.struct_def(report.structures[0].vtable).unwrap();
    let names: Vec<&str> = vtable.fields().iter().map(|field| field.name()).collect();
    assert_eq!(names, ["rtti", "a", "bar", "baz"]);
    assert_eq!(vtable.field("bar").unwrap().ty(), Type::VOID.pointer());
    assert_eq!(vtable.field("baz").unwrap().ty(), Type::VOID.pointer());
    assert_ne!(vtable.field("a").unwrap().ty(), Type::VOID.pointer());
    Ok(())
}

#[test]
fn names_from_demangled_classes() -> Result<()> {
    let file = description(THREE_CLASSES);
    let mut types = TypeSystem::new(8);
    let report = vtimport::import(&mut types, file.path())?;

    let bar = &report.structures[1];
    assert_eq!(bar.class_name.components(), ["NS", "Bar"]);
    assert_eq!(bar.vtable_name.components(), ["NS", "vtable_for_Bar"]);

    let foo = types.struct_def(report.structures[0].class).unwrap();
    assert_eq!(foo.name(), "Foo");
    assert_eq!(foo.fields()[0].name(), "vtable");
    assert_eq!(foo.fields()[0].ty(), report.structures[0].vtable.to_type().pointer());
    Ok(())
}

#[test]
fn empty_description_commits_nothing() -> Result<()> {
    let file = description(r#"{ "vtables": [] }"#);
    let mut types = TypeSystem::new(8);
    let mut importer = Importer::default();
    let report = importer.import_file(&mut types, file.path())?;

    assert!(report.structures.is_empty());
    assert_eq!(importer.state(), ImportState::Committed);
    assert_eq!(types.iter_structs().count(), 0);
    assert_eq!(types.undo_serial(), 1);
    assert_eq!(types.undo_depth(), 0);
    Ok(())
}

#[test]
fn malformed_description_touches_nothing() {
    let file = description(r#"{ "vtables": [ { "typeinfo": "#);
    let mut types = TypeSystem::new(8);
    let mut importer = Importer::default();

    assert!(matches!(importer.import_file(&mut types, file.path()), Err(Error::Json(_))));
    assert_eq!(importer.state(), ImportState::Idle);
    assert_eq!(types.undo_serial(), 0);
}

#[test]
fn duplicate_classes() -> Result<()> {
    let json = r#"{
        "vtables": [
            { "typeinfo": { "name": "3Foo" }, "vftables": [["_ZN3Foo1aEv"]] },
            { "typeinfo": { "name": "3Foo" }, "vftables": [["_ZN3Foo1aEv", "_ZN3Foo1bEv"]] }
        ]
    }"#;
    let file = VTableFile::from_slice(json.as_bytes())?;

    let mut types = TypeSystem::new(8);
    let err = Importer::default().import(&mut types, &file).unwrap_err();
    assert!(matches!(err, Error::DuplicateType { ref name } if name == "Foo"));
    assert_eq!(types.iter_structs().count(), 0);

    let options = ImportOptions { duplicates: DuplicatePolicy::Overwrite, ..ImportOptions::default() };
    Importer::new(GnuDemangler, options).import(&mut types, &file)?;
    let vtable = types.get_struct("vtable_for_Foo").unwrap();
    assert_eq!(types.struct_def(vtable).unwrap().fields().len(), 3);
    Ok(())
}

#[test]
fn reimport_redefines_types() -> Result<()> {
    let file = description(THREE_CLASSES);
    let mut types = TypeSystem::new(8);
    vtimport::import(&mut types, file.path())?;
    let foo = types.get_struct("Foo").unwrap();

    vtimport::import(&mut types, file.path())?;
    assert_eq!(types.get_struct("Foo"), Some(foo));
    assert_eq!(defined_structs(&types), 7);
    Ok(())
}

#[test]
fn command_cancelled_does_nothing() -> Result<()> {
    let mut registry = CommandRegistry::new();
    plugin::register_default_commands(&mut registry)?;

    let mut types = TypeSystem::new(8);
    let mut prompt = Cancelled;
    let mut ctx = PluginContext {
        types: &mut types,
        prompt: &mut prompt,
        demangler: &GnuDemangler,
        options: ImportOptions::default(),
    };

    let outcome = registry.invoke(plugin::IMPORT_VTABLES, &mut ctx)?;
    assert_eq!(outcome, ImportOutcome::Cancelled);
    assert_eq!(types.undo_serial(), 0);
    assert_eq!(types.iter_structs().count(), 0);
    Ok(())
}

#[test]
fn command_imports_chosen_file() -> Result<()> {
    let file = description(THREE_CLASSES);
    let mut registry = CommandRegistry::new();
    plugin::register_default_commands(&mut registry)?;

    let mut types = TypeSystem::new(8);
    let mut prompt = FixedPath(file.path().to_path_buf());
    let mut ctx = PluginContext {
        types: &mut types,
        prompt: &mut prompt,
        demangler: &GnuDemangler,
        options: ImportOptions::default(),
    };

    let ImportOutcome::Imported(report) = registry.invoke(plugin::IMPORT_VTABLES, &mut ctx)? else {
        panic!("import was cancelled");
    };
    assert_eq!(report.structures.len(), 3);
    assert!(types.get_struct("NS::Bar").is_some());
    Ok(())
}

#[test]
fn command_missing_file_is_an_error() {
    let mut registry = CommandRegistry::new();
    plugin::register_default_commands(&mut registry).unwrap();

    let mut types = TypeSystem::new(8);
    let mut prompt = FixedPath("/nonexistent/vtables.json".into());
    let mut ctx = PluginContext {
        types: &mut types,
        prompt: &mut prompt,
        demangler: &GnuDemangler,
        options: ImportOptions::default(),
    };

    assert!(matches!(registry.invoke(plugin::IMPORT_VTABLES, &mut ctx), Err(Error::Io(_))));
    assert_eq!(types.undo_serial(), 0);
}
