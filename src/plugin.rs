//! User commands of the analysis frontend.
//! 
//! The frontend registers [`PluginCommand`]s in a [`CommandRegistry`]
//! and invokes them by name with a [`PluginContext`]. The only
//! command defined here is [`IMPORT_VTABLES`].

use std::fmt;
use std::path::PathBuf;

use log::{debug, info};

use crate::demangle::Demangler;
use crate::error::{Error, Result};
use crate::import::{ImportOptions, ImportReport, Importer};
use crate::ty::TypeSystem;


/// Name of the vtables import command.
pub const IMPORT_VTABLES: &str = "Import VTables";


/// A prompt asking the user for a file to open.
pub trait FilePrompt {

    /// Ask for a file matching the given filter, returns None if the
    /// user cancelled.
    fn open_filename(&mut self, prompt: &str, filter: &str) -> Option<PathBuf>;

}

/// A prompt that always answers the same path.
#[derive(Debug, Clone)]
pub struct FixedPath(pub PathBuf);

impl FilePrompt for FixedPath {
    fn open_filename(&mut self, _prompt: &str, _filter: &str) -> Option<PathBuf> {
        Some(self.0.clone())
    }
}

/// A prompt that is always cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cancelled;

impl FilePrompt for Cancelled {
    fn open_filename(&mut self, _prompt: &str, _filter: &str) -> Option<PathBuf> {
        None
    }
}


/// Everything a command can access when invoked.
pub struct PluginContext<'a> {
    pub types: &'a mut TypeSystem,
    pub prompt: &'a mut dyn FilePrompt,
    pub demangler: &'a dyn Demangler,
    pub options: ImportOptions,
}

/// Outcome of an invoked command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The user cancelled the file prompt, nothing was done.
    Cancelled,
    Imported(ImportReport),
}

/// Function called when invoking a command.
pub type CommandAction = fn(&mut PluginContext<'_>) -> Result<ImportOutcome>;

#[derive(Clone)]
pub struct PluginCommand {
    pub name: String,
    pub description: String,
    pub action: CommandAction,
}

impl fmt::Debug for PluginCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginCommand")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// All commands registered in the frontend.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: Vec<PluginCommand>,
}

impl CommandRegistry {

    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new command, command names are unique.
    pub fn register<N, S>(&mut self, name: N, description: S, action: CommandAction) -> Result<()> 
    where
        N: Into<String>,
        S: Into<String>,
    {
        let name: String = name.into();
        if self.get(&name).is_some() {
            return Err(Error::DuplicateCommand(name));
        }
        debug!("registering command {name}");
        self.commands.push(PluginCommand { 
            name, 
            description: description.into(), 
            action,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&PluginCommand> {
        self.commands.iter().find(|command| command.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginCommand> + '_ {
        self.commands.iter()
    }

    /// Invoke the command with the given name.
    pub fn invoke(&self, name: &str, ctx: &mut PluginContext<'_>) -> Result<ImportOutcome> {
        let command = self.get(name).ok_or_else(|| Error::UnknownCommand(name.to_string()))?;
        (command.action)(ctx)
    }

}


/// Register all commands of this crate.
pub fn register_default_commands(registry: &mut CommandRegistry) -> Result<()> {
    registry.register(IMPORT_VTABLES, "", import_vtables)
}

/// Ask for a vtables description file and import it into the type
/// system of the context.
pub fn import_vtables(ctx: &mut PluginContext<'_>) -> Result<ImportOutcome> {

    let Some(path) = ctx.prompt.open_filename("filename:", "*.json") else {
        debug!("vtables import cancelled");
        return Ok(ImportOutcome::Cancelled);
    };

    info!("importing vtables from {}", path.display());
    let mut importer = Importer::new(ctx.demangler, ctx.options.clone());
    let report = importer.import_file(&mut *ctx.types, &path)?;
    Ok(ImportOutcome::Imported(report))

}
