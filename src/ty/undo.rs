//! Undo actions over the type system.
//! 
//! Undo actions are snapshots of the registry, they can be nested
//! and must be closed (committed or reverted) in reverse order of
//! their opening.

use crate::error::{Error, Result};

use super::{TypeSystem, Registry};


/// Opaque state returned when beginning undo actions, it must be
/// given back to commit or revert these actions. A state that is
/// not the innermost open one is rejected and stays usable.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct UndoState {
    /// Depth of the snapshot in the stack.
    depth: usize,
    /// Unique number of the undo actions.
    serial: u64,
}

#[derive(Debug, Default)]
pub(super) struct UndoStack {
    /// Registry snapshots taken when beginning undo actions,
    /// with the serial number of these actions.
    snapshots: Vec<(u64, Registry)>,
    /// Number of undo actions ever began.
    serial: u64,
}

impl UndoStack {

    /// Pop the snapshot of the given state, only if it's the 
    /// innermost open one.
    fn pop(&mut self, state: &UndoState) -> Result<Registry> {
        if state.depth + 1 != self.snapshots.len() {
            return Err(Error::UndoState);
        }
        match self.snapshots.last() {
            Some((serial, _)) if *serial == state.serial => {}
            _ => return Err(Error::UndoState),
        }
        self.snapshots.pop()
            .map(|(_, registry)| registry)
            .ok_or(Error::UndoState)
    }

}

impl TypeSystem {

    /// Begin undo actions, every modification done to the type
    /// system until the returned state is committed or reverted
    /// will be part of these actions.
    pub fn begin_undo_actions(&mut self) -> UndoState {
        self.undo.serial += 1;
        let serial = self.undo.serial;
        self.undo.snapshots.push((serial, self.registry.clone()));
        UndoState {
            depth: self.undo.snapshots.len() - 1,
            serial,
        }
    }

    /// Keep all modifications done since the given state.
    pub fn commit_undo_actions(&mut self, state: &UndoState) -> Result<()> {
        self.undo.pop(state)?;
        Ok(())
    }

    /// Discard all modifications done since the given state, the
    /// type system is restored as it was when the state was created.
    pub fn revert_undo_actions(&mut self, state: &UndoState) -> Result<()> {
        self.registry = self.undo.pop(state)?;
        Ok(())
    }

    /// Number of currently open undo actions.
    #[inline]
    pub fn undo_depth(&self) -> usize {
        self.undo.snapshots.len()
    }

    /// Number of undo actions that have ever been started on this
    /// type system.
    #[inline]
    pub fn undo_serial(&self) -> u64 {
        self.undo.serial
    }

}
