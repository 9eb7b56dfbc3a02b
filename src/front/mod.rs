//! Parsers which load shader modules into the IR.

pub mod wgsl;

use crate::arena::Arena;

/// Helper which keeps track of the range of expressions to be covered by the
/// next [`Statement::Emit`](crate::Statement::Emit).
///
/// Expressions that are live from the start of the function are appended
/// through [`interrupt`](Emitter::finish)/restart cycles, so they never land
/// in an emit range.
#[derive(Default)]
pub struct Emitter {
    start_len: Option<usize>,
}

impl Emitter {
    pub fn start(&mut self, arena: &Arena<crate::Expression>) {
        if self.start_len.is_some() {
            unreachable!("Emitting has already started!");
        }
        self.start_len = Some(arena.len());
    }

    #[must_use]
    pub fn finish(&mut self, arena: &Arena<crate::Expression>) -> Option<crate::Statement> {
        let start_len = self.start_len.take().unwrap();
        if start_len != arena.len() {
            Some(crate::Statement::Emit(arena.range_from(start_len)))
        } else {
            None
        }
    }
}
