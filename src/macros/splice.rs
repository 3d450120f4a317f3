//! Pending splices for one block visit.
//!
//! While a block is walked, each expansion that changes the number of
//! statements records a [`PendingSplice`] against the block's *original*
//! positions. [`SpliceStack::apply`] then performs them in position order,
//! shifting every later position by the net growth of the earlier ones.
//! Until then, [`SpliceStack::preview`] and [`SpliceStack::shifted`] give the
//! block as later calls in it must see it.

use crate::ast::Stmt;

#[derive(Debug, Clone, PartialEq)]
pub struct PendingSplice {
    /// Original position of the first replaced statement.
    pub index: usize,
    /// Statements removed: the call's statement plus any captured ones.
    pub deletion_count: usize,
    pub replacement: Vec<Stmt>,
}

impl PendingSplice {
    /// Net change in statement count.
    pub fn delta(&self) -> isize {
        self.replacement.len() as isize - self.deletion_count as isize
    }
}

#[derive(Debug, Default)]
pub struct SpliceStack {
    pending: Vec<PendingSplice>,
}

impl SpliceStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, index: usize, deletion_count: usize, replacement: Vec<Stmt>) {
        self.pending.push(PendingSplice {
            index,
            deletion_count,
            replacement,
        });
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Applies every pending splice to `statements`. Returns the net change in length.
    ///
    /// Splices must not overlap; the driver never records two against the same statement.
    pub fn apply(mut self, statements: &mut Vec<Stmt>) -> isize {
        self.pending.sort_by_key(|splice| splice.index);
        splice_into(self.pending, statements)
    }

    /// `statements` as they will read once the pending splices are applied.
    pub fn preview(&self, statements: &[Stmt]) -> Vec<Stmt> {
        let mut pending = self.pending.clone();
        pending.sort_by_key(|splice| splice.index);
        let mut preview = statements.to_vec();
        splice_into(pending, &mut preview);
        preview
    }

    /// Where the statement at original position `index` lands once the
    /// pending splices before it are applied.
    pub fn shifted(&self, index: usize) -> usize {
        let delta: isize = self
            .pending
            .iter()
            .filter(|splice| splice.index < index)
            .map(PendingSplice::delta)
            .sum();
        (index as isize + delta).max(0) as usize
    }
}

fn splice_into(pending: Vec<PendingSplice>, statements: &mut Vec<Stmt>) -> isize {
    let mut delta: isize = 0;
    for splice in pending {
        let start = ((splice.index as isize + delta).max(0) as usize).min(statements.len());
        let end = (start + splice.deletion_count).min(statements.len());
        delta += splice.replacement.len() as isize - (end - start) as isize;
        statements.splice(start..end, splice.replacement);
    }
    delta
}
