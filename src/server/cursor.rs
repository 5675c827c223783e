use std::collections::VecDeque;

use crate::col::Field;
use crate::handler::{HandlerResult, Outcome, RowSource};
use crate::value::Row;

/// Rows of an executed statement waiting for COM_STMT_FETCH
pub struct Cursor {
    fields: Vec<Field>,
    source: Box<dyn RowSource>,
    buffered: VecDeque<Row>,
    done: bool,
    warnings: u16,
}

impl Cursor {
    /// Open a cursor over `outcome`, pulling its first batch
    pub fn open(outcome: Outcome) -> HandlerResult<Self> {
        let mut cursor = Self {
            fields: outcome.fields,
            source: outcome.rows,
            buffered: VecDeque::new(),
            done: false,
            warnings: outcome.warnings,
        };
        cursor.fill()?;
        Ok(cursor)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    pub fn next_row(&mut self) -> HandlerResult<Option<Row>> {
        self.fill()?;
        Ok(self.buffered.pop_front())
    }

    /// Whether another fetch would return rows
    pub fn has_more(&mut self) -> HandlerResult<bool> {
        self.fill()?;
        Ok(!self.buffered.is_empty())
    }

    fn fill(&mut self) -> HandlerResult<()> {
        while self.buffered.is_empty() && !self.done {
            match self.source.next_batch()? {
                Some(batch) => self.buffered.extend(batch),
                None => self.done = true,
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("fields", &self.fields.len())
            .field("buffered", &self.buffered.len())
            .field("done", &self.done)
            .finish()
    }
}
