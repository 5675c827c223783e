use std::collections::HashMap;

use crate::col::Field;
use crate::error::{Error, Result};
use crate::value::{SqlType, Value};

/// A statement prepared on a connection
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub id: u32,
    pub sql: String,
    /// Declared at prepare time, replaced by the types a client sends with each execute
    pub param_types: Vec<SqlType>,
    pub fields: Vec<Field>,
    /// `v1..vN` as bound by the most recent execute
    pub bind_vars: Vec<(String, Value)>,
    long_data: Vec<Option<Vec<u8>>>,
}

impl PreparedStatement {
    pub fn new(
        id: u32,
        sql: impl Into<String>,
        param_types: Vec<SqlType>,
        fields: Vec<Field>,
    ) -> Self {
        let long_data = vec![None; param_types.len()];
        Self {
            id,
            sql: sql.into(),
            param_types,
            fields,
            bind_vars: Vec::new(),
            long_data,
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Append a COM_STMT_SEND_LONG_DATA chunk to parameter `param`
    pub fn append_long_data(&mut self, param: u16, chunk: &[u8]) -> Result<()> {
        let slot = self
            .long_data
            .get_mut(param as usize)
            .ok_or(Error::InvalidPacket)?;
        slot.get_or_insert_with(Vec::new).extend_from_slice(chunk);
        Ok(())
    }

    pub fn has_long_data(&self, param: usize) -> bool {
        matches!(self.long_data.get(param), Some(Some(_)))
    }

    /// Per-parameter presence of long data, indexed like `param_types`
    pub fn long_data_mask(&self) -> Vec<bool> {
        self.long_data.iter().map(Option::is_some).collect()
    }

    pub fn take_long_data(&mut self, param: usize) -> Option<Vec<u8>> {
        self.long_data.get_mut(param).and_then(Option::take)
    }

    pub fn clear_long_data(&mut self) {
        self.long_data.iter_mut().for_each(|slot| *slot = None);
    }

    /// Store `values` as the bind variables `v1..vN`
    pub fn bind(&mut self, values: Vec<Value>) {
        self.bind_vars = values
            .into_iter()
            .enumerate()
            .map(|(i, value)| (format!("v{}", i + 1), value))
            .collect();
    }
}

/// Live prepared statements of one connection
///
/// Owned by a single `Session` or `Conn` and never shared between threads.
#[derive(Debug)]
pub struct StatementTable {
    statements: HashMap<u32, PreparedStatement>,
    last_id: u32,
}

impl Default for StatementTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementTable {
    pub fn new() -> Self {
        Self {
            statements: HashMap::new(),
            last_id: 0,
        }
    }

    /// Issue the next statement id, starting at 1
    ///
    /// After wrapping around, ids of statements that are still live are skipped.
    pub fn next_id(&mut self) -> u32 {
        loop {
            self.last_id = self.last_id.wrapping_add(1).max(1);
            if !self.statements.contains_key(&self.last_id) {
                return self.last_id;
            }
        }
    }

    pub fn store(&mut self, stmt: PreparedStatement) {
        self.statements.insert(stmt.id, stmt);
    }

    pub fn get(&self, id: u32) -> Result<&PreparedStatement> {
        self.statements.get(&id).ok_or(Error::UnknownStatement(id))
    }

    pub fn get_mut(&mut self, id: u32) -> Result<&mut PreparedStatement> {
        self.statements
            .get_mut(&id)
            .ok_or(Error::UnknownStatement(id))
    }

    pub fn append_long_data(&mut self, id: u32, param: u16, chunk: &[u8]) -> Result<()> {
        self.get_mut(id)?.append_long_data(param, chunk)
    }

    pub fn remove(&mut self, id: u32) -> Option<PreparedStatement> {
        self.statements.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.statements.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
