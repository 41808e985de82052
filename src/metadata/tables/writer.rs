//! Writer for the uncompressed (`#-`) tables stream of a metadata delta.
//!
//! Rows are collected per table keyed by row id, so each table is serialized in row id
//! order regardless of the order rows were produced in. The `EncMap` table is derived from
//! the collected rows and therefore always lists exactly the delta's row tokens, sorted.
//! `EncLog` entries are kept in the order they were logged.
//!
//! # Stream Layout
//!
//! ```text
//! reserved      u32   0
//! major         u8    2
//! minor         u8    0
//! heap_sizes    u8    0x07 | 0x20 | 0x80
//! reserved      u8    1
//! valid         u64   bit per present table
//! sorted        u64   bit per present table that is sorted
//! rows          u32   per present table, ascending table number
//! table data    ...   per present table, ascending table number
//! ```

use std::collections::BTreeMap;

use crate::{
    file::io::{align_to, write_le},
    metadata::{
        tables::{
            rows::{DeltaRow, EncFuncCode, EncLogRow, EncMapRow},
            TableId,
        },
        token::Token,
    },
    Error, Result,
};

/// Heap-size flags of a delta tables stream: large `#Strings`, `#GUID` and `#Blob` indices,
/// plus the EnC delta (0x20) and deleted-marks (0x80) bits.
pub const DELTA_HEAP_SIZES: u8 = 0x07 | 0x20 | 0x80;

/// Collects the rows of one metadata delta and serializes them as a `#-` stream.
#[derive(Debug, Default, Clone)]
pub struct DeltaTablesWriter {
    tables: BTreeMap<TableId, BTreeMap<u32, Vec<u8>>>,
    log: Vec<EncLogRow>,
}

impl DeltaTablesWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `row` with row id `rid` to its table.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvariantViolation`] if the table already holds a row with
    /// this id, or an encoding error from the row itself.
    pub fn add_row<R: DeltaRow>(&mut self, rid: u32, row: &R) -> Result<()> {
        let mut data = Vec::new();
        row.write(&mut data)?;

        let table = self.tables.entry(R::TABLE).or_default();
        if table.insert(rid, data).is_some() {
            return Err(Error::InvariantViolation(format!(
                "row {} of {:?} written twice in one delta",
                rid,
                R::TABLE
            )));
        }

        Ok(())
    }

    /// Appends an `EncLog` entry.
    pub fn log(&mut self, token: Token, func_code: EncFuncCode) {
        self.log.push(EncLogRow { token, func_code });
    }

    /// Returns the logged operations in emission order.
    #[must_use]
    pub fn enc_log(&self) -> &[EncLogRow] {
        &self.log
    }

    /// Returns the tokens of every row added so far, ascending. This is the `EncMap` content.
    ///
    /// The `Module` row carries the generation markers and is not part of the map.
    ///
    /// # Errors
    /// Returns [`crate::Error::TokenExhausted`] if a row id exceeds 24 bits.
    pub fn enc_map(&self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        for (table, rows) in &self.tables {
            if *table == TableId::Module {
                continue;
            }
            for rid in rows.keys() {
                tokens.push(Token::from_parts(*table, *rid)?);
            }
        }

        tokens.sort_unstable();
        Ok(tokens)
    }

    /// Returns the number of rows added to `table`.
    #[must_use]
    pub fn row_count(&self, table: TableId) -> usize {
        match table {
            TableId::EncLog => self.log.len(),
            _ => self.tables.get(&table).map_or(0, BTreeMap::len),
        }
    }

    /// Serializes the stream, padded to a 4-byte boundary.
    ///
    /// # Errors
    /// Returns an error if a table grew beyond `u32` rows or a token could not be formed.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut tables: BTreeMap<TableId, Vec<&[u8]>> = self
            .tables
            .iter()
            .map(|(table, rows)| (*table, rows.values().map(Vec::as_slice).collect()))
            .collect();

        let mut log_data = Vec::with_capacity(self.log.len() * 8);
        for entry in &self.log {
            entry.write(&mut log_data)?;
        }

        let mut map_data = Vec::new();
        for token in self.enc_map()? {
            EncMapRow { token }.write(&mut map_data)?;
        }

        if !self.log.is_empty() {
            tables.insert(TableId::EncLog, log_data.chunks(8).collect());
        }
        if !map_data.is_empty() {
            tables.insert(TableId::EncMap, map_data.chunks(4).collect());
        }

        let valid = tables.keys().fold(0u64, |mask, table| mask | table.mask());
        let sorted = tables
            .keys()
            .filter(|table| table.is_sorted())
            .fold(0u64, |mask, table| mask | table.mask());

        let mut data = Vec::new();
        write_le(&mut data, 0u32);
        write_le(&mut data, 2u8);
        write_le(&mut data, 0u8);
        write_le(&mut data, DELTA_HEAP_SIZES);
        write_le(&mut data, 1u8);
        write_le(&mut data, valid);
        write_le(&mut data, sorted);

        for rows in tables.values() {
            let count = u32::try_from(rows.len())
                .map_err(|_| malformed_error!("Too many rows in a delta table"))?;
            write_le(&mut data, count);
        }

        for rows in tables.values() {
            for row in rows {
                data.extend_from_slice(row);
            }
        }

        align_to(&mut data, 4);
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        tables::rows::{MethodDefRow, ModuleRow, StandAloneSigRow},
        token::Token,
    };
    use crate::file::io::read_le_at;

    fn method(rva: u32) -> MethodDefRow {
        MethodDefRow {
            rva,
            impl_flags: 0,
            flags: 0x0096,
            name: 1,
            signature: 1,
            param_list: 1,
        }
    }

    #[test]
    fn rows_serialized_by_rid() {
        let mut writer = DeltaTablesWriter::new();
        writer
            .add_row(
                1,
                &ModuleRow {
                    generation: 1,
                    name: 1,
                    mvid: 1,
                    enc_id: 2,
                    enc_base_id: 0,
                },
            )
            .unwrap();
        writer.add_row(3, &method(0x20)).unwrap();
        writer.add_row(1, &method(0x04)).unwrap();
        writer.add_row(2, &StandAloneSigRow { signature: 5 }).unwrap();
        writer.log(Token(0x06000003), EncFuncCode::Default);
        writer.log(Token(0x06000001), EncFuncCode::Default);
        writer.log(Token(0x11000002), EncFuncCode::Default);

        assert_eq!(
            writer.enc_map().unwrap(),
            vec![Token(0x06000001), Token(0x06000003), Token(0x11000002)]
        );

        let data = writer.serialize().unwrap();
        assert_eq!(data.len() % 4, 0);

        let mut offset = 0;
        assert_eq!(read_le_at::<u32>(&data, &mut offset).unwrap(), 0);
        assert_eq!(read_le_at::<u8>(&data, &mut offset).unwrap(), 2);
        assert_eq!(read_le_at::<u8>(&data, &mut offset).unwrap(), 0);
        assert_eq!(read_le_at::<u8>(&data, &mut offset).unwrap(), 0xA7);
        assert_eq!(read_le_at::<u8>(&data, &mut offset).unwrap(), 1);

        let valid = read_le_at::<u64>(&data, &mut offset).unwrap();
        let expected = TableId::Module.mask()
            | TableId::MethodDef.mask()
            | TableId::StandAloneSig.mask()
            | TableId::EncLog.mask()
            | TableId::EncMap.mask();
        assert_eq!(valid, expected);

        let sorted = read_le_at::<u64>(&data, &mut offset).unwrap();
        assert_eq!(sorted, TableId::EncMap.mask());

        let counts: Vec<u32> = (0..5)
            .map(|_| read_le_at::<u32>(&data, &mut offset).unwrap())
            .collect();
        assert_eq!(counts, [1, 2, 1, 3, 3]);

        // Module row, then MethodDef rid 1 before rid 3
        offset += 18;
        assert_eq!(read_le_at::<u32>(&data, &mut offset).unwrap(), 0x04);
        offset += 16;
        assert_eq!(read_le_at::<u32>(&data, &mut offset).unwrap(), 0x20);
    }

    #[test]
    fn duplicate_rid_rejected() {
        let mut writer = DeltaTablesWriter::new();
        writer.add_row(1, &method(4)).unwrap();
        assert!(matches!(
            writer.add_row(1, &method(8)),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn row_count() {
        let mut writer = DeltaTablesWriter::new();
        writer.add_row(7, &method(4)).unwrap();
        writer.log(Token(0x06000007), EncFuncCode::Default);
        assert_eq!(writer.row_count(TableId::MethodDef), 1);
        assert_eq!(writer.row_count(TableId::EncLog), 1);
        assert_eq!(writer.row_count(TableId::Field), 0);
    }
}
