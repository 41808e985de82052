//! Read-side view of an emitted metadata delta.
//!
//! [`MetadataDeltaView`] parses the `#-` stream and heaps that [`crate::DeltaEmitter`]
//! produces, so a delta can be inspected the way a debugger or runtime would apply it: the
//! EncLog in emission order, the EncMap, the rows of every table and their heap values.
//! Heap indices inside the rows are absolute; the view resolves them against the bases the
//! delta was emitted with.
//!
//! # Example
//!
//! ```rust,ignore
//! use cildelta::metadata::delta::MetadataDeltaView;
//! use cildelta::metadata::tables::TableId;
//!
//! let delta = result.delta.unwrap();
//! let view = MetadataDeltaView::parse(&delta.metadata, delta.heap_bases)?;
//! assert_eq!(view.generation()?, 1);
//! for entry in view.enc_log()? {
//!     println!("{} {:?}", entry.token, entry.func_code);
//! }
//! # Ok::<(), cildelta::Error>(())
//! ```

use std::collections::BTreeMap;

use strum::IntoEnumIterator;

use crate::{
    file::io::{read_le, read_le_at},
    metadata::{
        heaps::HeapSizes,
        root::Root,
        streams::{
            Blob, Guid, Strings, UserStrings, BLOB_STREAM, GUID_STREAM, STRINGS_STREAM,
            TABLES_STREAM_UNCOMPRESSED, USER_STRINGS_STREAM,
        },
        tables::{columns, EncFuncCode, EncLogRow, TableId, DELTA_HEAP_SIZES},
        token::Token,
    },
    Error, Result,
};

/// One raw row: every column widened to `u32`.
pub type RawRow = Vec<u32>;

/// Parsed metadata delta.
pub struct MetadataDeltaView<'a> {
    root: Root,
    bases: HeapSizes,
    major_version: u8,
    heap_sizes: u8,
    valid: u64,
    sorted: u64,
    tables: BTreeMap<TableId, Vec<RawRow>>,
    strings: &'a [u8],
    user_strings: &'a [u8],
    guids: &'a [u8],
    blobs: &'a [u8],
}

impl<'a> MetadataDeltaView<'a> {
    /// Parses a delta's metadata blob.
    ///
    /// # Arguments
    /// * `data` - The metadata blob of the delta
    /// * `bases` - Heap sizes of all earlier generations, the bases of this delta's heaps
    ///
    /// # Errors
    /// Returns [`Error::NotSupported`] for tables outside the delta schema and
    /// [`Error::Malformed`] / [`Error::OutOfBounds`] for damaged data.
    pub fn parse(data: &'a [u8], bases: HeapSizes) -> Result<MetadataDeltaView<'a>> {
        let root = Root::read(data)?;

        let tables_stream = root
            .stream_data(data, TABLES_STREAM_UNCOMPRESSED)?
            .ok_or_else(|| malformed_error!("Delta has no #- stream"))?;
        if tables_stream.len() < 24 {
            return Err(Error::OutOfBounds);
        }

        let major_version = read_le::<u8>(&tables_stream[4..])?;
        let heap_sizes = read_le::<u8>(&tables_stream[6..])?;
        let valid = read_le::<u64>(&tables_stream[8..])?;
        let sorted = read_le::<u64>(&tables_stream[16..])?;

        if heap_sizes & 0x07 != 0x07 {
            return Err(malformed_error!(
                "Delta heap indices must be 4 bytes wide - 0x{:02X}",
                heap_sizes
            ));
        }

        let present: Vec<TableId> = TableId::iter()
            .filter(|table| valid & table.mask() != 0)
            .collect();
        let known_mask = present.iter().fold(0u64, |mask, table| mask | table.mask());
        if valid & !known_mask != 0 {
            return Err(Error::NotSupported);
        }

        let mut offset = 24;
        let mut counts = Vec::with_capacity(present.len());
        for _ in &present {
            counts.push(read_le_at::<u32>(tables_stream, &mut offset)? as usize);
        }

        let mut tables = BTreeMap::new();
        for (table, count) in present.into_iter().zip(counts) {
            let schema = columns(table).ok_or(Error::NotSupported)?;
            let mut rows = Vec::with_capacity(count);
            for _ in 0..count {
                let mut row = Vec::with_capacity(schema.len());
                for width in schema {
                    let value = match width {
                        2 => u32::from(read_le_at::<u16>(tables_stream, &mut offset)?),
                        _ => read_le_at::<u32>(tables_stream, &mut offset)?,
                    };
                    row.push(value);
                }
                rows.push(row);
            }
            tables.insert(table, rows);
        }

        let stream = |name: &str| -> Result<&'a [u8]> {
            Ok(root.stream_data(data, name)?.unwrap_or(&[]))
        };
        let strings = stream(STRINGS_STREAM)?;
        let user_strings = stream(USER_STRINGS_STREAM)?;
        let guids = stream(GUID_STREAM)?;
        let blobs = stream(BLOB_STREAM)?;

        Ok(MetadataDeltaView {
            root,
            bases,
            major_version,
            heap_sizes,
            valid,
            sorted,
            tables,
            strings,
            user_strings,
            guids,
            blobs,
        })
    }

    /// The metadata root of the delta.
    #[must_use]
    pub fn root(&self) -> &Root {
        &self.root
    }

    /// Major version of the tables stream (2 for deltas).
    #[must_use]
    pub fn major_version(&self) -> u8 {
        self.major_version
    }

    /// The `HeapSizes` byte of the tables stream.
    #[must_use]
    pub fn heap_sizes(&self) -> u8 {
        self.heap_sizes
    }

    /// Returns true if the stream carries the standard delta flags.
    #[must_use]
    pub fn is_delta_format(&self) -> bool {
        self.heap_sizes == DELTA_HEAP_SIZES
    }

    /// Bit mask of present tables.
    #[must_use]
    pub fn valid(&self) -> u64 {
        self.valid
    }

    /// Bit mask of sorted tables.
    #[must_use]
    pub fn sorted(&self) -> u64 {
        self.sorted
    }

    /// Number of rows `table` carries in this delta.
    #[must_use]
    pub fn row_count(&self, table: TableId) -> usize {
        self.tables.get(&table).map_or(0, Vec::len)
    }

    /// Raw rows of `table`, in stream order.
    #[must_use]
    pub fn rows(&self, table: TableId) -> &[RawRow] {
        self.tables.get(&table).map_or(&[], Vec::as_slice)
    }

    /// The EncLog, in emission order.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] for unknown function codes.
    pub fn enc_log(&self) -> Result<Vec<EncLogRow>> {
        self.rows(TableId::EncLog)
            .iter()
            .map(|row| {
                let func_code = EncFuncCode::from_u32(row[1])
                    .ok_or_else(|| malformed_error!("Unknown EnC function code {}", row[1]))?;
                Ok(EncLogRow {
                    token: Token::new(row[0]),
                    func_code,
                })
            })
            .collect()
    }

    /// The EncMap tokens.
    #[must_use]
    pub fn enc_map(&self) -> Vec<Token> {
        self.rows(TableId::EncMap)
            .iter()
            .map(|row| Token::new(row[0]))
            .collect()
    }

    /// Tokens of the rows `table` carries, in stream order.
    ///
    /// The Module row is not part of the EncMap and always has token `0x00000001`.
    #[must_use]
    pub fn tokens(&self, table: TableId) -> Vec<Token> {
        if table == TableId::Module {
            return (1..=self.row_count(table))
                .filter_map(|row| u32::try_from(row).ok())
                .map(Token::new)
                .collect();
        }

        self.enc_map()
            .into_iter()
            .filter(|token| token.is_table(table))
            .collect()
    }

    /// The row with `token`, located through the EncMap.
    #[must_use]
    pub fn row(&self, token: Token) -> Option<&[u32]> {
        let table = token.table_id()?;
        let position = self.tokens(table).iter().position(|t| *t == token)?;
        self.rows(table).get(position).map(Vec::as_slice)
    }

    /// Generation number stored in the Module row.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the delta has no Module row.
    pub fn generation(&self) -> Result<u16> {
        let row = self
            .rows(TableId::Module)
            .first()
            .ok_or_else(|| malformed_error!("Delta has no Module row"))?;
        u16::try_from(row[0]).map_err(|_| malformed_error!("Invalid generation {}", row[0]))
    }

    /// Resolves a `#Strings` index.
    ///
    /// # Errors
    /// Returns an error if the index lies outside this delta's heap.
    pub fn string(&self, index: u32) -> Result<&'a str> {
        Strings::from(self.strings, self.bases.strings)?.get(index as usize)
    }

    /// Resolves a `#Blob` index.
    ///
    /// # Errors
    /// Returns an error if the index lies outside this delta's heap.
    pub fn blob(&self, index: u32) -> Result<&'a [u8]> {
        Blob::from(self.blobs, self.bases.blobs)?.get(index as usize)
    }

    /// Resolves a `#GUID` index.
    ///
    /// # Errors
    /// Returns an error if the index lies outside this delta's heap.
    pub fn guid(&self, index: u32) -> Result<uguid::Guid> {
        Guid::from(self.guids, self.bases.guids)?.get(index as usize)
    }

    /// Resolves a `#US` offset (the row of an `ldstr` token).
    ///
    /// # Errors
    /// Returns an error if the offset lies outside this delta's heap.
    pub fn user_string(&self, offset: u32) -> Result<String> {
        UserStrings::from(self.user_strings, self.bases.user_strings)?.get(offset as usize)
    }

    /// Sizes of this delta's heaps added to the bases, i.e. the bases of the next
    /// generation.
    #[must_use]
    pub fn next_bases(&self) -> HeapSizes {
        let len = |data: &[u8]| u32::try_from(data.len()).unwrap_or(u32::MAX);
        HeapSizes {
            strings: self.bases.strings.saturating_add(len(self.strings)),
            user_strings: self.bases.user_strings.saturating_add(len(self.user_strings)),
            blobs: self.bases.blobs.saturating_add(len(self.blobs)),
            guids: self.bases.guids.saturating_add(len(self.guids) / 16),
        }
    }
}

#[cfg(test)]
mod tests {
    use uguid::guid;

    use super::*;
    use crate::metadata::{
        heaps::{GuidHeapBuilder, StringHeapBuilder},
        root::write_metadata_root,
        tables::{DeltaTablesWriter, MethodDefRow, ModuleRow},
    };

    fn sample(bases: HeapSizes) -> Vec<u8> {
        let mut strings = StringHeapBuilder::new(bases.strings);
        let mut guids = GuidHeapBuilder::new(bases.guids);

        let mut writer = DeltaTablesWriter::new();
        let mvid = guids.add(guid!("01020304-0506-0708-090a-0b0c0d0e0f10")).unwrap();
        writer
            .add_row(
                1,
                &ModuleRow {
                    generation: 1,
                    name: strings.add("App.dll").unwrap(),
                    mvid,
                    enc_id: guids.add(guid!("11111111-1111-1111-1111-111111111111")).unwrap(),
                    enc_base_id: 0,
                },
            )
            .unwrap();
        let method = Token::new(0x06000002);
        writer
            .add_row(
                2,
                &MethodDefRow {
                    rva: 4,
                    impl_flags: 0,
                    flags: 0x96,
                    name: strings.add("Main").unwrap(),
                    signature: 0,
                    param_list: 1,
                },
            )
            .unwrap();
        writer.log(method, EncFuncCode::Default);

        write_metadata_root(&[
            ("#-", writer.serialize().unwrap()),
            ("#Strings", strings.bytes()),
            ("#US", Vec::new()),
            ("#GUID", guids.bytes()),
            ("#Blob", Vec::new()),
        ])
        .unwrap()
    }

    #[test]
    fn reads_written_delta() {
        let bases = HeapSizes {
            strings: 0x40,
            user_strings: 0x10,
            blobs: 0x20,
            guids: 1,
        };
        let data = sample(bases);
        let view = MetadataDeltaView::parse(&data, bases).unwrap();

        assert!(view.is_delta_format());
        assert_eq!(view.major_version(), 2);
        assert_eq!(view.generation().unwrap(), 1);
        assert_eq!(view.row_count(TableId::MethodDef), 1);

        let log = view.enc_log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].token, Token::new(0x06000002));
        assert_eq!(view.enc_map(), vec![Token::new(0x06000002)]);

        let method = view.row(Token::new(0x06000002)).unwrap();
        assert_eq!(method[0], 4);
        assert_eq!(view.string(method[3]).unwrap(), "Main");

        let module = &view.rows(TableId::Module)[0];
        assert_eq!(view.string(module[1]).unwrap(), "App.dll");
        assert_eq!(module[2], 2);
        assert_eq!(
            view.guid(module[2]).unwrap(),
            guid!("01020304-0506-0708-090a-0b0c0d0e0f10")
        );

        let next = view.next_bases();
        assert_eq!(next.guids, 3);
        assert_eq!(next.strings, 0x40 + 16);
    }

    #[test]
    fn missing_tables_stream() {
        let data = write_metadata_root(&[("#Strings", vec![0; 4])]).unwrap();
        assert!(MetadataDeltaView::parse(&data, HeapSizes::default()).is_err());
    }
}
