//! Result-set decoding and batch streaming.
//!
//! Fetched batches arrive in one of two shapes: column-major vectors with
//! null bitmaps from the extended service, or pre-rendered tab-separated
//! rows from the legacy service. Both decode into row-major display strings
//! here. [`BatchStream`] wraps the fetch loop as a lazy, non-restartable
//! sequence of [`ResultBatch`]es; dropping it mid-result issues no RPC.

use std::sync::Arc;

use futures_util::stream::{self, Stream};
use tokio::sync::Mutex;

use crate::error::{ClientError, TransportError};
use crate::protocol::messages::{ColumnBatch, ColumnValues};
use crate::protocol::{BatchPayload, ProtocolAdapter, ProtocolHandle};
use crate::types::{ConverterTable, RawValue, Schema, Stringifier, TypeTag};

/// Display literal substituted for NULL cells.
pub const NULL_LITERAL: &str = "NULL";

/// One decoded batch of rows, in server order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultBatch {
    /// Row-major cells, already rendered to display strings
    pub rows: Vec<Vec<String>>,
}

impl ResultBatch {
    /// Number of rows in this batch.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the batch carries no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Lazy sequence of result batches for one submitted query.
///
/// Each [`next_batch`](Self::next_batch) call performs exactly one fetch
/// round-trip; the sequence ends when the server reports no more rows.
/// The stream cannot be restarted, and dropping it early is quiet: any
/// remaining server-side state is released by closing the query, not here.
pub struct BatchStream<'a> {
    adapter: Arc<Mutex<dyn ProtocolAdapter>>,
    handle: ProtocolHandle,
    schema: Option<Schema>,
    converters: &'a ConverterTable,
    fetch_size: i64,
    exhausted: bool,
}

impl<'a> BatchStream<'a> {
    pub(crate) fn new(
        adapter: Arc<Mutex<dyn ProtocolAdapter>>,
        handle: ProtocolHandle,
        schema: Option<Schema>,
        converters: &'a ConverterTable,
        fetch_size: i64,
    ) -> Self {
        Self {
            adapter,
            handle,
            schema,
            converters,
            fetch_size,
            exhausted: false,
        }
    }

    /// Fetch and decode the next batch, or `None` once the server has
    /// reported the end of the result set.
    pub async fn next_batch(&mut self) -> Result<Option<ResultBatch>, ClientError> {
        if self.exhausted {
            return Ok(None);
        }
        let raw = {
            let mut adapter = self.adapter.lock().await;
            adapter.fetch(&self.handle, self.fetch_size).await?
        };
        if !raw.has_more {
            self.exhausted = true;
        }
        let rows = decode_payload(raw.payload, self.schema.as_ref(), self.converters)?;
        Ok(Some(ResultBatch { rows }))
    }

    /// Adapt the sequence into a [`Stream`] of decoded batches.
    pub fn into_stream(self) -> impl Stream<Item = Result<ResultBatch, ClientError>> + 'a {
        stream::try_unfold(self, |mut batches| async move {
            match batches.next_batch().await? {
                Some(batch) => Ok(Some((batch, batches))),
                None => Ok(None),
            }
        })
    }
}

impl std::fmt::Debug for BatchStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchStream")
            .field("handle", &self.handle.display_id())
            .field("fetch_size", &self.fetch_size)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

/// Decode one wire payload into row-major display strings.
pub(crate) fn decode_payload(
    payload: BatchPayload,
    schema: Option<&Schema>,
    converters: &ConverterTable,
) -> Result<Vec<Vec<String>>, ClientError> {
    match payload {
        BatchPayload::Columnar(columns) => transpose(columns, schema, converters),
        BatchPayload::TextRows(rows) => {
            Ok(rows.into_iter().map(|row| split_text_row(&row)).collect())
        }
    }
}

/// Transpose column-major wire data into rows, applying null bitmaps and
/// per-tag converters.
fn transpose(
    mut columns: Vec<ColumnBatch>,
    schema: Option<&Schema>,
    converters: &ConverterTable,
) -> Result<Vec<Vec<String>>, ClientError> {
    let row_count = match columns.first() {
        Some(first) => first.values.len(),
        None => return Ok(Vec::new()),
    };
    for column in &columns {
        if column.values.len() != row_count {
            return Err(TransportError::InvalidResponse(format!(
                "ragged column batch: {} rows against {}",
                column.values.len(),
                row_count
            ))
            .into());
        }
    }
    let tags = column_tags(&columns, schema)?;

    let mut rows: Vec<Vec<String>> = (0..row_count)
        .map(|_| Vec::with_capacity(columns.len()))
        .collect();
    for (column, tag) in columns.iter_mut().zip(tags) {
        let converter = converters.get(tag);
        for (row_idx, row) in rows.iter_mut().enumerate() {
            if is_null(&column.nulls, row_idx) {
                row.push(NULL_LITERAL.to_string());
            } else {
                row.push(cell(&mut column.values, row_idx, converter));
            }
        }
    }
    Ok(rows)
}

/// Resolve the type tag of each wire column.
///
/// The schema wins when present; otherwise the tag is derived from the wire
/// representation, which is enough for default rendering.
fn column_tags(
    columns: &[ColumnBatch],
    schema: Option<&Schema>,
) -> Result<Vec<TypeTag>, ClientError> {
    match schema {
        Some(schema) => {
            if schema.columns.len() != columns.len() {
                return Err(TransportError::InvalidResponse(format!(
                    "batch carried {} columns but the schema describes {}",
                    columns.len(),
                    schema.columns.len()
                ))
                .into());
            }
            Ok(schema.columns.iter().map(|c| c.type_tag).collect())
        }
        None => Ok(columns.iter().map(|c| wire_tag(&c.values)).collect()),
    }
}

fn wire_tag(values: &ColumnValues) -> TypeTag {
    match values {
        ColumnValues::Bool(_) => TypeTag::Boolean,
        ColumnValues::TinyInt(_) => TypeTag::TinyInt,
        ColumnValues::SmallInt(_) => TypeTag::SmallInt,
        ColumnValues::Int(_) => TypeTag::Int,
        ColumnValues::BigInt(_) => TypeTag::BigInt,
        ColumnValues::Double(_) => TypeTag::Double,
        ColumnValues::Text(_) => TypeTag::String,
        ColumnValues::Binary(_) => TypeTag::Binary,
    }
}

/// LSB-first null bitmap lookup.
///
/// Servers may deliver a bitmap shorter than the row count; rows beyond its
/// end are treated as non-null rather than rejected.
fn is_null(bitmap: &[u8], row: usize) -> bool {
    bitmap
        .get(row / 8)
        .map_or(false, |byte| byte & (1 << (row % 8)) != 0)
}

/// Render one non-null cell.
///
/// Text cells on the identity path move the wire string through without
/// copying; everything else renders through [`RawValue`].
fn cell(values: &mut ColumnValues, row: usize, converter: Option<&Stringifier>) -> String {
    if let ColumnValues::Text(items) = values {
        return match converter {
            None => std::mem::take(&mut items[row]),
            Some(convert) => convert(RawValue::Text(&items[row])),
        };
    }
    let raw = raw_view(values, row);
    match converter {
        None => raw.render(),
        Some(convert) => convert(raw),
    }
}

fn raw_view(values: &ColumnValues, row: usize) -> RawValue<'_> {
    match values {
        ColumnValues::Bool(items) => RawValue::Bool(items[row]),
        ColumnValues::TinyInt(items) => RawValue::I8(items[row]),
        ColumnValues::SmallInt(items) => RawValue::I16(items[row]),
        ColumnValues::Int(items) => RawValue::I32(items[row]),
        ColumnValues::BigInt(items) => RawValue::I64(items[row]),
        ColumnValues::Double(items) => RawValue::F64(items[row]),
        ColumnValues::Text(items) => RawValue::Text(&items[row]),
        ColumnValues::Binary(items) => RawValue::Bytes(&items[row]),
    }
}

/// Split one legacy pre-rendered row on tab separators.
fn split_text_row(row: &str) -> Vec<String> {
    row.split('\t').map(str::to_string).collect()
}
