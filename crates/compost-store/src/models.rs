//! Row encoding for the CSV log.

use serde::{Deserialize, Serialize};

use compost_types::{Reading, Timestamp};

use crate::error::Result;

/// One data row, with the column names used by the header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CsvRow {
    pub id: u64,
    pub timestamp: Timestamp,
    #[serde(rename = "temperatura_C")]
    pub temperature_c: f32,
    #[serde(rename = "humedad_porc")]
    pub humidity_pct: f32,
    #[serde(rename = "gas_ppm")]
    pub methane_ppm: f32,
}

impl From<&Reading> for CsvRow {
    fn from(reading: &Reading) -> Self {
        Self {
            id: reading.sequence_id,
            timestamp: reading.timestamp,
            temperature_c: reading.temperature_c,
            humidity_pct: reading.humidity_pct,
            methane_ppm: reading.methane_ppm,
        }
    }
}

impl From<CsvRow> for Reading {
    fn from(row: CsvRow) -> Self {
        Reading {
            sequence_id: row.id,
            timestamp: row.timestamp,
            temperature_c: row.temperature_c,
            humidity_pct: row.humidity_pct,
            methane_ppm: row.methane_ppm,
        }
    }
}

/// Encode a reading as a single newline-terminated CSV row.
pub(crate) fn encode_row(reading: &Reading) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::with_capacity(64));
    writer.serialize(CsvRow::from(reading))?;
    writer
        .into_inner()
        .map_err(|e| crate::error::Error::Io(e.into_error()))
}

/// Parse the leading id field of a data row.
pub(crate) fn parse_row_id(line: &[u8]) -> Option<u64> {
    let field = line.split(|b| *b == b',').next()?;
    std::str::from_utf8(field).ok()?.trim().parse().ok()
}
