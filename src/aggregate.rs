//! Streams the accidents CSV and sums deaths per vehicle category and road.
//!
//! The input is treated as plain comma-split text: quotes are ordinary
//! characters and there is no escaping, so a comma always starts a new field.
//! Any malformed line aborts the run; partial totals are discarded.

use crate::config::Config;
use crate::error::CsvParseError;
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Read;

/// Which columns the aggregation reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationColumns {
    pub road: String,
    pub deaths: String,
    pub categories: Vec<String>,
}

impl AggregationColumns {
    pub fn from_config(config: &Config) -> Self {
        Self {
            road: config.road_column.clone(),
            deaths: config.deaths_column.clone(),
            categories: config.vehicle_categories.clone(),
        }
    }
}

/// One validated data line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccidentRow {
    pub road_name: String,
    /// Involved-vehicle counts, parallel to [`AggregationColumns::categories`].
    pub category_counts: Vec<i64>,
    pub deaths: i64,
}

/// Category -> road -> accumulated deaths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryTotals(BTreeMap<String, BTreeMap<String, i64>>);

/// A single (category, road, deaths) triple ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationRecord {
    pub vehicle_category: String,
    pub road_name: String,
    pub number_of_deaths: i64,
}

impl CategoryTotals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `deaths` to the (category, road) pair, creating it at zero on first use.
    /// Returns `None` on overflow.
    pub fn add(&mut self, category: &str, road: &str, deaths: i64) -> Option<i64> {
        let slot = self
            .0
            .entry(category.to_string())
            .or_default()
            .entry(road.to_string())
            .or_insert(0);
        *slot = slot.checked_add(deaths)?;
        Some(*slot)
    }

    pub fn get(&self, category: &str, road: &str) -> Option<i64> {
        self.0.get(category)?.get(road).copied()
    }

    /// Number of (category, road) pairs, i.e. rows a write will insert.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every pair as a record, ordered by category then road.
    pub fn records(&self) -> impl Iterator<Item = AggregationRecord> + '_ {
        self.0.iter().flat_map(|(category, roads)| {
            roads.iter().map(move |(road, deaths)| AggregationRecord {
                vehicle_category: category.clone(),
                road_name: road.clone(),
                number_of_deaths: *deaths,
            })
        })
    }
}

/// Header positions of every column the aggregation needs.
struct ColumnIndex {
    header: Vec<String>,
    road: (usize, String),
    deaths: (usize, String),
    categories: Vec<(usize, String)>,
}

impl ColumnIndex {
    fn resolve(
        header: &StringRecord,
        columns: &AggregationColumns,
    ) -> Result<Self, CsvParseError> {
        // Last occurrence wins when a header name repeats.
        let find = |name: &str| {
            header
                .iter()
                .enumerate()
                .filter(|(_, h)| *h == name)
                .last()
                .map(|(i, _)| (i, name.to_string()))
                .ok_or_else(|| CsvParseError::MissingColumn(name.to_string()))
        };
        Ok(Self {
            header: header.iter().map(str::to_string).collect(),
            road: find(columns.road.as_str())?,
            deaths: find(columns.deaths.as_str())?,
            categories: columns
                .categories
                .iter()
                .map(|c| find(c.as_str()))
                .collect::<Result<_, _>>()?,
        })
    }

    fn parse_row(&self, record: &StringRecord, line: u64) -> Result<AccidentRow, CsvParseError> {
        // A short row fails even when only untracked columns are missing.
        if let Some(column) = self.header.get(record.len()) {
            return Err(CsvParseError::MissingField {
                line,
                column: column.clone(),
            });
        }
        let field = |(idx, name): &(usize, String)| {
            record.get(*idx).ok_or_else(|| CsvParseError::MissingField {
                line,
                column: name.clone(),
            })
        };
        let integer = |column: &(usize, String)| -> Result<i64, CsvParseError> {
            let raw = field(column)?;
            raw.parse::<i64>().map_err(|_| CsvParseError::InvalidInteger {
                line,
                column: column.1.clone(),
                value: raw.to_string(),
            })
        };

        let road_name = field(&self.road)?.to_string();
        let category_counts = self
            .categories
            .iter()
            .map(&integer)
            .collect::<Result<Vec<_>, _>>()?;
        let deaths = integer(&self.deaths)?;
        Ok(AccidentRow {
            road_name,
            category_counts,
            deaths,
        })
    }
}

/// Aggregates the CSV read from `source`.
///
/// For every row and every tracked category whose count is positive, the
/// row's deaths are added to `totals[category][road]`.
pub fn aggregate<R: Read>(
    source: R,
    columns: &AggregationColumns,
) -> Result<CategoryTotals, CsvParseError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .quoting(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(source);

    let mut records = reader.records();
    let header = records.next().ok_or(CsvParseError::MissingHeader)??;
    let index = ColumnIndex::resolve(&header, columns)?;

    let mut totals = CategoryTotals::new();
    for record in records {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let row = index.parse_row(&record, line)?;
        for (category, count) in columns.categories.iter().zip(&row.category_counts) {
            if *count > 0 {
                totals
                    .add(category, &row.road_name, row.deaths)
                    .ok_or_else(|| CsvParseError::Overflow {
                        line,
                        road: row.road_name.clone(),
                    })?;
            }
        }
    }
    Ok(totals)
}
