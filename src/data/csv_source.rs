use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use super::{Candle, DataSource};
use crate::error::{Error, Result};
use crate::strategy::{IndicatorSnapshot, Trend};

const SMA_PERIODS: [usize; 3] = [20, 50, 200];
const ATR_PERIOD: usize = 14;
const AVG_VOLUME_PERIOD: usize = 20;

/// In-memory OHLCV source parsed from a dataset CSV.
///
/// Required columns (header is case-insensitive): `date, open, high, low,
/// close, volume`; an optional `symbol` column overrides the default
/// symbol. Computes SMA(20/50/200), ATR(14), 20-bar average volume, and a
/// naive first-to-last-close trend label per symbol.
#[derive(Debug)]
pub struct CsvDataSource {
    by_symbol: HashMap<String, Vec<Candle>>,
    trend: HashMap<String, Trend>,
}

impl CsvDataSource {
    pub fn from_path(path: &Path, default_symbol: &str) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| Error::validation(format!("cannot open dataset {}: {e}", path.display())))?;
        Self::from_reader(file, default_symbol)
    }

    pub fn from_reader<R: Read>(reader: R, default_symbol: &str) -> Result<Self> {
        let candles = parse_candles(reader, default_symbol)?;
        let mut by_symbol: HashMap<String, Vec<Candle>> = HashMap::new();
        for candle in candles {
            by_symbol.entry(candle.symbol.clone()).or_default().push(candle);
        }
        for series in by_symbol.values_mut() {
            series.sort_by_key(|c| c.timestamp);
        }
        let trend = by_symbol
            .iter()
            .map(|(symbol, series)| (symbol.clone(), naive_trend(series)))
            .collect();
        Ok(Self { by_symbol, trend })
    }

    pub fn total_candles(&self) -> usize {
        self.by_symbol.values().map(Vec::len).sum()
    }
}

impl DataSource for CsvDataSource {
    fn symbols(&self) -> Vec<String> {
        self.by_symbol.keys().cloned().collect()
    }

    fn candles(&self, symbol: &str) -> &[Candle] {
        self.by_symbol.get(symbol).map_or(&[], Vec::as_slice)
    }

    fn snapshot_at(&self, symbol: &str, timestamp: DateTime<Utc>) -> Option<IndicatorSnapshot> {
        let series = self.by_symbol.get(symbol)?;
        let index = series
            .binary_search_by_key(&timestamp, |c| c.timestamp)
            .ok()?;
        let candle = &series[index];

        let mut snapshot = IndicatorSnapshot::empty(symbol, timestamp);
        snapshot.price = candle.close;
        snapshot.volume = candle.volume;
        snapshot.avg_volume = trailing_mean(series, index, AVG_VOLUME_PERIOD, |c| c.volume);
        let [sma20, sma50, sma200] =
            SMA_PERIODS.map(|period| trailing_mean(series, index, period, |c| c.close));
        snapshot.sma20 = sma20;
        snapshot.sma50 = sma50;
        snapshot.sma200 = sma200;
        snapshot.atr = average_true_range(series, index);
        let trend = self.trend.get(symbol).copied().unwrap_or_default();
        snapshot.market_trend = trend;
        snapshot.sector_trend = trend;
        Some(snapshot)
    }
}

/// Mean of `f` over the `period` candles ending at `index` inclusive.
/// Zero when fewer than `period` candles are available.
fn trailing_mean(series: &[Candle], index: usize, period: usize, f: impl Fn(&Candle) -> f64) -> f64 {
    if index + 1 < period {
        return 0.0;
    }
    let window = &series[index + 1 - period..=index];
    window.iter().map(f).sum::<f64>() / period as f64
}

fn average_true_range(series: &[Candle], index: usize) -> f64 {
    // True range needs the prior close, so ATR(14) needs 15 bars.
    if index < ATR_PERIOD {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in index + 1 - ATR_PERIOD..=index {
        let prev_close = series[i - 1].close;
        let tr = (series[i].high - series[i].low)
            .max((series[i].high - prev_close).abs())
            .max((series[i].low - prev_close).abs());
        sum += tr;
    }
    sum / ATR_PERIOD as f64
}

fn naive_trend(series: &[Candle]) -> Trend {
    match (series.first(), series.last()) {
        (Some(first), Some(last)) if last.close > first.close => Trend::Bullish,
        (Some(first), Some(last)) if last.close < first.close => Trend::Bearish,
        _ => Trend::Neutral,
    }
}

struct ColumnIndices {
    date: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: usize,
    symbol: Option<usize>,
}

fn resolve_columns(headers: &csv::StringRecord) -> Result<ColumnIndices> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    for (i, name) in headers.iter().enumerate() {
        positions.insert(name.trim().to_ascii_lowercase(), i);
    }
    let required = |name: &str| {
        positions
            .get(name)
            .copied()
            .ok_or_else(|| Error::validation(format!("dataset CSV missing required column: {name}")))
    };
    Ok(ColumnIndices {
        date: required("date")?,
        open: required("open")?,
        high: required("high")?,
        low: required("low")?,
        close: required("close")?,
        volume: required("volume")?,
        symbol: positions.get("symbol").copied(),
    })
}

fn parse_candles<R: Read>(reader: R, default_symbol: &str) -> Result<Vec<Candle>> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = csv_reader
        .headers()
        .map_err(|e| Error::validation(format!("dataset CSV header unreadable: {e}")))?
        .clone();
    let cols = resolve_columns(&headers)?;

    let mut candles = Vec::new();
    for (row_number, record) in csv_reader.records().enumerate() {
        let record =
            record.map_err(|e| Error::validation(format!("row {}: {e}", row_number + 2)))?;
        let field = |idx: usize, name: &str| -> Result<f64> {
            record
                .get(idx)
                .and_then(|raw| raw.parse::<f64>().ok())
                .ok_or_else(|| {
                    Error::validation(format!("row {}: bad {name} value", row_number + 2))
                })
        };
        let raw_date = record
            .get(cols.date)
            .ok_or_else(|| Error::validation(format!("row {}: missing date", row_number + 2)))?;
        let symbol = cols
            .symbol
            .and_then(|i| record.get(i))
            .filter(|s| !s.is_empty())
            .unwrap_or(default_symbol);
        candles.push(Candle {
            symbol: symbol.to_string(),
            timestamp: parse_timestamp(raw_date)
                .ok_or_else(|| Error::validation(format!("row {}: bad date {raw_date}", row_number + 2)))?,
            open: field(cols.open, "open")?,
            high: field(cols.high, "high")?,
            low: field(cols.low, "low")?,
            close: field(cols.close, "close")?,
            volume: field(cols.volume, "volume")?,
        });
    }
    Ok(candles)
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, or RFC 3339.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}
