// src/fetch/extract.rs
//! Field extractor: locate the latest plausible value for a field in decoded rows.
//!
//! Column resolution is a case-insensitive substring match against the row's
//! column names, hints tried in priority order. When no hint resolves, scalar
//! fields fall back to scanning the latest row right-to-left for the first
//! number inside the plausibility range.

use crate::fetch::decode::{Decoded, DecodedRow};
use crate::fetch::types::{
    Extracted, FieldKind, FieldSpec, Plausible, Reading, Record, RowOrder, SourceSpec,
};

/// Extract `field` from `decoded` using the hints declared on `source`.
/// Returns `None` when no plausible value exists.
pub fn extract(decoded: &Decoded, field: &FieldSpec, source: &SourceSpec) -> Option<Extracted> {
    match (field.kind, decoded) {
        (FieldKind::Scalar, Decoded::Candidates(c)) => extract_candidate(c, field.range),
        (FieldKind::Scalar, Decoded::Rows(rows)) => extract_scalar(rows, source, field.range),
        (FieldKind::Pair, Decoded::Rows(rows)) => extract_pair(rows, source, field.range),
        (FieldKind::Records, Decoded::Rows(rows)) => extract_records(rows, field),
        _ => None,
    }
}

/// Parse a cell as a finite number, tolerating `%`, `$` and surrounding quotes.
pub fn parse_number(cell: &str) -> Option<f64> {
    let t = cell
        .trim()
        .trim_matches('"')
        .trim()
        .trim_end_matches('%')
        .trim_start_matches('$')
        .trim();
    t.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn latest_first(rows: &[DecodedRow], order: RowOrder) -> Box<dyn Iterator<Item = &DecodedRow> + '_> {
    match order {
        RowOrder::OldestFirst => Box::new(rows.iter().rev()),
        RowOrder::NewestFirst => Box::new(rows.iter()),
    }
}

fn as_of(row: &DecodedRow, source: &SourceSpec) -> Option<String> {
    row.lookup(&source.as_of_hint)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn extract_candidate(candidates: &[f64], range: Plausible) -> Option<Extracted> {
    candidates
        .iter()
        .copied()
        .find(|v| range.contains(*v))
        .map(|v| Extracted {
            value: Reading::Scalar(v),
            as_of: None,
        })
}

/// The latest row is the first (latest-first) row with a finite value in the
/// resolved column. The range is checked on that row only: an implausible
/// latest value fails the source instead of falling back to older data.
fn extract_scalar(rows: &[DecodedRow], source: &SourceSpec, range: Plausible) -> Option<Extracted> {
    let resolved = rows.iter().any(|r| r.resolve(&source.field_hint).is_some());

    let (row, v) = if resolved {
        latest_first(rows, source.row_order).find_map(|row| {
            let v = row.lookup(&source.field_hint).and_then(parse_number)?;
            Some((row, v))
        })?
    } else {
        // Positional fallback: latest row holding any number, scanned right-to-left.
        let row = latest_first(rows, source.row_order)
            .find(|row| row.values().any(|c| parse_number(c).is_some()))?;
        let v = row
            .values()
            .rev()
            .filter_map(parse_number)
            .find(|v| range.contains(*v))?;
        (row, v)
    };

    range.contains(v).then(|| Extracted {
        value: Reading::Scalar(v),
        as_of: as_of(row, source),
    })
}

fn extract_pair(rows: &[DecodedRow], source: &SourceSpec, range: Plausible) -> Option<Extracted> {
    if source.field_hint.is_empty() || source.pair_hint.is_empty() {
        return None;
    }
    // Both values must come from the same row, the latest one where both are numeric.
    let (row, first, second) = latest_first(rows, source.row_order).find_map(|row| {
        let first = row.lookup(&source.field_hint).and_then(parse_number)?;
        let second = row.lookup(&source.pair_hint).and_then(parse_number)?;
        Some((row, first, second))
    })?;

    (range.contains(first) && range.contains(second)).then(|| Extracted {
        value: Reading::Pair(first, second),
        as_of: as_of(row, source),
    })
}

/// Records keep feed order and are truncated to `field.limit`.
fn extract_records(rows: &[DecodedRow], field: &FieldSpec) -> Option<Extracted> {
    let mut out: Vec<Record> = Vec::new();
    for row in rows {
        if out.len() >= field.limit {
            break;
        }
        let mut record = Record::new();
        let mut complete = true;
        for col in &field.columns {
            let cell = row
                .lookup(&col.hint)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            if col.required && cell.is_none() {
                complete = false;
                break;
            }
            record.insert(col.name.clone(), cell);
        }
        if complete {
            out.push(record);
        }
    }
    (!out.is_empty()).then(|| Extracted {
        value: Reading::Records(out),
        as_of: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::decode::decode_csv;
    use crate::fetch::types::{ColumnSpec, Format};

    fn csv_source(hints: &[&str]) -> SourceSpec {
        SourceSpec::new("t", "https://x.test", Format::Csv).with_hint(hints)
    }

    fn scalar(v: Option<Extracted>) -> Option<f64> {
        match v?.value {
            Reading::Scalar(x) => Some(x),
            _ => None,
        }
    }

    #[test]
    fn parse_number_tolerates_decorations() {
        assert_eq!(parse_number(" 38.5% "), Some(38.5));
        assert_eq!(parse_number("$19.20"), Some(19.2));
        assert_eq!(parse_number("\"0.91\""), Some(0.91));
        assert_eq!(parse_number("."), None);
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("n/a"), None);
    }

    #[test]
    fn last_valid_row_wins() {
        let rows = decode_csv("Date,Close\n2024-01-01,10\n2024-01-02,22.5\n2024-01-03,.\n", true);
        let field = FieldSpec::scalar("vix", Plausible::ANY, vec![]);
        let got = extract(&Decoded::Rows(rows), &field, &csv_source(&["close"])).unwrap();
        assert_eq!(got.value, Reading::Scalar(22.5));
        assert_eq!(got.as_of.as_deref(), Some("2024-01-02"));
    }

    #[test]
    fn newest_first_feeds_take_the_top_row() {
        let rows = decode_csv("Date,Close\n2024-01-03,12\n2024-01-02,11\n", true);
        let field = FieldSpec::scalar("vix", Plausible::ANY, vec![]);
        let src = csv_source(&["close"]).with_row_order(RowOrder::NewestFirst);
        assert_eq!(scalar(extract(&Decoded::Rows(rows), &field, &src)), Some(12.0));
    }

    #[test]
    fn hint_priority_is_respected() {
        let rows = decode_csv("Date,All Ratio,Total Ratio\n2024-01-02,1.1,0.9\n", true);
        let field = FieldSpec::scalar("putCall", Plausible::between(0.0, 5.0), vec![]);
        let src = csv_source(&["total", "all"]);
        assert_eq!(scalar(extract(&Decoded::Rows(rows), &field, &src)), Some(0.9));
    }

    #[test]
    fn header_variants_resolve_same_column() {
        let field = FieldSpec::scalar("bull", Plausible::between(0.0, 100.0), vec![]);
        for header in ["Bullish%", "BULL_PCT", "bull"] {
            let body = format!("Date,{header},Other\n2024-01-02,41.2,7\n");
            let rows = decode_csv(&body, true);
            let got = extract(&Decoded::Rows(rows), &field, &csv_source(&["bull"]));
            assert_eq!(scalar(got), Some(41.2), "header {header}");
        }
    }

    #[test]
    fn out_of_range_only_cell_fails() {
        let rows = decode_csv("Date,Ratio\n2024-01-02,7.5\n", true);
        let field = FieldSpec::scalar("putCall", Plausible::between(0.0, 5.0), vec![]);
        assert!(extract(&Decoded::Rows(rows.clone()), &field, &csv_source(&["ratio"])).is_none());
        // Positional fallback applies the same bound.
        assert!(extract(&Decoded::Rows(rows), &field, &csv_source(&["nomatch"])).is_none());
    }

    #[test]
    fn implausible_latest_value_does_not_fall_back_to_older_rows() {
        let rows = decode_csv("Date,Ratio\n2024-01-01,0.9\n2024-01-02,7.5\n", true);
        let field = FieldSpec::scalar("putCall", Plausible::between(0.0, 5.0), vec![]);
        assert!(extract(&Decoded::Rows(rows.clone()), &field, &csv_source(&["ratio"])).is_none());
        assert!(extract(&Decoded::Rows(rows), &field, &csv_source(&["nomatch"])).is_none());

        let pair = FieldSpec::pair("aaii", Plausible::between(0.0, 100.0), vec![]);
        let src = csv_source(&["bull"]).with_pair_hint(&["bear"]);
        let rows = decode_csv("Date,Bull,Bear\n2024-01-04,40.1,29.9\n2024-01-11,140,30\n", true);
        assert!(extract(&Decoded::Rows(rows), &pair, &src).is_none());
    }

    #[test]
    fn positional_fallback_scans_right_to_left_within_range() {
        let rows = decode_csv("a,b,c,d\n2024-01-02,0.87,950000,1200\n", true);
        let field = FieldSpec::scalar("putCall", Plausible::between(0.0, 5.0), vec![]);
        let got = extract(&Decoded::Rows(rows), &field, &csv_source(&["p/c"]));
        assert_eq!(scalar(got), Some(0.87));
    }

    #[test]
    fn pair_requires_both_fields_from_one_row() {
        let field = FieldSpec::pair("aaii", Plausible::between(0.0, 100.0), vec![]);
        let src = csv_source(&["bull"]).with_pair_hint(&["bear"]);

        let rows = decode_csv(
            "Reported Date,Bullish,Neutral,Bearish\n2024-01-04,40.1,30,29.9\n2024-01-11,45.0,31,\n",
            true,
        );
        let got = extract(&Decoded::Rows(rows), &field, &src).unwrap();
        assert_eq!(got.value, Reading::Pair(40.1, 29.9));
        assert_eq!(got.as_of.as_deref(), Some("2024-01-04"));

        let only_bull = decode_csv("Date,Bullish\n2024-01-04,40.1\n", true);
        assert!(extract(&Decoded::Rows(only_bull), &field, &src).is_none());
    }

    #[test]
    fn records_skip_rows_missing_required_columns() {
        let field = FieldSpec::records(
            "reports",
            vec![
                ColumnSpec {
                    name: "symbol".into(),
                    hint: vec!["symbol".into(), "ticker".into()],
                    required: true,
                },
                ColumnSpec {
                    name: "epsEstimate".into(),
                    hint: vec!["epsestimate".into()],
                    required: false,
                },
            ],
            vec![],
        );
        let rows = vec![
            DecodedRow::from_pairs(vec![("symbol", "AAPL"), ("epsEstimate", "1.5")]),
            DecodedRow::from_pairs(vec![("symbol", ""), ("epsEstimate", "2.0")]),
            DecodedRow::from_pairs(vec![("ticker", "MSFT"), ("epsEstimate", "")]),
        ];
        let src = SourceSpec::new("t", "https://x.test", Format::Json);
        let got = extract(&Decoded::Rows(rows), &field, &src).unwrap();
        let Reading::Records(records) = got.value else {
            panic!("expected records");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["symbol"].as_deref(), Some("AAPL"));
        assert_eq!(records[1]["symbol"].as_deref(), Some("MSFT"));
        assert_eq!(records[1]["epsEstimate"], None);
    }

    #[test]
    fn candidates_take_first_plausible() {
        let field = FieldSpec::scalar("putCall", Plausible::between(0.0, 5.0), vec![]);
        let src = SourceSpec::new("t", "https://x.test", Format::HtmlScrape);
        let got = extract(&Decoded::Candidates(vec![2024.0, 19.0, 0.92, 1.1]), &field, &src);
        assert_eq!(scalar(got), Some(0.92));
        assert!(extract(&Decoded::Candidates(vec![7.5]), &field, &src).is_none());
    }
}
