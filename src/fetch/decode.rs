// src/fetch/decode.rs
//! Text decoder: raw body -> rows (csv/json/rss) or numeric candidates (html-scrape).
//!
//! Decoding never fails past this boundary; anything unparseable becomes an
//! empty result and the runner treats it as a failed attempt.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::fetch::types::{Format, SourceSpec};

/// Characters of visible text inspected after a scrape anchor.
pub const SCRAPE_WINDOW: usize = 160;

/// Wrapper keys probed (case-insensitively, in this order) on JSON objects.
const JSON_WRAPPER_KEYS: &[&str] = &[
    "data",
    "results",
    "earningscalendar",
    "economiccalendar",
    "items",
    "observations",
    "rows",
    "records",
];

/// One decoded row. Column names are lower-cased and kept in feed order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedRow {
    cells: Vec<(String, String)>,
}

impl DecodedRow {
    pub fn from_pairs<K: Into<String>, V: Into<String>>(pairs: Vec<(K, V)>) -> Self {
        Self {
            cells: pairs
                .into_iter()
                .map(|(k, v)| (k.into().to_lowercase(), v.into()))
                .collect(),
        }
    }

    fn push(&mut self, column: String, value: String) {
        self.cells.push((column, value));
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Exact column lookup.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(k, _)| k == column)
            .map(|(_, v)| v.as_str())
    }

    /// Resolve the first column whose name contains a hint, trying hints in order.
    pub fn resolve(&self, hints: &[String]) -> Option<&str> {
        hints.iter().find_map(|hint| {
            let hint = hint.to_lowercase();
            if hint.is_empty() {
                return None;
            }
            self.cells
                .iter()
                .find(|(k, _)| k.contains(&hint))
                .map(|(k, _)| k.as_str())
        })
    }

    /// Cell of the first column matching `hints` (see [`DecodedRow::resolve`]).
    pub fn lookup(&self, hints: &[String]) -> Option<&str> {
        self.resolve(hints).and_then(|col| self.get(col))
    }

    /// Cell values in column order.
    pub fn values(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.cells.iter().map(|(_, v)| v.as_str())
    }
}

/// Decoder output.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Rows(Vec<DecodedRow>),
    Candidates(Vec<f64>),
}

impl Decoded {
    pub fn is_empty(&self) -> bool {
        match self {
            Decoded::Rows(r) => r.is_empty(),
            Decoded::Candidates(c) => c.is_empty(),
        }
    }
}

/// Decode `body` according to the source's declared format.
pub fn decode(body: &str, source: &SourceSpec) -> Decoded {
    let body = body.trim_start_matches('\u{feff}');
    match source.format {
        Format::Csv => Decoded::Rows(decode_csv(body, source.header)),
        Format::Json => Decoded::Rows(decode_json(body)),
        Format::Rss => Decoded::Rows(decode_rss(body)),
        Format::HtmlScrape => Decoded::Candidates(scrape_numbers(body, &source.field_hint)),
    }
}

/* ----------------------------
CSV
---------------------------- */

pub fn decode_csv(body: &str, header: bool) -> Vec<DecodedRow> {
    let Some(first) = body.lines().find(|l| !l.trim().is_empty()) else {
        return Vec::new();
    };
    let delim = sniff_delimiter(first);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delim)
        .flexible(true)
        .trim(csv::Trim::All)
        .has_headers(false)
        .from_reader(body.as_bytes());

    // Unreadable records are skipped, as are lines that hold only blank cells.
    let mut records = reader
        .records()
        .filter_map(Result::ok)
        .map(|rec| {
            rec.iter()
                .map(|cell| clean_cell(cell, delim))
                .collect::<Vec<String>>()
        })
        .filter(|cells| cells.iter().any(|c| !c.is_empty()));

    let columns: Vec<String> = if header {
        match records.next() {
            Some(cols) => cols.into_iter().map(|c| c.to_lowercase()).collect(),
            None => return Vec::new(),
        }
    } else {
        Vec::new()
    };

    records
        .map(|cells| {
            let mut row = DecodedRow::default();
            for (i, cell) in cells.into_iter().enumerate() {
                let name = columns
                    .get(i)
                    .filter(|n| !n.is_empty())
                    .cloned()
                    .unwrap_or_else(|| i.to_string());
                row.push(name, cell);
            }
            row
        })
        .collect()
}

/// Pick whichever of `,` `;` `\t` appears most often outside quotes (comma on ties).
fn sniff_delimiter(line: &str) -> u8 {
    let mut counts = [(b',', 0usize), (b';', 0), (b'\t', 0)];
    let mut in_quotes = false;
    for b in line.bytes() {
        if b == b'"' {
            in_quotes = !in_quotes;
            continue;
        }
        if in_quotes {
            continue;
        }
        for (d, n) in counts.iter_mut() {
            if b == *d {
                *n += 1;
            }
        }
    }
    counts
        .iter()
        .fold((b',', 0), |best, &(d, n)| if n > best.1 { (d, n) } else { best })
        .0
}

/// Strip single quotes the csv reader leaves in place. Semicolon feeds use a
/// decimal comma, so `0,85` becomes `0.85` there.
fn clean_cell(raw: &str, delim: u8) -> String {
    static RE_DECIMAL_COMMA: OnceCell<Regex> = OnceCell::new();
    let t = raw.trim();
    let t = (t.len() >= 2 && t.starts_with('\'') && t.ends_with('\''))
        .then(|| t[1..t.len() - 1].trim())
        .unwrap_or(t);
    if delim == b';' {
        let re = RE_DECIMAL_COMMA
            .get_or_init(|| Regex::new(r"^[-+]?\d+,\d+%?$").expect("decimal comma regex"));
        if re.is_match(t) {
            return t.replacen(',', ".", 1);
        }
    }
    t.to_string()
}

/* ----------------------------
JSON
---------------------------- */

pub fn decode_json(body: &str) -> Vec<DecodedRow> {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return Vec::new();
    };
    match locate_rows(&value, 0) {
        Some(items) => items.iter().filter_map(json_row).collect(),
        None => json_row(&value).into_iter().collect(),
    }
}

fn locate_rows(v: &Value, depth: usize) -> Option<&Vec<Value>> {
    match v {
        Value::Array(items) => Some(items),
        Value::Object(map) if depth < 3 => JSON_WRAPPER_KEYS.iter().find_map(|key| {
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .and_then(|(_, inner)| locate_rows(inner, depth + 1))
        }),
        _ => None,
    }
}

fn json_row(v: &Value) -> Option<DecodedRow> {
    let mut row = DecodedRow::default();
    match v {
        Value::Object(_) => flatten_into(&mut row, "", v),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if let Some(s) = json_scalar(item) {
                    row.push(i.to_string(), s);
                }
            }
        }
        other => row.push("0".to_string(), json_scalar(other)?),
    }
    (!row.is_empty()).then_some(row)
}

fn flatten_into(row: &mut DecodedRow, prefix: &str, v: &Value) {
    match v {
        Value::Object(map) => {
            for (k, inner) in map {
                let name = if prefix.is_empty() {
                    k.to_lowercase()
                } else {
                    format!("{prefix}.{}", k.to_lowercase())
                };
                flatten_into(row, &name, inner);
            }
        }
        Value::Array(_) => {}
        other => {
            if let Some(s) = json_scalar(other) {
                row.push(prefix.to_string(), s);
            }
        }
    }
}

fn json_scalar(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

/* ----------------------------
RSS
---------------------------- */

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

pub fn decode_rss(body: &str) -> Vec<DecodedRow> {
    let xml = scrub_html_entities_for_xml(body);
    let Ok(rss) = quick_xml::de::from_str::<Rss>(&xml) else {
        return Vec::new();
    };
    rss.channel
        .item
        .into_iter()
        .filter_map(|it| {
            let title = normalize_text(it.title.as_deref().unwrap_or_default());
            if title.is_empty() {
                return None;
            }
            let published = it
                .pub_date
                .as_deref()
                .map(|d| {
                    chrono::DateTime::parse_from_rfc2822(d.trim())
                        .map(|dt| dt.with_timezone(&chrono::Utc).to_rfc3339())
                        .unwrap_or_else(|_| d.trim().to_string())
                })
                .unwrap_or_default();
            Some(DecodedRow::from_pairs(vec![
                ("title", title),
                ("link", it.link.unwrap_or_default().trim().to_string()),
                ("pubdate", published),
                (
                    "description",
                    normalize_text(it.description.as_deref().unwrap_or_default()),
                ),
            ]))
        })
        .collect()
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

/* ----------------------------
HTML scrape
---------------------------- */

/// Decode entities, strip tags/scripts, normalize quotes and collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    static RE_BLOCKS: OnceCell<Regex> = OnceCell::new();
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_blocks = RE_BLOCKS.get_or_init(|| {
        Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>").expect("block regex")
    });
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));

    let out = re_blocks.replace_all(s, " ");
    let out = re_tags.replace_all(&out, " ");
    let out = html_escape::decode_html_entities(&out)
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Numbers found within [`SCRAPE_WINDOW`] characters after each occurrence of
/// the first hint, where every other hint also appears in that window.
pub fn scrape_numbers(body: &str, hints: &[String]) -> Vec<f64> {
    static RE_NUM: OnceCell<Regex> = OnceCell::new();
    let re_num = RE_NUM.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("number regex"));

    let Some((anchor, rest)) = hints.split_first() else {
        return Vec::new();
    };
    let anchor = anchor.to_lowercase();
    if anchor.is_empty() {
        return Vec::new();
    }
    let text = normalize_text(body).to_lowercase();

    let mut out = Vec::new();
    for (pos, _) in text.match_indices(anchor.as_str()) {
        let window: String = text[pos..].chars().take(SCRAPE_WINDOW).collect();
        if !rest.iter().all(|h| window.contains(&h.to_lowercase())) {
            continue;
        }
        out.extend(
            re_num
                .find_iter(&window)
                .filter_map(|m| m.as_str().parse::<f64>().ok())
                .filter(|v| v.is_finite()),
        );
    }
    out
}
