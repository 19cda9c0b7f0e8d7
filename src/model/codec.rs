//! Versioned model file codec
//!
//! Current files are JSON `{"version": 2, "n": N, "model": {...}}`.
//! Older files are still read: the unversioned `{"n", "model"}` object, a
//! bare context table, and the tab-separated `ctx\tc:count,...` lines.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{NgramModel, Transitions, MIN_N};

/// Version written by [`encode`].
pub const FORMAT_VERSION: u32 = 2;

/// Outcome of decoding a model file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Current format; nothing to do.
    Current(NgramModel),
    /// An older format; the caller should re-persist it.
    Legacy(NgramModel),
    /// Nothing usable; treat as "no model".
    Unreadable,
}

type WireTable = BTreeMap<String, BTreeMap<String, u64>>;

#[derive(Debug, Serialize, Deserialize)]
struct ModelFile {
    version: u32,
    n: usize,
    model: WireTable,
}

#[derive(Debug, Deserialize)]
struct UnversionedFile {
    n: usize,
    model: WireTable,
}

/// Serialize a model in the current format.
pub fn encode(model: &NgramModel) -> serde_json::Result<String> {
    let table = model
        .table()
        .iter()
        .map(|(ctx, transitions)| {
            let row = transitions
                .iter()
                .map(|(ch, count)| (ch.to_string(), *count))
                .collect();
            (ctx.clone(), row)
        })
        .collect();

    serde_json::to_string(&ModelFile {
        version: FORMAT_VERSION,
        n: model.n(),
        model: table,
    })
}

/// Decode any supported model file.
pub fn decode(bytes: &[u8]) -> Decoded {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return Decoded::Unreadable;
    };

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        return decode_json(value);
    }

    decode_tab_lines(text)
}

fn decode_json(value: serde_json::Value) -> Decoded {
    let is_object = value.is_object();
    let has_version = value.get("version").is_some();

    if has_version {
        return match serde_json::from_value::<ModelFile>(value) {
            Ok(file) if file.version == FORMAT_VERSION => build(file.n, &file.model)
                .map(Decoded::Current)
                .unwrap_or(Decoded::Unreadable),
            _ => Decoded::Unreadable,
        };
    }

    if value.get("n").is_some() && value.get("model").is_some() {
        return match serde_json::from_value::<UnversionedFile>(value) {
            Ok(file) => build(file.n, &file.model)
                .map(Decoded::Legacy)
                .unwrap_or(Decoded::Unreadable),
            Err(_) => Decoded::Unreadable,
        };
    }

    if is_object {
        if let Ok(table) = serde_json::from_value::<WireTable>(value) {
            let n = table
                .keys()
                .next()
                .map(|k| k.chars().count() + 1)
                .unwrap_or(MIN_N);
            if let Some(model) = build(n, &table) {
                return Decoded::Legacy(model);
            }
        }
    }

    Decoded::Unreadable
}

fn decode_tab_lines(text: &str) -> Decoded {
    let mut table = WireTable::new();
    for line in text.lines() {
        // Lines without a separator come from newlines inside the corpus
        let Some((ctx, encoded)) = line.split_once('\t') else {
            continue;
        };
        let mut row = BTreeMap::new();
        for pair in encoded.split(',') {
            let Some((ch, count)) = pair.split_once(':') else {
                continue;
            };
            if let Ok(count) = count.trim().parse::<u64>() {
                if !ch.is_empty() {
                    row.insert(ch.to_string(), count);
                }
            }
        }
        if !row.is_empty() {
            table.insert(ctx.to_string(), row);
        }
    }

    let Some(first) = table.keys().next() else {
        return Decoded::Unreadable;
    };
    let n = first.chars().count() + 1;
    build(n, &table)
        .map(Decoded::Legacy)
        .unwrap_or(Decoded::Unreadable)
}

/// Validate a wire table into a model, dropping entries that break invariants.
fn build(n: usize, wire: &WireTable) -> Option<NgramModel> {
    if n < MIN_N {
        return None;
    }
    let mut table = BTreeMap::new();
    for (ctx, row) in wire {
        if ctx.chars().count() != n - 1 {
            continue;
        }
        let mut transitions = Transitions::new();
        for (next, count) in row {
            let mut chars = next.chars();
            if let (Some(ch), None) = (chars.next(), chars.next()) {
                if *count >= 1 {
                    transitions.insert(ch, *count);
                }
            }
        }
        if !transitions.is_empty() {
            table.insert(ctx.clone(), transitions);
        }
    }
    if table.is_empty() && !wire.is_empty() {
        return None;
    }
    Some(NgramModel::from_table(n, table))
}
