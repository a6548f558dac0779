//! Locale-aware label ordering behind a small port, so the host can swap
//! in its own locale service.

use std::cmp::Ordering;

/// Compares display labels for sorting menus, facets and toc children.
pub trait Collator {
    fn compare(&self, a: &str, b: &str) -> Ordering;
}

/// German dictionary ordering (DIN 5007-1 variant 1): case-insensitive,
/// umlauts fold to their base vowels, ß orders like ss.
#[derive(Debug, Clone, Copy, Default)]
pub struct GermanCollator;

impl Collator for GermanCollator {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        collation_key(a).cmp(&collation_key(b)).then_with(|| a.cmp(b))
    }
}

fn collation_key(text: &str) -> String {
    let mut key = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            'ä' | 'Ä' => key.push('a'),
            'ö' | 'Ö' => key.push('o'),
            'ü' | 'Ü' => key.push('u'),
            'ß' => key.push_str("ss"),
            _ => key.extend(ch.to_lowercase()),
        }
    }
    key
}
