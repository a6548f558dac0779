//! URL slug generation for aliases, anchors and menu classes. German
//! characters transliterate to their ASCII digraphs; everything else
//! non-alphanumeric collapses to single hyphens.

/// Turns a display label into a url-safe slug segment.
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_hyphen = false;
    for ch in text.chars() {
        let mapped: Option<&str> = match ch {
            'ä' | 'Ä' => Some("ae"),
            'ö' | 'Ö' => Some("oe"),
            'ü' | 'Ü' => Some("ue"),
            'ß' => Some("ss"),
            'á' | 'à' | 'â' | 'Á' | 'À' | 'Â' => Some("a"),
            'é' | 'è' | 'ê' | 'É' | 'È' | 'Ê' => Some("e"),
            'í' | 'ì' | 'î' | 'Í' | 'Ì' | 'Î' => Some("i"),
            'ó' | 'ò' | 'ô' | 'Ó' | 'Ò' | 'Ô' => Some("o"),
            'ú' | 'ù' | 'û' | 'Ú' | 'Ù' | 'Û' => Some("u"),
            'ç' | 'Ç' => Some("c"),
            'ñ' | 'Ñ' => Some("n"),
            _ => None,
        };
        if let Some(replacement) = mapped {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push_str(replacement);
        } else if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    out
}

/// Slugifies each segment and joins them into a rooted path. Segments
/// that slugify to nothing are dropped.
#[must_use]
pub fn slug_path<S: AsRef<str>>(segments: &[S]) -> String {
    let parts: Vec<String> = segments
        .iter()
        .map(|segment| slugify(segment.as_ref()))
        .filter(|slug| !slug.is_empty())
        .collect();
    format!("/{}", parts.join("/"))
}
