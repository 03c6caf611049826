//! Identifier sanitizer
//!
//! Turns a free-text name ("Dévoluy 2", "Orlu-St-Barthélémy") into a fragment
//! that can be embedded in a host entity id. Display names are never touched;
//! only the machine identifier derived from them goes through here.

/// Token returned when nothing usable survives transliteration
pub const FALLBACK_IDENTIFIER: &str = "unnamed";

/// Normalize free text into an identifier fragment matching `[a-z_][a-z0-9_]*`.
///
/// Diacritics are transliterated to their base Latin letter, everything is
/// lowercased, and runs of characters outside `[a-z0-9]` collapse into a
/// single `_`. A leading digit gets a `_` prefix. Input that transliterates to
/// nothing yields [`FALLBACK_IDENTIFIER`].
///
/// The function is idempotent: feeding its output back in returns the same
/// string.
pub fn sanitize_identifier(input: &str) -> String {
    let slug = slug::slugify(input).replace('-', "_");

    if slug.is_empty() {
        return FALLBACK_IDENTIFIER.to_string();
    }

    if slug.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}", slug)
    } else {
        slug
    }
}
