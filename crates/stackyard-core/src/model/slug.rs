// ── Slugs ──

/// Derive a URL-safe identifier from a display name.
///
/// ASCII letters and digits are lowercased and kept; every run of anything
/// else collapses to a single `-`; leading and trailing dashes are dropped.
/// The result is a fixed point: `slugify(&slugify(x)) == slugify(x)`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}
