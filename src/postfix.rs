//! String-level cleanup of a rendered part.

use crate::engine::NO_VALUE;

/// Rewrites applied in order; each pair is (needle, replacement).
const REWRITES: &[(&str, &str)] = &[
    ("<w:t><w:drawing>", "<w:drawing>"),
    ("</w:drawing></w:t>", "</w:drawing>"),
    ("<w:t></w:t>", ""),
    ("<w:t xml:space=\"preserve\"></w:t>", ""),
    ("<w:r></w:r>", ""),
    ("<w:r><w:rPr></w:rPr></w:r>", ""),
];

/// Removes the artifacts that rendering and the markup helpers leave behind.
///
/// Applying it twice gives the same result as applying it once.
pub fn post_fix(xml: &str) -> String {
    let mut out = xml.replace(NO_VALUE, "");
    for (needle, replacement) in REWRITES {
        if out.contains(needle) {
            out = out.replace(needle, replacement);
        }
    }
    out
}
