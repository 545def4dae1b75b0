//! Domain types shared by the storefront services.

mod discount;
mod events;
mod order;
mod pagination;
mod pricing;
mod role;

pub use discount::*;
pub use events::*;
pub use order::*;
pub use pagination::*;
pub use pricing::*;
pub use role::*;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} `{value}`")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Lower-cases `name` and joins its ASCII alphanumeric runs with single dashes.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Al Fakher  Mint 250g"), "al-fakher-mint-250g");
        assert_eq!(slugify("  --Coals & Foil!-- "), "coals-foil");
        assert_eq!(slugify("Khalil Mamoon"), "khalil-mamoon");
    }

    #[test]
    fn slugify_drops_non_ascii() {
        assert_eq!(slugify("Narguilé Clássico"), "narguil-cl-ssico");
        assert_eq!(slugify("***"), "");
    }
}
