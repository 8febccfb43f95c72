//! Field-type pattern table for the auto-detector
//!
//! Adding a field type means adding a row here; the detector has no
//! per-type branches.

/// Bonus applied when the matched text length falls in `min..=max` chars
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LengthBonus {
    pub min: usize,
    pub max: usize,
    pub bonus: f64,
}

impl LengthBonus {
    pub const fn new(min: usize, max: usize, bonus: f64) -> Self {
        Self { min, max, bonus }
    }

    pub fn applies(&self, len: usize) -> bool {
        (self.min..=self.max).contains(&len)
    }
}

/// Selectors and scoring constants for one field type
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPattern {
    pub field_type: &'static str,
    pub base_confidence: f64,
    pub selectors: &'static [&'static str],
    /// Read this attribute instead of the element text
    pub attribute: Option<&'static str>,
    pub length_bonus: Option<LengthBonus>,
}

impl FieldPattern {
    pub fn mentions_field(&self, token: &str) -> bool {
        token.to_ascii_lowercase().contains(self.field_type)
    }
}

pub static DEFAULT_PATTERNS: &[FieldPattern] = &[
    FieldPattern {
        field_type: "title",
        base_confidence: 0.9,
        selectors: &[
            "h1",
            ".product-title",
            ".title",
            "[itemprop='name']",
            "#title",
        ],
        attribute: None,
        length_bonus: Some(LengthBonus::new(10, 100, 0.05)),
    },
    FieldPattern {
        field_type: "price",
        base_confidence: 0.95,
        selectors: &[
            ".price",
            "[itemprop='price']",
            ".product-price",
            ".cost",
            ".amount",
            "[class*='price']",
        ],
        attribute: None,
        length_bonus: Some(LengthBonus::new(3, 20, 0.05)),
    },
    FieldPattern {
        field_type: "description",
        base_confidence: 0.8,
        selectors: &[
            ".description",
            "[itemprop='description']",
            ".product-description",
            "#description",
            ".summary",
        ],
        attribute: None,
        length_bonus: Some(LengthBonus::new(50, 500, 0.10)),
    },
    FieldPattern {
        field_type: "image",
        base_confidence: 0.85,
        selectors: &[
            "[itemprop='image']",
            ".product-image img",
            ".gallery img",
            "img.main-image",
            "main img",
        ],
        attribute: Some("src"),
        length_bonus: None,
    },
    FieldPattern {
        field_type: "date",
        base_confidence: 0.8,
        selectors: &[
            "time",
            "[itemprop='datePublished']",
            ".date",
            ".published",
            ".post-date",
        ],
        attribute: None,
        length_bonus: Some(LengthBonus::new(6, 40, 0.05)),
    },
    FieldPattern {
        field_type: "author",
        base_confidence: 0.8,
        selectors: &[
            "[itemprop='author']",
            ".author",
            ".byline",
            "[rel='author']",
        ],
        attribute: None,
        length_bonus: Some(LengthBonus::new(3, 60, 0.05)),
    },
    FieldPattern {
        field_type: "category",
        base_confidence: 0.75,
        selectors: &[
            ".breadcrumb",
            ".category",
            "[itemprop='category']",
            "nav.breadcrumbs",
        ],
        attribute: None,
        length_bonus: Some(LengthBonus::new(3, 80, 0.05)),
    },
    FieldPattern {
        field_type: "rating",
        base_confidence: 0.85,
        selectors: &[
            "[itemprop='ratingValue']",
            ".rating",
            ".stars",
            ".review-score",
        ],
        attribute: None,
        length_bonus: Some(LengthBonus::new(1, 20, 0.05)),
    },
    FieldPattern {
        field_type: "availability",
        base_confidence: 0.85,
        selectors: &[
            "[itemprop='availability']",
            ".availability",
            ".stock",
            ".in-stock",
            ".out-of-stock",
        ],
        attribute: None,
        length_bonus: Some(LengthBonus::new(3, 40, 0.05)),
    },
    FieldPattern {
        field_type: "specifications",
        base_confidence: 0.70,
        selectors: &[
            ".specifications",
            ".specs",
            "table.specs",
            "#specifications",
            "dl.attributes",
        ],
        attribute: None,
        length_bonus: Some(LengthBonus::new(20, 2000, 0.05)),
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Selector;

    #[test]
    fn default_selectors_all_parse() {
        for pattern in DEFAULT_PATTERNS {
            for selector in pattern.selectors {
                assert!(
                    Selector::parse(selector).is_ok(),
                    "{}: {selector}",
                    pattern.field_type
                );
            }
        }
    }

    #[test]
    fn base_confidences_are_probabilities() {
        assert!(
            DEFAULT_PATTERNS
                .iter()
                .all(|p| (0.0..=1.0).contains(&p.base_confidence))
        );
    }
}
