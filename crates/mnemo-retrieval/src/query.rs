//! Keyword heuristics used to pick a retrieval strategy.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static FACTUAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(what|who|when|where|which|how\s+many)\b").expect("factual pattern")
});

/// Wider keyword set used by automatic hybrid weighting.
static FACTUAL_AUTO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(what|who|when|where|which|how\s+many|is|are|was|were|does|did)\b")
        .expect("factual keyword pattern")
});

static COMPARISON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(compare|difference|versus|vs)\b").expect("comparison pattern")
});

static CONJUNCTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(and|also)\b").expect("conjunction pattern"));

static PROPER_NOUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][a-z]+").expect("proper noun pattern"));

/// Coarse shape of a natural-language question.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub factual: bool,
    pub comparison: bool,
    pub multi_part: bool,
}

impl QueryAnalysis {
    pub fn of(query: &str) -> Self {
        Self {
            factual: FACTUAL.is_match(query),
            comparison: COMPARISON.is_match(query),
            multi_part: CONJUNCTION.is_match(query),
        }
    }

    pub fn describe(&self) -> String {
        let mut parts = vec![if self.factual {
            "Factual question."
        } else {
            "Open-ended question."
        }];
        if self.comparison {
            parts.push("Requires comparison.");
        }
        if self.multi_part {
            parts.push("Multi-part query detected.");
        }
        format!("Query analysis: {}", parts.join(" "))
    }
}

/// Two or more capitalised words are taken as named entities.
pub fn has_entity_mentions(query: &str) -> bool {
    query
        .split_whitespace()
        .filter(|w| PROPER_NOUN.is_match(w))
        .count()
        >= 2
}

pub fn is_factual_query(query: &str) -> bool {
    FACTUAL_AUTO.is_match(query)
}

/// Split a compound question on "and" / "also". Returns the whole query when
/// it has fewer than two non-empty parts.
pub fn split_parts(query: &str) -> Vec<String> {
    let parts: Vec<String> = CONJUNCTION
        .split(query)
        .map(|p| p.trim().trim_matches(',').trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() < 2 {
        vec![query.trim().to_string()]
    } else {
        parts
    }
}
