//! Query router: maps `(query, role)` to a retrieval strategy.
//!
//! Routing is an ordered table of [`RoutingRule`]s; the first rule whose
//! predicate matches decides the strategy and confidence. A role adjustment
//! is applied afterwards. [`classify`] is pure: the same inputs always give
//! the same [`QueryAnalysis`].
//!
//! | # | Rule | Strategy | Confidence |
//! |---|------|----------|------------|
//! | 1 | visual / imagery terms | custom | 0.9 |
//! | 2 | region-specific terms | custom | `min(0.7 + 0.1·n, 0.95)` |
//! | 3 | comparative / complex terms | hybrid | 0.8 |
//! | 4 | general medical terms | managed | `min(0.75 + 0.1·n, 0.9)` |
//! | 5 | fewer than 5 words | managed | 0.6 |
//! | 6 | anything else | hybrid | 0.5 |
//!
//! Professionals asking something routed to managed with confidence below
//! 0.8 are upgraded to hybrid.

use crate::models::{QueryAnalysis, Role, Strategy};

pub const VISUAL_TERMS: &[&str] = &[
    "image",
    "images",
    "x-ray",
    "xray",
    "x-rays",
    "radiograph",
    "scan",
    "ct scan",
    "mri",
    "ultrasound",
    "diagram",
    "picture",
    "photo",
    "illustration",
];

pub const REGIONAL_TERMS: &[&str] = &[
    "zambia",
    "zambian",
    "lusaka",
    "copperbelt",
    "ndola",
    "kitwe",
    "livingstone",
    "kabwe",
    "chipata",
    "kasama",
    "mongu",
    "solwezi",
    "sub-saharan",
    "southern africa",
    "endemic",
    "prevalence",
    "local",
    "rural",
    "district",
    "province",
];

pub const COMPARATIVE_TERMS: &[&str] = &[
    "compare",
    "comparison",
    "versus",
    "vs",
    "difference between",
    "better than",
    "why does",
    "why do",
    "how does",
    "pros and cons",
];

pub const GENERAL_TERMS: &[&str] = &[
    "what is",
    "what are",
    "treatment",
    "treatment for",
    "symptoms",
    "symptoms of",
    "side effects",
    "causes of",
    "how to treat",
    "dosage",
    "prevention",
    "diagnosis",
];

/// Queries with fewer words than this are considered short.
pub const SHORT_QUERY_WORDS: usize = 5;

/// Professionals get managed answers only above this confidence.
pub const PROFESSIONAL_MANAGED_MIN: f64 = 0.8;

/// What a rule looks at.
#[derive(Debug, Clone, Copy)]
pub enum Predicate {
    /// At least one of the terms occurs as a whole word or phrase.
    AnyTerm(&'static [&'static str]),
    /// The query has fewer than this many words.
    FewerWords(usize),
    /// Always matches.
    Always,
}

/// How a matching rule computes its confidence from the match count.
#[derive(Debug, Clone, Copy)]
pub enum Confidence {
    Fixed(f64),
    /// `min(base + step × matches, cap)`
    PerMatch { base: f64, step: f64, cap: f64 },
}

impl Confidence {
    pub fn score(&self, matches: usize) -> f64 {
        match *self {
            Confidence::Fixed(c) => c,
            Confidence::PerMatch { base, step, cap } => (base + step * matches as f64).min(cap),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RoutingRule {
    pub name: &'static str,
    pub predicate: Predicate,
    pub strategy: Strategy,
    pub confidence: Confidence,
}

/// The routing table, in evaluation order.
pub const RULES: &[RoutingRule] = &[
    RoutingRule {
        name: "visual",
        predicate: Predicate::AnyTerm(VISUAL_TERMS),
        strategy: Strategy::Custom,
        confidence: Confidence::Fixed(0.9),
    },
    RoutingRule {
        name: "regional",
        predicate: Predicate::AnyTerm(REGIONAL_TERMS),
        strategy: Strategy::Custom,
        confidence: Confidence::PerMatch {
            base: 0.7,
            step: 0.1,
            cap: 0.95,
        },
    },
    RoutingRule {
        name: "comparative",
        predicate: Predicate::AnyTerm(COMPARATIVE_TERMS),
        strategy: Strategy::Hybrid,
        confidence: Confidence::Fixed(0.8),
    },
    RoutingRule {
        name: "general",
        predicate: Predicate::AnyTerm(GENERAL_TERMS),
        strategy: Strategy::Managed,
        confidence: Confidence::PerMatch {
            base: 0.75,
            step: 0.1,
            cap: 0.9,
        },
    },
    RoutingRule {
        name: "short",
        predicate: Predicate::FewerWords(SHORT_QUERY_WORDS),
        strategy: Strategy::Managed,
        confidence: Confidence::Fixed(0.6),
    },
    RoutingRule {
        name: "default",
        predicate: Predicate::Always,
        strategy: Strategy::Hybrid,
        confidence: Confidence::Fixed(0.5),
    },
];

/// A query lowercased with punctuation folded to spaces.
///
/// Hyphens inside words are kept so terms like `x-ray` survive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    padded: String,
    word_count: usize,
}

impl NormalizedQuery {
    pub fn new(query: &str) -> Self {
        let folded: String = query
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { ' ' })
            .collect();
        let words: Vec<&str> = folded
            .split_whitespace()
            .map(|w| w.trim_matches('-'))
            .filter(|w| !w.is_empty())
            .collect();
        Self {
            padded: format!(" {} ", words.join(" ")),
            word_count: words.len(),
        }
    }

    pub fn word_count(&self) -> usize {
        self.word_count
    }

    /// Whether `term` appears as a whole word or phrase.
    pub fn contains_term(&self, term: &str) -> bool {
        self.padded.contains(&format!(" {} ", term))
    }

    /// Number of distinct terms from `terms` that appear.
    pub fn count_terms(&self, terms: &[&str]) -> usize {
        terms.iter().filter(|t| self.contains_term(t)).count()
    }
}

impl RoutingRule {
    /// Match count if the rule applies, `None` otherwise.
    pub fn evaluate(&self, query: &NormalizedQuery) -> Option<usize> {
        match self.predicate {
            Predicate::AnyTerm(terms) => {
                let n = query.count_terms(terms);
                (n > 0).then_some(n)
            }
            Predicate::FewerWords(limit) => (query.word_count() < limit).then_some(0),
            Predicate::Always => Some(0),
        }
    }
}

/// Classify a query into a retrieval strategy.
pub fn classify(query: &str, role: Role) -> QueryAnalysis {
    classify_with(RULES, query, role)
}

/// Classify against an explicit rule table.
pub fn classify_with(rules: &[RoutingRule], query: &str, role: Role) -> QueryAnalysis {
    let normalized = NormalizedQuery::new(query);

    let matched = rules
        .iter()
        .find_map(|rule| rule.evaluate(&normalized).map(|n| (rule, n)));

    let mut analysis = match matched {
        Some((rule, n)) => QueryAnalysis {
            strategy: rule.strategy,
            confidence: rule.confidence.score(n),
            reasoning: describe(rule, n),
        },
        None => QueryAnalysis {
            strategy: Strategy::Hybrid,
            confidence: 0.5,
            reasoning: "no routing rule matched; defaulting to hybrid".to_string(),
        },
    };

    if role == Role::Professional
        && analysis.strategy == Strategy::Managed
        && analysis.confidence < PROFESSIONAL_MANAGED_MIN
    {
        analysis.strategy = Strategy::Hybrid;
        analysis.reasoning.push_str("; upgraded to hybrid for a professional user");
    }

    analysis
}

fn describe(rule: &RoutingRule, matches: usize) -> String {
    match rule.predicate {
        Predicate::AnyTerm(_) => format!(
            "{} rule matched {} term{} → {}",
            rule.name,
            matches,
            if matches == 1 { "" } else { "s" },
            rule.strategy
        ),
        Predicate::FewerWords(limit) => {
            format!("short query (< {} words) → {}", limit, rule.strategy)
        }
        Predicate::Always => format!("no specific signal → {}", rule.strategy),
    }
}
