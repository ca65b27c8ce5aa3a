//! Declarative rule tables for failure classification.
//!
//! Rules are evaluated against `request + diagnostic` text. Each table is a
//! plain list of `(pattern -> label)` entries; the tie-break orders are
//! fixed total orders declared here, not implied by evaluation order.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{ComplexityTier, ErrorCategory};

/// Pattern evidence for a failure category.
#[derive(Debug, Clone, Copy)]
pub struct CategoryRule {
    pub category: ErrorCategory,
    pub pattern: &'static str,
}

/// Pattern evidence for a request domain.
#[derive(Debug, Clone, Copy)]
pub struct DomainRule {
    pub domain: &'static str,
    pub pattern: &'static str,
}

/// Pattern evidence for a complexity tier.
#[derive(Debug, Clone, Copy)]
pub struct TierRule {
    pub tier: ComplexityTier,
    pub pattern: &'static str,
}

const fn cat(category: ErrorCategory, pattern: &'static str) -> CategoryRule {
    CategoryRule { category, pattern }
}

const fn dom(domain: &'static str, pattern: &'static str) -> DomainRule {
    DomainRule { domain, pattern }
}

const fn tier(tier: ComplexityTier, pattern: &'static str) -> TierRule {
    TierRule { tier, pattern }
}

pub const CATEGORY_RULES: &[CategoryRule] = &[
    cat(ErrorCategory::Syntax, r"syntax\s?error"),
    cat(ErrorCategory::Syntax, r"unexpected (token|end of (file|input))"),
    cat(ErrorCategory::Syntax, r"\bparse error\b"),
    cat(ErrorCategory::Syntax, r"\bunterminated\b"),
    cat(ErrorCategory::Syntax, r"expected one of"),
    cat(ErrorCategory::Syntax, r"indentation\s?error"),
    cat(ErrorCategory::Type, r"type\s?error"),
    cat(ErrorCategory::Type, r"mismatched types"),
    cat(ErrorCategory::Type, r"is not assignable to"),
    cat(ErrorCategory::Type, r"\bts\d{4}\b"),
    cat(ErrorCategory::Type, r"incompatible types?"),
    cat(ErrorCategory::Type, r"\btypes?\b"),
    cat(ErrorCategory::Dependency, r"(cannot find|could not find) (module|package|crate)"),
    cat(ErrorCategory::Dependency, r"module\s?not\s?found"),
    cat(ErrorCategory::Dependency, r"no module named"),
    cat(ErrorCategory::Dependency, r"unresolved import"),
    cat(ErrorCategory::Dependency, r"import\s?error"),
    cat(ErrorCategory::Dependency, r"could not resolve"),
    cat(ErrorCategory::Dependency, r"\bdependenc(y|ies)\b"),
    cat(ErrorCategory::Dependency, r"version conflict|peer dep"),
    cat(ErrorCategory::Test, r"\btests?\b"),
    cat(ErrorCategory::Test, r"assertion\s?error"),
    cat(ErrorCategory::Test, r"assert(ion)? failed"),
    cat(ErrorCategory::Test, r"expected .+ (but )?(got|received)"),
    cat(ErrorCategory::Test, r"\d+ (tests? )?failed"),
    cat(ErrorCategory::Test, r"\b(pytest|jest|vitest|mocha|nextest)\b"),
    cat(ErrorCategory::Build, r"build failed"),
    cat(ErrorCategory::Build, r"compilation (failed|error)"),
    cat(ErrorCategory::Build, r"\bcompil(e|er|ing)\b"),
    cat(ErrorCategory::Build, r"error\[E\d{4}\]"),
    cat(ErrorCategory::Build, r"\blinker\b|\blinking\b"),
    cat(ErrorCategory::Build, r"\bbuild\b"),
    cat(ErrorCategory::Lint, r"\blint(er|ing)?\b"),
    cat(ErrorCategory::Lint, r"\b(eslint|clippy|flake8|pylint|ruff|prettier)\b"),
    cat(ErrorCategory::Lint, r"warning: unused"),
    cat(ErrorCategory::Runtime, r"panicked at"),
    cat(ErrorCategory::Runtime, r"segmentation fault"),
    cat(ErrorCategory::Runtime, r"null pointer|nullpointerexception"),
    cat(ErrorCategory::Runtime, r"cannot read propert(y|ies) of (undefined|null)"),
    cat(ErrorCategory::Runtime, r"reference\s?error"),
    cat(ErrorCategory::Runtime, r"traceback \(most recent call last\)"),
    cat(ErrorCategory::Runtime, r"uncaught exception|stack overflow"),
    cat(ErrorCategory::Runtime, r"runtime error|\bcrash(es|ed|ing)?\b"),
    cat(ErrorCategory::Logic, r"\bbug\b"),
    cat(ErrorCategory::Logic, r"wrong (result|output|value|answer)"),
    cat(ErrorCategory::Logic, r"\bincorrect(ly)?\b"),
    cat(ErrorCategory::Logic, r"off[- ]by[- ]one"),
    cat(ErrorCategory::Logic, r"\blogic\b"),
];

/// Tie-break order when two categories have equal evidence. Earlier wins.
pub const CATEGORY_PRIORITY: [ErrorCategory; 9] = [
    ErrorCategory::Syntax,
    ErrorCategory::Dependency,
    ErrorCategory::Build,
    ErrorCategory::Type,
    ErrorCategory::Test,
    ErrorCategory::Lint,
    ErrorCategory::Runtime,
    ErrorCategory::Logic,
    ErrorCategory::Other,
];

pub const DOMAIN_AUTH: &str = "auth";
pub const DOMAIN_UI: &str = "ui";
pub const DOMAIN_DATA: &str = "data";
pub const DOMAIN_LOGIC: &str = "logic";

/// Domain order: session/auth and UI outrank data, which outranks logic.
pub const DOMAIN_PRIORITY: [&str; 4] = [DOMAIN_AUTH, DOMAIN_UI, DOMAIN_DATA, DOMAIN_LOGIC];

pub const DOMAIN_RULES: &[DomainRule] = &[
    dom(DOMAIN_AUTH, r"\bauth(entication|orization|enticate)?\b"),
    dom(DOMAIN_AUTH, r"\blog\s?(in|out)\b|\bsign[- ]?(in|out|up)\b"),
    dom(DOMAIN_AUTH, r"\bsessions?\b"),
    dom(DOMAIN_AUTH, r"\b(jwt|oauth|csrf)\b|\btokens?\b"),
    dom(DOMAIN_AUTH, r"\bpasswords?\b|\bcredentials?\b|\bcookies?\b"),
    dom(DOMAIN_AUTH, r"\b(401|403)\b|unauthori[sz]ed|forbidden"),
    dom(DOMAIN_UI, r"\bui\b|\bux\b"),
    dom(DOMAIN_UI, r"\bcomponents?\b|\brender(s|ing|ed)?\b"),
    dom(DOMAIN_UI, r"\b(button|modal|layout|dropdown|form)s?\b"),
    dom(DOMAIN_UI, r"\b(css|dom|jsx|tsx|html)\b"),
    dom(DOMAIN_UI, r"\b(react|vue|svelte|angular)\b"),
    dom(DOMAIN_DATA, r"\bdatabases?\b|\bsql\b|\bqueries\b|\bquery\b"),
    dom(DOMAIN_DATA, r"\bschemas?\b|\bmigrations?\b"),
    dom(DOMAIN_DATA, r"\bjson\b|\bseriali[sz](e|ation)\b"),
    dom(DOMAIN_DATA, r"\bapi\b|\bendpoints?\b|\bfetch\b"),
    dom(DOMAIN_DATA, r"\bcache\b|\brecords?\b|\bmodels?\b"),
];

/// Evaluated from most to least demanding; the first tier with evidence wins.
pub const TIER_RULES: &[TierRule] = &[
    tier(
        ComplexityTier::MultiStrategy,
        r"multiple (issues|problems|errors|failures|bugs)",
    ),
    tier(
        ComplexityTier::MultiStrategy,
        r"\ball (the )?(failing|broken|errors|issues)\b",
    ),
    tier(
        ComplexityTier::MultiStrategy,
        r"\beverything\b|\bcomprehensive\b",
    ),
    tier(
        ComplexityTier::MultiStrategy,
        r"across (the )?(codebase|project|repo|modules)",
    ),
    tier(ComplexityTier::Complex, r"\brefactor"),
    tier(ComplexityTier::Complex, r"\barchitecture\b|\bredesign\b"),
    tier(ComplexityTier::Complex, r"\bmigrat(e|ion)\b"),
    tier(ComplexityTier::Complex, r"race condition|concurren|deadlock"),
    tier(ComplexityTier::Complex, r"\bintermittent|\bflaky\b|memory leak"),
    tier(ComplexityTier::Moderate, r"\bseveral\b|\ba few\b"),
    tier(ComplexityTier::Moderate, r"\bintegration\b|\bregression\b"),
    tier(ComplexityTier::Moderate, r"multiple files"),
];

static COMPILED_CATEGORY_RULES: LazyLock<Vec<(ErrorCategory, Regex)>> = LazyLock::new(|| {
    CATEGORY_RULES
        .iter()
        .map(|rule| (rule.category, compile(rule.pattern)))
        .collect()
});

static COMPILED_DOMAIN_RULES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    DOMAIN_RULES
        .iter()
        .map(|rule| (rule.domain, compile(rule.pattern)))
        .collect()
});

static COMPILED_TIER_RULES: LazyLock<Vec<(ComplexityTier, Regex)>> = LazyLock::new(|| {
    TIER_RULES
        .iter()
        .map(|rule| (rule.tier, compile(rule.pattern)))
        .collect()
});

fn compile(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){pattern}")).expect("rule pattern must compile")
}

/// Position of `category` in [`CATEGORY_PRIORITY`] (lower is stronger).
pub fn category_rank(category: ErrorCategory) -> usize {
    CATEGORY_PRIORITY
        .iter()
        .position(|c| *c == category)
        .unwrap_or(CATEGORY_PRIORITY.len())
}

/// Position of `domain` in [`DOMAIN_PRIORITY`]; unknown domains sort last.
pub fn domain_rank(domain: &str) -> usize {
    DOMAIN_PRIORITY
        .iter()
        .position(|d| *d == domain)
        .unwrap_or(DOMAIN_PRIORITY.len())
}

/// Number of distinct rules matched per category. Categories without
/// evidence are absent.
pub fn category_evidence(text: &str) -> BTreeMap<ErrorCategory, usize> {
    let mut hits = BTreeMap::new();
    for (category, re) in COMPILED_CATEGORY_RULES.iter() {
        if re.is_match(text) {
            *hits.entry(*category).or_insert(0) += 1;
        }
    }
    hits
}

/// Detected domains ordered by [`DOMAIN_PRIORITY`]. Falls back to `logic`.
pub fn detect_domains(text: &str) -> Vec<String> {
    let mut found: Vec<&'static str> = Vec::new();
    for (domain, re) in COMPILED_DOMAIN_RULES.iter() {
        if !found.contains(domain) && re.is_match(text) {
            found.push(domain);
        }
    }
    if found.is_empty() {
        found.push(DOMAIN_LOGIC);
    }
    found.sort_by_key(|d| domain_rank(d));
    found.into_iter().map(str::to_string).collect()
}

/// First tier whose keywords appear in `text`, if any.
pub fn keyword_tier(text: &str) -> Option<ComplexityTier> {
    COMPILED_TIER_RULES
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(tier, _)| *tier)
}
