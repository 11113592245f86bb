//! Complexity analysis.
//!
//! Scores a task's difficulty on a 0-10 scale and classifies its domain from
//! static heuristics only:
//! - weighted complexity keywords ("orchestrate", "optimize", ...)
//! - description length
//! - conjunctions hinting at several sub-goals ("and", "then", ";")
//! - enumerated sub-goals (numbered or bulleted lines)
//! - a per-domain weight (coding work is heavier than a lookup)
//!
//! Domain classification sits behind the `Classifier` trait so the keyword
//! matcher can be swapped for a learned model without touching callers.
//! The keyword tables are `KeywordRules`, loadable from JSON.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agents::{Agent, AgentId, AgentType};
use crate::learning::ComplexityBucket;
use crate::task::{Domain, Task};

/// Upper bound of the complexity scale.
pub const MAX_COMPLEXITY: f64 = 10.0;

/// What contributed to a complexity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Keyword,
    Length,
    Conjunction,
    SubGoal,
    Domain,
}

/// One contribution to a complexity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub label: String,
    pub weight: f64,
}

impl Signal {
    fn new(kind: SignalKind, label: impl Into<String>, weight: f64) -> Self {
        Self {
            kind,
            label: label.into(),
            weight,
        }
    }
}

/// Difficulty estimate for one task. Computed once, never mutated.
///
/// # Invariants
/// - `value` is in [0, `MAX_COMPLEXITY`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityScore {
    value: f64,
    domain: Domain,
    signals: Vec<Signal>,
}

impl ComplexityScore {
    pub fn new(value: f64, domain: Domain, signals: Vec<Signal>) -> Self {
        let value = if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, MAX_COMPLEXITY)
        };
        Self {
            value,
            domain,
            signals,
        }
    }

    /// Score for a description with nothing to analyze.
    pub fn trivial() -> Self {
        Self::new(0.0, Domain::Unknown, Vec::new())
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn bucket(&self) -> ComplexityBucket {
        ComplexityBucket::from_score(self.value)
    }
}

/// A keyword and how much it adds to the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedKeyword {
    pub keyword: String,
    pub weight: f64,
}

impl WeightedKeyword {
    fn new(keyword: &str, weight: f64) -> Self {
        Self {
            keyword: keyword.to_string(),
            weight,
        }
    }
}

/// Tables driving the keyword heuristics.
///
/// Missing fields in a JSON override fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordRules {
    pub complexity_keywords: Vec<WeightedKeyword>,
    /// Terms voting for each domain; the domain with most hits wins
    pub domain_keywords: BTreeMap<Domain, Vec<String>>,
    /// Extra complexity per domain
    pub domain_weights: BTreeMap<Domain, f64>,
    pub conjunctions: Vec<String>,
    pub conjunction_weight: f64,
    pub conjunction_cap: usize,
    pub sub_goal_weight: f64,
    pub sub_goal_cap: usize,
    pub long_description_words: usize,
    pub long_description_weight: f64,
    pub very_long_description_words: usize,
    pub very_long_description_weight: f64,
}

impl Default for KeywordRules {
    fn default() -> Self {
        let complexity_keywords = [
            ("analyze", 1.2),
            ("integrate", 1.5),
            ("coordinate", 1.8),
            ("optimize", 2.0),
            ("synthesize", 2.2),
            ("orchestrate", 2.5),
            ("multiple", 1.3),
            ("complex", 2.0),
            ("advanced", 1.7),
            ("simultaneous", 2.3),
            ("parallel", 1.8),
            ("sequential", 1.2),
            ("multi-step", 1.5),
            ("refactor", 1.5),
            ("migrate", 1.8),
            ("architecture", 1.8),
            ("end-to-end", 1.5),
            ("comprehensive", 1.3),
        ]
        .into_iter()
        .map(|(k, w)| WeightedKeyword::new(k, w))
        .collect();

        let words = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let mut domain_keywords = BTreeMap::new();
        domain_keywords.insert(
            Domain::Coding,
            words(&[
                "code", "coding", "program", "script", "function", "method", "class", "module",
                "bug", "bugs", "debug", "debugging", "fix", "error", "exception", "stack trace",
                "null pointer", "compile", "compiler", "syntax", "test", "tests", "unit test",
                "refactor", "refactoring", "implement", "algorithm", "api", "deploy", "terminal",
                "command", "repository", "git", "python", "rust", "javascript", "typescript",
                "java", "sql",
            ]),
        );
        domain_keywords.insert(
            Domain::Planning,
            words(&[
                "plan", "planning", "schedule", "organize", "organise", "roadmap", "itinerary",
                "agenda", "timeline", "milestone", "milestones", "prioritize", "coordinate",
                "multi-step", "trip", "strategy",
            ]),
        );
        domain_keywords.insert(
            Domain::Information,
            words(&[
                "what", "who", "why", "explain", "summarize", "summarise", "describe", "search",
                "look up", "research", "compare", "define", "definition", "news", "weather",
            ]),
        );
        domain_keywords.insert(
            Domain::Action,
            words(&[
                "send", "email", "open", "book", "call", "remind", "reminder", "turn on",
                "turn off", "play", "order", "buy", "launch", "download", "upload",
            ]),
        );

        let mut domain_weights = BTreeMap::new();
        domain_weights.insert(Domain::Coding, 1.5);
        domain_weights.insert(Domain::Planning, 1.0);

        Self {
            complexity_keywords,
            domain_keywords,
            domain_weights,
            conjunctions: words(&["and", "then", "after that", "also", "finally", "as well as"]),
            conjunction_weight: 0.6,
            conjunction_cap: 4,
            sub_goal_weight: 0.7,
            sub_goal_cap: 5,
            long_description_words: 20,
            long_description_weight: 1.0,
            very_long_description_words: 60,
            very_long_description_weight: 1.0,
        }
    }
}

impl KeywordRules {
    /// Load rules from a JSON file.
    pub async fn load(path: &Path) -> Result<Self, String> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| format!("Failed to read classifier rules {}: {}", path.display(), e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| format!("Failed to parse classifier rules {}: {}", path.display(), e))
    }
}

/// Lowercased description split into words, with a space-joined form for
/// phrase matching.
struct Normalized {
    words: Vec<String>,
    joined: String,
}

impl Normalized {
    fn new(text: &str) -> Self {
        let words: Vec<String> = text
            .to_lowercase()
            .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_' || c == '\''))
            .map(|w| w.trim_matches(|c| c == '-' || c == '\''))
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
        let joined = format!(" {} ", words.join(" "));
        Self { words, joined }
    }

    /// Occurrences of `term` as whole words.
    fn count(&self, term: &str) -> usize {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return 0;
        }
        if term.contains(' ') {
            self.joined.matches(&format!(" {} ", term)).count()
        } else {
            self.words.iter().filter(|w| **w == term).count()
        }
    }

    fn contains(&self, term: &str) -> bool {
        self.count(term) > 0
    }
}

/// Result of domain classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub domain: Domain,
    /// Matched terms, for diagnostics
    pub matched: Vec<String>,
}

/// Pluggable domain classifier.
pub trait Classifier: Send + Sync {
    /// Classify a description. Must be deterministic.
    fn classify(&self, description: &str) -> Classification;
}

/// Classifier that votes by domain keyword hits.
///
/// Ties go to the earlier domain in `Domain::ALL` (coding first); no hits
/// means `Unknown`.
pub struct KeywordClassifier {
    rules: Arc<KeywordRules>,
}

impl KeywordClassifier {
    pub fn new(rules: Arc<KeywordRules>) -> Self {
        Self { rules }
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, description: &str) -> Classification {
        let text = Normalized::new(description);
        let mut best: Option<(Domain, usize, Vec<String>)> = None;

        for domain in Domain::ALL {
            let Some(terms) = self.rules.domain_keywords.get(&domain) else {
                continue;
            };
            let matched: Vec<String> = terms
                .iter()
                .filter(|t| text.contains(t))
                .cloned()
                .collect();
            let hits = matched.len();
            if hits > 0 && best.as_ref().map_or(true, |(_, b, _)| hits > *b) {
                best = Some((domain, hits, matched));
            }
        }

        match best {
            Some((domain, _, matched)) => Classification { domain, matched },
            None => Classification {
                domain: Domain::Unknown,
                matched: Vec::new(),
            },
        }
    }
}

/// Scores tasks. Pure and deterministic: the same description (and hint)
/// always yields an identical `ComplexityScore`.
pub struct ComplexityAnalyzer {
    id: AgentId,
    rules: Arc<KeywordRules>,
    classifier: Arc<dyn Classifier>,
}

impl ComplexityAnalyzer {
    /// Analyzer using `rules` for both scoring and keyword classification.
    pub fn new(rules: KeywordRules) -> Self {
        let rules = Arc::new(rules);
        Self {
            id: AgentId::new(),
            classifier: Arc::new(KeywordClassifier::new(Arc::clone(&rules))),
            rules,
        }
    }

    /// Replace the domain classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Score a task.
    ///
    /// # Postconditions
    /// - Never fails; blank descriptions yield `ComplexityScore::trivial()`
    /// - A non-`Unknown` domain hint on the task overrides classification
    pub fn analyze(&self, task: &Task) -> ComplexityScore {
        self.analyze_text(task.description(), task.domain_hint())
    }

    /// Score a bare description (used by strategy previews).
    pub fn analyze_text(&self, description: &str, domain_hint: Option<Domain>) -> ComplexityScore {
        if description.trim().is_empty() {
            return ComplexityScore::trivial();
        }

        let rules = &self.rules;
        let text = Normalized::new(description);
        let mut signals = Vec::new();

        for kw in &rules.complexity_keywords {
            if text.contains(&kw.keyword) {
                signals.push(Signal::new(SignalKind::Keyword, kw.keyword.clone(), kw.weight));
            }
        }

        let word_count = text.words.len();
        if word_count > rules.long_description_words {
            signals.push(Signal::new(
                SignalKind::Length,
                format!("more than {} words", rules.long_description_words),
                rules.long_description_weight,
            ));
        }
        if word_count > rules.very_long_description_words {
            signals.push(Signal::new(
                SignalKind::Length,
                format!("more than {} words", rules.very_long_description_words),
                rules.very_long_description_weight,
            ));
        }

        let conjunctions: usize = rules.conjunctions.iter().map(|c| text.count(c)).sum::<usize>()
            + description.matches(';').count();
        let conjunctions = conjunctions.min(rules.conjunction_cap);
        if conjunctions > 0 {
            signals.push(Signal::new(
                SignalKind::Conjunction,
                format!("{} joined sub-goals", conjunctions),
                conjunctions as f64 * rules.conjunction_weight,
            ));
        }

        let sub_goals = count_enumerated_lines(description).min(rules.sub_goal_cap);
        if sub_goals > 0 {
            signals.push(Signal::new(
                SignalKind::SubGoal,
                format!("{} enumerated sub-goals", sub_goals),
                sub_goals as f64 * rules.sub_goal_weight,
            ));
        }

        let domain = match domain_hint {
            Some(hint) if hint != Domain::Unknown => hint,
            _ => self.classifier.classify(description).domain,
        };
        if let Some(weight) = rules.domain_weights.get(&domain).copied() {
            if weight != 0.0 {
                signals.push(Signal::new(SignalKind::Domain, domain.as_str(), weight));
            }
        }

        let value = signals.iter().map(|s| s.weight).sum();
        let score = ComplexityScore::new(value, domain, signals);

        tracing::debug!(
            agent = %self.agent_type(),
            domain = %score.domain(),
            "Task complexity: {:.2} ({} signals)",
            score.value(),
            score.signals().len()
        );
        score
    }
}

impl Default for ComplexityAnalyzer {
    fn default() -> Self {
        Self::new(KeywordRules::default())
    }
}

impl Agent for ComplexityAnalyzer {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Analyzer
    }

    fn description(&self) -> &str {
        "Scores task complexity and classifies its domain"
    }
}

/// Lines that start like a list item ("1.", "2)", "-", "*").
fn count_enumerated_lines(text: &str) -> usize {
    text.lines()
        .map(str::trim_start)
        .filter(|line| {
            if let Some(rest) = line.strip_prefix(&['-', '*', '\u{2022}'][..]) {
                return rest.starts_with(' ');
            }
            let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
            digits > 0
                && line[digits..].starts_with(&['.', ')'][..])
                && line[digits + 1..].starts_with(' ')
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_description_is_trivial_unknown() {
        let analyzer = ComplexityAnalyzer::default();
        for text in ["", "   ", "\n\t"] {
            let score = analyzer.analyze(&Task::new(text));
            assert_eq!(score.value(), 0.0);
            assert_eq!(score.domain(), Domain::Unknown);
        }
    }

    #[test]
    fn test_analyze_is_deterministic() {
        let analyzer = ComplexityAnalyzer::default();
        let task = Task::new(
            "Analyze the logs and then optimize the parallel ingestion; also coordinate the rollout",
        );
        assert_eq!(analyzer.analyze(&task), analyzer.analyze(&task));
    }

    #[test]
    fn test_coding_classification() {
        let analyzer = ComplexityAnalyzer::default();
        let score = analyzer.analyze(&Task::new("fix a null pointer bug in function X"));
        assert_eq!(score.domain(), Domain::Coding);
    }

    #[test]
    fn test_trivial_chat_is_low_and_unknown() {
        let analyzer = ComplexityAnalyzer::default();
        let score = analyzer.analyze(&Task::new("say hello"));
        assert_eq!(score.domain(), Domain::Unknown);
        assert!(score.value() < 1.0);
    }

    #[test]
    fn test_keywords_and_structure_raise_score() {
        let analyzer = ComplexityAnalyzer::default();
        let simple = analyzer.analyze(&Task::new("summarize this article"));
        let complex = analyzer.analyze(&Task::new(
            "Orchestrate a comprehensive migration:\n1. analyze the schema\n2. optimize queries\n3. coordinate simultaneous cutover and then verify",
        ));
        assert!(complex.value() > simple.value());
        assert!(complex.value() > 7.0);
        assert!(complex
            .signals()
            .iter()
            .any(|s| s.kind == SignalKind::SubGoal));
    }

    #[test]
    fn test_score_clamped_to_scale() {
        let analyzer = ComplexityAnalyzer::default();
        let text = "orchestrate synthesize simultaneous optimize complex coordinate advanced \
                    parallel integrate migrate architecture multiple analyze and then also";
        let score = analyzer.analyze(&Task::new(text));
        assert_eq!(score.value(), MAX_COMPLEXITY);
    }

    #[test]
    fn test_domain_hint_overrides_classifier() {
        let analyzer = ComplexityAnalyzer::default();
        let task = Task::new("say hello").with_domain_hint(Domain::Coding);
        assert_eq!(analyzer.analyze(&task).domain(), Domain::Coding);

        let task = Task::new("fix the bug").with_domain_hint(Domain::Unknown);
        assert_eq!(analyzer.analyze(&task).domain(), Domain::Coding);
    }

    #[test]
    fn test_whole_word_matching() {
        let text = Normalized::new("Recode the testament; turn on the lights");
        assert!(!text.contains("code"));
        assert!(!text.contains("test"));
        assert!(text.contains("turn on"));
    }

    #[test]
    fn test_custom_classifier_is_used() {
        struct AlwaysPlanning;
        impl Classifier for AlwaysPlanning {
            fn classify(&self, _: &str) -> Classification {
                Classification {
                    domain: Domain::Planning,
                    matched: vec![],
                }
            }
        }
        let analyzer = ComplexityAnalyzer::default().with_classifier(Arc::new(AlwaysPlanning));
        assert_eq!(
            analyzer.analyze(&Task::new("fix the bug")).domain(),
            Domain::Planning
        );
    }

    #[test]
    fn test_rules_deserialize_with_defaults() {
        let rules: KeywordRules =
            serde_json::from_str(r#"{"conjunction_weight": 2.0, "domain_weights": {"coding": 3.0}}"#)
                .unwrap();
        assert_eq!(rules.conjunction_weight, 2.0);
        assert_eq!(rules.domain_weights.get(&Domain::Coding), Some(&3.0));
        assert!(!rules.complexity_keywords.is_empty());
    }
}
