//! Deterministic hard-rule checker
//!
//! Pure function over the article text: word count, keyword inclusion,
//! structural heuristics, forbidden words. Never calls external services;
//! any failed rule zeroes the score.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use taskstore::HardConstraints;

static NUMBERED_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*\d+[.)]\s+").expect("static regex"));

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single failed rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub category: String,
    pub message: String,
    pub suggestion: String,
}

impl Issue {
    fn error(category: &str, message: String, suggestion: String) -> Self {
        Self {
            severity: Severity::Error,
            category: category.to_string(),
            message,
            suggestion,
        }
    }
}

/// Outcome of the deterministic check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardCheckReport {
    pub passed: bool,
    /// 100 when clean, 0 when any rule failed
    pub score: u8,
    pub word_count: usize,
    /// True when the text was counted per-character (CJK-dominant)
    pub cjk: bool,
    pub issues: Vec<Issue>,
}

impl HardCheckReport {
    /// Structured details for persistence
    pub fn details(&self) -> serde_json::Value {
        serde_json::json!({
            "word_count": self.word_count,
            "cjk": self.cjk,
            "issues": self.issues,
        })
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'        // CJK unified
        | '\u{3400}'..='\u{4DBF}'      // extension A
        | '\u{3040}'..='\u{30FF}'      // kana
        | '\u{F900}'..='\u{FAFF}'      // compatibility
    )
}

/// Count "words" in the article
///
/// CJK-dominant text counts non-whitespace characters; everything else
/// counts whitespace-delimited words. Returns (count, counted_as_cjk).
pub fn count_words(content: &str) -> (usize, bool) {
    let mut non_ws = 0usize;
    let mut cjk = 0usize;
    for c in content.chars() {
        if !c.is_whitespace() {
            non_ws += 1;
            if is_cjk(c) {
                cjk += 1;
            }
        }
    }

    if non_ws > 0 && cjk * 2 >= non_ws {
        (non_ws, true)
    } else {
        (content.split_whitespace().count(), false)
    }
}

fn heading_count(content: &str) -> usize {
    content.lines().filter(|line| line.trim_start().starts_with('#')).count()
}

/// Run every configured rule against the content
pub fn check(content: &str, constraints: &HardConstraints) -> HardCheckReport {
    let (word_count, cjk) = count_words(content);
    let unit = if cjk { "characters" } else { "words" };
    let lower = content.to_lowercase();
    let mut issues = Vec::new();

    // Word count bounds
    if let Some(min) = constraints.min_words
        && word_count < min
    {
        issues.push(Issue::error(
            "word_count",
            format!("Content has {} {unit}, minimum is {}", word_count, min),
            format!("Add at least {} more {unit}", min - word_count),
        ));
    }
    if let Some(max) = constraints.max_words
        && word_count > max
    {
        issues.push(Issue::error(
            "word_count",
            format!("Content has {} {unit}, maximum is {}", word_count, max),
            format!("Remove at least {} {unit}", word_count - max),
        ));
    }

    // Keywords, case-insensitive substring
    if !constraints.keywords.is_empty() {
        let missing: Vec<&String> = constraints
            .keywords
            .iter()
            .filter(|kw| !lower.contains(&kw.to_lowercase()))
            .collect();
        if constraints.require_all_keywords {
            for kw in &missing {
                issues.push(Issue::error(
                    "keywords",
                    format!("Required keyword '{}' is missing", kw),
                    format!("Mention '{}' in the article", kw),
                ));
            }
        } else if missing.len() == constraints.keywords.len() {
            issues.push(Issue::error(
                "keywords",
                "None of the requested keywords appear".to_string(),
                format!("Mention at least one of: {}", constraints.keywords.join(", ")),
            ));
        }
    }

    // Forbidden words
    for word in &constraints.forbidden_words {
        if lower.contains(&word.to_lowercase()) {
            issues.push(Issue::error(
                "forbidden_words",
                format!("Forbidden word '{}' appears", word),
                format!("Remove every occurrence of '{}'", word),
            ));
        }
    }

    // Structure heuristics
    let lines: Vec<&str> = content.lines().collect();
    let non_empty: Vec<&str> = lines.iter().copied().filter(|l| !l.trim().is_empty()).collect();

    if constraints.require_title {
        let titled = non_empty
            .first()
            .map(|first| first.trim_start().starts_with('#') || first.chars().count() <= 40)
            .unwrap_or(false);
        if !titled {
            issues.push(Issue::error(
                "structure",
                "No title detected".to_string(),
                "Start with a short title line or a markdown heading".to_string(),
            ));
        }
    }

    if constraints.require_intro {
        let has_intro = non_empty.iter().take(3).any(|line| {
            let len = line.trim().chars().count();
            (10..=300).contains(&len)
        });
        if !has_intro {
            issues.push(Issue::error(
                "structure",
                "No introduction detected in the opening lines".to_string(),
                "Open with a short introductory paragraph".to_string(),
            ));
        }
    }

    if constraints.require_conclusion {
        let concluded = non_empty.last().map(|last| last.trim().chars().count() > 10).unwrap_or(false);
        if !concluded {
            issues.push(Issue::error(
                "structure",
                "No conclusion detected".to_string(),
                "Close with a concluding paragraph".to_string(),
            ));
        }
    }

    if let Some(min_sections) = constraints.min_sections {
        let sections = heading_count(content);
        if sections < min_sections {
            issues.push(Issue::error(
                "structure",
                format!("Found {} sections, minimum is {}", sections, min_sections),
                format!("Split the article into at least {} headed sections", min_sections),
            ));
        }
    }

    if constraints.has_bullet_points {
        let found = lines.iter().any(|line| {
            let t = line.trim_start();
            t.starts_with("- ") || t.starts_with("* ") || t.starts_with("• ")
        });
        if !found {
            issues.push(Issue::error(
                "structure",
                "No bullet list found".to_string(),
                "Add a bulleted list".to_string(),
            ));
        }
    }

    if constraints.has_numbered_list && !NUMBERED_LIST.is_match(content) {
        issues.push(Issue::error(
            "structure",
            "No numbered list found".to_string(),
            "Add a numbered list".to_string(),
        ));
    }

    let passed = issues.is_empty();
    HardCheckReport {
        passed,
        score: if passed { 100 } else { 0 },
        word_count,
        cjk,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraints() -> HardConstraints {
        HardConstraints::default()
    }

    #[test]
    fn test_empty_constraints_pass() {
        let report = check("anything at all", &constraints());
        assert!(report.passed);
        assert_eq!(report.score, 100);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_word_count_english() {
        let (count, cjk) = count_words("one two three four");
        assert_eq!(count, 4);
        assert!(!cjk);
    }

    #[test]
    fn test_word_count_cjk() {
        let (count, cjk) = count_words("人工智能 正在 改变 世界");
        assert_eq!(count, 10);
        assert!(cjk);
    }

    #[test]
    fn test_min_words_boundary() {
        let content = "字".repeat(499);
        let report = check(
            &content,
            &HardConstraints {
                min_words: Some(500),
                ..constraints()
            },
        );
        assert!(!report.passed);
        assert_eq!(report.score, 0);
        assert_eq!(report.word_count, 499);
        let issue = &report.issues[0];
        assert_eq!(issue.category, "word_count");
        assert!(issue.suggestion.contains("at least 1 more"));

        // One more character passes
        let report = check(
            &"字".repeat(500),
            &HardConstraints {
                min_words: Some(500),
                ..constraints()
            },
        );
        assert!(report.passed);
    }

    #[test]
    fn test_max_words() {
        let report = check(
            "one two three four five",
            &HardConstraints {
                max_words: Some(3),
                ..constraints()
            },
        );
        assert!(!report.passed);
        assert!(report.issues[0].message.contains("maximum is 3"));
    }

    #[test]
    fn test_keywords_require_all() {
        let report = check(
            "This is about AI and nothing else.",
            &HardConstraints {
                keywords: vec!["AI".to_string(), "robotics".to_string()],
                require_all_keywords: true,
                ..constraints()
            },
        );
        assert!(!report.passed);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].message.contains("robotics"));
    }

    #[test]
    fn test_keywords_any_mode() {
        let any_present = check(
            "This is about AI.",
            &HardConstraints {
                keywords: vec!["AI".to_string(), "robotics".to_string()],
                ..constraints()
            },
        );
        assert!(any_present.passed);

        let none_present = check(
            "This is about gardening.",
            &HardConstraints {
                keywords: vec!["AI".to_string(), "robotics".to_string()],
                ..constraints()
            },
        );
        assert!(!none_present.passed);
    }

    #[test]
    fn test_keyword_matching_is_case_insensitive() {
        let report = check(
            "all about artificial intelligence (ai)",
            &HardConstraints {
                keywords: vec!["AI".to_string()],
                require_all_keywords: true,
                ..constraints()
            },
        );
        assert!(report.passed);
    }

    #[test]
    fn test_forbidden_words() {
        let report = check(
            "This product is guaranteed to work.",
            &HardConstraints {
                forbidden_words: vec!["guaranteed".to_string()],
                ..constraints()
            },
        );
        assert!(!report.passed);
        assert_eq!(report.issues[0].category, "forbidden_words");
    }

    #[test]
    fn test_title_heuristic() {
        let heading = "# The Future of AI\n\nBody text that is long enough to be an intro.";
        assert!(
            check(
                heading,
                &HardConstraints {
                    require_title: true,
                    ..constraints()
                }
            )
            .passed
        );

        let long_first_line = format!("{}\n\nBody.", "x".repeat(80));
        assert!(
            !check(
                &long_first_line,
                &HardConstraints {
                    require_title: true,
                    ..constraints()
                }
            )
            .passed
        );
    }

    #[test]
    fn test_intro_and_conclusion_heuristics() {
        let good = "# Title\nA reasonable opening paragraph follows the title here.\nMore body.\nA closing line that wraps the article up.";
        let report = check(
            good,
            &HardConstraints {
                require_intro: true,
                require_conclusion: true,
                ..constraints()
            },
        );
        assert!(report.passed, "{:?}", report.issues);

        let short_close = "# Title\nA reasonable opening paragraph follows the title here.\nok";
        assert!(
            !check(
                short_close,
                &HardConstraints {
                    require_conclusion: true,
                    ..constraints()
                }
            )
            .passed
        );
    }

    #[test]
    fn test_sections_and_lists() {
        let content = "# Title\n## First\n- a bullet\n## Second\n1. first item\n";
        let report = check(
            content,
            &HardConstraints {
                min_sections: Some(3),
                has_bullet_points: true,
                has_numbered_list: true,
                ..constraints()
            },
        );
        assert!(report.passed, "{:?}", report.issues);

        let missing = check(
            "plain text only",
            &HardConstraints {
                min_sections: Some(1),
                has_bullet_points: true,
                has_numbered_list: true,
                ..constraints()
            },
        );
        assert_eq!(missing.issues.len(), 3);
    }

    #[test]
    fn test_details_shape() {
        let report = check("short", &HardConstraints {
            min_words: Some(10),
            ..constraints()
        });
        let details = report.details();
        assert_eq!(details["word_count"], 1);
        assert!(details["issues"].as_array().unwrap().len() == 1);
    }
}
