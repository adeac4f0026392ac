use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::error::{Error, Result};

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("valid whitespace regex"));
static BLANK_LINE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n\s*\n").expect("valid blank line regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Text,
    Pattern,
}

/// Matching flags for pattern rules. Text rules ignore them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleFlags {
    pub case_insensitive: bool,
    /// Remove every match instead of only the first.
    pub global: bool,
    pub multi_line: bool,
}

impl Default for RuleFlags {
    fn default() -> Self {
        Self {
            case_insensitive: true,
            global: true,
            multi_line: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterRule {
    kind: RuleKind,
    pattern: String,
    flags: RuleFlags,
    description: String,
    regex: Option<Regex>,
}

impl FilterRule {
    pub fn text(text: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: RuleKind::Text,
            pattern: text.into(),
            flags: RuleFlags::default(),
            description: description.into(),
            regex: None,
        }
    }

    pub fn pattern(pattern: impl Into<String>, description: impl Into<String>) -> Result<Self> {
        Self::pattern_with_flags(pattern, description, RuleFlags::default())
    }

    pub fn pattern_with_flags(
        pattern: impl Into<String>,
        description: impl Into<String>,
        flags: RuleFlags,
    ) -> Result<Self> {
        let pattern = pattern.into();
        let regex = RegexBuilder::new(&pattern)
            .case_insensitive(flags.case_insensitive)
            .multi_line(flags.multi_line)
            .build()
            .map_err(|source| Error::InvalidFilterPattern {
                pattern: pattern.clone(),
                source,
            })?;

        Ok(Self {
            kind: RuleKind::Pattern,
            pattern,
            flags,
            description: description.into(),
            regex: Some(regex),
        })
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    pub fn pattern_str(&self) -> &str {
        &self.pattern
    }

    pub fn flags(&self) -> RuleFlags {
        self.flags
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    fn apply(&self, content: &str) -> String {
        match (&self.kind, &self.regex) {
            (RuleKind::Pattern, Some(regex)) if self.flags.global => {
                regex.replace_all(content, "").into_owned()
            }
            (RuleKind::Pattern, Some(regex)) => regex.replace(content, "").into_owned(),
            (RuleKind::Text, _) if !self.pattern.is_empty() => content.replace(&self.pattern, ""),
            _ => content.to_owned(),
        }
    }
}

/// An ordered list of [`FilterRule`]s applied to every article body.
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    rules: Vec<FilterRule>,
}

impl ContentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<FilterRule>) -> Self {
        Self { rules }
    }

    /// Rules for the archived site: drops the "listen to the audio version"
    /// promo block. The second pattern catches reworded variants the first
    /// one misses.
    pub fn site_preset() -> Self {
        let mut filter = Self::new();
        filter
            .add_pattern_rule(
                r"🎧\s*<a[^>]*>Аудиоверсия поста</a>\.[^<]*<a[^>]*>вот по этой инструкции</a>\.</p>",
                "audio version promo block",
            )
            .expect("valid preset pattern");
        filter
            .add_pattern_rule(
                r"🎧[^.]*аудиоверсию[^.]*инструкции[^.]*\.",
                "audio version promo variants",
            )
            .expect("valid preset pattern");
        filter
    }

    pub fn add_rule(&mut self, rule: FilterRule) {
        tracing::debug!(rule = rule.description(), "added content filter rule");
        self.rules.push(rule);
    }

    pub fn add_text_rule(&mut self, text: impl Into<String>, description: impl Into<String>) {
        self.add_rule(FilterRule::text(text, description));
    }

    pub fn add_pattern_rule(
        &mut self,
        pattern: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<()> {
        self.add_rule(FilterRule::pattern(pattern, description)?);
        Ok(())
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    pub fn rules_count(&self) -> usize {
        self.rules.len()
    }

    /// Applies every rule in insertion order.
    ///
    /// Whitespace is normalized only when some rule removed something, so
    /// clean input comes back byte-for-byte unchanged.
    pub fn filter_content(&self, content: &str) -> String {
        let mut filtered = content.to_owned();
        let mut total_removed = 0usize;

        for rule in &self.rules {
            let before = filtered.chars().count();
            filtered = rule.apply(&filtered);
            let removed = before.saturating_sub(filtered.chars().count());

            if removed > 0 {
                total_removed += removed;
                tracing::debug!(rule = rule.description(), removed, "content filter rule matched");
            }
        }

        if total_removed == 0 {
            return filtered;
        }

        let filtered = WHITESPACE_RUN.replace_all(&filtered, " ");
        let filtered = BLANK_LINE_RUN.replace_all(&filtered, "\n\n");
        tracing::debug!(removed = total_removed, "content filter removed characters");
        filtered.trim().to_owned()
    }
}
