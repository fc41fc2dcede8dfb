//! Label sets, fingerprints and label matchers.
//!
//! Labels are the only thing the routing engine looks at when deciding
//! where an alert goes. A [`LabelSet`] is kept sorted so that its
//! [`Fingerprint`] is stable regardless of insertion order.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, Result, RouterError};

/// Label carrying the identifier of the rule that produced an alert.
pub const RULE_ID_LABEL: &str = "ruleId";
/// Label carrying the alert (rule) name.
pub const ALERT_NAME_LABEL: &str = "alertname";
/// Label carrying the threshold tier name of a multi-threshold rule.
pub const THRESHOLD_LABEL: &str = "threshold.name";
/// Label distinguishing policy-routed alerts from directly-routed ones.
pub const NOTIFICATION_POLICY_LABEL: &str = "notification_policy";
/// Label set on alerts raised because a rule stopped receiving data.
pub const NO_DATA_LABEL: &str = "nodata";

/// Sorted label name to value mapping.
pub type LabelSet = BTreeMap<String, String>;

/// Stable 64-bit identity of a label set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Computes the fingerprint of a label set.
    ///
    /// Pairs are hashed in sorted order with a separator byte that cannot
    /// appear in valid UTF-8, so `{a="bc"}` and `{ab="c"}` never collide.
    #[must_use]
    pub fn of(labels: &LabelSet) -> Self {
        let mut hasher = blake3::Hasher::new();
        for (name, value) in labels {
            hasher.update(name.as_bytes());
            hasher.update(&[0xff]);
            hasher.update(value.as_bytes());
            hasher.update(&[0xff]);
        }
        let hash = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        Self(u64::from_be_bytes(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Builds a label set from string pairs.
pub fn label_set<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> LabelSet
where
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// The comparison a [`Matcher`] applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchType {
    /// `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `=~`
    Regexp,
    /// `!~`
    NotRegexp,
}

impl MatchType {
    /// Returns the operator as written in matcher expressions.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Regexp => "=~",
            Self::NotRegexp => "!~",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single label matcher such as `severity=~"critical|page"`.
///
/// Serialized as its textual form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Matcher {
    name: String,
    match_type: MatchType,
    value: String,
    regex: Option<Regex>,
}

impl Matcher {
    /// Creates a matcher, compiling the pattern for regex match types.
    pub fn new(
        match_type: MatchType,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let value = value.into();
        if name.is_empty() {
            return Err(RouterError::invalid_input(
                ErrorCode::MATCHER_INVALID,
                "matcher label name cannot be empty",
            ));
        }
        let regex = match match_type {
            MatchType::Regexp | MatchType::NotRegexp => {
                let anchored = format!("^(?:{value})$");
                let re = Regex::new(&anchored).map_err(|e| {
                    RouterError::invalid_input(
                        ErrorCode::MATCHER_INVALID,
                        format!("invalid regex in matcher {name}: {e}"),
                    )
                })?;
                Some(re)
            }
            MatchType::Equal | MatchType::NotEqual => None,
        };
        Ok(Self {
            name,
            match_type,
            value,
            regex,
        })
    }

    /// Shorthand for an equality matcher.
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        Self::new(MatchType::Equal, name, value)
    }

    /// Parses `name<op>"value"`; the value may be quoted or bare.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let invalid = || {
            RouterError::invalid_input(
                ErrorCode::MATCHER_INVALID,
                format!("bad matcher format: {input}"),
            )
        };

        let op_start = input.find(['=', '!']).ok_or_else(invalid)?;
        let (name, rest) = input.split_at(op_start);
        let (match_type, value) = if let Some(v) = rest.strip_prefix("=~") {
            (MatchType::Regexp, v)
        } else if let Some(v) = rest.strip_prefix("!~") {
            (MatchType::NotRegexp, v)
        } else if let Some(v) = rest.strip_prefix("!=") {
            (MatchType::NotEqual, v)
        } else if let Some(v) = rest.strip_prefix('=') {
            (MatchType::Equal, v)
        } else {
            return Err(invalid());
        };

        let name = name.trim();
        let value = unquote(value.trim()).ok_or_else(invalid)?;
        Self::new(match_type, name, value)
    }

    /// Label name this matcher inspects.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The comparison applied.
    #[must_use]
    pub const fn match_type(&self) -> MatchType {
        self.match_type
    }

    /// The value or pattern compared against.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Checks a single label value. A missing label is matched as `""`.
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        match self.match_type {
            MatchType::Equal => value == self.value,
            MatchType::NotEqual => value != self.value,
            MatchType::Regexp => self.regex.as_ref().is_some_and(|re| re.is_match(value)),
            MatchType::NotRegexp => !self.regex.as_ref().is_some_and(|re| re.is_match(value)),
        }
    }

    /// Checks the matcher against a label set.
    #[must_use]
    pub fn matches_labels(&self, labels: &LabelSet) -> bool {
        self.matches(labels.get(&self.name).map_or("", String::as_str))
    }
}

/// Returns true if every matcher accepts the label set.
#[must_use]
pub fn matches_all(matchers: &[Matcher], labels: &LabelSet) -> bool {
    matchers.iter().all(|m| m.matches_labels(labels))
}

fn unquote(value: &str) -> Option<String> {
    let Some(inner) = value.strip_prefix('"') else {
        return Some(value.to_string());
    };
    let inner = inner.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                'n' => out.push('\n'),
                other => out.push(other),
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.match_type == other.match_type && self.value == other.value
    }
}

impl Eq for Matcher {}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let escaped = self
            .value
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('\n', "\\n");
        write!(f, "{}{}\"{}\"", self.name, self.match_type, escaped)
    }
}

impl FromStr for Matcher {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Matcher {
    type Error = RouterError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Matcher> for String {
    fn from(m: Matcher) -> Self {
        m.to_string()
    }
}
