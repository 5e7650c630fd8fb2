//! Keyword rule table for automatic replies
//!
//! Categories are evaluated in declaration order; the first one with a keyword
//! contained in the message text (case-insensitive) wins. The flat keyword list
//! is only consulted when no category matches.

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One named category: any keyword hit selects `reply`
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRule {
    pub name: String,
    pub keywords: Vec<String>,
    pub reply: String,
}

impl CategoryRule {
    pub fn new(name: &str, keywords: &[&str], reply: &str) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            reply: reply.to_string(),
        }
    }
}

/// Ordered category rules, serialized as a JSON object in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseRules(Vec<CategoryRule>);

impl ResponseRules {
    pub fn new(rules: Vec<CategoryRule>) -> Self {
        Self(rules)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CategoryRule> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First category whose keywords hit `text`
    pub fn find(&self, text: &str) -> Option<&CategoryRule> {
        let text = text.to_lowercase();
        self.0.iter().find(|rule| contains_any(&text, &rule.keywords))
    }
}

/// Where a chosen reply came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplySource {
    Category(String),
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyMatch {
    pub source: ReplySource,
    pub reply: String,
}

/// Pick the reply for `text`: categories first, then the flat keyword list
pub fn choose_reply(
    rules: &ResponseRules,
    fallback_keywords: &[String],
    fallback_message: &str,
    text: &str,
) -> Option<ReplyMatch> {
    if let Some(rule) = rules.find(text) {
        return Some(ReplyMatch {
            source: ReplySource::Category(rule.name.clone()),
            reply: rule.reply.clone(),
        });
    }

    if contains_any(&text.to_lowercase(), fallback_keywords) {
        return Some(ReplyMatch {
            source: ReplySource::Fallback,
            reply: fallback_message.to_string(),
        });
    }

    None
}

/// `text` must already be lowercase. Empty keywords never match.
fn contains_any(text: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| {
        let k = k.trim().to_lowercase();
        !k.is_empty() && text.contains(&k)
    })
}

// Accepts `{"keywords": [...], "reply": "..."}` or the older `["kw", ..., "reply"]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawRule {
    Structured { keywords: Vec<String>, reply: String },
    Legacy(Vec<String>),
}

impl RawRule {
    fn into_rule(self, name: String) -> std::result::Result<CategoryRule, String> {
        match self {
            RawRule::Structured { keywords, reply } => Ok(CategoryRule {
                name,
                keywords,
                reply,
            }),
            RawRule::Legacy(mut items) => {
                let reply = items
                    .pop()
                    .ok_or_else(|| format!("rule '{}' has no reply", name))?;
                Ok(CategoryRule {
                    name,
                    keywords: items,
                    reply,
                })
            }
        }
    }
}

#[derive(Serialize)]
struct RuleBody<'a> {
    keywords: &'a [String],
    reply: &'a str,
}

impl Serialize for ResponseRules {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for rule in &self.0 {
            map.serialize_entry(
                &rule.name,
                &RuleBody {
                    keywords: &rule.keywords,
                    reply: &rule.reply,
                },
            )?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ResponseRules {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct RulesVisitor;

        impl<'de> Visitor<'de> for RulesVisitor {
            type Value = ResponseRules;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of category name to keyword rule")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut rules: Vec<CategoryRule> = Vec::new();
                while let Some((name, raw)) = map.next_entry::<String, RawRule>()? {
                    let rule = raw.into_rule(name).map_err(de::Error::custom)?;
                    // duplicate key: keep the first position, take the later body
                    match rules.iter_mut().find(|r| r.name == rule.name) {
                        Some(existing) => *existing = rule,
                        None => rules.push(rule),
                    }
                }
                Ok(ResponseRules(rules))
            }
        }

        deserializer.deserialize_map(RulesVisitor)
    }
}
