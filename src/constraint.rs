//! Jobspec constraint evaluator: the RFC-31 subset of spec.md §6.2.
//!
//! The constraint tree deserializes straight off the jobspec YAML
//! document (`serde_yaml`, mirroring `timpani-o/src/config/mod.rs`'s
//! YAML-via-serde pattern) as an untagged enum — each variant's shape
//! (`{properties:[...]}`, `{hostlist:[...]}`, ...) is unambiguous, so
//! serde can try each in turn and the first structural match wins.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::idset;

const DISALLOWED_PROPERTY_CHARS: &[char] = &['!', '&', '\'', '"', '`', '|', '(', ')'];

/// Reject property strings containing the forbidden characters (a
/// leading `^` negation marker is stripped before the check).
pub fn validate_property(p: &str) -> Result<(), CoreError> {
    let body = p.strip_prefix('^').unwrap_or(p);
    if body.contains(DISALLOWED_PROPERTY_CHARS) {
        return Err(CoreError::invalid_input(format!(
            "property string '{p}' contains a disallowed character"
        )));
    }
    if body.contains('^') {
        return Err(CoreError::invalid_input(format!(
            "property string '{p}' may only use '^' as a leading negation marker"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PropertiesConstraint {
    pub properties: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HostlistConstraint {
    pub hostlist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RanksConstraint {
    pub ranks: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AndConstraint {
    pub and: Vec<Constraint>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OrConstraint {
    pub or: Vec<Constraint>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NotConstraint {
    pub not: Vec<Constraint>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct EmptyConstraint {}

/// A constraint tree node. `{}` (no keys) always matches.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Constraint {
    Properties(PropertiesConstraint),
    Hostlist(HostlistConstraint),
    Ranks(RanksConstraint),
    And(AndConstraint),
    Or(OrConstraint),
    Not(NotConstraint),
    Always(EmptyConstraint),
}

/// The facts about a candidate resource a constraint is matched
/// against — just enough to evaluate spec.md §6.2's predicates.
#[derive(Debug, Clone, Default)]
pub struct ResourceFacts {
    pub properties: BTreeSet<String>,
    pub hostname: String,
    pub rank: i64,
}

impl Constraint {
    /// Validate every property string reachable from this tree.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Constraint::Properties(p) => p.properties.iter().try_for_each(|s| validate_property(s)),
            Constraint::Hostlist(_) | Constraint::Ranks(_) | Constraint::Always(_) => Ok(()),
            Constraint::And(c) => c.and.iter().try_for_each(Constraint::validate),
            Constraint::Or(c) => c.or.iter().try_for_each(Constraint::validate),
            Constraint::Not(c) => c.not.iter().try_for_each(Constraint::validate),
        }
    }

    /// `match(resource)` — spec.md §6.2.
    pub fn matches(&self, facts: &ResourceFacts) -> Result<bool, CoreError> {
        match self {
            Constraint::Always(_) => Ok(true),
            Constraint::Properties(p) => Ok(p.properties.iter().all(|entry| match entry.strip_prefix('^') {
                Some(negated) => !facts.properties.contains(negated),
                None => facts.properties.contains(entry.as_str()),
            })),
            Constraint::Hostlist(h) => {
                let mut expanded = Vec::new();
                for entry in &h.hostlist {
                    expanded.extend(idset::expand_hostlist(entry)?);
                }
                Ok(expanded.iter().any(|h| h == &facts.hostname))
            }
            Constraint::Ranks(r) => {
                for entry in &r.ranks {
                    let ids = idset::decode(entry)?;
                    if facts.rank >= 0 && ids.contains(&(facts.rank as u32)) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Constraint::And(c) => match_and(&c.and, facts),
            Constraint::Or(c) => {
                for sub in &c.or {
                    if sub.matches(facts)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Constraint::Not(c) => Ok(!match_and(&c.not, facts)?),
        }
    }
}

fn match_and(values: &[Constraint], facts: &ResourceFacts) -> Result<bool, CoreError> {
    for c in values {
        if !c.matches(facts)? {
            return Ok(false);
        }
    }
    Ok(true)
}
