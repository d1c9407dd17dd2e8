//! Jobspec (de)serialization, spec.md §6.1.
//!
//! Deserializes straight off the YAML document via `serde_yaml`
//! (`timpani-o/src/config/mod.rs`'s pattern), rejecting any key outside
//! the exact shape the spec allows (`deny_unknown_fields` throughout) so
//! a malformed jobspec fails at parse time with a line-oriented message
//! rather than surfacing as a confusing traversal failure later.

use std::collections::BTreeMap;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::constraint::Constraint;
use crate::error::CoreError;
use crate::policy::{CountOp, ExclusivityRegistry, ResourceCount};

/// `count` accepts either a bare nonnegative integer (shorthand for
/// `{min:n, max:n, operator:'+', operand:1}`) or the full mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountSpec(pub ResourceCount);

impl<'de> Deserialize<'de> for CountSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Shorthand(u64),
            Full {
                min: u64,
                max: u64,
                #[serde(default = "default_operator")]
                operator: String,
                #[serde(default = "default_operand")]
                operand: u64,
            },
        }
        fn default_operator() -> String {
            "+".to_string()
        }
        fn default_operand() -> u64 {
            1
        }

        match Repr::deserialize(deserializer)? {
            Repr::Shorthand(n) => Ok(CountSpec(ResourceCount::fixed(n))),
            Repr::Full { min, max, operator, operand } => {
                let operator = match operator.as_str() {
                    "+" => CountOp::Plus,
                    "*" => CountOp::Times,
                    "^" => CountOp::Power,
                    other => {
                        return Err(de::Error::custom(format!("unknown count operator '{other}'")))
                    }
                };
                Ok(CountSpec(ResourceCount { min, max, operator, operand }))
            }
        }
    }
}

impl Serialize for CountSpec {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let op = match self.0.operator {
            CountOp::Plus => "+",
            CountOp::Times => "*",
            CountOp::Power => "^",
        };
        let mut s = serializer.serialize_struct("CountSpec", 4)?;
        s.serialize_field("min", &self.0.min)?;
        s.serialize_field("max", &self.0.max)?;
        s.serialize_field("operator", op)?;
        s.serialize_field("operand", &self.0.operand)?;
        s.end()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Resource {
    #[serde(rename = "type")]
    pub type_: String,
    pub count: CountSpec,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    /// Tristate: unspecified participates in exclusivity only via an
    /// ancestor's latch, never on its own (`original_source/jobspec.hpp`).
    #[serde(default)]
    pub exclusive: Option<bool>,
    #[serde(default)]
    pub with: Vec<Resource>,
}

impl Resource {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.type_.is_empty() {
            return Err(CoreError::invalid_input("resource type must be non-empty"));
        }
        if self.type_ == "slot" && self.label.is_none() {
            return Err(CoreError::invalid_input("resource type 'slot' requires a label"));
        }
        let c = &self.count.0;
        if c.min == 0 {
            return Err(CoreError::invalid_input(format!(
                "resource '{}' count.min must be >= 1",
                self.type_
            )));
        }
        if c.max < c.min {
            return Err(CoreError::invalid_input(format!(
                "resource '{}' count.max must be >= min",
                self.type_
            )));
        }
        match c.operator {
            CountOp::Plus if c.operand < 1 => {
                return Err(CoreError::invalid_input("'+' operand must be >= 1"))
            }
            CountOp::Times if c.operand < 2 => {
                return Err(CoreError::invalid_input("'*' operand must be >= 2"))
            }
            CountOp::Power if c.operand < 2 || c.min < 2 => {
                return Err(CoreError::invalid_input(
                    "'^' operator requires operand >= 2 and min >= 2",
                ))
            }
            _ => {}
        }
        for child in &self.with {
            child.validate()?;
        }
        Ok(())
    }

    /// Aggregate `min` for this resource and every descendant by type —
    /// jobspec priming's `user_data[type]` (spec.md §4.6.1).
    pub fn aggregate_user_data(&self, out: &mut BTreeMap<String, u64>) {
        *out.entry(self.type_.clone()).or_insert(0) += self.count.0.min;
        for child in &self.with {
            child.aggregate_user_data(out);
        }
    }

    /// Register every type flagged `exclusive: true` (self or
    /// descendant) with the policy's exclusivity set.
    pub fn register_exclusive_types(&self, reg: &mut ExclusivityRegistry) {
        if self.exclusive == Some(true) {
            reg.add_exclusive_resource_type(self.type_.clone());
        }
        for child in &self.with {
            child.register_exclusive_types(reg);
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Task {
    pub command: Vec<String>,
    pub slot: String,
    #[serde(default)]
    pub count: Option<BTreeMap<String, u64>>,
    #[serde(default)]
    pub distribution: Option<String>,
    #[serde(default)]
    pub attributes: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SystemAttributes {
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub environment: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub constraints: Option<Constraint>,
    #[serde(flatten)]
    pub optional: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Attributes {
    #[serde(default)]
    pub system: Option<SystemAttributes>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Jobspec {
    pub version: u32,
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Jobspec {
    pub fn from_yaml_str(s: &str) -> Result<Self, CoreError> {
        let js: Jobspec = serde_yaml::from_str(s)
            .map_err(|e| CoreError::invalid_input(format!("jobspec parse error: {e}")))?;
        js.validate()?;
        Ok(js)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.version < 1 || self.version > 9999 {
            return Err(CoreError::invalid_input(format!(
                "jobspec version {} out of range [1, 9999]",
                self.version
            )));
        }
        if self.resources.is_empty() {
            return Err(CoreError::invalid_input("jobspec must declare at least one resource"));
        }
        for r in &self.resources {
            r.validate()?;
        }
        if let Some(system) = &self.attributes.system {
            if let Some(c) = &system.constraints {
                c.validate()?;
            }
        }
        Ok(())
    }

    pub fn duration(&self) -> f64 {
        self.attributes
            .system
            .as_ref()
            .map(|s| s.duration)
            .unwrap_or(0.0)
    }

    pub fn constraints(&self) -> Option<&Constraint> {
        self.attributes.system.as_ref().and_then(|s| s.constraints.as_ref())
    }

    pub fn aggregate_user_data(&self) -> BTreeMap<String, u64> {
        let mut out = BTreeMap::new();
        for r in &self.resources {
            r.aggregate_user_data(&mut out);
        }
        out
    }

    pub fn register_exclusive_types(&self, reg: &mut ExclusivityRegistry) {
        for r in &self.resources {
            r.register_exclusive_types(reg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S1_JOBSPEC: &str = r#"
version: 1
resources:
  - type: rack
    count: 2
    with:
      - type: node
        count: 1
        with:
          - type: slot
            label: s
            count: 1
            exclusive: true
            with:
              - type: core
                count: 4
tasks:
  - command: ["app"]
    slot: s
attributes:
  system:
    duration: 3600
"#;

    #[test]
    fn parses_s1_exclusive_rack_jobspec() {
        let js = Jobspec::from_yaml_str(S1_JOBSPEC).unwrap();
        assert_eq!(js.version, 1);
        assert_eq!(js.duration(), 3600.0);
        let data = js.aggregate_user_data();
        assert_eq!(data.get("rack"), Some(&2));
        assert_eq!(data.get("core"), Some(&4));
    }

    #[test]
    fn count_shorthand_defaults_to_fixed_plus_one() {
        let yaml = "version: 1\nresources:\n  - type: node\n    count: 3\n";
        let js = Jobspec::from_yaml_str(yaml).unwrap();
        let c = js.resources[0].count.0;
        assert_eq!(c.min, 3);
        assert_eq!(c.max, 3);
        assert_eq!(c.operator, CountOp::Plus);
    }

    #[test]
    fn rejects_unknown_top_level_key() {
        let yaml = "version: 1\nresources: []\nbogus: true\n";
        assert!(Jobspec::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn rejects_version_out_of_range() {
        let yaml = "version: 0\nresources:\n  - type: node\n    count: 1\n";
        assert!(Jobspec::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn slot_without_label_is_rejected() {
        let yaml = "version: 1\nresources:\n  - type: slot\n    count: 1\n";
        assert!(Jobspec::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn power_operator_requires_min_two_and_operand_two() {
        let yaml = "version: 1\nresources:\n  - type: node\n    count: {min: 1, max: 8, operator: \"^\", operand: 2}\n";
        assert!(Jobspec::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn register_exclusive_types_collects_flagged_descendants() {
        let js = Jobspec::from_yaml_str(S1_JOBSPEC).unwrap();
        let mut reg = ExclusivityRegistry::new();
        js.register_exclusive_types(&mut reg);
        assert!(reg.is_resource_type_exclusive("slot"));
        assert!(!reg.is_resource_type_exclusive("core"));
    }

    #[test]
    fn hostlist_constraint_round_trips_through_jobspec_yaml() {
        let yaml = r#"
version: 1
resources:
  - type: node
    count: 2
attributes:
  system:
    constraints:
      hostlist: ["foo[2-4]"]
"#;
        let js = Jobspec::from_yaml_str(yaml).unwrap();
        assert!(js.constraints().is_some());
    }
}
