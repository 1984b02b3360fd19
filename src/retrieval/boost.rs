//! Domain boosts applied on top of rerank scores

use crate::error::{GroundedError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Default pattern for passages carrying formulae (LaTeX or inline equations)
pub const FORMULA_PATTERN: &str =
    r"\$[^$]+\$|\\(?:frac|sum|int|sqrt|cdot|alpha|beta|lambda|sigma)\b|[∑∫√≤≥≈±∂]|\b\w+\s*=\s*[\w(]";

/// Boost rule as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostRuleConfig {
    pub name: String,
    pub pattern: String,
    pub boost: f32,
}

impl BoostRuleConfig {
    pub fn formula() -> Self {
        Self {
            name: "formula".to_string(),
            pattern: FORMULA_PATTERN.to_string(),
            boost: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
struct BoostRule {
    name: String,
    pattern: Regex,
    boost: f32,
}

/// Compiled boost rules; the boost for a passage is the sum of all matching rules
#[derive(Debug, Clone, Default)]
pub struct BoostRules {
    rules: Vec<BoostRule>,
}

impl BoostRules {
    pub fn compile(configs: &[BoostRuleConfig]) -> Result<Self> {
        let rules = configs
            .iter()
            .map(|config| {
                let pattern = Regex::new(&config.pattern).map_err(|e| {
                    GroundedError::Config(format!(
                        "Invalid boost pattern for '{}': {}",
                        config.name, e
                    ))
                })?;
                Ok(BoostRule {
                    name: config.name.clone(),
                    pattern,
                    boost: config.boost,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules })
    }

    pub fn boost_for(&self, text: &str) -> f32 {
        self.rules
            .iter()
            .filter(|rule| rule.boost != 0.0 && rule.pattern.is_match(text))
            .map(|rule| rule.boost)
            .sum()
    }

    /// Names of the rules matching a passage
    pub fn matching(&self, text: &str) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|rule| rule.pattern.is_match(text))
            .map(|rule| rule.name.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formula_pattern_matches_equations() {
        let rules = BoostRules::compile(&[BoostRuleConfig {
            boost: 0.2,
            ..BoostRuleConfig::formula()
        }])
        .unwrap();

        assert_eq!(rules.boost_for("The loss is $L = -\\log p$."), 0.2);
        assert_eq!(rules.boost_for("where score = w / (k + r)"), 0.2);
        assert_eq!(rules.boost_for("Plain prose with no maths."), 0.0);
        assert_eq!(rules.matching("∑ over signals"), vec!["formula"]);
    }

    #[test]
    fn test_boosts_accumulate() {
        let rules = BoostRules::compile(&[
            BoostRuleConfig {
                name: "rust".to_string(),
                pattern: r"(?i)\brust\b".to_string(),
                boost: 0.1,
            },
            BoostRuleConfig {
                name: "async".to_string(),
                pattern: r"(?i)\basync\b".to_string(),
                boost: 0.05,
            },
        ])
        .unwrap();

        assert!((rules.boost_for("Async Rust") - 0.15).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let result = BoostRules::compile(&[BoostRuleConfig {
            name: "broken".to_string(),
            pattern: "(".to_string(),
            boost: 1.0,
        }]);
        assert!(matches!(result, Err(GroundedError::Config(_))));
    }
}
