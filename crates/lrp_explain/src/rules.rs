//! Attribution rules and the registry resolving rule identifiers.
//!
//! A [`Rule`] is a tagged variant; the strategy carrying its per-layer
//! formulas is picked by matching on the variant (see [`Rule::strategy`]).
//! The [`RuleRegistry`] maps user-facing identifiers such as `"alpha2beta1"`
//! to configured rules.
//!
//! ```rust
//! use lrp_explain::{Rule, RuleRegistry};
//!
//! let registry = RuleRegistry::default();
//! let rule = registry.resolve("epsilon").unwrap();
//! assert!(matches!(rule, Rule::Epsilon { .. }));
//! assert!(registry.resolve("deconvnet").is_err());
//! ```

use std::collections::HashMap;
use std::fmt;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ExplainError, Result};
use crate::strategy::{
    AlphaBetaStrategy, AttributionStrategy, EpsilonStrategy, GradientStrategy,
    PatternAttributionStrategy, PatternNetStrategy,
};

/// Default stabiliser of the epsilon rule.
pub const DEFAULT_EPSILON: f32 = 1e-6;

/// A relevance propagation rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rule {
    /// Plain chain-rule backward pass.
    Gradient,
    /// LRP-epsilon with a signed stabiliser.
    Epsilon {
        /// Stabiliser, strictly positive.
        epsilon: f32,
    },
    /// LRP-alpha-beta.
    AlphaBeta {
        /// Weight of positive contributions.
        alpha: f32,
        /// Weight of negative contributions, `alpha - 1`.
        beta: f32,
    },
    /// Gradient-style redistribution through `W ⊙ A`.
    PatternAttribution,
    /// Signal reconstruction through the patterns.
    PatternNet,
}

impl Rule {
    /// Epsilon rule.
    ///
    /// # Errors
    ///
    /// Returns [`ExplainError::InvalidRule`] unless `epsilon > 0`.
    pub fn epsilon(epsilon: f32) -> Result<Self> {
        let rule = Rule::Epsilon { epsilon };
        rule.validate()?;
        Ok(rule)
    }

    /// Alpha-beta rule.
    ///
    /// # Errors
    ///
    /// Returns [`ExplainError::InvalidRule`] unless `alpha >= 1` and
    /// `alpha - beta == 1`.
    pub fn alpha_beta(alpha: f32, beta: f32) -> Result<Self> {
        let rule = Rule::AlphaBeta { alpha, beta };
        rule.validate()?;
        Ok(rule)
    }

    /// Check parameter constraints.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Rule::Epsilon { epsilon } if !epsilon.is_finite() || epsilon <= 0.0 => Err(
                ExplainError::InvalidRule(format!("epsilon must be positive, got {epsilon}")),
            ),
            Rule::AlphaBeta { alpha, beta } => {
                if alpha.is_nan() || alpha < 1.0 || !beta.is_finite() {
                    return Err(ExplainError::InvalidRule(format!(
                        "alpha must be at least 1, got {alpha}"
                    )));
                }
                if ((alpha - beta) - 1.0).abs() > 1e-6 {
                    return Err(ExplainError::InvalidRule(format!(
                        "alpha - beta must equal 1, got alpha={alpha} beta={beta}"
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Whether attribution with this rule needs fitted patterns.
    pub fn requires_pattern(&self) -> bool {
        matches!(self, Rule::PatternAttribution | Rule::PatternNet)
    }

    /// Short name of the rule family.
    pub fn name(&self) -> &'static str {
        match self {
            Rule::Gradient => "gradient",
            Rule::Epsilon { .. } => "epsilon",
            Rule::AlphaBeta { .. } => "alpha_beta",
            Rule::PatternAttribution => "pattern_attribution",
            Rule::PatternNet => "pattern_net",
        }
    }

    /// Strategy implementing this rule's per-layer formulas.
    pub fn strategy<B: Backend>(&self) -> Box<dyn AttributionStrategy<B>> {
        match *self {
            Rule::Gradient => Box::new(GradientStrategy),
            Rule::Epsilon { epsilon } => Box::new(EpsilonStrategy { epsilon }),
            Rule::AlphaBeta { alpha, beta } => Box::new(AlphaBetaStrategy { alpha, beta }),
            Rule::PatternAttribution => Box::new(PatternAttributionStrategy),
            Rule::PatternNet => Box::new(PatternNetStrategy),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Epsilon { epsilon } => write!(f, "epsilon(eps={epsilon})"),
            Rule::AlphaBeta { alpha, beta } => write!(f, "alpha_beta(alpha={alpha}, beta={beta})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Registry mapping identifiers to rules.
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    rules: HashMap<String, Rule>,
}

impl Default for RuleRegistry {
    /// Registry with the standard identifiers: `gradient`, `epsilon`,
    /// `alpha1beta0`, `alpha2beta1`, `patternattribution`, `patternnet`.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.rules.insert("gradient".to_string(), Rule::Gradient);
        registry.rules.insert(
            "epsilon".to_string(),
            Rule::Epsilon {
                epsilon: DEFAULT_EPSILON,
            },
        );
        registry.rules.insert(
            "alpha1beta0".to_string(),
            Rule::AlphaBeta {
                alpha: 1.0,
                beta: 0.0,
            },
        );
        registry.rules.insert(
            "alpha2beta1".to_string(),
            Rule::AlphaBeta {
                alpha: 2.0,
                beta: 1.0,
            },
        );
        registry
            .rules
            .insert("patternattribution".to_string(), Rule::PatternAttribution);
        registry.rules.insert("patternnet".to_string(), Rule::PatternNet);
        registry
    }
}

impl RuleRegistry {
    /// Registry without any rules.
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Register a rule under `id`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns [`ExplainError::InvalidRule`] if the rule's parameters are
    /// invalid or the identifier is blank.
    pub fn register(&mut self, id: impl Into<String>, rule: Rule) -> Result<()> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ExplainError::InvalidRule("rule identifier is empty".to_string()));
        }
        rule.validate()?;
        self.rules.insert(id, rule);
        Ok(())
    }

    /// Look up a rule.
    ///
    /// # Errors
    ///
    /// Returns [`ExplainError::UnknownRule`] for unregistered identifiers.
    pub fn resolve(&self, id: &str) -> Result<Rule> {
        self.rules
            .get(id)
            .copied()
            .ok_or_else(|| ExplainError::UnknownRule {
                rule: id.to_string(),
                available: self.list().join(", "),
            })
    }

    /// Check if an identifier is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.rules.contains_key(id)
    }

    /// Registered identifiers, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if no rules are registered.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = RuleRegistry::default();
        assert_eq!(
            registry.list(),
            vec![
                "alpha1beta0",
                "alpha2beta1",
                "epsilon",
                "gradient",
                "patternattribution",
                "patternnet"
            ]
        );
        assert_eq!(
            registry.resolve("alpha2beta1").unwrap(),
            Rule::AlphaBeta {
                alpha: 2.0,
                beta: 1.0
            }
        );
        assert!(registry.resolve("patternnet").unwrap().requires_pattern());
        assert!(!registry.resolve("epsilon").unwrap().requires_pattern());
    }

    #[test]
    fn test_unknown_rule() {
        let registry = RuleRegistry::default();
        match registry.resolve("lrp.z") {
            Err(ExplainError::UnknownRule { rule, available }) => {
                assert_eq!(rule, "lrp.z");
                assert!(available.contains("epsilon"));
            }
            other => panic!("expected UnknownRule, got {other:?}"),
        }
    }

    #[test]
    fn test_rule_constraints() {
        assert!(Rule::epsilon(1e-3).is_ok());
        assert!(matches!(Rule::epsilon(0.0), Err(ExplainError::InvalidRule(_))));
        assert!(Rule::epsilon(-1.0).is_err());
        assert!(Rule::epsilon(f32::NAN).is_err());

        assert!(Rule::alpha_beta(1.0, 0.0).is_ok());
        assert!(Rule::alpha_beta(3.0, 2.0).is_ok());
        assert!(Rule::alpha_beta(2.0, 0.0).is_err());
        assert!(Rule::alpha_beta(0.5, -0.5).is_err());
    }

    #[test]
    fn test_register_custom_rule() {
        let mut registry = RuleRegistry::empty();
        assert!(registry.is_empty());
        registry.register("eps_large", Rule::epsilon(0.25).unwrap()).unwrap();
        assert!(registry.contains("eps_large"));
        assert_eq!(registry.len(), 1);

        let bad = Rule::AlphaBeta {
            alpha: 2.0,
            beta: 2.0,
        };
        assert!(registry.register("bad", bad).is_err());
        assert!(registry.register("  ", Rule::Gradient).is_err());
    }

    #[test]
    fn test_rule_serde() {
        let rule = Rule::AlphaBeta {
            alpha: 2.0,
            beta: 1.0,
        };
        let json = serde_json::to_string(&rule).unwrap();
        assert!(json.contains("\"rule\":\"alpha_beta\""));
        let decoded: Rule = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, rule);
        assert_eq!(rule.to_string(), "alpha_beta(alpha=2, beta=1)");
    }
}
