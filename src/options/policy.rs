//! Pair policy and per-operation defaults / 参数策略与默认参数
//!
//! Defaults are appended after the explicit pairs, so the parser's
//! first-wins rule lets explicit values override them.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::{Operation, Pair};

/// Which operations reject unknown pairs / 未知参数处理策略
///
/// The default is permissive everywhere: unknown pairs are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairPolicy {
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub restricted: BTreeSet<Operation>,
}

impl PairPolicy {
    /// Restrictive for every operation / 所有操作均严格
    pub fn strict() -> Self {
        Self {
            all: true,
            restricted: BTreeSet::new(),
        }
    }

    pub fn restrict(mut self, op: Operation) -> Self {
        self.restricted.insert(op);
        self
    }

    pub fn is_restrictive(&self, op: Operation) -> bool {
        self.all || self.restricted.contains(&op)
    }
}

/// Per-operation default pairs, appended after explicit ones / 默认参数
#[derive(Debug, Clone, Default)]
pub struct DefaultPairs {
    by_op: HashMap<Operation, Vec<Pair>>,
}

impl DefaultPairs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, op: Operation, pairs: Vec<Pair>) -> Self {
        self.by_op.insert(op, pairs);
        self
    }

    pub fn get(&self, op: Operation) -> &[Pair] {
        self.by_op.get(&op).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.by_op.values().all(Vec::is_empty)
    }

    /// `explicit ++ defaults[op]`; parsing is first-wins so explicit pairs
    /// shadow defaults with the same key.
    pub fn merge(&self, op: Operation, explicit: Vec<Pair>) -> Vec<Pair> {
        let defaults = self.get(op);
        if defaults.is_empty() {
            return explicit;
        }
        let mut merged = Vec::with_capacity(explicit.len() + defaults.len());
        merged.extend(explicit);
        merged.extend(defaults.iter().cloned());
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairs;

    #[test]
    fn test_policy() {
        let p = PairPolicy::default();
        assert!(!p.is_restrictive(Operation::Write));
        let p = PairPolicy::default().restrict(Operation::Write);
        assert!(p.is_restrictive(Operation::Write));
        assert!(!p.is_restrictive(Operation::Read));
        assert!(PairPolicy::strict().is_restrictive(Operation::Read));
    }

    #[test]
    fn test_policy_from_json() {
        let p: PairPolicy = serde_json::from_str(r#"{"restricted":["write","reach"]}"#).unwrap();
        assert!(p.is_restrictive(Operation::Reach));
        assert!(!p.all);
    }

    #[test]
    fn test_merge_puts_explicit_first() {
        let defaults = DefaultPairs::new().set(Operation::Write, vec![pairs::with_content_type("application/json")]);
        let merged = defaults.merge(Operation::Write, vec![pairs::with_content_type("text/plain")]);
        assert_eq!(merged.len(), 2);
        assert!(matches!(merged[0].value(), crate::options::PairValue::Str(s) if s == "text/plain"));
        assert!(defaults.merge(Operation::Read, vec![]).is_empty());
    }
}
