//! Variable bindings threaded through a task run.
//!
//! An [`Env`] is both the substitution source for an action's templates and
//! the shape of the bindings an action extracts from a response. Environments
//! are treated as values: every mutation happens on a fresh clone, so a shared
//! environment is never changed underneath a concurrent reader.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Immutable-by-convention mapping from variable name to string value.
///
/// Keys are kept sorted, which makes equality order-independent and gives the
/// dedup fingerprint a canonical serialization for free.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Env {
    #[serde(rename = "vars", default)]
    name_value_pairs: BTreeMap<String, String>,
}

impl Env {
    /// The canonical empty environment.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds an environment from name/value pairs; later pairs win on collision.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            name_value_pairs: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.name_value_pairs.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.name_value_pairs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.name_value_pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name_value_pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.name_value_pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns a copy of `self` with one binding set. Used when building
    /// environments; shared environments are never mutated in place.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.name_value_pairs.insert(name.into(), value.into());
        self
    }

    /// Applies every distinct environment in `envs` onto `self`, later
    /// environments overwriting earlier ones on key collision.
    pub fn update<'a, I>(&mut self, envs: I)
    where
        I: IntoIterator<Item = &'a Env>,
    {
        for env in uniq_envs(envs) {
            for (name, value) in &env.name_value_pairs {
                self.name_value_pairs.insert(name.clone(), value.clone());
            }
        }
    }

    /// Produces one clone of `self` per distinct delta, each with that delta
    /// applied. No distinct deltas means no forks.
    pub fn fork(&self, deltas: &[Env]) -> Vec<Env> {
        uniq_envs(deltas)
            .into_iter()
            .map(|delta| {
                let mut forked = self.clone();
                forked.update([delta]);
                forked
            })
            .collect()
    }

    /// Content fingerprint: SHA-256 over the sorted, length-prefixed pairs.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.name_value_pairs.len() as u64).to_be_bytes());
        for (name, value) in &self.name_value_pairs {
            hasher.update((name.len() as u64).to_be_bytes());
            hasher.update(name.as_bytes());
            hasher.update((value.len() as u64).to_be_bytes());
            hasher.update(value.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Env {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self::from_pairs(iter)
    }
}

/// Keeps the first environment seen per fingerprint, preserving first-seen order.
pub fn uniq_envs<'a, I>(envs: I) -> Vec<&'a Env>
where
    I: IntoIterator<Item = &'a Env>,
{
    let mut seen = HashSet::new();
    envs.into_iter().filter(|env| seen.insert(env.fingerprint())).collect()
}

/// Owned variant of [`uniq_envs`] for callers that are done with the input list.
pub fn dedup_envs(envs: Vec<Env>) -> Vec<Env> {
    let mut seen = HashSet::new();
    envs.into_iter().filter(|env| seen.insert(env.fingerprint())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Env {
        Env::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn clone_equals_original_and_equality_is_symmetric() {
        let original = env(&[("user", "ada"), ("id", "7")]);
        let cloned = original.clone();
        assert_eq!(cloned, original);
        assert_eq!(original, cloned);

        let reordered = env(&[("id", "7"), ("user", "ada")]);
        assert_eq!(original, reordered);
        assert_eq!(reordered, original);
        assert_ne!(original, env(&[("user", "ada")]));
        assert_ne!(original, env(&[("user", "ada"), ("id", "8")]));
    }

    #[test]
    fn empty_environments_are_equal() {
        assert_eq!(Env::empty(), Env::default());
        assert!(Env::empty().clone().is_empty());
    }

    #[test]
    fn fork_collapses_identical_deltas() {
        let base = env(&[("host", "a")]);
        let delta = env(&[("name", "x"), ("id", "1")]);
        let same = env(&[("id", "1"), ("name", "x")]);

        let forks = base.fork(&[delta, same]);
        assert_eq!(forks.len(), 1);
        assert_eq!(forks[0], env(&[("host", "a"), ("name", "x"), ("id", "1")]));
    }

    #[test]
    fn fork_without_deltas_yields_nothing() {
        assert!(env(&[("a", "1")]).fork(&[]).is_empty());
    }

    #[test]
    fn fork_does_not_touch_the_receiver() {
        let base = env(&[("a", "1")]);
        let forks = base.fork(&[env(&[("a", "2")]), env(&[("b", "3")])]);
        assert_eq!(base, env(&[("a", "1")]));
        assert_eq!(forks, vec![env(&[("a", "2")]), env(&[("a", "1"), ("b", "3")])]);
    }

    #[test]
    fn update_lets_later_arguments_win() {
        let mut target = env(&[("a", "0")]);
        target.update([&env(&[("a", "1"), ("b", "1")]), &env(&[("a", "2")])]);
        assert_eq!(target, env(&[("a", "2"), ("b", "1")]));
    }

    #[test]
    fn uniq_keeps_first_seen_order() {
        let first = env(&[("k", "1")]);
        let second = env(&[("k", "2")]);
        let all = [first.clone(), second.clone(), first.clone()];
        let unique = uniq_envs(&all);
        assert_eq!(unique, vec![&first, &second]);
    }

    #[test]
    fn fingerprint_distinguishes_ambiguous_concatenations() {
        assert_ne!(env(&[("ab", "c")]).fingerprint(), env(&[("a", "bc")]).fingerprint());
        assert_eq!(env(&[("a", "1"), ("b", "2")]).fingerprint(), env(&[("b", "2"), ("a", "1")]).fingerprint());
    }

    #[test]
    fn serializes_under_vars() {
        let json = serde_json::to_value(env(&[("a", "1")])).expect("serialize");
        assert_eq!(json, serde_json::json!({"vars": {"a": "1"}}));
        let parsed: Env = serde_json::from_str("{}").expect("deserialize empty");
        assert!(parsed.is_empty());
    }
}
