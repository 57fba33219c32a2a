//! Three-way merge combinators.
//!
//! A merge function takes the common-ancestor value (when one is known) and
//! the two diverged sides, and either reconciles them or reports a
//! [`Conflict`]. [`Merge`] packages such a function as a value so merges for
//! compound types can be assembled from merges of their parts; the contents
//! capability hands the engine one of these and the node merge composes it
//! under [`sorted_map`]-like edge joins.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;

/// An irreconcilable three-way disagreement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict(String);

impl Conflict {
    pub fn new(msg: impl Into<String>) -> Self {
        Conflict(msg.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }

    /// Prefixes the message with the position where the conflict surfaced.
    pub fn at(self, position: impl fmt::Display) -> Self {
        Conflict(format!("{position}: {}", self.0))
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "merge conflict: {}", self.0)
    }
}

impl std::error::Error for Conflict {}

pub type MergeResult<T> = Result<T, Conflict>;

type MergeFn<T> = dyn Fn(Option<&T>, &T, &T) -> MergeResult<T> + Send + Sync;

/// A reusable three-way merge function over `T`.
pub struct Merge<T> {
    run: Arc<MergeFn<T>>,
}

impl<T> Clone for Merge<T> {
    fn clone(&self) -> Self {
        Merge {
            run: self.run.clone(),
        }
    }
}

impl<T> fmt::Debug for Merge<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Merge<{}>", std::any::type_name::<T>())
    }
}

impl<T: 'static> Merge<T> {
    pub fn with(f: impl Fn(Option<&T>, &T, &T) -> MergeResult<T> + Send + Sync + 'static) -> Self {
        Merge { run: Arc::new(f) }
    }

    pub fn run(&self, old: Option<&T>, a: &T, b: &T) -> MergeResult<T> {
        (self.run)(old, a, b)
    }

    /// Tries `alternatives` in order; the first non-conflicting result wins.
    pub fn seq(alternatives: impl IntoIterator<Item = Merge<T>>) -> Self {
        let alternatives: Vec<Merge<T>> = alternatives.into_iter().collect();
        Merge::with(move |old, a, b| {
            let mut last = Err(Conflict::new("no merge alternatives"));
            for m in &alternatives {
                last = m.run(old, a, b);
                if last.is_ok() {
                    return last;
                }
            }
            last
        })
    }

    /// Defers construction of the merge until it runs; ties recursive knots
    /// such as the node merge delegating to itself for child edges.
    pub fn lazy(f: impl Fn() -> Merge<T> + Send + Sync + 'static) -> Self {
        Merge::with(move |old, a, b| f().run(old, a, b))
    }
}

impl<T: Clone + PartialEq + Debug + 'static> Merge<T> {
    /// The basic merge: keep agreement, take the side that moved, conflict
    /// when both moved apart.
    pub fn default_eq() -> Self {
        Merge::with(|old, a: &T, b| {
            if a == b {
                return Ok(a.clone());
            }
            match old {
                Some(old) if old == a => Ok(b.clone()),
                Some(old) if old == b => Ok(a.clone()),
                _ => Err(Conflict::new(format!("{a:?} and {b:?} moved apart"))),
            }
        })
    }
}

/// Merge over strings, by equality.
pub fn string() -> Merge<String> {
    Merge::default_eq()
}

/// Merge over counters: both deltas against the ancestor apply.
pub fn counter() -> Merge<i64> {
    Merge::with(|old, a, b| {
        let old = old.copied().unwrap_or(0);
        Ok(old + (a - old) + (b - old))
    })
}

/// Lifts a merge over `T` to `Option<T>`.
///
/// Presence on both sides delegates; absence on both sides stays absent; a
/// one-sided change against the ancestor wins; a one-sided change against a
/// changed other side conflicts.
pub fn option<T: Clone + PartialEq + 'static>(m: Merge<T>) -> Merge<Option<T>> {
    Merge::with(move |old, a: &Option<T>, b| {
        let old_flat: Option<&T> = old.and_then(|o| o.as_ref());
        match (a, b) {
            (Some(va), Some(vb)) => m.run(old_flat, va, vb).map(Some),
            (None, None) => Ok(None),
            _ => {
                if a.as_ref() == old_flat {
                    Ok(b.clone())
                } else if b.as_ref() == old_flat {
                    Ok(a.clone())
                } else {
                    Err(Conflict::new("present on one side, removed on the other"))
                }
            }
        }
    })
}

/// Componentwise merge over pairs.
pub fn pair<A, B>(ma: Merge<A>, mb: Merge<B>) -> Merge<(A, B)>
where
    A: Clone + 'static,
    B: Clone + 'static,
{
    Merge::with(move |old, a: &(A, B), b| {
        let left = ma.run(old.map(|o| &o.0), &a.0, &b.0)?;
        let right = mb.run(old.map(|o| &o.1), &a.1, &b.1)?;
        Ok((left, right))
    })
}

/// Merge over sorted keyed collections: entries are aligned by key and each
/// triple is merged with [`option`]; keys whose merged value is absent drop
/// out of the result.
pub fn sorted_map<K, V>(mv: Merge<V>) -> Merge<BTreeMap<K, V>>
where
    K: Ord + Clone + Debug + Send + Sync + 'static,
    V: Clone + PartialEq + 'static,
{
    let mv = option(mv);
    Merge::with(move |old, a: &BTreeMap<K, V>, b| {
        let mut keys: BTreeSet<&K> = a.keys().collect();
        keys.extend(b.keys());
        if let Some(old) = old {
            keys.extend(old.keys());
        }

        let mut merged = BTreeMap::new();
        for k in keys {
            let old_v = old.map(|o| o.get(k).cloned());
            let a_v = a.get(k).cloned();
            let b_v = b.get(k).cloned();
            match mv.run(old_v.as_ref(), &a_v, &b_v) {
                Ok(Some(v)) => {
                    merged.insert((*k).clone(), v);
                }
                Ok(None) => {}
                Err(c) => return Err(c.at(format_args!("{k:?}"))),
            }
        }
        Ok(merged)
    })
}

/// Merge over association lists; alignment and semantics as
/// [`sorted_map`], result emitted in key order.
pub fn assoc_list<K, V>(mv: Merge<V>) -> Merge<Vec<(K, V)>>
where
    K: Ord + Clone + Debug + Send + Sync + 'static,
    V: Clone + PartialEq + 'static,
{
    let mm = sorted_map(mv);
    Merge::with(move |old, a, b| {
        let to_map = |entries: &Vec<(K, V)>| -> BTreeMap<K, V> {
            entries.iter().cloned().collect()
        };
        let old = old.map(to_map);
        let merged = mm.run(old.as_ref(), &to_map(a), &to_map(b))?;
        Ok(merged.into_iter().collect())
    })
}

/// Ports a merge over `B` through an invertible mapping from `A`.
///
/// A partial inverse is treated as a conflict, never a panic.
pub fn bijection<A, B>(
    m: Merge<B>,
    forth: impl Fn(&A) -> Option<B> + Send + Sync + 'static,
    back: impl Fn(&B) -> Option<A> + Send + Sync + 'static,
) -> Merge<A>
where
    A: 'static,
    B: 'static,
{
    Merge::with(move |old, a, b| {
        let convert = |v: &A| forth(v).ok_or_else(|| Conflict::new("value outside the bijection"));
        let old = old.map(convert).transpose()?;
        let a = convert(a)?;
        let b = convert(b)?;
        let merged = m.run(old.as_ref(), &a, &b)?;
        back(&merged).ok_or_else(|| Conflict::new("merged value outside the bijection"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_takes_moved_side() {
        let m = string();
        let old = "base".to_string();
        let same = m.run(Some(&old), &old, &"new".to_string()).unwrap();
        assert_eq!(same, "new");
        let same = m.run(Some(&old), &"new".to_string(), &old).unwrap();
        assert_eq!(same, "new");
    }

    #[test]
    fn default_conflicts_on_divergence() {
        let m = string();
        let old = "base".to_string();
        m.run(Some(&old), &"x".to_string(), &"y".to_string())
            .expect_err("diverged strings must conflict");
    }

    #[test]
    fn counter_adds_both_deltas() {
        let m = counter();
        assert_eq!(m.run(Some(&10), &13, &15).unwrap(), 18);
        assert_eq!(m.run(None, &3, &4).unwrap(), 7);
    }

    #[test]
    fn option_takes_one_sided_removal() {
        let m = option(string());
        let old = Some("v".to_string());
        assert_eq!(m.run(Some(&old), &None, &old.clone()).unwrap(), None);
        assert_eq!(m.run(Some(&old), &old.clone(), &None).unwrap(), None);
    }

    #[test]
    fn option_conflicts_on_remove_vs_edit() {
        let m = option(string());
        let old = Some("v".to_string());
        m.run(Some(&old), &None, &Some("w".to_string()))
            .expect_err("removal against an edit must conflict");
    }

    #[test]
    fn pair_merges_componentwise() {
        let m = pair(string(), counter());
        let old = ("s".to_string(), 1);
        let a = ("s".to_string(), 4);
        let b = ("t".to_string(), 1);
        assert_eq!(m.run(Some(&old), &a, &b).unwrap(), ("t".to_string(), 4));
    }

    #[test]
    fn sorted_map_unions_and_drops() {
        let m = sorted_map::<String, String>(string());
        let old = BTreeMap::from([("k".to_string(), "v".to_string())]);
        let a = BTreeMap::from([
            ("k".to_string(), "v".to_string()),
            ("x".to_string(), "1".to_string()),
        ]);
        let b = BTreeMap::from([("y".to_string(), "2".to_string())]);
        let merged = m.run(Some(&old), &a, &b).unwrap();
        assert_eq!(
            merged,
            BTreeMap::from([
                ("x".to_string(), "1".to_string()),
                ("y".to_string(), "2".to_string()),
            ])
        );
    }

    #[test]
    fn assoc_list_aligns_by_key() {
        let m = assoc_list::<String, String>(string());
        let old = vec![("k".to_string(), "v".to_string())];
        let a = vec![
            ("k".to_string(), "v".to_string()),
            ("x".to_string(), "1".to_string()),
        ];
        let b = vec![("k".to_string(), "w".to_string())];
        let merged = m.run(Some(&old), &a, &b).unwrap();
        assert_eq!(
            merged,
            vec![
                ("k".to_string(), "w".to_string()),
                ("x".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn seq_takes_first_success() {
        let always_conflict: Merge<i64> = Merge::with(|_, _, _| Err(Conflict::new("no")));
        let m = Merge::seq([always_conflict, counter()]);
        assert_eq!(m.run(Some(&1), &2, &3).unwrap(), 4);
    }

    #[test]
    fn bijection_ports_counter() {
        let m = bijection(
            counter(),
            |s: &String| s.parse::<i64>().ok(),
            |n: &i64| Some(n.to_string()),
        );
        let merged = m
            .run(Some(&"10".to_string()), &"13".to_string(), &"15".to_string())
            .unwrap();
        assert_eq!(merged, "18");
        m.run(Some(&"x".to_string()), &"13".to_string(), &"15".to_string())
            .expect_err("partial inverse must conflict");
    }

    #[test]
    fn lazy_defers_construction() {
        let m: Merge<i64> = Merge::lazy(counter);
        assert_eq!(m.run(Some(&0), &1, &2).unwrap(), 3);
    }

    proptest! {
        #[test]
        fn default_reflexive(old in any::<String>(), a in any::<String>()) {
            let m = string();
            prop_assert_eq!(m.run(Some(&old), &a, &a).unwrap(), a);
        }

        #[test]
        fn default_identity(old in any::<String>(), b in any::<String>()) {
            let m = string();
            prop_assert_eq!(m.run(Some(&old), &old, &b).unwrap(), b.clone());
            prop_assert_eq!(m.run(Some(&old), &b, &old).unwrap(), b);
        }

        #[test]
        fn default_commutative(old in any::<String>(), a in any::<String>(), b in any::<String>()) {
            let m = string();
            let ab = m.run(Some(&old), &a, &b);
            let ba = m.run(Some(&old), &b, &a);
            prop_assert_eq!(ab.is_ok(), ba.is_ok());
            if let (Ok(x), Ok(y)) = (ab, ba) {
                prop_assert_eq!(x, y);
            }
        }

        #[test]
        fn counter_commutative(old in -1000i64..1000, a in -1000i64..1000, b in -1000i64..1000) {
            let m = counter();
            prop_assert_eq!(
                m.run(Some(&old), &a, &b).unwrap(),
                m.run(Some(&old), &b, &a).unwrap()
            );
        }

        #[test]
        fn counter_identity(old in -1000i64..1000, b in -1000i64..1000) {
            let m = counter();
            prop_assert_eq!(m.run(Some(&old), &old, &b).unwrap(), b);
        }
    }
}
