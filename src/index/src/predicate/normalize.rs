// Copyright 2025 Strata Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Boolean normalisation: negation push-down, constant folding and
//! disjunctive normal form with a bounded expansion.

use tracing::warn;

use super::Predicate;

/// Push negations to the leaves and fold constants; flattens nested
/// conjunctions and disjunctions along the way.
pub fn normalize(predicate: Predicate) -> Predicate {
    fold(predicate.push_down_not())
}

fn fold(predicate: Predicate) -> Predicate {
    match predicate {
        Predicate::And(preds) => {
            let mut out = Vec::with_capacity(preds.len());
            for p in preds {
                match fold(p) {
                    Predicate::Include => {}
                    Predicate::Exclude => return Predicate::Exclude,
                    Predicate::And(inner) => out.extend(inner),
                    p => out.push(p),
                }
            }
            Predicate::and(out)
        }
        Predicate::Or(preds) => {
            let mut out = Vec::with_capacity(preds.len());
            for p in preds {
                match fold(p) {
                    Predicate::Exclude => {}
                    Predicate::Include => return Predicate::Include,
                    Predicate::Or(inner) => out.extend(inner),
                    p => out.push(p),
                }
            }
            Predicate::or(out)
        }
        Predicate::Not(inner) => Predicate::Not(Box::new(fold(*inner))),
        leaf => leaf,
    }
}

/// A predicate in disjunctive normal form: each disjunct is a conjunct list.
#[derive(Debug, Clone)]
pub struct Dnf {
    pub disjuncts: Vec<Vec<Predicate>>,
    /// Set when expansion exceeded the term budget; the single disjunct then
    /// holds the original predicate and must be planned as a residual-only
    /// full scan.
    pub fallback: bool,
}

impl Dnf {
    pub fn is_constant_false(&self) -> bool {
        self.disjuncts.is_empty()
    }

    pub fn is_constant_true(&self) -> bool {
        self.disjuncts.len() == 1
            && self.disjuncts[0].len() == 1
            && self.disjuncts[0][0] == Predicate::Include
    }
}

/// Convert a normalised predicate into DNF, capping the expansion at
/// `max_terms` disjuncts.
pub fn to_dnf(predicate: &Predicate, max_terms: usize) -> Dnf {
    let normalized = normalize(predicate.clone());
    if normalized == Predicate::Exclude {
        return Dnf {
            disjuncts: Vec::new(),
            fallback: false,
        };
    }
    match distribute(&normalized, max_terms.max(1)) {
        Some(disjuncts) => Dnf {
            disjuncts,
            fallback: false,
        },
        None => {
            warn!(
                max_terms,
                "predicate exceeded the DNF term budget; planning a residual-only scan"
            );
            Dnf {
                disjuncts: vec![vec![normalized]],
                fallback: true,
            }
        }
    }
}

/// `None` when the expansion would exceed `max_terms`.
fn distribute(predicate: &Predicate, max_terms: usize) -> Option<Vec<Vec<Predicate>>> {
    match predicate {
        Predicate::Or(preds) => {
            let mut disjuncts = Vec::new();
            for p in preds {
                disjuncts.extend(distribute(p, max_terms)?);
                if disjuncts.len() > max_terms {
                    return None;
                }
            }
            Some(disjuncts)
        }
        Predicate::And(preds) => {
            // cross product of the children's disjuncts
            let mut acc: Vec<Vec<Predicate>> = vec![Vec::new()];
            for p in preds {
                let child = distribute(p, max_terms)?;
                let mut next = Vec::with_capacity(acc.len() * child.len());
                for base in &acc {
                    for alt in &child {
                        let mut conjunct = base.clone();
                        conjunct.extend(alt.iter().cloned());
                        next.push(conjunct);
                        if next.len() > max_terms {
                            return None;
                        }
                    }
                }
                acc = next;
            }
            Some(acc)
        }
        leaf => Some(vec![vec![leaf.clone()]]),
    }
}

#[cfg(test)]
mod tests {
    use strata_common::types::ScalarImpl;

    use super::*;

    fn eq(attr: &str, v: &str) -> Predicate {
        Predicate::eq(attr, ScalarImpl::Varchar(v.into()))
    }

    #[test]
    fn test_constant_folding() {
        let p = Predicate::and(vec![Predicate::Include, eq("a", "x")]);
        assert_eq!(normalize(p), eq("a", "x"));

        let p = Predicate::and(vec![Predicate::Exclude, eq("a", "x")]);
        assert_eq!(normalize(p), Predicate::Exclude);

        let p = Predicate::or(vec![Predicate::Include, eq("a", "x")]);
        assert_eq!(normalize(p), Predicate::Include);
    }

    #[test]
    fn test_dnf_distribution() {
        // (a OR b) AND c  =>  (a AND c) OR (b AND c)
        let p = Predicate::and(vec![
            Predicate::or(vec![eq("a", "1"), eq("b", "2")]),
            eq("c", "3"),
        ]);
        let dnf = to_dnf(&p, 64);
        assert!(!dnf.fallback);
        assert_eq!(dnf.disjuncts.len(), 2);
        assert_eq!(dnf.disjuncts[0], vec![eq("a", "1"), eq("c", "3")]);
        assert_eq!(dnf.disjuncts[1], vec![eq("b", "2"), eq("c", "3")]);
    }

    #[test]
    fn test_dnf_cap_falls_back() {
        // 2^6 disjuncts exceeds a cap of 16
        let clauses: Vec<Predicate> = (0..6)
            .map(|i| Predicate::or(vec![eq("a", &format!("{i}")), eq("b", &format!("{i}"))]))
            .collect();
        let dnf = to_dnf(&Predicate::and(clauses), 16);
        assert!(dnf.fallback);
        assert_eq!(dnf.disjuncts.len(), 1);
    }

    #[test]
    fn test_exclude_is_empty() {
        let dnf = to_dnf(&Predicate::Exclude, 64);
        assert!(dnf.is_constant_false());
    }
}
