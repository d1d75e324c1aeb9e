//! The abstract value contract and the pointwise abstract state.
//!
//! Any numerical domain plugs into the abstract evaluator through
//! [`AbstractDomain`].  The domain object itself carries whatever
//! per-analysis context the operations need (clamp range, widening
//! thresholds); values stay plain data.

use std::collections::BTreeMap as Map;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::commons::EvalError;

/// The lattice interface a numerical domain must satisfy.  All
/// operations are pure.
pub trait AbstractDomain {
    type Value: Clone + fmt::Debug + Eq + fmt::Display;

    fn top(&self) -> Self::Value;
    fn bottom(&self) -> Self::Value;

    /// Abstraction of a single integer literal.
    fn alpha(&self, n: i64) -> Self::Value;

    fn is_bottom(&self, v: &Self::Value) -> bool;
    fn is_top(&self, v: &Self::Value) -> bool;

    /// The partial order: bottom below everything, everything below top.
    fn leq(&self, x: &Self::Value, y: &Self::Value) -> bool;
    fn lub(&self, x: &Self::Value, y: &Self::Value) -> Self::Value;
    fn glb(&self, x: &Self::Value, y: &Self::Value) -> Self::Value;

    /// Accelerate an ascending chain: the result is an upper bound of
    /// `lub(prev, next)` and only finitely many distinct values can be
    /// produced per bound, which is what terminates loop analysis.
    fn widening(&self, prev: &Self::Value, next: &Self::Value) -> Self::Value;

    /// Recover precision after widening without breaking soundness.
    fn narrowing(&self, prev: &Self::Value, next: &Self::Value) -> Self::Value;

    // Forward transfer functions.
    fn neg(&self, x: &Self::Value) -> Self::Value;
    fn add(&self, x: &Self::Value, y: &Self::Value) -> Self::Value;
    fn sub(&self, x: &Self::Value, y: &Self::Value) -> Self::Value;
    fn mul(&self, x: &Self::Value, y: &Self::Value) -> Self::Value;
    fn div(&self, x: &Self::Value, y: &Self::Value) -> Self::Value;
    fn rem(&self, x: &Self::Value, y: &Self::Value) -> Self::Value;

    /// Abstraction of `{ v | v <= 0 }`, the target of canonical guard
    /// refinement.
    fn le_zero(&self) -> Self::Value;

    // Backward (refinement) transfer functions: given a result value
    // known to be achievable and the operand values, return tightened
    // operands that still cover every concrete pair producing a value
    // in the result.  The defaults for the exactly invertible
    // operators follow the inverse-operator pattern; multiplication,
    // division and remainder default to no refinement, which is always
    // sound, and domains override what they can do better.

    fn back_neg(&self, r: &Self::Value, x: &Self::Value) -> Self::Value {
        self.glb(x, &self.neg(r))
    }

    fn back_add(
        &self,
        r: &Self::Value,
        x: &Self::Value,
        y: &Self::Value,
    ) -> (Self::Value, Self::Value) {
        (
            self.glb(x, &self.sub(r, y)),
            self.glb(y, &self.sub(r, x)),
        )
    }

    fn back_sub(
        &self,
        r: &Self::Value,
        x: &Self::Value,
        y: &Self::Value,
    ) -> (Self::Value, Self::Value) {
        (
            self.glb(x, &self.add(r, y)),
            self.glb(y, &self.sub(x, r)),
        )
    }

    fn back_mul(
        &self,
        _r: &Self::Value,
        x: &Self::Value,
        y: &Self::Value,
    ) -> (Self::Value, Self::Value) {
        (x.clone(), y.clone())
    }

    fn back_div(
        &self,
        _r: &Self::Value,
        x: &Self::Value,
        y: &Self::Value,
    ) -> (Self::Value, Self::Value) {
        (x.clone(), y.clone())
    }

    fn back_rem(
        &self,
        _r: &Self::Value,
        x: &Self::Value,
        y: &Self::Value,
    ) -> (Self::Value, Self::Value) {
        (x.clone(), y.clone())
    }
}

/// The abstract state: a pointwise lift of the value lattice over the
/// declared variables.  Same copy-on-write and declaration discipline
/// as the concrete state.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AbstractState<V> {
    values: Map<String, V>,
}

impl<V: Clone + Eq> Default for AbstractState<V> {
    fn default() -> Self {
        AbstractState { values: Map::new() }
    }
}

impl<V: Clone + Eq> AbstractState<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The sanctioned create path, used only while building the entry
    /// state.
    pub fn declare(&mut self, name: &str, value: V) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Result<&V, EvalError> {
        self.values
            .get(name)
            .ok_or_else(|| EvalError::UnknownVariable(name.to_string()))
    }

    pub fn update(&mut self, name: &str, value: V) -> Result<(), EvalError> {
        match self.values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(EvalError::UndeclaredAssignment(name.to_string())),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The state denotes the empty set of concrete states as soon as
    /// any variable does.
    pub fn is_bottom<D: AbstractDomain<Value = V>>(&self, dom: &D) -> bool {
        self.values.iter().any(|(_, v)| dom.is_bottom(v))
    }

    pub fn is_top<D: AbstractDomain<Value = V>>(&self, dom: &D) -> bool {
        self.values.iter().all(|(_, v)| dom.is_top(v))
    }

    /// Every variable forced to bottom: the canonical empty state.
    pub fn bottomed<D: AbstractDomain<Value = V>>(&self, dom: &D) -> Self {
        AbstractState {
            values: self
                .values
                .keys()
                .map(|k| (k.clone(), dom.bottom()))
                .collect(),
        }
    }

    // A variable missing on the other side reads as bottom, mirroring
    // the pointwise-environment convention.
    fn other_or_bottom<D: AbstractDomain<Value = V>>(
        dom: &D,
        other: &Map<String, V>,
        key: &str,
    ) -> V {
        other.get(key).cloned().unwrap_or_else(|| dom.bottom())
    }

    fn pointwise<D, F>(&self, dom: &D, other: &Self, f: F) -> Self
    where
        D: AbstractDomain<Value = V>,
        F: Fn(&V, &V) -> V,
    {
        AbstractState {
            values: self
                .values
                .iter()
                .map(|(k, v)| (k.clone(), f(v, &Self::other_or_bottom(dom, &other.values, k))))
                .collect(),
        }
    }

    pub fn lub<D: AbstractDomain<Value = V>>(&self, dom: &D, other: &Self) -> Self {
        // An empty-set state contributes nothing to the join.
        if self.is_bottom(dom) {
            return other.clone();
        }
        if other.is_bottom(dom) {
            return self.clone();
        }
        self.pointwise(dom, other, |a, b| dom.lub(a, b))
    }

    pub fn glb<D: AbstractDomain<Value = V>>(&self, dom: &D, other: &Self) -> Self {
        self.pointwise(dom, other, |a, b| dom.glb(a, b))
    }

    pub fn widen<D: AbstractDomain<Value = V>>(&self, dom: &D, next: &Self) -> Self {
        self.pointwise(dom, next, |prev, next| dom.widening(prev, next))
    }

    pub fn narrow<D: AbstractDomain<Value = V>>(&self, dom: &D, next: &Self) -> Self {
        self.pointwise(dom, next, |prev, next| dom.narrowing(prev, next))
    }

    /// Pointwise order over the whole state.  A state with any empty
    /// variable denotes the empty set and sits below everything, no
    /// matter which variable is the empty one.
    pub fn le<D: AbstractDomain<Value = V>>(&self, dom: &D, other: &Self) -> bool {
        if self.is_bottom(dom) {
            return true;
        }
        self.values
            .iter()
            .all(|(k, v)| dom.leq(v, &Self::other_or_bottom(dom, &other.values, k)))
    }

    /// Abstract-state equality: pointwise `leq` both ways.
    pub fn equiv<D: AbstractDomain<Value = V>>(&self, dom: &D, other: &Self) -> bool {
        self.le(dom, other) && other.le(dom, self)
    }

    /// Render the state, collapsing to `⊥` when any variable is empty.
    pub fn render<D: AbstractDomain<Value = V>>(&self, dom: &D) -> String
    where
        V: fmt::Display,
    {
        if self.is_bottom(dom) {
            return "⊥".to_string();
        }
        if self.values.is_empty() {
            return "{ }".to_string();
        }
        let body = self
            .values
            .iter()
            .map(|(name, v)| format!("{name} : {v}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{ {body} }}")
    }
}

impl<V: Clone + Eq> FromIterator<(String, V)> for AbstractState<V> {
    fn from_iter<T: IntoIterator<Item = (String, V)>>(iter: T) -> Self {
        AbstractState {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantics::interval::{Ext, Interval, IntervalDomain};

    fn astate(pairs: &[(&str, Interval)]) -> AbstractState<Interval> {
        pairs.iter().map(|(n, v)| (n.to_string(), *v)).collect()
    }

    fn iv(lo: i64, hi: i64) -> Interval {
        Interval::Range(Ext::Int(lo), Ext::Int(hi))
    }

    #[test]
    fn empty_states_compare_equal_whichever_variable_is_empty() {
        let dom = IntervalDomain::default();
        let a = astate(&[("x", Interval::Bot), ("y", iv(0, 5))]);
        let b = astate(&[("x", iv(0, 5)), ("y", Interval::Bot)]);

        // both denote the empty set of concrete states
        assert!(a.le(&dom, &b));
        assert!(b.le(&dom, &a));
        assert!(a.equiv(&dom, &b));
        assert!(a.le(&dom, &astate(&[("x", iv(7, 9)), ("y", iv(7, 9))])));
    }
}
