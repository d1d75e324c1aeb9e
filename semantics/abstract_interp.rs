//! The abstract evaluator.
//!
//! Mirrors the concrete evaluator's structure, but over an abstract
//! state: expressions compose the domain's forward transfer functions,
//! guards are handled by backward constraint propagation through a
//! cached evaluation tree, and loops run an explicit two-phase
//! (ascending with widening, descending with narrowing) fixpoint
//! instead of recursive unrolling.

use std::collections::BTreeMap as Map;

use log::trace;

use crate::commons::EvalError;
use crate::syntax::{AExp, ArithOp, BExp, BoolOp, LoopLabel, RelOp, Stmt};

use super::domain::{AbstractDomain, AbstractState};
use super::interval::{Ext, Interval, IntervalDomain};

type St<D> = AbstractState<<D as AbstractDomain>::Value>;

/// Loop fixpoint switches.
///
/// Widening is what guarantees termination on domains with infinite
/// ascending chains; with it off, the ascending phase terminates only
/// when the program's own chains stabilize, and may run forever.
#[derive(Copy, Clone, Debug)]
pub struct AnalysisFlags {
    pub widening: bool,
    pub narrowing: bool,
}

impl Default for AnalysisFlags {
    fn default() -> Self {
        AnalysisFlags {
            widening: true,
            narrowing: true,
        }
    }
}

/// Pre-state, invariant, and post-state recorded for one loop.  Kept in
/// an out-parameter map keyed by loop label, so the shared AST is never
/// mutated.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoopAnnotation<V> {
    pub pre: AbstractState<V>,
    pub invariant: AbstractState<V>,
    pub post: AbstractState<V>,
}

/// Result of one abstract run.
#[derive(Clone, Debug)]
pub struct Analysis<V> {
    pub exit: AbstractState<V>,
    pub loops: Map<LoopLabel, LoopAnnotation<V>>,
}

/// Analyze a program over the interval domain.
///
/// The widening thresholds are harvested from the program's numerals
/// (seeded with the finite clamp bounds) once here, then treated as
/// read-only by the whole run.  The program's loops must be labelled
/// (`Stmt::label_loops`).
pub fn analyze(
    program: &Stmt,
    entry: &AbstractState<Interval>,
    clamp_lo: Ext,
    clamp_hi: Ext,
    flags: AnalysisFlags,
) -> Result<Analysis<Interval>, EvalError> {
    let dom = IntervalDomain::for_program(program, clamp_lo, clamp_hi);
    let mut interp = AbstractInterpreter::new(&dom, flags);
    let exit = interp.stmt(program, entry.clone())?;
    Ok(Analysis {
        exit,
        loops: interp.into_annotations(),
    })
}

/// The evaluator proper, generic over the value domain.
pub struct AbstractInterpreter<'d, D: AbstractDomain> {
    dom: &'d D,
    flags: AnalysisFlags,
    loops: Map<LoopLabel, LoopAnnotation<D::Value>>,
}

impl<'d, D: AbstractDomain> AbstractInterpreter<'d, D> {
    pub fn new(dom: &'d D, flags: AnalysisFlags) -> Self {
        AbstractInterpreter {
            dom,
            flags,
            loops: Map::new(),
        }
    }

    pub fn into_annotations(self) -> Map<LoopLabel, LoopAnnotation<D::Value>> {
        self.loops
    }

    /// `A#(e, s)`: forward evaluation of an arithmetic expression.
    /// Increment/decrement update the state exactly as in the concrete
    /// case, so the state is threaded alongside the value.
    pub fn aexp(&self, e: &AExp, s: St<D>) -> Result<(St<D>, D::Value), EvalError> {
        match e {
            AExp::Num(n) => Ok((s, self.dom.alpha(*n))),
            AExp::Var(x) => {
                let v = s.get(x)?.clone();
                Ok((s, v))
            }
            AExp::Neg(inner) => {
                let (s, v) = self.aexp(inner, s)?;
                Ok((s, self.dom.neg(&v)))
            }
            AExp::Bin(op, l, r) => {
                let (s, vl) = self.aexp(l, s)?;
                let (s, vr) = self.aexp(r, s)?;
                Ok((s, self.forward(*op, &vl, &vr)))
            }
            AExp::Inc(x) => {
                let v = self.dom.add(s.get(x)?, &self.dom.alpha(1));
                let mut s = s;
                s.update(x, v.clone())?;
                Ok((s, v))
            }
            AExp::Dec(x) => {
                let v = self.dom.sub(s.get(x)?, &self.dom.alpha(1));
                let mut s = s;
                s.update(x, v.clone())?;
                Ok((s, v))
            }
        }
    }

    fn forward(&self, op: ArithOp, l: &D::Value, r: &D::Value) -> D::Value {
        match op {
            ArithOp::Add => self.dom.add(l, r),
            ArithOp::Sub => self.dom.sub(l, r),
            ArithOp::Mul => self.dom.mul(l, r),
            ArithOp::Div => self.dom.div(l, r),
            ArithOp::Rem => self.dom.rem(l, r),
        }
    }

    /// Backward constraint propagation: the portion of `s` consistent
    /// with the guard being true.  Guards reduce to canonical
    /// `e <= 0` forms; conjunction and disjunction become glb and lub
    /// of the branch refinements.
    pub fn refine(&self, g: &BExp, s: St<D>) -> Result<St<D>, EvalError> {
        match g {
            BExp::Lit(true) => Ok(s),
            BExp::Lit(false) => Ok(s.bottomed(self.dom)),
            BExp::Not(inner) => self.refine(&inner.negated(), s),
            BExp::Logic(BoolOp::And, l, r) => {
                let sl = self.refine(l, s.clone())?;
                let sr = self.refine(r, s)?;
                Ok(sl.glb(self.dom, &sr))
            }
            BExp::Logic(BoolOp::Or, l, r) => {
                let sl = self.refine(l, s.clone())?;
                let sr = self.refine(r, s)?;
                Ok(sl.lub(self.dom, &sr))
            }
            BExp::Rel(op, l, r) => {
                let minus = |a: &AExp, b: &AExp| {
                    AExp::Bin(ArithOp::Sub, Box::new(a.clone()), Box::new(b.clone()))
                };
                let plus_one = |e: AExp| {
                    AExp::Bin(ArithOp::Add, Box::new(e), Box::new(AExp::Num(1)))
                };
                match op {
                    // l <= r  ~~>  l - r <= 0, and friends
                    RelOp::Le => self.le_zero_refine(&minus(l, r), s),
                    RelOp::Lt => self.le_zero_refine(&plus_one(minus(l, r)), s),
                    RelOp::Ge => self.le_zero_refine(&minus(r, l), s),
                    RelOp::Gt => self.le_zero_refine(&plus_one(minus(r, l)), s),
                    // equality is the conjunction of both directions
                    RelOp::Eq => {
                        let sl = self.le_zero_refine(&minus(l, r), s.clone())?;
                        let sr = self.le_zero_refine(&minus(r, l), s)?;
                        Ok(sl.glb(self.dom, &sr))
                    }
                    // disequality is the disjunction of the strict ones
                    RelOp::Ne => {
                        let lt = BExp::Rel(RelOp::Lt, l.clone(), r.clone());
                        let gt = BExp::Rel(RelOp::Gt, l.clone(), r.clone());
                        let sl = self.refine(&lt, s.clone())?;
                        let sr = self.refine(&gt, s)?;
                        Ok(sl.lub(self.dom, &sr))
                    }
                }
            }
        }
    }

    // Refine `s` under the constraint `e <= 0`: build the evaluation
    // tree bottom-up, intersect the root with (-inf, 0], and push the
    // tightened values back down to the variable leaves.
    fn le_zero_refine(&self, e: &AExp, s: St<D>) -> Result<St<D>, EvalError> {
        let (mut s, tree) = self.tree(e, s)?;
        self.propagate(&tree, &self.dom.le_zero(), &mut s)?;
        Ok(s)
    }

    fn tree(&self, e: &AExp, s: St<D>) -> Result<(St<D>, EvalTree<D::Value>), EvalError> {
        match e {
            AExp::Num(n) => Ok((s, EvalTree::leafless(self.dom.alpha(*n)))),
            AExp::Var(x) => {
                let v = s.get(x)?.clone();
                Ok((s, EvalTree::leaf(x.clone(), v)))
            }
            // the cached value is the post-update value, so refinement
            // lands on what the variable now holds
            AExp::Inc(x) | AExp::Dec(x) => {
                let (s, v) = self.aexp(e, s)?;
                Ok((s, EvalTree::leaf(x.clone(), v)))
            }
            AExp::Neg(inner) => {
                let (s, child) = self.tree(inner, s)?;
                let val = self.dom.neg(&child.val);
                Ok((
                    s,
                    EvalTree {
                        val,
                        node: EvalNode::Neg(Box::new(child)),
                    },
                ))
            }
            AExp::Bin(op, l, r) => {
                let (s, tl) = self.tree(l, s)?;
                let (s, tr) = self.tree(r, s)?;
                let val = self.forward(*op, &tl.val, &tr.val);
                Ok((
                    s,
                    EvalTree {
                        val,
                        node: EvalNode::Bin(*op, Box::new(tl), Box::new(tr)),
                    },
                ))
            }
        }
    }

    fn propagate(
        &self,
        t: &EvalTree<D::Value>,
        refined: &D::Value,
        s: &mut St<D>,
    ) -> Result<(), EvalError> {
        let refined = self.dom.glb(&t.val, refined);
        match &t.node {
            EvalNode::Const => Ok(()),
            EvalNode::Leaf(x) => {
                // a refinement that is not an improvement is discarded;
                // the state is never widened here
                let cur = s.get(x)?.clone();
                if self.dom.leq(&refined, &cur) {
                    s.update(x, refined)?;
                }
                Ok(())
            }
            EvalNode::Neg(child) => {
                let r = self.dom.back_neg(&refined, &child.val);
                self.propagate(child, &r, s)
            }
            EvalNode::Bin(op, l, r) => {
                let (rl, rr) = match op {
                    ArithOp::Add => self.dom.back_add(&refined, &l.val, &r.val),
                    ArithOp::Sub => self.dom.back_sub(&refined, &l.val, &r.val),
                    ArithOp::Mul => self.dom.back_mul(&refined, &l.val, &r.val),
                    ArithOp::Div => self.dom.back_div(&refined, &l.val, &r.val),
                    ArithOp::Rem => self.dom.back_rem(&refined, &l.val, &r.val),
                };
                self.propagate(l, &rl, s)?;
                self.propagate(r, &rr, s)
            }
        }
    }

    /// `D#(stmt, s)`: forward evaluation of a statement.
    pub fn stmt(&mut self, stmt: &Stmt, s: St<D>) -> Result<St<D>, EvalError> {
        match stmt {
            Stmt::Assign(x, e) => {
                let (mut s, v) = self.aexp(e, s)?;
                s.update(x, v)?;
                Ok(s)
            }
            Stmt::Skip => Ok(s),
            Stmt::Seq(a, b) => {
                let s = self.stmt(a, s)?;
                self.stmt(b, s)
            }
            Stmt::If(g, t, e) => {
                let st = self.stmt(t, self.refine(g, s.clone())?)?;
                let se = self.stmt(e, self.refine(&g.negated(), s)?)?;
                Ok(st.lub(self.dom, &se))
            }
            Stmt::While { label, guard, body } => self.loop_fix(*label, guard, body, s),
            Stmt::RepeatUntil { label, body, guard } => {
                // repeat s until b  ==  s; while (!b) s -- the exit
                // refinement of the rewritten while is then the guard
                // itself, as the loop exits when it becomes true.
                let s = self.stmt(body, s)?;
                self.loop_fix(*label, &guard.negated(), body, s)
            }
            Stmt::For {
                label,
                init,
                guard,
                step,
                body,
            } => {
                // for (i; b; u) s  ==  i; while (b) { s; u }
                let s = self.stmt(init, s)?;
                let unrolled = Stmt::Seq(body.clone(), step.clone());
                self.loop_fix(*label, guard, &unrolled, s)
            }
        }
    }

    // The two-phase loop fixpoint.  Phase one ascends from the entry
    // state, joining in the body's effect (through the guard) and
    // widening, until the iterate stabilizes; that iterate is the loop
    // invariant.  Phase two descends with narrowing to claw back some
    // of the precision widening gave away.  The loop's post-state is
    // the invariant filtered by the negated guard.
    fn loop_fix(
        &mut self,
        label: LoopLabel,
        guard: &BExp,
        body: &Stmt,
        entry: St<D>,
    ) -> Result<St<D>, EvalError> {
        let mut current = entry.clone();
        let mut rounds = 0usize;
        loop {
            rounds += 1;
            let body_in = self.refine(guard, current.clone())?;
            let body_out = self.stmt(body, body_in)?;
            let mut next = current.lub(self.dom, &body_out);
            if self.flags.widening {
                next = current.widen(self.dom, &next);
            }
            if next.equiv(self.dom, &current) {
                break;
            }
            current = next;
        }
        trace!("loop {label:?}: ascending phase stable after {rounds} rounds");

        if self.flags.narrowing {
            rounds = 0;
            loop {
                rounds += 1;
                let body_in = self.refine(guard, current.clone())?;
                let body_out = self.stmt(body, body_in)?;
                let next = current.narrow(self.dom, &entry.lub(self.dom, &body_out));
                if next.equiv(self.dom, &current) {
                    break;
                }
                current = next;
            }
            trace!("loop {label:?}: descending phase stable after {rounds} rounds");
        }

        let invariant = current.clone();
        let post = self.refine(&guard.negated(), current)?;
        self.loops.insert(
            label,
            LoopAnnotation {
                pre: entry,
                invariant,
                post: post.clone(),
            },
        );
        Ok(post)
    }
}

// The cached evaluation tree mirroring a guard's arithmetic
// sub-expression: each node remembers the abstract value computed
// bottom-up, which backward propagation intersects on the way down.
struct EvalTree<V> {
    val: V,
    node: EvalNode<V>,
}

enum EvalNode<V> {
    Const,
    Leaf(String),
    Neg(Box<EvalTree<V>>),
    Bin(ArithOp, Box<EvalTree<V>>, Box<EvalTree<V>>),
}

impl<V> EvalTree<V> {
    fn leafless(val: V) -> Self {
        EvalTree {
            val,
            node: EvalNode::Const,
        }
    }

    fn leaf(name: String, val: V) -> Self {
        EvalTree {
            val,
            node: EvalNode::Leaf(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::*;
    use pretty_assertions::assert_eq;
    use Ext::{Int, NegInf, PosInf};

    fn astate(pairs: &[(&str, Interval)]) -> AbstractState<Interval> {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), *v))
            .collect()
    }

    fn iv(lo: i64, hi: i64) -> Interval {
        Interval::Range(Int(lo), Int(hi))
    }

    fn run(
        program: &mut Stmt,
        entry: AbstractState<Interval>,
        flags: AnalysisFlags,
    ) -> Analysis<Interval> {
        program.label_loops();
        analyze(program, &entry, NegInf, PosInf, flags).unwrap()
    }

    #[test]
    fn guard_refinement_le() {
        let dom = IntervalDomain::default();
        let interp = AbstractInterpreter::new(&dom, AnalysisFlags::default());
        let s = astate(&[("x", iv(0, 10))]);

        let g = rel(RelOp::Le, var("x"), num(5));
        assert_eq!(
            interp.refine(&g, s.clone()).unwrap(),
            astate(&[("x", iv(0, 5))])
        );
        assert_eq!(
            interp.refine(&g.negated(), s).unwrap(),
            astate(&[("x", iv(6, 10))])
        );
    }

    #[test]
    fn guard_refinement_through_arithmetic() {
        let dom = IntervalDomain::default();
        let interp = AbstractInterpreter::new(&dom, AnalysisFlags::default());
        // x + 3 < 5  ==>  x <= 1
        let g = rel(RelOp::Lt, add(var("x"), num(3)), num(5));
        let s = astate(&[("x", iv(-10, 10))]);
        assert_eq!(
            interp.refine(&g, s).unwrap(),
            astate(&[("x", iv(-10, 1))])
        );
    }

    #[test]
    fn guard_refinement_equality_and_disequality() {
        let dom = IntervalDomain::default();
        let interp = AbstractInterpreter::new(&dom, AnalysisFlags::default());
        let s = astate(&[("x", iv(0, 10))]);

        let eq = rel(RelOp::Eq, var("x"), num(3));
        assert_eq!(interp.refine(&eq, s.clone()).unwrap(), astate(&[("x", iv(3, 3))]));

        // x != 0 trims exactly the boundary point
        let ne = rel(RelOp::Ne, var("x"), num(0));
        assert_eq!(interp.refine(&ne, s).unwrap(), astate(&[("x", iv(1, 10))]));
    }

    #[test]
    fn contradictory_guard_empties_the_state() {
        let dom = IntervalDomain::default();
        let interp = AbstractInterpreter::new(&dom, AnalysisFlags::default());
        let s = astate(&[("x", iv(0, 10))]);
        let g = rel(RelOp::Lt, var("x"), num(-5));
        let refined = interp.refine(&g, s).unwrap();
        assert!(refined.is_bottom(&dom));
    }

    #[test]
    fn compound_guards_join_and_meet() {
        let dom = IntervalDomain::default();
        let interp = AbstractInterpreter::new(&dom, AnalysisFlags::default());
        let s = astate(&[("x", iv(0, 10))]);

        let band = and(
            rel(RelOp::Ge, var("x"), num(2)),
            rel(RelOp::Le, var("x"), num(7)),
        );
        assert_eq!(
            interp.refine(&band, s.clone()).unwrap(),
            astate(&[("x", iv(2, 7))])
        );

        let bor = or(
            rel(RelOp::Le, var("x"), num(2)),
            rel(RelOp::Ge, var("x"), num(8)),
        );
        // interval join of the two halves keeps the hull
        assert_eq!(interp.refine(&bor, s).unwrap(), astate(&[("x", iv(0, 10))]));
    }

    #[test]
    fn branch_join_computes_absolute_value_range() {
        // if (x < 0) { x = -x } else { skip }
        let mut p = if_else(
            rel(RelOp::Lt, var("x"), num(0)),
            assign("x", neg(var("x"))),
            skip(),
        );
        let a = run(&mut p, astate(&[("x", iv(-5, 5))]), AnalysisFlags::default());
        assert_eq!(a.exit, astate(&[("x", iv(0, 5))]));
    }

    #[test]
    fn widening_stabilizes_a_diverging_counter() {
        // while (counter >= 0) { counter = counter + 1 }
        let mut p = while_loop(
            rel(RelOp::Ge, var("counter"), num(0)),
            assign("counter", add(var("counter"), num(1))),
        );
        let flags = AnalysisFlags {
            widening: true,
            narrowing: false,
        };
        let a = run(&mut p, astate(&[("counter", iv(0, 0))]), flags);

        let ann = &a.loops[&LoopLabel(0)];
        assert_eq!(
            ann.invariant,
            astate(&[("counter", Interval::Range(Int(0), PosInf))])
        );
        // the guard never turns false, so the exit state is empty
        assert!(a.exit.is_bottom(&IntervalDomain::default()));
    }

    #[test]
    fn bounded_loop_gets_an_exact_exit_state() {
        // while (x < 10) { x = x + 1 }
        let mut p = while_loop(
            rel(RelOp::Lt, var("x"), num(10)),
            assign("x", add(var("x"), num(1))),
        );
        let a = run(&mut p, astate(&[("x", iv(0, 0))]), AnalysisFlags::default());
        let ann = &a.loops[&LoopLabel(0)];
        assert_eq!(ann.invariant, astate(&[("x", iv(0, 10))]));
        assert_eq!(a.exit, astate(&[("x", iv(10, 10))]));
        assert_eq!(ann.pre, astate(&[("x", iv(0, 0))]));
    }

    #[test]
    fn for_loop_equals_its_while_desugaring() {
        let mk_for = || {
            for_loop(
                assign("i", num(0)),
                rel(RelOp::Lt, var("i"), num(5)),
                assign("i", add(var("i"), num(1))),
                assign("sum", add(var("sum"), var("i"))),
            )
        };
        let mk_while = || {
            seq(
                assign("i", num(0)),
                while_loop(
                    rel(RelOp::Lt, var("i"), num(5)),
                    seq(
                        assign("sum", add(var("sum"), var("i"))),
                        assign("i", add(var("i"), num(1))),
                    ),
                ),
            )
        };
        let entry = astate(&[("i", iv(0, 0)), ("sum", iv(0, 0))]);
        let dom = IntervalDomain::default();
        for flags in [
            AnalysisFlags::default(),
            AnalysisFlags {
                widening: true,
                narrowing: false,
            },
        ] {
            let mut f = mk_for();
            let mut w = mk_while();
            let af = run(&mut f, entry.clone(), flags);
            let aw = run(&mut w, entry.clone(), flags);
            assert!(af.exit.equiv(&dom, &aw.exit));
        }
    }

    #[test]
    fn repeat_until_refines_with_the_exit_guard() {
        // repeat x = x + 1 until x >= 4, from [0, 0]
        let mut p = repeat_until(
            assign("x", add(var("x"), num(1))),
            rel(RelOp::Ge, var("x"), num(4)),
        );
        let a = run(&mut p, astate(&[("x", iv(0, 0))]), AnalysisFlags::default());
        // the exit state satisfies the guard
        assert_eq!(a.exit, astate(&[("x", iv(4, 4))]));
    }

    #[test]
    fn increment_in_guard_updates_the_state() {
        let dom = IntervalDomain::default();
        let interp = AbstractInterpreter::new(&dom, AnalysisFlags::default());
        // (++x <= 5) refines the already-incremented x
        let g = rel(RelOp::Le, inc("x"), num(5));
        let s = astate(&[("x", iv(0, 10))]);
        assert_eq!(interp.refine(&g, s).unwrap(), astate(&[("x", iv(1, 5))]));
    }

    #[test]
    fn unknown_variable_is_fatal() {
        let mut p = assign("x", var("ghost"));
        p.label_loops();
        let entry = astate(&[("x", iv(0, 0))]);
        let err = analyze(&p, &entry, NegInf, PosInf, AnalysisFlags::default()).unwrap_err();
        assert_eq!(err, EvalError::UnknownVariable("ghost".to_string()));
    }
}
