//! The concrete denotational evaluator.
//!
//! Statements are evaluated by structural recursion; loops are not host
//! loops over the AST but repeated application of their one-step
//! unrolling (`while b do s` steps through `if b then s else skip`),
//! stopping at the first state equal to the previous one.  That is the
//! Kleene-Knaster-Tarski construction made finite: state equality is
//! the witness that the least fixpoint has been reached.

use log::trace;

use crate::commons::EvalError;
use crate::syntax::{AExp, ArithOp, BExp, BoolOp, RelOp, Stmt};

use super::state::ConcreteState;

/// Terminal outcomes of the loop state machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoopStatus {
    /// Every loop reached a concrete fixpoint.
    Converged,
    /// Some loop burned through its iteration budget.  The returned
    /// state is best effort and possibly not a fixpoint; callers that
    /// see this must treat the result as an approximation of a
    /// (possibly non-terminating) run.
    LimitExceeded,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Run {
    pub state: ConcreteState,
    pub status: LoopStatus,
}

/// Evaluator for the concrete semantics.  The iteration limit is the
/// only resource bound: there is no silent cap, so an effectively
/// infinite limit runs unboundedly on diverging programs.
#[derive(Clone, Debug)]
pub struct Interpreter {
    limit: u64,
    limit_hit: bool,
}

impl Interpreter {
    pub fn new(limit: u64) -> Self {
        Interpreter {
            limit,
            limit_hit: false,
        }
    }

    /// Run a statement to completion from the given initial state.
    pub fn run(&mut self, stmt: &Stmt, state: ConcreteState) -> Result<Run, EvalError> {
        self.limit_hit = false;
        let state = self.stmt(stmt, state)?;
        let status = if self.limit_hit {
            LoopStatus::LimitExceeded
        } else {
            LoopStatus::Converged
        };
        Ok(Run { state, status })
    }

    /// `A(e, s)`: evaluate an arithmetic expression.  Increment and
    /// decrement update the state, so the (possibly new) state is
    /// returned alongside the value and must be threaded forward.
    pub fn aexp(
        &mut self,
        e: &AExp,
        s: ConcreteState,
    ) -> Result<(ConcreteState, i64), EvalError> {
        match e {
            AExp::Num(n) => Ok((s, *n)),
            AExp::Var(x) => {
                let v = s.get(x)?;
                Ok((s, v))
            }
            AExp::Neg(inner) => {
                let (s, v) = self.aexp(inner, s)?;
                Ok((s, -v))
            }
            AExp::Bin(op, l, r) => {
                let (s, vl) = self.aexp(l, s)?;
                let (s, vr) = self.aexp(r, s)?;
                let v = match op {
                    ArithOp::Add => vl + vr,
                    ArithOp::Sub => vl - vr,
                    ArithOp::Mul => vl * vr,
                    ArithOp::Div => {
                        if vr == 0 {
                            return Err(EvalError::DivisionByZero);
                        }
                        vl / vr
                    }
                    ArithOp::Rem => {
                        if vr == 0 {
                            return Err(EvalError::DivisionByZero);
                        }
                        vl % vr
                    }
                };
                Ok((s, v))
            }
            AExp::Inc(x) => {
                let v = s.get(x)? + 1;
                let mut s = s;
                s.update(x, v)?;
                Ok((s, v))
            }
            AExp::Dec(x) => {
                let v = s.get(x)? - 1;
                let mut s = s;
                s.update(x, v)?;
                Ok((s, v))
            }
        }
    }

    /// `B(e, s)`: evaluate a boolean expression.  Both operands of a
    /// connective are evaluated (denotational, not short-circuit), the
    /// left operand's result state feeding the right operand.
    pub fn bexp(
        &mut self,
        e: &BExp,
        s: ConcreteState,
    ) -> Result<(ConcreteState, bool), EvalError> {
        match e {
            BExp::Lit(b) => Ok((s, *b)),
            BExp::Rel(op, l, r) => {
                let (s, vl) = self.aexp(l, s)?;
                let (s, vr) = self.aexp(r, s)?;
                let b = match op {
                    RelOp::Eq => vl == vr,
                    RelOp::Ne => vl != vr,
                    RelOp::Lt => vl < vr,
                    RelOp::Le => vl <= vr,
                    RelOp::Gt => vl > vr,
                    RelOp::Ge => vl >= vr,
                };
                Ok((s, b))
            }
            BExp::Not(inner) => {
                let (s, b) = self.bexp(inner, s)?;
                Ok((s, !b))
            }
            BExp::Logic(op, l, r) => {
                let (s, bl) = self.bexp(l, s)?;
                let (s, br) = self.bexp(r, s)?;
                let b = match op {
                    BoolOp::And => bl && br,
                    BoolOp::Or => bl || br,
                };
                Ok((s, b))
            }
        }
    }

    /// `Sds(stmt, s)`: evaluate a statement.
    pub fn stmt(&mut self, stmt: &Stmt, s: ConcreteState) -> Result<ConcreteState, EvalError> {
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
                let (s, b) = self.bexp(g, s)?;
                if b {
                    self.stmt(t, s)
                } else {
                    self.stmt(e, s)
                }
            }
            Stmt::While { guard, body, .. } => {
                let step = Stmt::If(guard.clone(), body.clone(), Box::new(Stmt::Skip));
                self.kleene(&step, s)
            }
            Stmt::RepeatUntil { guard, body, .. } => {
                // The body runs once, then the dual unrolling iterates:
                // once the guard holds, `if guard then skip` is the
                // identity and the chain is stationary.
                let s = self.stmt(body, s)?;
                let step = Stmt::If(guard.clone(), Box::new(Stmt::Skip), body.clone());
                self.kleene(&step, s)
            }
            Stmt::For {
                init,
                guard,
                step,
                body,
                ..
            } => {
                let s = self.stmt(init, s)?;
                let unrolled = Stmt::If(
                    guard.clone(),
                    Box::new(Stmt::Seq(body.clone(), step.clone())),
                    Box::new(Stmt::Skip),
                );
                self.kleene(&unrolled, s)
            }
        }
    }

    // Repeated application of a one-step unrolling until the state
    // stops changing or the iteration budget runs out.
    fn kleene(&mut self, step: &Stmt, mut cur: ConcreteState) -> Result<ConcreteState, EvalError> {
        for i in 0..self.limit {
            let next = self.stmt(step, cur.clone())?;
            if next == cur {
                trace!("concrete loop converged after {} unrollings", i + 1);
                return Ok(next);
            }
            cur = next;
        }
        trace!("concrete loop hit its {}-iteration limit", self.limit);
        self.limit_hit = true;
        Ok(cur)
    }
}
