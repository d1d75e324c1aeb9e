//! The While+ abstract syntax tree.
//!
//! The tree is produced by an external front end and handed to us fully
//! formed; this module only defines the shape, plus the few syntactic
//! helpers the evaluators need (loop labelling, numeral harvesting,
//! guard negation).  All node types derive serde so a program can also
//! arrive as data.

use std::collections::BTreeSet as Set;

use serde::{Deserialize, Serialize};

// SECTION: operators

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl RelOp {
    /// The comparison that holds exactly when `self` does not.
    pub fn negated(self) -> Self {
        match self {
            RelOp::Eq => RelOp::Ne,
            RelOp::Ne => RelOp::Eq,
            RelOp::Lt => RelOp::Ge,
            RelOp::Le => RelOp::Gt,
            RelOp::Gt => RelOp::Le,
            RelOp::Ge => RelOp::Lt,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum BoolOp {
    And,
    Or,
}

// SECTION: expressions

/// Arithmetic expressions.  `Inc`/`Dec` are the `++x`/`--x` sugar: they
/// are simultaneously an expression and an implicit assignment, so
/// evaluating them produces a new state as well as a value.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum AExp {
    Num(i64),
    Var(String),
    Neg(Box<AExp>),
    Bin(ArithOp, Box<AExp>, Box<AExp>),
    Inc(String),
    Dec(String),
}

/// Boolean expressions.  `&&`/`||` are evaluated denotationally (both
/// operands, no short circuit).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum BExp {
    Lit(bool),
    Rel(RelOp, Box<AExp>, Box<AExp>),
    Not(Box<BExp>),
    Logic(BoolOp, Box<BExp>, Box<BExp>),
}

impl BExp {
    /// Push a negation through the guard, so refinement never has to
    /// deal with a `Not` head.
    pub fn negated(&self) -> BExp {
        match self {
            BExp::Lit(b) => BExp::Lit(!b),
            BExp::Rel(op, l, r) => BExp::Rel(op.negated(), l.clone(), r.clone()),
            BExp::Not(inner) => (**inner).clone(),
            BExp::Logic(BoolOp::And, l, r) => {
                BExp::Logic(BoolOp::Or, Box::new(l.negated()), Box::new(r.negated()))
            }
            BExp::Logic(BoolOp::Or, l, r) => {
                BExp::Logic(BoolOp::And, Box::new(l.negated()), Box::new(r.negated()))
            }
        }
    }
}

// SECTION: statements

/// Identity of a loop statement, used as the key for loop-invariant
/// annotations so the evaluator never mutates the shared tree.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
pub struct LoopLabel(pub usize);

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Assign(String, AExp),
    Skip,
    Seq(Box<Stmt>, Box<Stmt>),
    If(BExp, Box<Stmt>, Box<Stmt>),
    While {
        #[serde(default)]
        label: LoopLabel,
        guard: BExp,
        body: Box<Stmt>,
    },
    /// `repeat body until guard`: the body runs at least once and the
    /// loop exits when the guard becomes true.
    RepeatUntil {
        #[serde(default)]
        label: LoopLabel,
        body: Box<Stmt>,
        guard: BExp,
    },
    For {
        #[serde(default)]
        label: LoopLabel,
        init: Box<Stmt>,
        guard: BExp,
        step: Box<Stmt>,
        body: Box<Stmt>,
    },
}

impl Stmt {
    /// Assign preorder indices to every loop in the tree and return how
    /// many there are.  External builders call this once after
    /// construction; deserialized programs get renumbered by the
    /// binaries so hand-written label fields cannot collide.
    pub fn label_loops(&mut self) -> usize {
        fn go(stmt: &mut Stmt, next: &mut usize) {
            match stmt {
                Stmt::Assign(..) | Stmt::Skip => {}
                Stmt::Seq(a, b) => {
                    go(a, next);
                    go(b, next);
                }
                Stmt::If(_, t, e) => {
                    go(t, next);
                    go(e, next);
                }
                Stmt::While { label, body, .. } => {
                    *label = LoopLabel(*next);
                    *next += 1;
                    go(body, next);
                }
                Stmt::RepeatUntil { label, body, .. } => {
                    *label = LoopLabel(*next);
                    *next += 1;
                    go(body, next);
                }
                Stmt::For {
                    label,
                    init,
                    step,
                    body,
                    ..
                } => {
                    *label = LoopLabel(*next);
                    *next += 1;
                    go(init, next);
                    go(step, next);
                    go(body, next);
                }
            }
        }

        let mut next = 0;
        go(self, &mut next);
        next
    }

    /// Every numeral literal in the program, in sorted order.  These
    /// seed the widening thresholds of the interval domain.
    pub fn numerals(&self) -> Set<i64> {
        let mut out = Set::new();
        collect_stmt(self, &mut out);
        out
    }
}

fn collect_aexp(e: &AExp, out: &mut Set<i64>) {
    match e {
        AExp::Num(n) => {
            out.insert(*n);
        }
        AExp::Var(_) | AExp::Inc(_) | AExp::Dec(_) => {}
        AExp::Neg(inner) => collect_aexp(inner, out),
        AExp::Bin(_, l, r) => {
            collect_aexp(l, out);
            collect_aexp(r, out);
        }
    }
}

fn collect_bexp(e: &BExp, out: &mut Set<i64>) {
    match e {
        BExp::Lit(_) => {}
        BExp::Rel(_, l, r) => {
            collect_aexp(l, out);
            collect_aexp(r, out);
        }
        BExp::Not(inner) => collect_bexp(inner, out),
        BExp::Logic(_, l, r) => {
            collect_bexp(l, out);
            collect_bexp(r, out);
        }
    }
}

fn collect_stmt(s: &Stmt, out: &mut Set<i64>) {
    match s {
        Stmt::Assign(_, e) => collect_aexp(e, out),
        Stmt::Skip => {}
        Stmt::Seq(a, b) => {
            collect_stmt(a, out);
            collect_stmt(b, out);
        }
        Stmt::If(g, t, e) => {
            collect_bexp(g, out);
            collect_stmt(t, out);
            collect_stmt(e, out);
        }
        Stmt::While { guard, body, .. } => {
            collect_bexp(guard, out);
            collect_stmt(body, out);
        }
        Stmt::RepeatUntil { guard, body, .. } => {
            collect_bexp(guard, out);
            collect_stmt(body, out);
        }
        Stmt::For {
            init,
            guard,
            step,
            body,
            ..
        } => {
            collect_stmt(init, out);
            collect_bexp(guard, out);
            collect_stmt(step, out);
            collect_stmt(body, out);
        }
    }
}

// SECTION: constructor helpers
//
// Thin builders so tests and external callers can write trees without
// drowning in Box::new.

pub fn num(n: i64) -> AExp {
    AExp::Num(n)
}

pub fn var(name: &str) -> AExp {
    AExp::Var(name.to_string())
}

pub fn neg(e: AExp) -> AExp {
    AExp::Neg(Box::new(e))
}

pub fn bin(op: ArithOp, l: AExp, r: AExp) -> AExp {
    AExp::Bin(op, Box::new(l), Box::new(r))
}

pub fn add(l: AExp, r: AExp) -> AExp {
    bin(ArithOp::Add, l, r)
}

pub fn sub(l: AExp, r: AExp) -> AExp {
    bin(ArithOp::Sub, l, r)
}

pub fn mul(l: AExp, r: AExp) -> AExp {
    bin(ArithOp::Mul, l, r)
}

pub fn div(l: AExp, r: AExp) -> AExp {
    bin(ArithOp::Div, l, r)
}

pub fn inc(name: &str) -> AExp {
    AExp::Inc(name.to_string())
}

pub fn dec(name: &str) -> AExp {
    AExp::Dec(name.to_string())
}

pub fn lit(b: bool) -> BExp {
    BExp::Lit(b)
}

pub fn rel(op: RelOp, l: AExp, r: AExp) -> BExp {
    BExp::Rel(op, Box::new(l), Box::new(r))
}

pub fn not(b: BExp) -> BExp {
    BExp::Not(Box::new(b))
}

pub fn and(l: BExp, r: BExp) -> BExp {
    BExp::Logic(BoolOp::And, Box::new(l), Box::new(r))
}

pub fn or(l: BExp, r: BExp) -> BExp {
    BExp::Logic(BoolOp::Or, Box::new(l), Box::new(r))
}

pub fn assign(name: &str, e: AExp) -> Stmt {
    Stmt::Assign(name.to_string(), e)
}

pub fn skip() -> Stmt {
    Stmt::Skip
}

pub fn seq(a: Stmt, b: Stmt) -> Stmt {
    Stmt::Seq(Box::new(a), Box::new(b))
}

/// Right-nested sequence of statements; empty input is `Skip`.
pub fn block(stmts: Vec<Stmt>) -> Stmt {
    let mut it = stmts.into_iter().rev();
    match it.next() {
        None => Stmt::Skip,
        Some(last) => it.fold(last, |acc, s| seq(s, acc)),
    }
}

pub fn if_else(guard: BExp, then_s: Stmt, else_s: Stmt) -> Stmt {
    Stmt::If(guard, Box::new(then_s), Box::new(else_s))
}

pub fn while_loop(guard: BExp, body: Stmt) -> Stmt {
    Stmt::While {
        label: LoopLabel::default(),
        guard,
        body: Box::new(body),
    }
}

pub fn repeat_until(body: Stmt, guard: BExp) -> Stmt {
    Stmt::RepeatUntil {
        label: LoopLabel::default(),
        body: Box::new(body),
        guard,
    }
}

pub fn for_loop(init: Stmt, guard: BExp, step: Stmt, body: Stmt) -> Stmt {
    Stmt::For {
        label: LoopLabel::default(),
        init: Box::new(init),
        guard,
        step: Box::new(step),
        body: Box::new(body),
    }
}
