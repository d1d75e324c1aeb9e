//! The interval abstract domain.
//!
//! Values are pairs of extended integers with a dedicated empty-set
//! sentinel.  The domain object carries the clamp range and the
//! widening thresholds harvested from the program, so the lattice
//! operations themselves stay pure.

use std::collections::BTreeSet as Set;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::syntax::Stmt;

use super::domain::AbstractDomain;

// SECTION: extended integers

/// An integer extended with the two infinities.  Variant order gives
/// the derived `Ord` the right meaning.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Ext {
    NegInf,
    Int(i64),
    PosInf,
}

use Ext::*;

impl Ext {
    // Bound arithmetic runs in i128 and snaps to the infinities on the
    // way out, so extreme bounds never wrap.
    fn of(v: i128) -> Ext {
        if v > i64::MAX as i128 {
            PosInf
        } else if v < i64::MIN as i128 {
            NegInf
        } else {
            Int(v as i64)
        }
    }

    pub fn is_finite(self) -> bool {
        matches!(self, Int(_))
    }

    fn sign(self) -> i64 {
        match self {
            NegInf => -1,
            Int(v) => v.signum(),
            PosInf => 1,
        }
    }

    fn negated(self) -> Ext {
        match self {
            NegInf => PosInf,
            Int(v) => Ext::of(-(v as i128)),
            PosInf => NegInf,
        }
    }

    fn abs(self) -> Ext {
        match self {
            Int(v) => Ext::of((v as i128).abs()),
            NegInf | PosInf => PosInf,
        }
    }

    fn plus(self, rhs: Ext) -> Ext {
        match (self, rhs) {
            (Int(a), Int(b)) => Ext::of(a as i128 + b as i128),
            (NegInf, PosInf) | (PosInf, NegInf) => {
                unreachable!("adding opposite infinities: malformed bound")
            }
            (NegInf, _) | (_, NegInf) => NegInf,
            (PosInf, _) | (_, PosInf) => PosInf,
        }
    }

    fn times(self, rhs: Ext) -> Ext {
        match (self, rhs) {
            (Int(0), _) | (_, Int(0)) => Int(0),
            (Int(a), Int(b)) => Ext::of(a as i128 * b as i128),
            // at least one infinite factor, neither zero
            _ => {
                if self.sign() * rhs.sign() > 0 {
                    PosInf
                } else {
                    NegInf
                }
            }
        }
    }

    // Truncating division for interval corners; the divisor is never
    // zero because interval division splits zero out of the divisor
    // first.
    fn over(self, rhs: Ext) -> Ext {
        match (self, rhs) {
            (Int(a), Int(b)) => Ext::of(a as i128 / b as i128),
            (Int(_), _) => Int(0),
            // infinite dividend
            _ => {
                if self.sign() * rhs.sign() > 0 {
                    PosInf
                } else {
                    NegInf
                }
            }
        }
    }
}

impl fmt::Display for Ext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NegInf => write!(f, "NegInf"),
            Int(v) => write!(f, "{v}"),
            PosInf => write!(f, "PosInf"),
        }
    }
}

// SECTION: the interval value

/// One abstract value: either the empty set or a closed range of
/// extended integers with `lower <= upper`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Interval {
    Bot,
    Range(Ext, Ext),
}

impl Interval {
    pub fn contains(&self, v: i64) -> bool {
        match self {
            Interval::Bot => false,
            Interval::Range(lo, hi) => *lo <= Int(v) && Int(v) <= *hi,
        }
    }

    pub fn contains_zero(&self) -> bool {
        self.contains(0)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Interval::Bot => write!(f, "Bot"),
            Interval::Range(lo, hi) => {
                match lo {
                    Int(v) => write!(f, "[{v}, ")?,
                    _ => write!(f, "({lo}, ")?,
                }
                match hi {
                    Int(v) => write!(f, "{v}]"),
                    _ => write!(f, "{hi})"),
                }
            }
        }
    }
}

// SECTION: the domain

/// The interval domain: clamp range plus widening thresholds.
///
/// Finite clamp bounds act as overflow sentinels: a computed bound that
/// falls strictly below `m` (above `n`) snaps to the matching infinity,
/// so clamping only ever loses precision, never soundness.  Thresholds
/// are seeded with the finite clamp bounds and every numeral in the
/// program, computed once per analysis run and read-only afterwards.
#[derive(Clone, Debug)]
pub struct IntervalDomain {
    clamp_lo: Ext,
    clamp_hi: Ext,
    thresholds: Set<i64>,
}

impl Default for IntervalDomain {
    fn default() -> Self {
        IntervalDomain::new(NegInf, PosInf)
    }
}

impl IntervalDomain {
    pub fn new(clamp_lo: Ext, clamp_hi: Ext) -> Self {
        assert!(clamp_lo <= clamp_hi, "malformed clamp range");
        let mut thresholds = Set::new();
        if let Int(m) = clamp_lo {
            thresholds.insert(m);
        }
        if let Int(n) = clamp_hi {
            thresholds.insert(n);
        }
        IntervalDomain {
            clamp_lo,
            clamp_hi,
            thresholds,
        }
    }

    /// Domain for one analysis run: thresholds harvested from the
    /// program's numerals.
    pub fn for_program(program: &Stmt, clamp_lo: Ext, clamp_hi: Ext) -> Self {
        let mut dom = IntervalDomain::new(clamp_lo, clamp_hi);
        dom.thresholds.extend(program.numerals());
        dom
    }

    pub fn thresholds(&self) -> &Set<i64> {
        &self.thresholds
    }

    /// Construct an interval, snapping bounds outside the clamp range
    /// to the matching infinity.  `lo > hi` is an internal bug in a
    /// transfer function, never a user-input problem.
    pub fn make(&self, lo: Ext, hi: Ext) -> Interval {
        assert!(lo <= hi, "malformed interval ({lo}, {hi})");
        // A bound that overflowed past the i64 range on its own side
        // (a lower bound of +inf, an upper bound of -inf) relaxes to
        // the nearest representable integer, so no range ever holds
        // two like infinities and bound sums stay well defined.
        let lo = if lo == PosInf { Int(i64::MAX) } else { lo };
        let hi = if hi == NegInf { Int(i64::MIN) } else { hi };
        let lo = if lo < self.clamp_lo { NegInf } else { lo };
        let hi = if hi > self.clamp_hi { PosInf } else { hi };
        Interval::Range(lo, hi)
    }

    // Widening jump targets: the nearest threshold at or beyond the
    // unstable bound, or the infinity if none remains.
    fn jump_down(&self, bound: Ext) -> Ext {
        match bound {
            Int(v) => match self.thresholds.range(..=v).next_back() {
                Some(t) => Int(*t),
                None => NegInf,
            },
            inf => inf,
        }
    }

    fn jump_up(&self, bound: Ext) -> Ext {
        match bound {
            Int(v) => match self.thresholds.range(v..).next() {
                Some(t) => Int(*t),
                None => PosInf,
            },
            inf => inf,
        }
    }

    fn corners(&self, xs: [Ext; 4]) -> Interval {
        let lo = xs.iter().copied().min().unwrap_or(NegInf);
        let hi = xs.iter().copied().max().unwrap_or(PosInf);
        self.make(lo, hi)
    }
}

impl AbstractDomain for IntervalDomain {
    type Value = Interval;

    fn top(&self) -> Interval {
        Interval::Range(NegInf, PosInf)
    }

    fn bottom(&self) -> Interval {
        Interval::Bot
    }

    fn alpha(&self, n: i64) -> Interval {
        self.make(Int(n), Int(n))
    }

    fn is_bottom(&self, v: &Interval) -> bool {
        matches!(v, Interval::Bot)
    }

    fn is_top(&self, v: &Interval) -> bool {
        *v == self.top()
    }

    fn leq(&self, x: &Interval, y: &Interval) -> bool {
        match (x, y) {
            (Interval::Bot, _) => true,
            (_, Interval::Bot) => false,
            (Interval::Range(l1, h1), Interval::Range(l2, h2)) => l2 <= l1 && h1 <= h2,
        }
    }

    fn lub(&self, x: &Interval, y: &Interval) -> Interval {
        match (x, y) {
            (Interval::Bot, _) => *y,
            (_, Interval::Bot) => *x,
            (Interval::Range(l1, h1), Interval::Range(l2, h2)) => {
                Interval::Range(*l1.min(l2), *h1.max(h2))
            }
        }
    }

    fn glb(&self, x: &Interval, y: &Interval) -> Interval {
        match (x, y) {
            (Interval::Bot, _) | (_, Interval::Bot) => Interval::Bot,
            (Interval::Range(l1, h1), Interval::Range(l2, h2)) => {
                let lo = *l1.max(l2);
                let hi = *h1.min(h2);
                if lo <= hi {
                    Interval::Range(lo, hi)
                } else {
                    Interval::Bot
                }
            }
        }
    }

    fn widening(&self, prev: &Interval, next: &Interval) -> Interval {
        match (prev, next) {
            (Interval::Bot, _) => *next,
            (_, Interval::Bot) => *prev,
            (Interval::Range(pl, ph), Interval::Range(nl, nh)) => {
                // A bound that is still stable keeps its old value; an
                // unstable one jumps to the nearest threshold beyond
                // it, so each bound takes at most |thresholds|+1
                // distinct values along an ascending chain.
                let lo = if nl >= pl { *pl } else { self.jump_down(*nl) };
                let hi = if nh <= ph { *ph } else { self.jump_up(*nh) };
                // A threshold harvested from a numeral outside the
                // clamp range must still snap to the infinity.
                self.make(lo, hi)
            }
        }
    }

    fn narrowing(&self, prev: &Interval, next: &Interval) -> Interval {
        match (prev, next) {
            (Interval::Bot, _) | (_, Interval::Bot) => Interval::Bot,
            (Interval::Range(pl, ph), Interval::Range(nl, nh)) => {
                // Only bounds that widening pushed to an extreme may
                // tighten; anything else keeps the proven invariant.
                let lo = if *pl == NegInf { *nl } else { *pl };
                let hi = if *ph == PosInf { *nh } else { *ph };
                if lo <= hi {
                    Interval::Range(lo, hi)
                } else {
                    Interval::Bot
                }
            }
        }
    }

    fn neg(&self, x: &Interval) -> Interval {
        match x {
            Interval::Bot => Interval::Bot,
            Interval::Range(lo, hi) => self.make(hi.negated(), lo.negated()),
        }
    }

    fn add(&self, x: &Interval, y: &Interval) -> Interval {
        match (x, y) {
            (Interval::Bot, _) | (_, Interval::Bot) => Interval::Bot,
            (Interval::Range(l1, h1), Interval::Range(l2, h2)) => {
                self.make(l1.plus(*l2), h1.plus(*h2))
            }
        }
    }

    fn sub(&self, x: &Interval, y: &Interval) -> Interval {
        // Going through `neg` keeps the negated operand normalized, so
        // the bound sums below never pair opposite infinities even when
        // a bound of `y` sits at i64::MIN.
        self.add(x, &self.neg(y))
    }

    fn mul(&self, x: &Interval, y: &Interval) -> Interval {
        match (x, y) {
            (Interval::Bot, _) | (_, Interval::Bot) => Interval::Bot,
            (Interval::Range(l1, h1), Interval::Range(l2, h2)) => self.corners([
                l1.times(*l2),
                l1.times(*h2),
                h1.times(*l2),
                h1.times(*h2),
            ]),
        }
    }

    fn div(&self, x: &Interval, y: &Interval) -> Interval {
        match (x, y) {
            (Interval::Bot, _) | (_, Interval::Bot) => Interval::Bot,
            (Interval::Range(l1, h1), Interval::Range(l2, h2)) => {
                if *l2 >= Int(1) || *h2 <= Int(-1) {
                    // Divisor bounded away from zero: four-corner rule.
                    self.corners([
                        l1.over(*l2),
                        l1.over(*h2),
                        h1.over(*l2),
                        h1.over(*h2),
                    ])
                } else {
                    // Split the divisor into its strictly positive and
                    // strictly negative parts and join the results;
                    // zero drops out without a special case, and a
                    // divisor of exactly [0, 0] yields bottom.
                    let pos = self.glb(y, &self.make(Int(1), PosInf));
                    let neg = self.glb(y, &self.make(NegInf, Int(-1)));
                    let q_pos = self.div(x, &pos);
                    let q_neg = self.div(x, &neg);
                    self.lub(&q_pos, &q_neg)
                }
            }
        }
    }

    fn rem(&self, x: &Interval, y: &Interval) -> Interval {
        match (x, y) {
            (Interval::Bot, _) | (_, Interval::Bot) => Interval::Bot,
            (Interval::Range(l1, h1), Interval::Range(l2, h2)) => {
                if (*l2, *h2) == (Int(0), Int(0)) {
                    return Interval::Bot;
                }
                // |a % b| < |b| and a % b keeps a's sign (truncating
                // remainder), so the result is boxed by both operands.
                let slack = l2.abs().max(h2.abs()).plus(Int(-1));
                let lo = if *l1 >= Int(0) {
                    Int(0)
                } else {
                    (*l1).max(slack.negated())
                };
                let hi = if *h1 <= Int(0) {
                    Int(0)
                } else {
                    (*h1).min(slack)
                };
                self.make(lo, hi)
            }
        }
    }

    fn le_zero(&self) -> Interval {
        self.make(NegInf, Int(0))
    }

    fn back_mul(&self, r: &Interval, x: &Interval, y: &Interval) -> (Interval, Interval) {
        // x * y = r.  A factor may be recovered as r / other-factor:
        // the quotient is exact for every concrete witness, so the
        // refinement is sound -- except when the other factor can be
        // zero while r contains zero, where any value of this factor
        // works and no refinement is possible.
        let rx = if y.contains_zero() && r.contains_zero() {
            *x
        } else {
            self.glb(x, &self.div(r, y))
        };
        let ry = if x.contains_zero() && r.contains_zero() {
            *y
        } else {
            self.glb(y, &self.div(r, x))
        };
        (rx, ry)
    }

    fn back_div(&self, r: &Interval, x: &Interval, y: &Interval) -> (Interval, Interval) {
        // x / y = r (truncating), so x lies in r*y widened by the
        // remainder slack |y| - 1.  The divisor is left unrefined:
        // inverting truncating division on that side is not worth the
        // precision.
        match y {
            Interval::Bot => (Interval::Bot, Interval::Bot),
            Interval::Range(l2, h2) => {
                // the zero singleton has slack |y| - 1 = -1; floor it
                // so the slack interval stays well formed (the hull is
                // Bot anyway, division by zero has no witnesses)
                let slack = l2.abs().max(h2.abs()).plus(Int(-1)).max(Int(0));
                let slack_iv = self.make(slack.negated(), slack);
                let hull = self.add(&self.mul(r, y), &slack_iv);
                (self.glb(x, &hull), *y)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dom() -> IntervalDomain {
        IntervalDomain::default()
    }

    fn iv(lo: i64, hi: i64) -> Interval {
        Interval::Range(Int(lo), Int(hi))
    }

    fn samples() -> Vec<Interval> {
        vec![
            Interval::Bot,
            iv(0, 0),
            iv(-3, 5),
            iv(2, 9),
            iv(-7, -1),
            Interval::Range(NegInf, Int(4)),
            Interval::Range(Int(-2), PosInf),
            Interval::Range(NegInf, PosInf),
        ]
    }

    #[test]
    fn lub_is_commutative_and_associative() {
        let d = dom();
        for x in samples() {
            for y in samples() {
                assert_eq!(d.lub(&x, &y), d.lub(&y, &x));
                for z in samples() {
                    assert_eq!(
                        d.lub(&d.lub(&x, &y), &z),
                        d.lub(&x, &d.lub(&y, &z))
                    );
                }
            }
        }
    }

    #[test]
    fn lub_is_an_upper_bound() {
        let d = dom();
        for x in samples() {
            for y in samples() {
                let j = d.lub(&x, &y);
                assert!(d.leq(&x, &j));
                assert!(d.leq(&y, &j));
            }
        }
    }

    #[test]
    fn bottom_below_everything_below_top() {
        let d = dom();
        for x in samples() {
            assert!(d.leq(&d.bottom(), &x));
            assert!(d.leq(&x, &d.top()));
        }
    }

    #[test]
    fn glb_is_a_lower_bound() {
        let d = dom();
        for x in samples() {
            for y in samples() {
                let m = d.glb(&x, &y);
                assert!(d.leq(&m, &x));
                assert!(d.leq(&m, &y));
            }
        }
    }

    #[test]
    fn widening_never_loses_relative_to_lub() {
        let mut d = dom();
        d.thresholds.extend([0, 10]);
        for prev in samples() {
            for next in samples() {
                let j = d.lub(&prev, &next);
                let w = d.widening(&prev, &next);
                assert!(d.leq(&j, &w), "lub {j} not below widening {w}");
            }
        }
    }

    #[test]
    fn widening_jumps_to_the_nearest_threshold() {
        let mut d = dom();
        d.thresholds.extend([3, 10]);
        assert_eq!(d.widening(&iv(0, 0), &iv(0, 5)), iv(0, 10));
        assert_eq!(d.widening(&iv(0, 0), &iv(0, 2)), iv(0, 3));
        assert_eq!(
            d.widening(&iv(0, 0), &iv(0, 11)),
            Interval::Range(Int(0), PosInf)
        );
        // no threshold below -4, so the lower bound jumps all the way
        assert_eq!(
            d.widening(&iv(0, 0), &iv(-4, 0)),
            Interval::Range(NegInf, Int(0))
        );
    }

    #[test]
    fn narrowing_only_tightens_extreme_bounds() {
        let d = dom();
        // the upper bound was widened away, so it may come back
        assert_eq!(
            d.narrowing(&Interval::Range(Int(0), PosInf), &iv(0, 10)),
            iv(0, 10)
        );
        // a finite bound stays where the ascending phase proved it
        assert_eq!(d.narrowing(&iv(0, 20), &iv(0, 10)), iv(0, 20));
    }

    #[test]
    fn narrowing_is_safe_for_descending_steps() {
        let d = dom();
        for prev in samples() {
            for next in samples() {
                if d.leq(&next, &prev) {
                    assert!(d.leq(&d.narrowing(&prev, &next), &prev));
                }
            }
        }
    }

    #[test]
    fn arithmetic_is_sound_on_small_ranges() {
        let d = dom();
        let ranges = [(-3i64, 2i64), (0, 0), (1, 4), (-5, -2), (-1, 1)];
        for &(xl, xh) in &ranges {
            for &(yl, yh) in &ranges {
                let x = iv(xl, xh);
                let y = iv(yl, yh);
                let sum = d.add(&x, &y);
                let dif = d.sub(&x, &y);
                let prd = d.mul(&x, &y);
                let quo = d.div(&x, &y);
                let rem = d.rem(&x, &y);
                for a in xl..=xh {
                    for b in yl..=yh {
                        assert!(sum.contains(a + b));
                        assert!(dif.contains(a - b));
                        assert!(prd.contains(a * b), "{a}*{b} outside {prd}");
                        if b != 0 {
                            assert!(quo.contains(a / b), "{a}/{b} outside {quo}");
                            assert!(rem.contains(a % b), "{a}%{b} outside {rem}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn division_by_the_zero_singleton_is_bottom() {
        let d = dom();
        assert_eq!(d.div(&iv(1, 5), &iv(0, 0)), Interval::Bot);
    }

    #[test]
    fn division_with_unbounded_operands() {
        let d = dom();
        let top = d.top();
        // anything over a straddling divisor stays sound
        assert_eq!(d.div(&iv(2, 4), &iv(-1, 1)), iv(-4, 4));
        // finite over unbounded collapses toward zero
        assert_eq!(
            d.div(&iv(6, 6), &Interval::Range(Int(2), PosInf)),
            iv(0, 3)
        );
        assert_eq!(d.div(&top, &top), top);
    }

    #[test]
    fn backward_add_tightens_both_operands() {
        let d = dom();
        // x + y in [0, 0], x in [-10, 10], y in [3, 5]
        let (rx, ry) = d.back_add(&iv(0, 0), &iv(-10, 10), &iv(3, 5));
        assert_eq!(rx, iv(-5, -3));
        assert_eq!(ry, iv(3, 5));
    }

    #[test]
    fn backward_mul_skips_the_zero_ambiguity() {
        let d = dom();
        // x * y in [0, 0] with y possibly zero: x cannot be refined
        let (rx, _) = d.back_mul(&iv(0, 0), &iv(1, 9), &iv(-1, 1));
        assert_eq!(rx, iv(1, 9));
        // y bounded away from zero: exact inverse applies
        let (rx, _) = d.back_mul(&iv(6, 6), &iv(0, 10), &iv(2, 2));
        assert_eq!(rx, iv(3, 3));
    }

    #[test]
    fn backward_div_keeps_truncated_witnesses() {
        let d = dom();
        // 7 / 2 = 3: the dividend hull must keep 7
        let (rx, ry) = d.back_div(&iv(3, 3), &iv(0, 100), &iv(2, 2));
        assert!(rx.contains(6) && rx.contains(7));
        assert_eq!(ry, iv(2, 2));

        // a zero-singleton divisor forwards to Bot, and the backward
        // pass must survive its negative remainder slack
        let (rx, _) = d.back_div(&Interval::Bot, &iv(0, 100), &iv(0, 0));
        assert_eq!(rx, Interval::Bot);
    }

    #[test]
    fn clamp_bounds_snap_to_the_infinities() {
        let d = IntervalDomain::new(Int(-100), Int(100));
        assert_eq!(
            d.make(Int(-200), Int(5)),
            Interval::Range(NegInf, Int(5))
        );
        assert_eq!(
            d.make(Int(5), Int(200)),
            Interval::Range(Int(5), PosInf)
        );
        // the clamp bounds seed the thresholds
        assert!(d.thresholds().contains(&-100) && d.thresholds().contains(&100));
    }

    #[test]
    fn widening_snaps_out_of_clamp_thresholds() {
        let mut d = IntervalDomain::new(Int(-100), Int(100));
        d.thresholds.extend([-500, 500]);
        // the jump target 500 lies outside the clamp range, so the
        // widened bound goes to the infinity instead
        assert_eq!(
            d.widening(&iv(0, 0), &iv(0, 150)),
            Interval::Range(Int(0), PosInf)
        );
        assert_eq!(
            d.widening(&iv(0, 0), &iv(-150, 0)),
            Interval::Range(NegInf, Int(0))
        );
    }

    #[test]
    fn division_at_the_i64_extremes() {
        // i64::MIN / -1 overflows the machine quotient, so the bound
        // snaps upward instead of trapping
        let d = dom();
        assert_eq!(
            d.div(&d.alpha(i64::MIN), &d.alpha(-1)),
            Interval::Range(Int(i64::MAX), PosInf)
        );
    }

    #[test]
    fn arithmetic_past_the_i64_range_stays_total() {
        let d = dom();
        // both bounds of MAX + 1 overflow; the range relaxes to
        // [MAX, +inf) rather than degenerating to two upper infinities
        let big = d.add(&d.alpha(i64::MAX), &d.alpha(1));
        assert_eq!(big, Interval::Range(Int(i64::MAX), PosInf));
        assert_eq!(d.add(&d.top(), &big), d.top());

        // negating the minimum singleton overflows the same way
        assert_eq!(
            d.neg(&d.alpha(i64::MIN)),
            Interval::Range(Int(i64::MAX), PosInf)
        );
        assert_eq!(d.sub(&d.top(), &d.alpha(i64::MIN)), d.top());
    }

    #[test]
    fn rendering() {
        assert_eq!(iv(0, 5).to_string(), "[0, 5]");
        assert_eq!(Interval::Range(NegInf, Int(4)).to_string(), "(NegInf, 4]");
        assert_eq!(Interval::Range(Int(0), PosInf).to_string(), "[0, PosInf)");
        assert_eq!(Interval::Bot.to_string(), "Bot");
    }
}
