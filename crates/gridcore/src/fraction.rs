//! Exact rational coordinates in the parametric `[0, 1]` domain.
//!
//! Cell extents are kept as integer numerator/denominator pairs so that
//! recursive subdivision never accumulates floating error. Conversion to
//! `f64` happens only when a cell is mapped into a real bounding box.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A non-negative rational `numerator / denominator`.
///
/// Constructors never reduce; use [`simplify_fraction`] or
/// [`Fraction::simplified`]. Equality and ordering compare values, so
/// `1/2 == 2/4`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Fraction {
    pub numerator: u64,
    pub denominator: u64,
}

impl Fraction {
    pub const ZERO: Fraction = Fraction { numerator: 0, denominator: 1 };
    pub const ONE: Fraction = Fraction { numerator: 1, denominator: 1 };

    /// Returns `None` for a zero denominator.
    #[inline]
    pub fn new(numerator: u64, denominator: u64) -> Option<Self> {
        (denominator != 0).then_some(Self { numerator, denominator })
    }

    #[inline]
    pub fn to_f64(self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Lowest-terms form. A zero denominator is left as is.
    #[inline]
    pub fn simplified(self) -> Self {
        let g = gcd(self.numerator, self.denominator);
        if g == 0 {
            return self;
        }
        Self {
            numerator: self.numerator / g,
            denominator: self.denominator / g,
        }
    }

    /// True if the fraction is already in lowest terms.
    #[inline]
    pub fn is_reduced(self) -> bool {
        gcd(self.numerator, self.denominator) == 1
    }

    /// True if the value lies within `[0, 1]`.
    #[inline]
    pub fn in_unit_interval(self) -> bool {
        self.numerator <= self.denominator
    }

    #[inline]
    fn cross(self, other: Self) -> (u128, u128) {
        (
            self.numerator as u128 * other.denominator as u128,
            other.numerator as u128 * self.denominator as u128,
        )
    }
}

impl PartialEq for Fraction {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = self.cross(*other);
        a == b
    }
}

impl Eq for Fraction {}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = self.cross(*other);
        a.cmp(&b)
    }
}

impl Hash for Fraction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let r = self.simplified();
        r.numerator.hash(state);
        r.denominator.hash(state);
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Greatest common divisor (Euclid).
#[inline]
pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Reduces `n / m` by their GCD; `None` if `m` is zero.
#[inline]
pub fn simplify_fraction(n: u64, m: u64) -> Option<Fraction> {
    Fraction::new(n, m).map(Fraction::simplified)
}

/// Linear interpolation `(1 - t) * a + t * b`.
#[inline]
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    (1.0 - t) * a + t * b
}

/// Row-major `[min, max]` extents of cell `global_id` in a `width x height`
/// grid, returned as `(x_min, x_max, y_min, y_max)`. `None` for an empty grid.
#[inline]
pub fn cell_extent(global_id: u64, width: u64, height: u64) -> Option<(Fraction, Fraction, Fraction, Fraction)> {
    if width == 0 || height == 0 {
        return None;
    }
    let u = global_id % width;
    let v = global_id / width;
    Some((
        simplify_fraction(u, width)?,
        simplify_fraction(u + 1, width)?,
        simplify_fraction(v, height)?,
        simplify_fraction(v + 1, height)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn simplify_reduces_by_gcd() {
        let f = simplify_fraction(6, 8).unwrap();
        assert_eq!((f.numerator, f.denominator), (3, 4));
        let z = simplify_fraction(0, 7).unwrap();
        assert_eq!((z.numerator, z.denominator), (0, 1));
        assert!(f.is_reduced());
    }

    #[test]
    fn zero_denominator_does_not_panic() {
        assert_eq!(simplify_fraction(3, 0), None);
        assert_eq!(simplify_fraction(0, 0), None);
        let raw = Fraction {
            numerator: 0,
            denominator: 0,
        };
        let again = raw.simplified();
        assert_eq!((again.numerator, again.denominator), (0, 0));
        assert!(cell_extent(3, 0, 2).is_none());
        assert!(cell_extent(3, 2, 0).is_none());
    }

    #[test]
    fn new_rejects_zero_denominator() {
        assert!(Fraction::new(1, 0).is_none());
        let raw = Fraction::new(2, 4).unwrap();
        // Not reduced until asked.
        assert_eq!((raw.numerator, raw.denominator), (2, 4));
        assert_eq!(raw, Fraction::new(1, 2).unwrap());
    }

    #[test]
    fn ordering_is_by_value() {
        let third = simplify_fraction(1, 3).unwrap();
        let half = simplify_fraction(2, 4).unwrap();
        assert!(third < half);
        assert!(Fraction::ZERO < third && half < Fraction::ONE);
    }

    #[test]
    fn hash_agrees_with_eq() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(Fraction::new(2, 4).unwrap());
        assert!(set.contains(&Fraction::new(1, 2).unwrap()));
    }

    #[test]
    fn extent_of_row_major_cell() {
        let (x0, x1, y0, y1) = cell_extent(5, 4, 2).unwrap();
        assert_eq!((x0, x1), (Fraction::new(1, 4).unwrap(), Fraction::new(1, 2).unwrap()));
        assert_eq!((y0, y1), (Fraction::new(1, 2).unwrap(), Fraction::ONE));
    }

    proptest! {
        // Repeated subdivision by random rules: the fractional extent agrees with
        // naive float division, and re-simplifying is a fixed point.
        #[test]
        fn subdivision_is_exact(rules in proptest::collection::vec((1u64..6, 1u64..6), 1..8), pick in any::<u64>()) {
            let (mut width, mut height) = (1u64, 1u64);
            for (w, h) in rules {
                width *= w;
                height *= h;
            }
            let id = pick % (width * height);
            let (x0, x1, y0, y1) = cell_extent(id, width, height).unwrap();
            let u = (id % width) as f64;
            let v = (id / width) as f64;

            prop_assert!((x0.to_f64() - u / width as f64).abs() < 1e-12);
            prop_assert!((x1.to_f64() - (u + 1.0) / width as f64).abs() < 1e-12);
            prop_assert!((y0.to_f64() - v / height as f64).abs() < 1e-12);
            prop_assert!((y1.to_f64() - (v + 1.0) / height as f64).abs() < 1e-12);

            for f in [x0, x1, y0, y1] {
                let again = f.simplified();
                prop_assert_eq!((again.numerator, again.denominator), (f.numerator, f.denominator));
                prop_assert!(f.in_unit_interval());
            }
            prop_assert!(x0 < x1 && y0 < y1);
        }
    }
}
