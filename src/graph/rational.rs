//! Reduced-fraction presentation-time representation.
//!
//! `RenderRequest.time` and the per-frame `time := f/fps` computation in the
//! render worker (§4.7) both land here rather than on a float, so repeated
//! `f/fps` additions stay exact instead of accumulating rounding error.

use std::cmp::Ordering;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    numerator: i64,
    denominator: i64,
}

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a.max(1)
}

impl Rational {
    /// Construct a reduced fraction. Panics if `denominator == 0` — time
    /// values are constructed internally from known-good fps/frame counts,
    /// never from untrusted input, so a panic here is a programmer error.
    pub fn new(numerator: i64, denominator: i64) -> Self {
        assert!(denominator != 0, "Rational denominator must not be zero");
        let sign = if denominator < 0 { -1 } else { 1 };
        let g = gcd(numerator, denominator);
        Self {
            numerator: sign * numerator / g,
            denominator: sign * denominator / g,
        }
    }

    pub fn numerator(self) -> i64 {
        self.numerator
    }

    pub fn denominator(self) -> i64 {
        self.denominator
    }

    pub fn to_f64(self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// `frame_index / fps`, the §4.7 per-frame time computation.
    pub fn frame_time(frame_index: u64, fps: u32) -> Self {
        Self::new(frame_index as i64, fps as i64)
    }
}

impl Add for Rational {
    type Output = Rational;
    fn add(self, rhs: Rational) -> Rational {
        Rational::new(
            self.numerator * rhs.denominator + rhs.numerator * self.denominator,
            self.denominator * rhs.denominator,
        )
    }
}

impl Sub for Rational {
    type Output = Rational;
    fn sub(self, rhs: Rational) -> Rational {
        Rational::new(
            self.numerator * rhs.denominator - rhs.numerator * self.denominator,
            self.denominator * rhs.denominator,
        )
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.numerator * other.denominator).cmp(&(other.numerator * self.denominator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduces_to_lowest_terms() {
        let r = Rational::new(10, 20);
        assert_eq!((r.numerator(), r.denominator()), (1, 2));
    }

    #[test]
    fn frame_time_matches_f_over_fps() {
        let r = Rational::frame_time(150, 30);
        assert_eq!(r.to_f64(), 5.0);
    }

    #[test]
    fn addition_stays_exact() {
        let step = Rational::new(1, 30);
        let mut t = Rational::new(0, 1);
        for _ in 0..30 {
            t = t + step;
        }
        assert_eq!(t, Rational::new(1, 1));
    }

    #[test]
    fn ordering_compares_cross_multiplied() {
        assert!(Rational::new(1, 3) < Rational::new(1, 2));
        assert!(Rational::new(2, 4) == Rational::new(1, 2));
    }

    #[test]
    #[should_panic]
    fn zero_denominator_panics() {
        Rational::new(1, 0);
    }
}
