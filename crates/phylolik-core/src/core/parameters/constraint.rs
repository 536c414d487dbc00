use std::fmt;

/// Margin kept between a value and a strict bound when it is pushed back
/// inside the feasible domain.
const STRICT_BOUND_MARGIN: f64 = 1e-12;

/// Domain restriction attached to a [`Parameter`](super::Parameter).
///
/// Constraints are closed under the three operations the optimizers need:
/// membership tests, projection of an infeasible value onto the closest
/// feasible one, and a smooth bijection with the whole real line used by the
/// reparametrization wrapper.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraint {
    /// Any finite value.
    Unbounded,
    /// Values above `bound`; the bound itself is allowed only if `strict` is false.
    Lower { bound: f64, strict: bool },
    /// Values between `lower` and `upper`, each end optionally excluded.
    Interval {
        lower: f64,
        upper: f64,
        lower_strict: bool,
        upper_strict: bool,
    },
}

impl Constraint {
    /// Strictly positive reals, `]0, +inf[`.
    pub const POSITIVE: Constraint = Constraint::Lower {
        bound: 0.0,
        strict: true,
    };

    /// Non-negative reals, `[0, +inf[`.
    pub const NON_NEGATIVE: Constraint = Constraint::Lower {
        bound: 0.0,
        strict: false,
    };

    /// Closed unit interval `[0, 1]`, used for proportions.
    pub const PROPORTION: Constraint = Constraint::Interval {
        lower: 0.0,
        upper: 1.0,
        lower_strict: false,
        upper_strict: false,
    };

    /// Open unit interval `]0, 1[`.
    pub const OPEN_PROPORTION: Constraint = Constraint::Interval {
        lower: 0.0,
        upper: 1.0,
        lower_strict: true,
        upper_strict: true,
    };

    /// Creates a closed interval constraint `[lower, upper]`.
    pub fn closed(lower: f64, upper: f64) -> Self {
        Constraint::Interval {
            lower,
            upper,
            lower_strict: false,
            upper_strict: false,
        }
    }

    /// Checks whether `value` lies in the domain.
    pub fn is_satisfied(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match *self {
            Constraint::Unbounded => true,
            Constraint::Lower { bound, strict } => {
                if strict {
                    value > bound
                } else {
                    value >= bound
                }
            }
            Constraint::Interval {
                lower,
                upper,
                lower_strict,
                upper_strict,
            } => {
                let above = if lower_strict {
                    value > lower
                } else {
                    value >= lower
                };
                let below = if upper_strict {
                    value < upper
                } else {
                    value <= upper
                };
                above && below
            }
        }
    }

    /// Projects `value` onto the closest feasible value.
    ///
    /// Strict bounds are approached up to a small margin. Non-finite values
    /// are returned unchanged so that callers still see the fault.
    pub fn closest_feasible(&self, value: f64) -> f64 {
        if value.is_nan() {
            return value;
        }
        match *self {
            Constraint::Unbounded => value,
            Constraint::Lower { bound, strict } => {
                let min = if strict {
                    bound + STRICT_BOUND_MARGIN
                } else {
                    bound
                };
                value.max(min)
            }
            Constraint::Interval {
                lower,
                upper,
                lower_strict,
                upper_strict,
            } => {
                let min = if lower_strict {
                    lower + STRICT_BOUND_MARGIN
                } else {
                    lower
                };
                let max = if upper_strict {
                    upper - STRICT_BOUND_MARGIN
                } else {
                    upper
                };
                value.clamp(min, max)
            }
        }
    }

    /// Maps a feasible value to the unconstrained real line.
    ///
    /// Lower-bounded domains use the inverse softplus of the distance to the
    /// bound; intervals use the logit of the relative position.
    pub fn to_unconstrained(&self, value: f64) -> f64 {
        match *self {
            Constraint::Unbounded => value,
            Constraint::Lower { bound, .. } => {
                let y = (value - bound).max(STRICT_BOUND_MARGIN);
                // ln(exp(y) - 1), written to stay finite for large y.
                y + (-(-y).exp_m1()).ln()
            }
            Constraint::Interval { lower, upper, .. } => {
                let p = ((value - lower) / (upper - lower))
                    .clamp(STRICT_BOUND_MARGIN, 1.0 - STRICT_BOUND_MARGIN);
                (p / (1.0 - p)).ln()
            }
        }
    }

    /// Inverse of [`Constraint::to_unconstrained`].
    pub fn from_unconstrained(&self, x: f64) -> f64 {
        match *self {
            Constraint::Unbounded => x,
            Constraint::Lower { bound, .. } => bound + softplus(x),
            Constraint::Interval { lower, upper, .. } => lower + (upper - lower) * sigmoid(x),
        }
    }

    /// First derivative of [`Constraint::from_unconstrained`] at `x`.
    pub fn from_unconstrained_first_derivative(&self, x: f64) -> f64 {
        match *self {
            Constraint::Unbounded => 1.0,
            Constraint::Lower { .. } => sigmoid(x),
            Constraint::Interval { lower, upper, .. } => {
                let s = sigmoid(x);
                (upper - lower) * s * (1.0 - s)
            }
        }
    }

    /// Second derivative of [`Constraint::from_unconstrained`] at `x`.
    pub fn from_unconstrained_second_derivative(&self, x: f64) -> f64 {
        match *self {
            Constraint::Unbounded => 0.0,
            Constraint::Lower { .. } => {
                let s = sigmoid(x);
                s * (1.0 - s)
            }
            Constraint::Interval { lower, upper, .. } => {
                let s = sigmoid(x);
                (upper - lower) * s * (1.0 - s) * (1.0 - 2.0 * s)
            }
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Constraint::Unbounded => write!(f, "]-inf, +inf["),
            Constraint::Lower { bound, strict } => {
                write!(f, "{}{}, +inf[", if strict { "]" } else { "[" }, bound)
            }
            Constraint::Interval {
                lower,
                upper,
                lower_strict,
                upper_strict,
            } => write!(
                f,
                "{}{}, {}{}",
                if lower_strict { "]" } else { "[" },
                lower,
                upper,
                if upper_strict { "[" } else { "]" }
            ),
        }
    }
}

fn softplus(x: f64) -> f64 {
    if x > 30.0 { x } else { x.exp().ln_1p() }
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_lower_bound_excludes_the_bound() {
        assert!(!Constraint::POSITIVE.is_satisfied(0.0));
        assert!(Constraint::POSITIVE.is_satisfied(1e-300));
        assert!(Constraint::NON_NEGATIVE.is_satisfied(0.0));
    }

    #[test]
    fn non_finite_values_never_satisfy_a_constraint() {
        assert!(!Constraint::Unbounded.is_satisfied(f64::NAN));
        assert!(!Constraint::Unbounded.is_satisfied(f64::INFINITY));
    }

    #[test]
    fn closest_feasible_projects_into_open_interval() {
        let c = Constraint::OPEN_PROPORTION;
        let low = c.closest_feasible(-3.0);
        let high = c.closest_feasible(7.0);
        assert!(c.is_satisfied(low));
        assert!(c.is_satisfied(high));
        assert_eq!(c.closest_feasible(0.25), 0.25);
    }

    #[test]
    fn unconstrained_mapping_round_trips() {
        let cases = [
            (Constraint::POSITIVE, 0.37),
            (Constraint::POSITIVE, 55.0),
            (Constraint::PROPORTION, 0.8),
            (Constraint::closed(-2.0, 5.0), 1.5),
            (Constraint::Unbounded, -4.2),
        ];
        for (c, v) in cases {
            let x = c.to_unconstrained(v);
            assert!((c.from_unconstrained(x) - v).abs() < 1e-9, "{c} {v}");
        }
    }

    #[test]
    fn mapping_derivative_matches_finite_difference() {
        let c = Constraint::closed(1.0, 3.0);
        let x = 0.4;
        let h = 1e-6;
        let numeric = (c.from_unconstrained(x + h) - c.from_unconstrained(x - h)) / (2.0 * h);
        assert!((numeric - c.from_unconstrained_first_derivative(x)).abs() < 1e-6);
        let numeric2 = (c.from_unconstrained_first_derivative(x + h)
            - c.from_unconstrained_first_derivative(x - h))
            / (2.0 * h);
        assert!((numeric2 - c.from_unconstrained_second_derivative(x)).abs() < 1e-6);
    }
}
