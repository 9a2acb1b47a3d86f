//! Car following with the Intelligent Driver Model.

/// Gaps are never taken to be smaller than this, in m.
const MIN_GAP: f64 = 1e-6;

/// The inputs of the car following model for one leader.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IdmInput {
    /// Own speed in m/s.
    pub v: f64,
    /// Desired speed in m/s.
    pub v0: f64,
    /// Net gap to the leader in m; infinite without a leader.
    pub s: f64,
    /// Approach rate, own speed minus the leader's, in m/s.
    pub dv: f64,
    /// Desired time headway in s.
    pub t: f64,
}

/// The per-driver constants of the car following model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IdmParams {
    /// Maximum desired acceleration in m/s^2.
    pub a: f64,
    /// Comfortable deceleration in m/s^2.
    pub b: f64,
    /// Stopping distance in m.
    pub s0: f64,
    /// Free acceleration exponent.
    pub delta: f64,
    /// Deceleration the result is never allowed to go below, a positive number.
    pub b_max: f64,
}

impl IdmParams {
    /// The dynamic desired gap.
    pub fn desired_gap(&self, input: &IdmInput) -> f64 {
        let dyn_part = input.v * input.t + input.v * input.dv / (2.0 * (self.a * self.b).sqrt());
        self.s0 + dyn_part.max(0.0)
    }

    /// The IDM+ acceleration: the lower of the free-road and the interaction term,
    /// limited to the maximum deceleration.
    pub fn idm_plus(&self, input: &IdmInput) -> f64 {
        let s = input.s.max(MIN_GAP);
        let free = if input.v0 > 0.0 {
            1.0 - (input.v / input.v0).powf(self.delta)
        } else {
            -1.0
        };
        let interaction = 1.0 - (self.desired_gap(input) / s).powi(2);
        f64::max(self.a * f64::min(free, interaction), -self.b_max)
    }

    /// The textbook IDM acceleration, subtracting the interaction term.
    pub fn idm_legacy(&self, input: &IdmInput) -> f64 {
        let s = input.s.max(MIN_GAP);
        let free = if input.v0 > 0.0 {
            (input.v / input.v0).powf(self.delta)
        } else {
            2.0
        };
        let interaction = (self.desired_gap(input) / s).powi(2);
        f64::max(self.a * (1.0 - free - interaction), -self.b_max)
    }

    /// The acceleration needed to stop before a line `s` metres ahead.
    pub fn stop_at_line(&self, v: f64, v0: f64, s: f64, t: f64) -> f64 {
        self.idm_plus(&IdmInput {
            v,
            v0,
            s,
            dv: v,
            t,
        })
    }

    /// Whether a stop `s` metres ahead can be made at comfortable deceleration.
    pub fn can_stop(&self, v: f64, s: f64) -> bool {
        s >= v * v / (2.0 * self.b)
    }
}

/// Keeps the lowest of a set of candidate accelerations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidates {
    acc: f64,
}

impl Candidates {
    /// Starts from the highest acceleration the vehicle is allowed.
    pub fn new(max: f64) -> Self {
        Self { acc: max }
    }

    pub fn apply(&mut self, acc: f64) {
        self.acc = f64::min(self.acc, acc);
    }

    pub fn acc(&self) -> f64 {
        self.acc
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn params() -> IdmParams {
        IdmParams {
            a: 1.25,
            b: 2.09,
            s0: 3.0,
            delta: 4.0,
            b_max: 8.0,
        }
    }

    #[test]
    fn equilibrium_is_stationary() {
        let p = params();
        let mut input = IdmInput {
            v: 20.0,
            v0: 20.0,
            s: 0.0,
            dv: 0.0,
            t: 1.2,
        };
        input.s = p.desired_gap(&input);
        assert_approx_eq!(input.s, 27.0);
        assert_approx_eq!(p.idm_plus(&input), 0.0);
    }

    #[test]
    fn free_road_approaches_max_acceleration() {
        let p = params();
        let input = IdmInput {
            v: 0.0,
            v0: 30.0,
            s: f64::INFINITY,
            dv: 0.0,
            t: 1.2,
        };
        assert_approx_eq!(p.idm_plus(&input), p.a);
        let far = IdmInput { s: 1e7, ..input };
        assert_approx_eq!(p.idm_plus(&far), p.a, 1e-6);
    }

    #[test]
    fn never_below_max_deceleration() {
        let p = params();
        let input = IdmInput {
            v: 30.0,
            v0: 30.0,
            s: 0.0,
            dv: 30.0,
            t: 1.2,
        };
        assert_eq!(p.idm_plus(&input), -8.0);
        assert_eq!(p.idm_legacy(&input), -8.0);
    }

    #[test]
    fn plus_differs_from_legacy_near_desired_speed() {
        let p = params();
        let input = IdmInput {
            v: 19.0,
            v0: 20.0,
            s: 60.0,
            dv: 0.0,
            t: 1.2,
        };
        // The subtractive form penalises both terms at once
        assert!(p.idm_legacy(&input) < p.idm_plus(&input));
    }

    #[test]
    fn desired_gap_is_floored() {
        let p = params();
        let input = IdmInput {
            v: 10.0,
            v0: 20.0,
            s: 10.0,
            dv: -30.0,
            t: 1.2,
        };
        assert_eq!(p.desired_gap(&input), 3.0);
    }

    #[test]
    fn stopping() {
        let p = params();
        assert!(p.can_stop(10.0, 30.0));
        assert!(!p.can_stop(20.0, 30.0));
        assert!(p.stop_at_line(10.0, 20.0, 10.0, 1.2) < 0.0);
    }

    #[test]
    fn candidates_keep_the_minimum() {
        let mut acc = Candidates::new(1.5);
        acc.apply(2.0);
        assert_eq!(acc.acc(), 1.5);
        acc.apply(-0.5);
        acc.apply(0.3);
        assert_eq!(acc.acc(), -0.5);
    }
}
