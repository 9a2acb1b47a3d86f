//! Driver parameters and their stochastic assignment.

use once_cell::sync::Lazy;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// A parameter of the built-in driver model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Param {
    /// Maximum desired acceleration in m/s^2.
    A,
    /// Comfortable deceleration in m/s^2.
    B,
    /// Stopping distance in m.
    S0,
    /// Regular desired time headway in s.
    TMax,
    /// Smallest time headway accepted when changing lanes, in s.
    TMin,
    /// Headway relaxation time in s.
    Tau,
    /// Free acceleration exponent.
    Delta,
    /// Speed limit adherence factor.
    FSpeed,
    /// Look-ahead distance for route and speed anticipation, in m.
    X0,
    /// Look-ahead time for route desire, in s.
    T0,
    /// Speed gain normalising the speed desire, in m/s.
    VGain,
    /// Speed below which traffic counts as congested, in m/s.
    VCong,
    /// Desire threshold for free lane changes.
    DFree,
    /// Desire threshold for synchronisation.
    DSync,
    /// Desire threshold for cooperation.
    DCoop,
    /// Safe deceleration for gap acceptance, in m/s^2.
    BSafe,
}

impl Param {
    pub const ALL: [Param; 16] = [
        Param::A,
        Param::B,
        Param::S0,
        Param::TMax,
        Param::TMin,
        Param::Tau,
        Param::Delta,
        Param::FSpeed,
        Param::X0,
        Param::T0,
        Param::VGain,
        Param::VCong,
        Param::DFree,
        Param::DSync,
        Param::DCoop,
        Param::BSafe,
    ];

    /// The default value.
    pub fn default_value(self) -> f64 {
        use Param::*;
        match self {
            A => 1.25,
            B => 2.09,
            S0 => 3.0,
            TMax => 1.2,
            TMin => 0.56,
            Tau => 25.0,
            Delta => 4.0,
            FSpeed => 1.0,
            X0 => 295.0,
            T0 => 43.0,
            VGain => 69.6 / 3.6,
            VCong => 60.0 / 3.6,
            DFree => 0.365,
            DSync => 0.577,
            DCoop => 0.788,
            BSafe => 2.09,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// A full set of driver parameter values.
#[derive(Clone, Debug, PartialEq)]
pub struct Parameters {
    values: [f64; Param::ALL.len()],
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            values: Param::ALL.map(Param::default_value),
        }
    }
}

impl Parameters {
    pub fn get(&self, param: Param) -> f64 {
        self.values[param.index()]
    }

    pub fn set(&mut self, param: Param, value: f64) {
        self.values[param.index()] = value;
    }

    /// Returns the parameters with one value changed.
    pub fn with(mut self, param: Param, value: f64) -> Self {
        self.set(param, value);
        self
    }
}

impl std::ops::Index<Param> for Parameters {
    type Output = f64;

    fn index(&self, param: Param) -> &f64 {
        &self.values[param.index()]
    }
}

/// How a parameter value is drawn.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamDistribution {
    Fixed { value: f64 },
    Uniform { min: f64, max: f64 },
    /// Normal distribution, clamped to `[min, max]`.
    Normal { mean: f64, std_dev: f64, min: f64, max: f64 },
}

impl ParamDistribution {
    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        match *self {
            ParamDistribution::Fixed { value } => value,
            ParamDistribution::Uniform { min, max } if max > min => rng.gen_range(min..max),
            ParamDistribution::Uniform { min, .. } => min,
            ParamDistribution::Normal {
                mean,
                std_dev,
                min,
                max,
            } => match Normal::new(mean, std_dev) {
                Ok(distr) => distr.sample(rng).clamp(min, max),
                Err(_) => mean.clamp(min, max),
            },
        }
    }
}

/// The distributions from which a new driver's parameters are drawn.
/// Parameters not in the table keep their defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterTable {
    entries: Vec<(Param, ParamDistribution)>,
}

/// The table used when a vehicle class does not specify one: drivers differ in how
/// closely they keep to the speed limit.
static DEFAULT_TABLE: Lazy<ParameterTable> = Lazy::new(|| {
    ParameterTable::new().with(
        Param::FSpeed,
        ParamDistribution::Normal {
            mean: 1.0,
            std_dev: 0.1,
            min: 0.75,
            max: 1.25,
        },
    )
});

impl ParameterTable {
    /// An empty table; every parameter keeps its default.
    pub fn new() -> Self {
        Default::default()
    }

    /// The default stochastic table.
    pub fn stochastic() -> Self {
        DEFAULT_TABLE.clone()
    }

    /// Sets the distribution of a parameter.
    pub fn with(mut self, param: Param, distribution: ParamDistribution) -> Self {
        self.entries.retain(|(p, _)| *p != param);
        self.entries.push((param, distribution));
        self
    }

    /// Draws a full set of parameters.
    pub fn draw<R: Rng>(&self, rng: &mut R) -> Parameters {
        let mut params = Parameters::default();
        for (param, distribution) in &self.entries {
            params.set(*param, distribution.sample(rng));
        }
        params
    }
}
