//! Forward SIR integration.
//!
//! One explicit Euler step per day. All three deltas are computed from the
//! pre-update state, and the recorded state for day `t` is the state before
//! step `t` is applied.

use serde::{Deserialize, Serialize};

use crate::domain::RegionPoint;

/// Compartment sizes at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SirState {
    pub s: f64,
    pub i: f64,
    pub r: f64,
}

impl SirState {
    pub fn total(&self) -> f64 {
        self.s + self.i + self.r
    }

    /// The state one day later.
    pub fn step(&self, ki: f64, kr: f64) -> Self {
        let infections = ki * self.i * self.s;
        let removals = kr * self.i;
        Self {
            s: self.s - infections,
            i: self.i + infections - removals,
            r: self.r + removals,
        }
    }
}

fn default_i0() -> f64 {
    1.0
}

/// Simulator input: initial susceptible population plus rate constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SirParams {
    /// Initial susceptible count.
    pub population: f64,
    /// Infection rate per susceptible-infected contact per day.
    pub ki: f64,
    /// Removal (recovery + death) rate per day.
    pub kr: f64,
    #[serde(default = "default_i0")]
    pub i0: f64,
    #[serde(default)]
    pub r0: f64,
}

impl SirParams {
    /// Defaults `i0 = 1`, `r0 = 0`.
    pub fn new(population: f64, ki: f64, kr: f64) -> Self {
        Self {
            population,
            ki,
            kr,
            i0: default_i0(),
            r0: 0.0,
        }
    }

    /// Simulator input for a region with a known population, seeded with the
    /// default `i0`/`r0`. `None` on a population lookup miss.
    pub fn for_point(point: &RegionPoint, ki: f64, kr: f64) -> Option<Self> {
        let population = point.population.known()?;
        Some(Self::new(population as f64, ki, kr))
    }

    pub fn initial_state(&self) -> SirState {
        SirState {
            s: self.population,
            i: self.i0,
            r: self.r0,
        }
    }
}

/// Per-day compartment series, all of length `days`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SirTrajectory {
    pub susceptible: Vec<f64>,
    pub infected: Vec<f64>,
    pub removed: Vec<f64>,
}

impl SirTrajectory {
    pub fn days(&self) -> usize {
        self.infected.len()
    }

    pub fn state(&self, day: usize) -> Option<SirState> {
        Some(SirState {
            s: *self.susceptible.get(day)?,
            i: *self.infected.get(day)?,
            r: *self.removed.get(day)?,
        })
    }

    /// Index of the largest infected count (earliest on ties); `None` when
    /// the trajectory is empty.
    pub fn peak_day(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (day, &i) in self.infected.iter().enumerate() {
            if best.is_none_or(|(_, max)| i > max) {
                best = Some((day, i));
            }
        }
        best.map(|(day, _)| day)
    }
}

/// Integrate `days` daily steps from the initial state.
pub fn simulate(params: &SirParams, days: usize) -> SirTrajectory {
    let mut out = SirTrajectory {
        susceptible: Vec::with_capacity(days),
        infected: Vec::with_capacity(days),
        removed: Vec::with_capacity(days),
    };

    let mut state = params.initial_state();
    for _ in 0..days {
        out.susceptible.push(state.s);
        out.infected.push(state.i);
        out.removed.push(state.r);
        state = state.step(params.ki, params.kr);
    }
    out
}
