//! SIR rate calibration against observed counts.
//!
//! Calibration sits behind the [`Calibrator`] port so the simulator never
//! depends on how the inverse problem is solved. Two adapters ship here:
//!
//! - [`CommandCalibrator`] runs an external optimizer process and parses the
//!   JSON tuple it prints.
//! - [`LeastSquaresCalibrator`] solves the same problem in-process with the
//!   crate's bounded least-squares solver.
//!
//! Both fit `(s0, ki, kr)` so that the SIR derivatives at each observed state
//! match the observed day-over-day changes:
//!
//! - `removed = deaths + recovered`, `infected = confirmed - removed`
//! - `susceptible = s0 - confirmed`
//! - `ds = -Δconfirmed`, `dr = Δremoved`, `di = Δconfirmed - dr`
//!
//! External optimizers commonly pair the change from day `j` to `j + 1` with
//! the day `j + 1` state and seed `i0 = c0 - r0`. The in-process fit pairs it
//! with the day `j` state, the state `SirState::step` advances from.

use std::path::PathBuf;
use std::process::Command;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::domain::{Population, RegionPoint, RegionSeries};
use crate::error::{Error, Result};
use crate::math::{Bounds, LeastSquaresProblem, SolverOptions, minimize};
use crate::sir::SirParams;

/// Observed series handed to a calibrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationRequest {
    pub confirmed: Vec<i64>,
    pub deaths: Vec<i64>,
    pub recovered: Vec<i64>,
    /// Target population; the starting value for `s0`.
    pub population: u64,
    /// Leading days to discard before fitting.
    pub trim: usize,
}

impl CalibrationRequest {
    /// Build a request from an assembled region record. The region must have a
    /// known population, and its sanitized series must still share one length;
    /// a region whose measures went stale on different days is rejected. Use
    /// [`CalibrationRequest::from_series`] to calibrate on the raw days.
    pub fn from_point(point: &RegionPoint, trim: usize) -> Result<Self> {
        let population = known_population(&point.name, point.population)?;
        let request = Self {
            confirmed: point.confirmed.clone(),
            deaths: point.deaths.clone(),
            recovered: point.recovered.clone(),
            population,
            trim,
        };
        request.validate()?;
        Ok(request)
    }

    /// Build a request from an aggregated region's raw series, which always
    /// share the table's date axis.
    pub fn from_series(series: &RegionSeries, population: Population, trim: usize) -> Result<Self> {
        let population = known_population(&series.name, population)?;
        let request = Self {
            confirmed: series.confirmed.clone(),
            deaths: series.deaths.clone(),
            recovered: series.recovered.clone(),
            population,
            trim,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        let days = self.confirmed.len();
        if self.deaths.len() != days || self.recovered.len() != days {
            return Err(Error::CalibrationRequest(format!(
                "series lengths differ: confirmed {days}, deaths {}, recovered {}",
                self.deaths.len(),
                self.recovered.len()
            )));
        }
        if days.saturating_sub(self.trim) < 2 {
            return Err(Error::CalibrationRequest(format!(
                "trimming {} of {days} days leaves fewer than 2",
                self.trim
            )));
        }
        if self.population == 0 {
            return Err(Error::CalibrationRequest("population must be > 0".to_string()));
        }
        Ok(())
    }

    fn trimmed(&self) -> (&[i64], &[i64], &[i64]) {
        (
            &self.confirmed[self.trim..],
            &self.deaths[self.trim..],
            &self.recovered[self.trim..],
        )
    }

    /// Initial compartments `(i0, r0)` from the first kept day.
    pub fn initial_compartments(&self) -> (f64, f64) {
        let (c, d, r) = self.trimmed();
        match (c.first(), d.first(), r.first()) {
            (Some(&c0), Some(&d0), Some(&r0)) => {
                let removed = (d0 + r0) as f64;
                (c0 as f64 - removed, removed)
            }
            _ => (0.0, 0.0),
        }
    }
}

fn known_population(name: &str, population: Population) -> Result<u64> {
    population
        .known()
        .ok_or_else(|| Error::CalibrationRequest(format!("region `{name}` has no known population")))
}

/// A fitted rate tuple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub population: f64,
    pub ki: f64,
    pub kr: f64,
    pub i0: f64,
    pub r0: f64,
}

impl CalibrationResult {
    pub fn is_finite(&self) -> bool {
        [self.population, self.ki, self.kr, self.i0, self.r0]
            .iter()
            .all(|v| v.is_finite())
    }

    /// Simulator input seeded with the fitted tuple.
    pub fn to_params(&self) -> SirParams {
        SirParams {
            population: self.population,
            ki: self.ki,
            kr: self.kr,
            i0: self.i0,
            r0: self.r0,
        }
    }
}

/// Port for solving the SIR inverse problem.
pub trait Calibrator {
    fn calibrate(&self, request: &CalibrationRequest) -> Result<CalibrationResult>;
}

/// Runs an external optimizer:
/// `<program> <extra_args>.. --confirmed a,b,.. --deaths .. --recovered .. --population N --trim T`
/// and reads `{"population", "ki", "kr", "i0", "r0"}` from the last non-empty
/// line of its stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCalibrator {
    pub program: PathBuf,
    pub extra_args: Vec<String>,
}

impl CommandCalibrator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    fn command(&self, request: &CalibrationRequest) -> Command {
        let join = |values: &[i64]| values.iter().map(i64::to_string).collect::<Vec<_>>().join(",");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.extra_args)
            .arg("--confirmed")
            .arg(join(&request.confirmed))
            .arg("--deaths")
            .arg(join(&request.deaths))
            .arg("--recovered")
            .arg(join(&request.recovered))
            .arg("--population")
            .arg(request.population.to_string())
            .arg("--trim")
            .arg(request.trim.to_string());
        cmd
    }
}

impl Calibrator for CommandCalibrator {
    fn calibrate(&self, request: &CalibrationRequest) -> Result<CalibrationResult> {
        request.validate()?;

        log::debug!("running calibrator {}", self.program.display());
        let output = self
            .command(request)
            .output()
            .map_err(|source| Error::CalibratorSpawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(Error::CalibratorExit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .ok_or_else(|| Error::CalibratorOutput("empty output".to_string()))?;
        let result: CalibrationResult =
            serde_json::from_str(line).map_err(|e| Error::CalibratorOutput(format!("{e}: `{line}`")))?;
        if !result.is_finite() {
            return Err(Error::CalibratorOutput(format!("non-finite values in `{line}`")));
        }
        Ok(result)
    }
}

/// In-process calibration with the bounded least-squares solver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeastSquaresCalibrator {
    pub options: SolverOptions,
}

impl LeastSquaresCalibrator {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }
}

/// One observed transition: the state on day `j` and the change to `j + 1`.
#[derive(Debug, Clone, Copy)]
struct Transition {
    confirmed: f64,
    infected: f64,
    ds: f64,
    di: f64,
    dr: f64,
}

struct SirRateProblem {
    transitions: Vec<Transition>,
}

impl SirRateProblem {
    fn new(confirmed: &[i64], deaths: &[i64], recovered: &[i64]) -> Self {
        let removed: Vec<f64> = deaths.iter().zip(recovered).map(|(&d, &r)| (d + r) as f64).collect();
        let transitions = (0..confirmed.len().saturating_sub(1))
            .map(|j| {
                let dc = (confirmed[j + 1] - confirmed[j]) as f64;
                let dr = removed[j + 1] - removed[j];
                Transition {
                    confirmed: confirmed[j] as f64,
                    infected: confirmed[j] as f64 - removed[j],
                    ds: -dc,
                    di: dc - dr,
                    dr,
                }
            })
            .collect();
        Self { transitions }
    }

    /// Closed-form rates with `s0` held at `population`, used as the start.
    fn linear_start(&self, population: f64) -> [f64; 3] {
        let (mut num_i, mut den_i, mut num_r, mut den_r) = (0.0, 0.0, 0.0, 0.0);
        for t in &self.transitions {
            let contact = t.infected * (population - t.confirmed);
            num_i += -t.ds * contact;
            den_i += contact * contact;
            num_r += t.dr * t.infected;
            den_r += t.infected * t.infected;
        }
        let ratio = |num: f64, den: f64| if den > 0.0 { (num / den).max(0.0) } else { 0.0 };
        [population, ratio(num_i, den_i), ratio(num_r, den_r)]
    }
}

impl LeastSquaresProblem for SirRateProblem {
    fn residual_count(&self) -> usize {
        3 * self.transitions.len()
    }

    fn residuals(&self, params: &[f64], out: &mut [f64]) {
        let (s0, ki, kr) = (params[0], params[1], params[2]);
        for (t, r) in self.transitions.iter().zip(out.chunks_exact_mut(3)) {
            let infections = ki * t.infected * (s0 - t.confirmed);
            let removals = kr * t.infected;
            r[0] = -infections - t.ds;
            r[1] = infections - removals - t.di;
            r[2] = removals - t.dr;
        }
    }

    fn jacobian(&self, params: &[f64], jac: &mut DMatrix<f64>) {
        let (s0, ki) = (params[0], params[1]);
        for (j, t) in self.transitions.iter().enumerate() {
            let contact = t.infected * (s0 - t.confirmed);
            let row = 3 * j;
            jac[(row, 0)] = -ki * t.infected;
            jac[(row, 1)] = -contact;
            jac[(row, 2)] = 0.0;
            jac[(row + 1, 0)] = ki * t.infected;
            jac[(row + 1, 1)] = contact;
            jac[(row + 1, 2)] = -t.infected;
            jac[(row + 2, 0)] = 0.0;
            jac[(row + 2, 1)] = 0.0;
            jac[(row + 2, 2)] = t.infected;
        }
    }
}

impl Calibrator for LeastSquaresCalibrator {
    fn calibrate(&self, request: &CalibrationRequest) -> Result<CalibrationResult> {
        request.validate()?;

        let (confirmed, deaths, recovered) = request.trimmed();
        let problem = SirRateProblem::new(confirmed, deaths, recovered);
        let bounds = Bounds::lower_only(vec![0.0; 3])
            .ok_or_else(|| Error::CalibrationFailed("invalid parameter bounds".to_string()))?;
        let start = problem.linear_start(request.population as f64);

        let solution = minimize(&problem, &start, &bounds, &self.options)
            .map_err(|reason| Error::CalibrationFailed(reason.to_string()))?;
        log::debug!(
            "SIR calibration converged in {} iterations (sse {:.3e})",
            solution.iterations,
            solution.sse
        );

        let (i0, r0) = request.initial_compartments();
        let result = CalibrationResult {
            population: solution.params[0],
            ki: solution.params[1],
            kr: solution.params[2],
            i0,
            r0,
        };
        if !result.is_finite() {
            return Err(Error::CalibrationFailed("non-finite solution".to_string()));
        }
        Ok(result)
    }
}
