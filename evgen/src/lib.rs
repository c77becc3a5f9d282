#![warn(clippy::all, clippy::cargo, clippy::nursery, clippy::pedantic)]
#![warn(missing_docs)]

//! `evgen` is an adaptive Monte Carlo integrator and unweighted event
//! generator for differential cross sections of multi-particle final
//! states: a user-declared process maps the unit hypercube onto its phase
//! space, the Vegas-family integrators estimate the cross section while
//! training an importance grid, and a cell-indexed rejection sampler with
//! on-the-fly grid repair draws events distributed like the weight.

pub mod constants;
mod convert;
pub mod error;
pub mod event;
pub mod exporter;
pub mod generator;
pub mod grid;
pub mod integrand;
pub mod integrator;
pub mod kinematics;
pub mod limits;
pub mod miser;
pub mod modifier;
pub mod momentum;
pub mod params;
pub mod pdg;
pub mod plain;
pub mod process;
pub mod processes;
pub mod registry;
pub mod run;
pub mod schema;
pub mod taming;
pub mod vegas;

pub use error::{Error, Result};

/// Warms every process-wide registry up: the module factories (with their
/// built-in processes, integrators and exporters) and the particle
/// database. Factories are also populated lazily on first access, so this
/// call is only needed to front-load the work or to list modules early.
pub fn initialise() {
    let _ = processes::factory();
    let _ = integrator::factory();
    let _ = modifier::factory();
    let _ = exporter::factory();
    let _ = pdg::database();
}
