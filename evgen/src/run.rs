//! Parameter-driven composition of a full run: the validated configuration
//! tree is turned into a process, an integrator, the generation machinery
//! and the event pipelines, then driven through integrate-and-generate.

use super::error::{Error, Result};
use super::exporter::{self, EventExporter};
use super::generator::{Callback, GenerationParameters, Generator};
use super::integrand::{Integrand, SharedRun};
use super::integrator::{self, Integrator};
use super::kinematics::Kinematics;
use super::modifier::{self, EventModifier};
use super::params::ParameterBag;
use super::process::Process;
use super::processes;
use super::registry::Buildable;
use super::schema::ParametersDescription;
use super::taming::TamingFunction;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Everything needed to assemble one run.
pub struct RunParameters {
    /// The physics process under study.
    pub process: Box<dyn Process>,
    /// Incoming state and cut configuration.
    pub kinematics: Kinematics,
    /// Integrator module configuration (named bag).
    pub integrator: ParameterBag,
    /// Generation-stage steering.
    pub generation: GenerationParameters,
    /// Taming functions applied to the integrand.
    pub taming: Vec<TamingFunction>,
    /// Ordered event-modifier pipeline.
    pub modifiers: Vec<Box<dyn EventModifier>>,
    /// Ordered event-exporter pipeline.
    pub exporters: Vec<Box<dyn EventExporter>>,
}

impl RunParameters {
    /// Starts from a process with default kinematics, the default
    /// integrator and empty pipelines.
    #[must_use]
    pub fn new(process: Box<dyn Process>) -> Self {
        Self {
            process,
            kinematics: Kinematics::default(),
            integrator: ParameterBag::new(),
            generation: GenerationParameters::default(),
            taming: Vec::new(),
            modifiers: Vec::new(),
            exporters: Vec::new(),
        }
    }

    /// Top-level configuration schema.
    #[must_use]
    pub fn description() -> ParametersDescription {
        let mut desc = ParametersDescription::new("run configuration");
        desc.add("process", ParameterBag::new(), "process module (named bag)")
            .add_parameters(
                "kinematics",
                Kinematics::description(),
                "incoming state and cuts",
            )
            .add("integrator", ParameterBag::new(), "integrator module (named bag)")
            .add_parameters(
                "generator",
                GenerationParameters::description(),
                "generation-stage steering",
            )
            .add(
                "eventSequence",
                Vec::<ParameterBag>::new(),
                "ordered event-modifier modules (named bags)",
            )
            .add(
                "output",
                Vec::<ParameterBag>::new(),
                "event-exporter modules (named bags)",
            )
            .add("timer", ParameterBag::new(), "timing options (driver-level)")
            .add("logger", ParameterBag::new(), "logging options (driver-level)");
        desc
    }

    /// Assembles run parameters from a validated top-level configuration
    /// tree: every named sub-bag goes through the matching module factory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] on an invalid tree or unknown module
    /// names.
    ///
    /// # Panics
    ///
    /// Panics if a factory lock is poisoned.
    pub fn from_bag(config: &ParameterBag) -> Result<Self> {
        let config = Self::description().validate(config)?;
        let process_bag: ParameterBag = config.get("process")?;
        if process_bag.name().is_empty() {
            return Err(Error::config("process", "missing required key"));
        }
        let process = processes::factory()
            .read()
            .unwrap()
            .build_from_bag(&process_bag)?;
        let kinematics = Kinematics::from_bag(
            &Kinematics::description().validate(&config.get("kinematics")?)?,
        )?;
        let generation = GenerationParameters::from_bag(
            &GenerationParameters::description().validate(&config.get("generator")?)?,
        )?;
        let mut modifiers = Vec::new();
        for bag in config.get::<Vec<ParameterBag>>("eventSequence")? {
            modifiers.push(modifier::factory().read().unwrap().build_from_bag(&bag)?);
        }
        let mut exporters = Vec::new();
        for bag in config.get::<Vec<ParameterBag>>("output")? {
            exporters.push(exporter::factory().read().unwrap().build_from_bag(&bag)?);
        }
        for key in ["timer", "logger"] {
            let bag: ParameterBag = config.get(key)?;
            if !bag.is_empty() {
                debug!(key, "driver-level options are left to the embedding application");
            }
        }
        Ok(Self {
            process,
            kinematics,
            integrator: config.get("integrator")?,
            generation,
            taming: Vec::new(),
            modifiers,
            exporters,
        })
    }
}

/// A composed run: integration first, then unweighted generation off the
/// retained integrator state.
pub struct Runner {
    integrator: Box<dyn Integrator>,
    integrand: Integrand,
    generator: Generator,
    cross_section: Option<(f64, f64)>,
}

impl Runner {
    /// Builds the integrator, wraps the process into its integrand and
    /// initialises the pipelines.
    ///
    /// # Errors
    ///
    /// Propagates module construction and preparation failures.
    ///
    /// # Panics
    ///
    /// Panics if a factory or run-state lock is poisoned.
    pub fn new(params: RunParameters) -> Result<Self> {
        let RunParameters {
            process,
            kinematics,
            integrator: integrator_bag,
            generation,
            taming,
            modifiers,
            exporters,
        } = params;
        let shared = Arc::new(Mutex::new(SharedRun {
            modifiers,
            exporters,
            ngen: 0,
        }));
        {
            let mut guard = shared.lock().unwrap();
            for modifier in &mut guard.modifiers {
                modifier.init()?;
            }
            for exporter in &mut guard.exporters {
                exporter.initialise()?;
            }
        }
        let integrand = Integrand::new(
            process,
            kinematics,
            taming,
            shared,
            generation.symmetrise,
        )?;
        let name = match integrator_bag.name() {
            name if name.is_empty() => "Vegas".to_owned(),
            name => name,
        };
        let integrator = integrator::factory()
            .read()
            .unwrap()
            .build(&name, &integrator_bag)?;
        let generator = Generator::new(generation, integrand.ndim())?;
        Ok(Self {
            integrator,
            integrand,
            generator,
            cross_section: None,
        })
    }

    /// Runs the integration stage and propagates the result to every
    /// pipeline stage.
    ///
    /// # Errors
    ///
    /// Propagates integration failures.
    pub fn integrate(&mut self) -> Result<(f64, f64)> {
        let (value, uncertainty) = self.integrator.integrate(&mut self.integrand)?;
        info!(value, uncertainty, "integration finished");
        self.integrand.set_cross_section((value, uncertainty));
        self.cross_section = Some((value, uncertainty));
        Ok((value, uncertainty))
    }

    /// The integrated cross section, running the integration stage first
    /// when needed.
    ///
    /// # Errors
    ///
    /// Propagates integration failures.
    pub fn cross_section(&mut self) -> Result<(f64, f64)> {
        match self.cross_section {
            Some(result) => Ok(result),
            None => self.integrate(),
        }
    }

    /// The generation grid cache.
    #[must_use]
    pub const fn grid(&self) -> &super::grid::GridParameters {
        self.generator.grid()
    }

    /// Produces `count` unweighted events; the integration and warmup
    /// stages run on demand.
    ///
    /// # Errors
    ///
    /// Propagates integration, warmup and worker failures.
    pub fn generate(&mut self, count: u64, callback: Option<&Callback>) -> Result<u64> {
        if self.cross_section.is_none() {
            self.integrate()?;
        }
        if !self.generator.grid().prepared() {
            self.generator
                .prepare(self.integrator.as_ref(), &mut self.integrand)?;
        }
        self.generator
            .generate(self.integrator.as_ref(), &self.integrand, count, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Value;

    #[test]
    fn a_tree_composes_a_run() {
        let config = ParameterBag::new()
            .with(
                "process",
                ParameterBag::new()
                    .with("mod_name", "unit")
                    .with("ndim", 2_i64),
            )
            .with(
                "integrator",
                ParameterBag::new()
                    .with("mod_name", "plain")
                    .with("ncvg", 5_000_i64)
                    .with("seed", 1_i64),
            )
            .with(
                "generator",
                ParameterBag::new()
                    .with("maxgen", 100_i64)
                    .with("numThreads", 1_i64)
                    .with("seed", 3_i64)
                    .with("printEvery", 0_i64),
            );
        let params = RunParameters::from_bag(&config).unwrap();
        assert_eq!(params.generation.maxgen, 100);
        let mut runner = Runner::new(params).unwrap();
        let (value, _) = runner.cross_section().unwrap();
        assert!((value - 1.0).abs() < 0.05);
    }

    #[test]
    fn unknown_process_names_fail_with_candidates() {
        let config = ParameterBag::new().with(
            "process",
            ParameterBag::new().with("mod_name", "quartic"),
        );
        let err = RunParameters::from_bag(&config)
            .map(|_| ())
            .unwrap_err()
            .to_string();
        assert!(err.contains("unit"), "{err}");
        assert!(err.contains("twobody"), "{err}");
    }

    #[test]
    fn integrator_allowed_modes_are_enforced() {
        let config = ParameterBag::new()
            .with(
                "process",
                ParameterBag::new().with("mod_name", "unit").with("ndim", 1_i64),
            )
            .with(
                "integrator",
                ParameterBag::new()
                    .with("mod_name", "Vegas")
                    .with("mode", Value::Str("adhoc".to_owned())),
            );
        let params = RunParameters::from_bag(&config).unwrap();
        assert!(Runner::new(params).is_err());
    }
}
