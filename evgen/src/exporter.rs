//! Sinks for accepted events, plus the built-in plain-text dump module.

use super::error::{Error, Result};
use super::event::Event;
use super::params::ParameterBag;
use super::registry::{Buildable, ModuleFactory};
use super::schema::ParametersDescription;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::{OnceLock, RwLock};
use tracing::info;

/// A sink invoked for every accepted event, after all modifiers succeeded
/// with a positive weight.
pub trait EventExporter: Send {
    /// Unique name of the exporter.
    fn name(&self) -> &str;

    /// One-time initialisation before the first event.
    ///
    /// # Errors
    ///
    /// Propagates module-specific start-up failures.
    fn initialise(&mut self) -> Result<()> {
        Ok(())
    }

    /// Cross section and uncertainty, propagated once integration ends.
    fn set_cross_section(&mut self, _cross_section: (f64, f64)) {}

    /// Writes one accepted event.
    ///
    /// # Errors
    ///
    /// Propagates sink write failures.
    fn export(&mut self, event: &Event) -> Result<()>;
}

/// Shared factory for all event exporters, with the built-in modules
/// registered on first access.
///
/// # Panics
///
/// Panics if a built-in module name clashes, which cannot happen short of a
/// coding error.
pub fn factory() -> &'static RwLock<ModuleFactory<dyn EventExporter>> {
    static FACTORY: OnceLock<RwLock<ModuleFactory<dyn EventExporter>>> = OnceLock::new();
    FACTORY.get_or_init(|| {
        let mut factory = ModuleFactory::new("event exporter factory");
        crate::register_module!(factory, dyn EventExporter, "dump", DumpExporter).unwrap();
        RwLock::new(factory)
    })
}

/// Human-readable event dump, to a file or the standard output. The sink is
/// flushed on drop so partial output survives an aborted run.
pub struct DumpExporter {
    filename: String,
    sink: Option<BufWriter<File>>,
    cross_section: Option<(f64, f64)>,
    count: u64,
}

impl Buildable for DumpExporter {
    fn description() -> ParametersDescription {
        let mut desc = ParametersDescription::new("plain-text event dump");
        desc.add(
            "filename",
            "",
            "output file; an empty name sends the dump to the log",
        );
        desc
    }

    fn from_bag(params: &ParameterBag) -> Result<Self> {
        Ok(Self {
            filename: params.get("filename")?,
            sink: None,
            cross_section: None,
            count: 0,
        })
    }
}

impl EventExporter for DumpExporter {
    fn name(&self) -> &str {
        "dump"
    }

    fn initialise(&mut self) -> Result<()> {
        if !self.filename.is_empty() {
            let file = File::create(&self.filename).map_err(|err| {
                Error::config(
                    "filename",
                    format!("failed to create \"{}\": {err}", self.filename),
                )
            })?;
            self.sink = Some(BufWriter::new(file));
        }
        Ok(())
    }

    fn set_cross_section(&mut self, cross_section: (f64, f64)) {
        self.cross_section = Some(cross_section);
    }

    fn export(&mut self, event: &Event) -> Result<()> {
        self.count += 1;
        let record = format!(
            "--- event {} (weight {:.6e})\n{}",
            self.count, event.weight, event.dump()
        );
        match &mut self.sink {
            Some(sink) => sink
                .write_all(record.as_bytes())
                .map_err(|err| Error::Generation(format!("event dump failed: {err}")))?,
            None => info!("{record}"),
        }
        Ok(())
    }
}

impl Drop for DumpExporter {
    fn drop(&mut self) {
        if let Some(sink) = &mut self.sink {
            let _ = sink.flush();
        }
        if let Some((xsec, err)) = self.cross_section {
            info!(
                events = self.count,
                "dump exporter closed (cross section {xsec:.6e} +/- {err:.6e} pb)"
            );
        }
    }
}
