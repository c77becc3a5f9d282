//! External-state event transformers (decays, hadronisation, smearing)
//! invoked on every generated configuration.

use super::error::Result;
use super::event::Event;
use super::registry::ModuleFactory;
use std::sync::{OnceLock, RwLock};

/// An ordered-pipeline stage allowed to alter the event content, fold a
/// branching fraction into the weight, or veto the configuration outright.
pub trait EventModifier: Send {
    /// Unique name of the modifier.
    fn name(&self) -> &str;

    /// One-time initialisation before the first event.
    ///
    /// # Errors
    ///
    /// Propagates module-specific start-up failures.
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Modifies a full event. `weight` may be multiplied by a branching
    /// fraction; returning `false` vetoes the event. `full` distinguishes
    /// the storage pass from exploratory integration calls.
    ///
    /// # Errors
    ///
    /// A returned error is treated as an evaluation warning by the caller:
    /// the point is rejected, the run continues.
    fn run(&mut self, event: &mut Event, weight: &mut f64, full: bool) -> Result<bool>;

    /// Cross section and uncertainty, propagated once integration ends.
    fn set_cross_section(&mut self, _cross_section: (f64, f64)) {}
}

/// Shared factory for all event modifiers.
pub fn factory() -> &'static RwLock<ModuleFactory<dyn EventModifier>> {
    static FACTORY: OnceLock<RwLock<ModuleFactory<dyn EventModifier>>> = OnceLock::new();
    FACTORY.get_or_init(|| RwLock::new(ModuleFactory::new("event modifier factory")))
}
