//! Multiplicative reweighting of the integrand from named kinematic
//! observables, used to suppress peaks before unweighting.

use super::error::{Error, Result};
use super::event::{Event, Role};
use super::momentum::Momentum;
use std::sync::Arc;

/// Resolves a textual observable such as `pt(cs)`, `m(cs)` or `y(7)` on an
/// event. A role argument sums the four-momenta of every particle holding
/// the role; a numeric argument addresses one particle by identifier.
///
/// # Errors
///
/// Returns [`Error::Event`] for an unparsable variable or an unknown
/// argument.
pub fn browse(event: &Event, variable: &str) -> Result<f64> {
    let variable = variable.trim();
    let (name, argument) = variable.strip_suffix(')').map_or_else(
        || (variable, None),
        |head| {
            head.split_once('(')
                .map_or((variable, None), |(name, arg)| (name, Some(arg)))
        },
    );
    let momentum = match argument {
        None => event
            .particles()
            .iter()
            .fold(Momentum::default(), |sum, p| sum + p.momentum),
        Some(arg) => resolve_argument(event, arg.trim())?,
    };
    observable(name.trim(), &momentum)
        .ok_or_else(|| Error::Event(format!("unknown observable \"{name}\"")))
}

fn resolve_argument(event: &Event, arg: &str) -> Result<Momentum> {
    if let Ok(id) = arg.parse::<usize>() {
        return event
            .particle(id)
            .map(|p| p.momentum)
            .ok_or_else(|| Error::Event(format!("no particle with id {id}")));
    }
    let role = match arg {
        "ib1" => Role::IncomingBeam1,
        "ib2" => Role::IncomingBeam2,
        "pa1" => Role::Parton1,
        "pa2" => Role::Parton2,
        "im" => Role::Intermediate,
        "ob1" => Role::OutgoingBeam1,
        "ob2" => Role::OutgoingBeam2,
        "cs" => Role::CentralSystem,
        other => {
            return Err(Error::Event(format!(
                "unknown observable argument \"{other}\""
            )))
        }
    };
    Ok(event.momentum_with_role(role))
}

fn observable(name: &str, momentum: &Momentum) -> Option<f64> {
    Some(match name {
        "px" => momentum.px(),
        "py" => momentum.py(),
        "pz" => momentum.pz(),
        "p" => momentum.p(),
        "pt" => momentum.pt(),
        "e" | "energy" => momentum.energy(),
        "m" | "mass" => momentum.mass(),
        "eta" => momentum.eta(),
        "y" | "rapidity" => momentum.rapidity(),
        "phi" => momentum.phi(),
        _ => return None,
    })
}

/// A positive multiplicative reweighting of one kinematic observable.
#[derive(Clone)]
pub struct TamingFunction {
    variable: String,
    function: Arc<dyn Fn(f64) -> f64 + Send + Sync>,
}

impl TamingFunction {
    /// Pairs an observable name with its reweighting functional.
    #[must_use]
    pub fn new(variable: &str, function: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            variable: variable.to_owned(),
            function: Arc::new(function),
        }
    }

    /// Observable this function reweights.
    #[must_use]
    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// Evaluates the reweighting factor on an event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Event`] when the observable cannot be resolved.
    pub fn eval(&self, event: &Event) -> Result<f64> {
        Ok((self.function)(browse(event, &self.variable)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Status;
    use float_cmp::assert_approx_eq;

    fn one_muon_event() -> Event {
        let mut event = Event::new();
        let muon = event.add_particle(Role::CentralSystem).unwrap();
        muon.set_pdg_id(13, 1);
        muon.set_status(Status::FinalState);
        muon.set_momentum(Momentum::new(3.0, 4.0, 12.0, 13.1));
        event
    }

    #[test]
    fn role_and_id_arguments_agree() {
        let event = one_muon_event();
        assert_approx_eq!(
            f64,
            browse(&event, "pt(cs)").unwrap(),
            browse(&event, "pt(0)").unwrap(),
            ulps = 2
        );
        assert_approx_eq!(f64, browse(&event, "pt(cs)").unwrap(), 5.0, ulps = 2);
    }

    #[test]
    fn unknown_names_are_rejected() {
        let event = one_muon_event();
        assert!(browse(&event, "spin(cs)").is_err());
        assert!(browse(&event, "pt(nope)").is_err());
    }

    #[test]
    fn taming_applies_the_functional() {
        let event = one_muon_event();
        let taming = TamingFunction::new("pt(cs)", |pt| (-pt / 10.0).exp());
        assert_approx_eq!(f64, taming.eval(&event).unwrap(), (-0.5_f64).exp(), ulps = 4);
    }
}
