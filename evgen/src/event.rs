//! In-memory event record: an ordered, role-tagged particle list with
//! parentage, a frozen/mutable lifecycle and an intermediate-removal
//! compression.

use super::error::{Error, Result};
use super::momentum::Momentum;
use super::pdg::{self, PdgId};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Place of a particle in the hard process.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Role {
    /// First incoming beam.
    IncomingBeam1,
    /// Second incoming beam.
    IncomingBeam2,
    /// Parton radiated off the first beam.
    Parton1,
    /// Parton radiated off the second beam.
    Parton2,
    /// Two-parton intermediate system.
    Intermediate,
    /// First outgoing beam (or beam remnant).
    OutgoingBeam1,
    /// Second outgoing beam (or beam remnant).
    OutgoingBeam2,
    /// Centrally produced system.
    CentralSystem,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::IncomingBeam1 => "in.beam 1",
            Self::IncomingBeam2 => "in.beam 2",
            Self::Parton1 => "parton 1",
            Self::Parton2 => "parton 2",
            Self::Intermediate => "hard interm.",
            Self::OutgoingBeam1 => "out.beam 1",
            Self::OutgoingBeam2 => "out.beam 2",
            Self::CentralSystem => "central",
        })
    }
}

/// Evolution status of a particle.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Status {
    /// Incoming beam particle before any radiation.
    PrimordialIncoming,
    /// Incoming parton.
    Incoming,
    /// Internal propagator.
    Propagator,
    /// Stable, final-state particle.
    #[default]
    FinalState,
    /// Beam remnant awaiting fragmentation.
    Unfragmented,
    /// Fragmented beam remnant.
    Fragmented,
    /// Short-lived resonance.
    Resonance,
    /// Already-decayed particle.
    Decayed,
}

/// One particle of the event record.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Particle {
    id: usize,
    role: Role,
    /// Signed PDG identifier (the sign distinguishes the antiparticle).
    pub pdg_id: i64,
    /// Evolution status.
    pub status: Status,
    /// On-shell mass hypothesis, in GeV/c².
    pub mass: f64,
    /// Four-momentum, in GeV.
    pub momentum: Momentum,
    mothers: BTreeSet<usize>,
    daughters: BTreeSet<usize>,
}

impl Particle {
    fn new(id: usize, role: Role) -> Self {
        Self {
            id,
            role,
            pdg_id: 0,
            status: Status::default(),
            mass: 0.0,
            momentum: Momentum::default(),
            mothers: BTreeSet::new(),
            daughters: BTreeSet::new(),
        }
    }

    /// Stable identifier (insertion order).
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Role in the hard process.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Sets the species; `charge_sign` < 0 selects the antiparticle
    /// alternative. The mass hypothesis is refreshed from the particle
    /// database when the species is known.
    pub fn set_pdg_id(&mut self, pdgid: PdgId, charge_sign: i64) -> &mut Self {
        let sign = if charge_sign < 0 { -1 } else { 1 };
        self.pdg_id = sign * i64::try_from(pdgid).unwrap_or_default();
        if let Ok(mass) = pdg::mass(pdgid) {
            self.mass = mass;
        }
        self
    }

    /// Parent identifiers.
    #[must_use]
    pub const fn mothers(&self) -> &BTreeSet<usize> {
        &self.mothers
    }

    /// Child identifiers.
    #[must_use]
    pub const fn daughters(&self) -> &BTreeSet<usize> {
        &self.daughters
    }

    /// Sets the four-momentum.
    pub fn set_momentum(&mut self, momentum: Momentum) -> &mut Self {
        self.momentum = momentum;
        self
    }

    /// Sets the mass hypothesis.
    pub fn set_mass(&mut self, mass: f64) -> &mut Self {
        self.mass = mass;
        self
    }

    /// Sets the evolution status.
    pub fn set_status(&mut self, status: Status) -> &mut Self {
        self.status = status;
        self
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
struct Template {
    momentum: Momentum,
    status: Status,
    mass: f64,
}

/// The ordered particle list of one generated configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Event {
    particles: Vec<Particle>,
    frozen: bool,
    template: Vec<Template>,
    /// Statistical weight attached by the generation step.
    pub weight: f64,
}

impl Event {
    /// An empty, structurally mutable event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a particle with the next free identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Event`] when the event is frozen.
    pub fn add_particle(&mut self, role: Role) -> Result<&mut Particle> {
        if self.frozen {
            return Err(Error::Event(
                "cannot add a particle to a frozen event".to_owned(),
            ));
        }
        let id = self.particles.len();
        self.particles.push(Particle::new(id, role));
        Ok(self.particles.last_mut().unwrap())
    }

    /// Declares `mother` as a parent of `child`; the inverse daughter
    /// relation is maintained symmetrically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Event`] when the event is frozen, an identifier is
    /// unknown, or the mother does not precede the child.
    pub fn set_mother(&mut self, child: usize, mother: usize) -> Result<()> {
        if self.frozen {
            return Err(Error::Event(
                "cannot rewire parentage of a frozen event".to_owned(),
            ));
        }
        if child >= self.particles.len() || mother >= self.particles.len() {
            return Err(Error::Event(format!(
                "parentage refers to unknown particle ids ({mother} -> {child})"
            )));
        }
        if mother >= child {
            return Err(Error::Event(format!(
                "a mother id must precede its child id ({mother} -> {child})"
            )));
        }
        self.particles[child].mothers.insert(mother);
        self.particles[mother].daughters.insert(child);
        Ok(())
    }

    /// Number of stored particles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// Is the record empty?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// All particles, in insertion order.
    #[must_use]
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// One particle, by identifier.
    #[must_use]
    pub fn particle(&self, id: usize) -> Option<&Particle> {
        self.particles.get(id)
    }

    /// Mutable access to one particle (momentum/status/mass updates stay
    /// legal on a frozen event; structural edits go through the event API).
    #[must_use]
    pub fn particle_mut(&mut self, id: usize) -> Option<&mut Particle> {
        self.particles.get_mut(id)
    }

    /// All particles holding a given role.
    #[must_use]
    pub fn with_role(&self, role: Role) -> Vec<&Particle> {
        self.particles.iter().filter(|p| p.role == role).collect()
    }

    /// Identifiers of the particles holding a given role.
    #[must_use]
    pub fn ids_with_role(&self, role: Role) -> Vec<usize> {
        self.particles
            .iter()
            .filter(|p| p.role == role)
            .map(|p| p.id)
            .collect()
    }

    /// The single particle holding a given role.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Event`] unless exactly one particle holds `role`.
    pub fn one_with_role(&self, role: Role) -> Result<&Particle> {
        let matches = self.ids_with_role(role);
        match matches.as_slice() {
            [id] => Ok(&self.particles[*id]),
            [] => Err(Error::Event(format!("no particle with role {role}"))),
            _ => Err(Error::Event(format!(
                "{} particles with role {role}, expected exactly one",
                matches.len()
            ))),
        }
    }

    /// Mutable variant of [`Self::one_with_role`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Event`] unless exactly one particle holds `role`.
    pub fn one_with_role_mut(&mut self, role: Role) -> Result<&mut Particle> {
        let matches = self.ids_with_role(role);
        match matches.as_slice() {
            [id] => Ok(&mut self.particles[*id]),
            [] => Err(Error::Event(format!("no particle with role {role}"))),
            _ => Err(Error::Event(format!(
                "{} particles with role {role}, expected exactly one",
                matches.len()
            ))),
        }
    }

    /// Combined four-momentum of every particle holding a role.
    #[must_use]
    pub fn momentum_with_role(&self, role: Role) -> Momentum {
        self.with_role(role)
            .into_iter()
            .fold(Momentum::default(), |sum, p| sum + p.momentum)
    }

    /// Has [`Self::freeze`] been called?
    #[must_use]
    pub const fn frozen(&self) -> bool {
        self.frozen
    }

    /// Locks the structure (particle list and parentage) and snapshots the
    /// kinematic template [`Self::restore`] rolls back to.
    pub fn freeze(&mut self) {
        self.template = self
            .particles
            .iter()
            .map(|p| Template {
                momentum: p.momentum,
                status: p.status,
                mass: p.mass,
            })
            .collect();
        self.frozen = true;
    }

    /// Resets momenta, statuses and masses to the frozen template without
    /// reallocating.
    pub fn restore(&mut self) {
        for (particle, template) in self.particles.iter_mut().zip(&self.template) {
            particle.momentum = template.momentum;
            particle.status = template.status;
            particle.mass = template.mass;
        }
        self.weight = 0.0;
    }

    /// Returns a copy stripped down to the primordial incoming and
    /// final-state particles, with parentage rewritten to the closest kept
    /// ancestor.
    #[must_use]
    pub fn compressed(&self) -> Self {
        let kept: Vec<usize> = self
            .particles
            .iter()
            .filter(|p| {
                matches!(p.status, Status::PrimordialIncoming | Status::FinalState)
            })
            .map(|p| p.id)
            .collect();
        let remap: std::collections::HashMap<usize, usize> = kept
            .iter()
            .enumerate()
            .map(|(new_id, &old_id)| (old_id, new_id))
            .collect();
        let mut out = Self::new();
        for &old_id in &kept {
            let old = &self.particles[old_id];
            let particle = out.add_particle(old.role).unwrap();
            particle.pdg_id = old.pdg_id;
            particle.status = old.status;
            particle.mass = old.mass;
            particle.momentum = old.momentum;
        }
        for &old_id in &kept {
            let new_child = remap[&old_id];
            for ancestor in self.kept_ancestors(old_id, &remap) {
                // self-parentage can show up when a kept particle is its own
                // closest kept ancestor through a loop; skip it
                if ancestor != old_id {
                    out.set_mother(new_child, remap[&ancestor]).unwrap();
                }
            }
        }
        out.weight = self.weight;
        out
    }

    /// Closest ancestors of `id` present in `remap`, walking through removed
    /// intermediates.
    fn kept_ancestors(
        &self,
        id: usize,
        remap: &std::collections::HashMap<usize, usize>,
    ) -> BTreeSet<usize> {
        let mut found = BTreeSet::new();
        let mut stack: Vec<usize> = self.particles[id].mothers.iter().copied().collect();
        while let Some(mother) = stack.pop() {
            if remap.contains_key(&mother) {
                found.insert(mother);
            } else {
                stack.extend(self.particles[mother].mothers.iter().copied());
            }
        }
        found
    }

    /// Human-readable record used by the periodic generation printout.
    #[must_use]
    pub fn dump(&self) -> String {
        let mut out = format!("event content ({} particles):\n", self.particles.len());
        for p in &self.particles {
            out.push_str(&format!(
                "  [{:2}] {:>12} pdg={:>6} status={:?} m={:.4} {} mothers=({})\n",
                p.id,
                p.role.to_string(),
                p.pdg_id,
                p.status,
                p.mass,
                p.momentum,
                p.mothers.iter().join(","),
            ));
        }
        out
    }
}

/// Canonical particle roster of a two-beam central-production process:
/// beams, radiated partons, their merged intermediate system, outgoing beams
/// and the central-system placeholders.
///
/// # Errors
///
/// Returns [`Error::Event`] if the event already carries content.
pub fn build_content(
    event: &mut Event,
    incoming: &[(Role, i64)],
    outgoing: &[(Role, Vec<i64>)],
) -> Result<()> {
    if !event.is_empty() {
        return Err(Error::Event(
            "event content already declared".to_owned(),
        ));
    }
    for &(role, pdg_id) in incoming {
        let status = match role {
            Role::IncomingBeam1 | Role::IncomingBeam2 => Status::PrimordialIncoming,
            Role::Intermediate => Status::Propagator,
            _ => Status::Incoming,
        };
        let particle = event.add_particle(role)?;
        particle.pdg_id = pdg_id;
        particle.status = status;
        if let Ok(mass) = pdg::mass(pdg_id.unsigned_abs()) {
            particle.mass = mass;
        }
    }
    for (role, pdg_ids) in outgoing {
        for &pdg_id in pdg_ids {
            let status = match role {
                Role::OutgoingBeam1 | Role::OutgoingBeam2 => Status::Unfragmented,
                _ => Status::FinalState,
            };
            let particle = event.add_particle(*role)?;
            particle.pdg_id = pdg_id;
            particle.status = status;
            if let Ok(mass) = pdg::mass(pdg_id.unsigned_abs()) {
                particle.mass = mass;
            }
        }
    }
    // standard parentage of the roster
    let one = |event: &Event, role| event.ids_with_role(role).first().copied();
    let links: Vec<(Option<usize>, Option<usize>)> = vec![
        (one(event, Role::IncomingBeam1), one(event, Role::Parton1)),
        (one(event, Role::IncomingBeam2), one(event, Role::Parton2)),
        (one(event, Role::IncomingBeam1), one(event, Role::OutgoingBeam1)),
        (one(event, Role::IncomingBeam2), one(event, Role::OutgoingBeam2)),
        (one(event, Role::Parton1), one(event, Role::Intermediate)),
        (one(event, Role::Parton2), one(event, Role::Intermediate)),
    ];
    for (mother, child) in links.into_iter().flat_map(|(m, c)| m.zip(c)) {
        event.set_mother(child, mother)?;
    }
    if let Some(intermediate) = one(event, Role::Intermediate) {
        for child in event.ids_with_role(Role::CentralSystem) {
            event.set_mother(child, intermediate)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdg::ids;

    fn two_to_two() -> Event {
        let mut event = Event::new();
        build_content(
            &mut event,
            &[
                (Role::IncomingBeam1, 2212),
                (Role::IncomingBeam2, 2212),
                (Role::Parton1, 22),
                (Role::Parton2, 22),
                (Role::Intermediate, 22),
            ],
            &[
                (Role::OutgoingBeam1, vec![2212]),
                (Role::OutgoingBeam2, vec![2212]),
                (Role::CentralSystem, vec![13, -13]),
            ],
        )
        .unwrap();
        event
    }

    #[test]
    fn roster_has_mutual_parentage() {
        let event = two_to_two();
        for particle in event.particles() {
            for &mother in particle.mothers() {
                assert!(mother < particle.id());
                assert!(event.particle(mother).unwrap().daughters().contains(&particle.id()));
            }
            for &daughter in particle.daughters() {
                assert!(event.particle(daughter).unwrap().mothers().contains(&particle.id()));
            }
        }
        // every non-primordial particle has at least one parent
        for particle in event.particles() {
            if particle.status != Status::PrimordialIncoming {
                assert!(!particle.mothers().is_empty(), "particle {}", particle.id());
            }
        }
    }

    #[test]
    fn role_index_is_consistent() {
        let event = two_to_two();
        assert_eq!(event.with_role(Role::CentralSystem).len(), 2);
        assert!(event.one_with_role(Role::CentralSystem).is_err());
        assert_eq!(event.one_with_role(Role::Intermediate).unwrap().id(), 4);
        let total: usize = [
            Role::IncomingBeam1,
            Role::IncomingBeam2,
            Role::Parton1,
            Role::Parton2,
            Role::Intermediate,
            Role::OutgoingBeam1,
            Role::OutgoingBeam2,
            Role::CentralSystem,
        ]
        .into_iter()
        .map(|role| event.with_role(role).len())
        .sum();
        assert_eq!(total, event.len());
    }

    #[test]
    fn freeze_then_restore_recovers_the_template() {
        let mut event = two_to_two();
        event.freeze();
        let before: Vec<_> = event
            .particles()
            .iter()
            .map(|p| (p.momentum, p.status))
            .collect();

        for id in 0..event.len() {
            let particle = event.particle_mut(id).unwrap();
            particle.set_momentum(Momentum::new(1.0, 2.0, 3.0, 4.0));
            particle.set_status(Status::Decayed);
        }
        assert!(event.add_particle(Role::CentralSystem).is_err());

        event.restore();
        let after: Vec<_> = event
            .particles()
            .iter()
            .map(|p| (p.momentum, p.status))
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn compression_keeps_primordial_and_final_state() {
        let mut event = two_to_two();
        // promote the outgoing beams to final state, as an elastic process
        // would
        for role in [Role::OutgoingBeam1, Role::OutgoingBeam2] {
            event.one_with_role_mut(role).unwrap().set_status(Status::FinalState);
        }
        let compressed = event.compressed();
        assert_eq!(compressed.len(), 6);
        // the central muons now point straight back at the beams
        for muon in compressed.with_role(Role::CentralSystem) {
            assert!(!muon.mothers().is_empty());
            for &mother in muon.mothers() {
                assert_eq!(
                    compressed.particle(mother).unwrap().status,
                    Status::PrimordialIncoming
                );
            }
        }
    }

    #[test]
    fn pdg_sign_carries_the_charge() {
        let mut event = Event::new();
        let particle = event.add_particle(Role::CentralSystem).unwrap();
        particle.set_pdg_id(ids::MUON, -1);
        assert_eq!(particle.pdg_id, -13);
        assert!(particle.mass > 0.1 && particle.mass < 0.11);
    }
}
