//! Four-momentum container with the kinematic conveniences needed by the
//! processes and cut layers. All components are expressed in GeV.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// A four-component momentum (px, py, pz, E) with a cached three-momentum
/// norm, kept consistent after every mutation.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Momentum {
    px: f64,
    py: f64,
    pz: f64,
    energy: f64,
    p: f64,
}

impl Momentum {
    /// Builds from Cartesian components and energy.
    #[must_use]
    pub fn new(px: f64, py: f64, pz: f64, energy: f64) -> Self {
        let mut mom = Self {
            px,
            py,
            pz,
            energy,
            p: 0.0,
        };
        mom.compute_p();
        mom
    }

    /// Builds from transverse momentum, pseudorapidity, azimuthal angle and
    /// energy.
    #[must_use]
    pub fn from_pt_eta_phi(pt: f64, eta: f64, phi: f64, energy: f64) -> Self {
        Self::new(pt * phi.cos(), pt * phi.sin(), pt * eta.sinh(), energy)
    }

    /// Builds from the momentum norm, polar angle, azimuthal angle and
    /// energy.
    #[must_use]
    pub fn from_p_theta_phi(p: f64, theta: f64, phi: f64, energy: f64) -> Self {
        Self::new(
            p * theta.sin() * phi.cos(),
            p * theta.sin() * phi.sin(),
            p * theta.cos(),
            energy,
        )
    }

    /// Builds from Cartesian components.
    #[must_use]
    pub fn from_px_py_pz_e(px: f64, py: f64, pz: f64, energy: f64) -> Self {
        Self::new(px, py, pz, energy)
    }

    fn compute_p(&mut self) {
        self.p = self.px.hypot(self.py).hypot(self.pz);
    }

    /// Horizontal component.
    #[must_use]
    pub const fn px(&self) -> f64 {
        self.px
    }

    /// Vertical component.
    #[must_use]
    pub const fn py(&self) -> f64 {
        self.py
    }

    /// Longitudinal component.
    #[must_use]
    pub const fn pz(&self) -> f64 {
        self.pz
    }

    /// Energy component.
    #[must_use]
    pub const fn energy(&self) -> f64 {
        self.energy
    }

    /// Three-momentum norm.
    #[must_use]
    pub const fn p(&self) -> f64 {
        self.p
    }

    /// Squared three-momentum norm.
    #[must_use]
    pub fn p2(&self) -> f64 {
        self.p * self.p
    }

    /// Replaces the three-momentum, keeping the energy.
    pub fn set_momentum(&mut self, px: f64, py: f64, pz: f64) -> &mut Self {
        self.px = px;
        self.py = py;
        self.pz = pz;
        self.compute_p();
        self
    }

    /// Replaces the energy component.
    pub fn set_energy(&mut self, energy: f64) -> &mut Self {
        self.energy = energy;
        self
    }

    /// Recomputes the energy from the current three-momentum and an on-shell
    /// mass hypothesis.
    pub fn set_mass(&mut self, mass: f64) -> &mut Self {
        self.energy = mass.mul_add(mass, self.p2()).sqrt();
        self
    }

    /// Squared invariant mass; negative for space-like momenta.
    #[must_use]
    pub fn mass2(&self) -> f64 {
        self.energy * self.energy - self.p2()
    }

    /// Invariant mass; negative by convention when the squared mass is
    /// negative.
    #[must_use]
    pub fn mass(&self) -> f64 {
        let m2 = self.mass2();
        if m2 >= 0.0 {
            m2.sqrt()
        } else {
            -(-m2).sqrt()
        }
    }

    /// Transverse momentum.
    #[must_use]
    pub fn pt(&self) -> f64 {
        self.px.hypot(self.py)
    }

    /// Squared transverse momentum.
    #[must_use]
    pub fn pt2(&self) -> f64 {
        self.px.mul_add(self.px, self.py * self.py)
    }

    /// Azimuthal angle in (−π, π].
    #[must_use]
    pub fn phi(&self) -> f64 {
        self.py.atan2(self.px)
    }

    /// Polar angle in [0, π].
    #[must_use]
    pub fn theta(&self) -> f64 {
        self.pt().atan2(self.pz)
    }

    /// Pseudorapidity, signed like the longitudinal component.
    #[must_use]
    pub fn eta(&self) -> f64 {
        let pt = self.pt();
        if pt == 0.0 {
            return self.pz.signum() * f64::INFINITY;
        }
        ((self.p + self.pz.abs()) / pt).ln() * self.pz.signum()
    }

    /// Rapidity.
    #[must_use]
    pub fn rapidity(&self) -> f64 {
        0.5 * ((self.energy + self.pz) / (self.energy - self.pz)).ln()
    }

    /// Scalar product of the three-momentum parts.
    #[must_use]
    pub fn three_product(&self, other: &Self) -> f64 {
        self.px
            .mul_add(other.px, self.py.mul_add(other.py, self.pz * other.pz))
    }

    /// Minkowski product with signature (+, −, −, −).
    #[must_use]
    pub fn four_product(&self, other: &Self) -> f64 {
        self.energy * other.energy - self.three_product(other)
    }

    /// Boosts this momentum by the velocity of `frame`, i.e. transports a
    /// momentum expressed in the rest frame of `frame` into the frame where
    /// `frame` itself is measured.
    pub fn lorentz_boost(&mut self, frame: &Self) -> &mut Self {
        if frame.p == 0.0 {
            return self;
        }
        let mass = frame.mass();
        if mass <= 0.0 {
            return self;
        }
        let boosted_energy = (self.energy * frame.energy + self.three_product(frame)) / mass;
        let factor = (boosted_energy + self.energy) / (frame.energy + mass);
        self.px = factor.mul_add(frame.px, self.px);
        self.py = factor.mul_add(frame.py, self.py);
        self.pz = factor.mul_add(frame.pz, self.pz);
        self.energy = boosted_energy;
        self.compute_p();
        self
    }

    /// Rotates the transverse components by `phi`; `sign` flips the rotation
    /// orientation.
    pub fn rotate_phi(&mut self, phi: f64, sign: f64) -> &mut Self {
        let (sin, cos) = phi.sin_cos();
        let px = self.px.mul_add(cos, sign * self.py * sin);
        let py = sign.mul_add(self.py * cos, -(self.px * sin));
        self.px = px;
        self.py = py;
        self
    }

    /// Applies the rotation carrying the z axis onto the (θ, φ) direction.
    pub fn rotate_theta_phi(&mut self, theta: f64, phi: f64) -> &mut Self {
        let (sin_t, cos_t) = theta.sin_cos();
        let (sin_p, cos_p) = phi.sin_cos();
        let (px, py, pz) = (self.px, self.py, self.pz);
        self.px = cos_t.mul_add(cos_p * px, -(sin_p * py)) + sin_t * cos_p * pz;
        self.py = cos_t.mul_add(sin_p * px, cos_p * py) + sin_t * sin_p * pz;
        self.pz = (-sin_t).mul_add(px, cos_t * pz);
        self.compute_p();
        self
    }

    /// Flips the longitudinal component.
    pub fn mirror_z(&mut self) -> &mut Self {
        self.pz = -self.pz;
        self
    }
}

impl Add for Momentum {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(
            self.px + other.px,
            self.py + other.py,
            self.pz + other.pz,
            self.energy + other.energy,
        )
    }
}

impl AddAssign for Momentum {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Sub for Momentum {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(
            self.px - other.px,
            self.py - other.py,
            self.pz - other.pz,
            self.energy - other.energy,
        )
    }
}

impl SubAssign for Momentum {
    fn sub_assign(&mut self, other: Self) {
        *self = *self - other;
    }
}

impl Neg for Momentum {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.px, -self.py, -self.pz, -self.energy)
    }
}

impl Mul<Momentum> for f64 {
    type Output = Momentum;

    fn mul(self, mom: Momentum) -> Momentum {
        Momentum::new(self * mom.px, self * mom.py, self * mom.pz, self * mom.energy)
    }
}

impl fmt::Display for Momentum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(E={:.4}, px={:.4}, py={:.4}, pz={:.4})",
            self.energy, self.px, self.py, self.pz
        )
    }
}
