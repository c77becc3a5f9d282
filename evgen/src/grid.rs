//! The generation grid cache: the unit hypercube is discretised into M^N
//! equal cells, each remembering the largest weight ever observed inside it.

use super::convert::f64_from_usize;
use super::error::{Error, Result};
use super::process::MAX_DIM;
use arrayvec::ArrayVec;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info};

/// Number of cell subdivisions per dimension.
pub const M_BIN: usize = 3;
const INV_M_BIN: f64 = 1.0 / M_BIN as f64;

/// An N-tuple of per-dimension cell indices in [0, M).
pub type CellCoordinates = ArrayVec<u16, MAX_DIM>;

/// A monotonically updated f64, shared lock-free between workers: stale
/// reads only cost an extra rejection.
#[derive(Debug, Default)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    /// Raises the stored value to at least `value`.
    fn fetch_max(&self, value: f64) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                (value > f64::from_bits(bits)).then(|| value.to_bits())
            });
    }
}

/// Per-cell weight maxima and visit counts over the discretised hypercube,
/// plus the warmup bookkeeping.
pub struct GridParameters {
    ndim: usize,
    size: usize,
    coords: Vec<CellCoordinates>,
    f_max: Vec<AtomicF64>,
    num_visits: Vec<AtomicU64>,
    f_max_global: AtomicF64,
    prepared: AtomicBool,
}

impl GridParameters {
    /// Allocates the M^N cell tables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Generation`] when `ndim` is zero or larger than
    /// [`MAX_DIM`].
    pub fn new(ndim: usize) -> Result<Self> {
        if ndim == 0 || ndim > MAX_DIM {
            return Err(Error::Generation(format!(
                "grid dimension {ndim} outside the supported range [1, {MAX_DIM}]"
            )));
        }
        let size = M_BIN.pow(u32::try_from(ndim).unwrap());
        let coords = (0..size).map(|cell| Self::unpack(cell, ndim)).collect();
        Ok(Self {
            ndim,
            size,
            coords,
            f_max: (0..size).map(|_| AtomicF64::default()).collect(),
            num_visits: (0..size).map(|_| AtomicU64::new(0)).collect(),
            f_max_global: AtomicF64::default(),
            prepared: AtomicBool::new(false),
        })
    }

    fn unpack(cell: usize, ndim: usize) -> CellCoordinates {
        let mut coords = CellCoordinates::new();
        let mut rest = cell;
        for _ in 0..ndim {
            coords.push(u16::try_from(rest % M_BIN).unwrap());
            rest /= M_BIN;
        }
        coords
    }

    /// Number of cells, M^N.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Number of dimensions.
    #[must_use]
    pub const fn ndim(&self) -> usize {
        self.ndim
    }

    /// Per-dimension indices of a flat cell identifier.
    #[must_use]
    pub fn coordinates(&self, cell: usize) -> &CellCoordinates {
        &self.coords[cell]
    }

    /// Flat identifier of an N-tuple of per-dimension indices.
    #[must_use]
    pub fn pack_index(coords: &[u16]) -> usize {
        coords
            .iter()
            .rev()
            .fold(0, |flat, &c| flat * M_BIN + c as usize)
    }

    /// Cell identifier containing a hypercube point.
    #[must_use]
    pub fn cell_of(&self, x: &[f64]) -> usize {
        let coords: CellCoordinates = x
            .iter()
            .map(|&xi| {
                #[allow(clippy::cast_possible_truncation)]
                #[allow(clippy::cast_sign_loss)]
                let c = ((xi * f64_from_usize(M_BIN)) as usize).min(M_BIN - 1);
                u16::try_from(c).unwrap()
            })
            .collect();
        Self::pack_index(&coords)
    }

    /// Draws a point uniformly inside one cell.
    pub fn shoot<R: Rng>(&self, rng: &mut R, cell: usize, out: &mut [f64]) {
        for (x, &c) in out.iter_mut().zip(self.coords[cell].iter()) {
            *x = (rng.gen::<f64>() + f64::from(c)) * INV_M_BIN;
        }
    }

    /// Largest weight observed in one cell.
    #[must_use]
    pub fn f_max(&self, cell: usize) -> f64 {
        self.f_max[cell].load()
    }

    /// Raises the stored cell maximum to at least `value`.
    pub fn raise_f_max(&self, cell: usize, value: f64) {
        self.f_max[cell].fetch_max(value);
    }

    /// Largest weight observed anywhere.
    #[must_use]
    pub fn f_max_global(&self) -> f64 {
        self.f_max_global.load()
    }

    /// Raises the global maximum to at least `value`.
    pub fn raise_f_max_global(&self, value: f64) {
        self.f_max_global.fetch_max(value);
    }

    /// Counts one candidate drawn into `cell`, returning the updated count.
    pub fn add_visit(&self, cell: usize) -> u64 {
        self.num_visits[cell].fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Number of candidates drawn into `cell` so far.
    #[must_use]
    pub fn num_visits(&self, cell: usize) -> u64 {
        self.num_visits[cell].load(Ordering::Acquire)
    }

    /// Has the warmup completed?
    #[must_use]
    pub fn prepared(&self) -> bool {
        self.prepared.load(Ordering::Acquire)
    }

    /// Warmup: samples every cell `npoints` times through the generation
    /// evaluation path and records the per-cell weight maxima.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Generation`] when `npoints` is zero.
    pub fn prepare<F, R>(&mut self, func: &mut F, rng: &mut R, npoints: usize) -> Result<()>
    where
        F: FnMut(&[f64]) -> f64,
        R: Rng,
    {
        if npoints == 0 {
            return Err(Error::Generation(
                "cannot prepare the generation grid without sampling points".to_owned(),
            ));
        }
        info!(
            cells = self.size,
            points_per_cell = npoints,
            "preparing the grid for the generation of unweighted events"
        );
        let inv_npoints = 1.0 / f64_from_usize(npoints);
        let mut x = vec![0.0; self.ndim];
        let (mut sum, mut sum2, mut sum2p) = (0.0, 0.0, 0.0);
        for cell in 0..self.size {
            let (mut f_sum, mut f_sum2) = (0.0, 0.0);
            for _ in 0..npoints {
                self.shoot(rng, cell, &mut x);
                let z = func(&x);
                self.f_max[cell].fetch_max(z);
                f_sum += z;
                f_sum2 = z.mul_add(z, f_sum2);
            }
            let average = f_sum * inv_npoints;
            let average_sq = f_sum2 * inv_npoints;
            let dispersion_sq = average.mul_add(-average, average_sq);
            sum += average;
            sum2 += average_sq;
            sum2p += dispersion_sq;
            self.f_max_global.fetch_max(self.f_max[cell].load());
        }

        let cells = f64_from_usize(self.size);
        let sum = sum / cells;
        let sum2 = sum2 / cells;
        let sum2p = sum2p / cells;
        let global = self.f_max_global.load();
        let efficiency: f64 = if sum > 0.0 {
            self.f_max.iter().map(|m| m.load() / (cells * sum)).sum()
        } else {
            0.0
        };
        debug!(
            average = sum,
            dispersion = sum.mul_add(-sum, sum2).max(0.0).sqrt(),
            cell_dispersion = sum2p.max(0.0).sqrt(),
            maximum = global,
            average_inefficiency = efficiency,
            overall_inefficiency = if sum > 0.0 { global / sum } else { 0.0 },
            "generation grid characteristics"
        );
        if global <= 0.0 {
            return Err(Error::Generation(
                "the integrand vanished over every grid cell".to_owned(),
            ));
        }
        self.prepared.store(true, Ordering::Release);
        info!("grid prepared; now launching the production");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    #[test]
    fn cell_count_is_m_to_the_n() {
        assert_eq!(GridParameters::new(3).unwrap().size(), 27);
        assert_eq!(GridParameters::new(1).unwrap().size(), 3);
        assert!(GridParameters::new(0).is_err());
        assert!(GridParameters::new(MAX_DIM + 1).is_err());
    }

    #[test]
    fn shoot_stays_inside_the_cell() {
        let grid = GridParameters::new(4).unwrap();
        let mut rng = Pcg64::seed_from_u64(11);
        let mut x = vec![0.0; 4];
        for cell in 0..grid.size() {
            for _ in 0..16 {
                grid.shoot(&mut rng, cell, &mut x);
                assert_eq!(grid.cell_of(&x), cell);
            }
        }
    }

    #[test]
    fn warmup_tracks_the_maximum() {
        let mut grid = GridParameters::new(2).unwrap();
        let mut rng = Pcg64::seed_from_u64(5);
        let mut func = |x: &[f64]| x[0] + x[1];
        grid.prepare(&mut func, &mut rng, 200).unwrap();
        assert!(grid.prepared());
        let max_cells: f64 = (0..grid.size()).map(|c| grid.f_max(c)).fold(0.0, f64::max);
        assert!((grid.f_max_global() - max_cells).abs() < f64::EPSILON);
        // the top-right cell must dominate
        let top = GridParameters::pack_index(&[2, 2]);
        assert!((grid.f_max(top) - grid.f_max_global()).abs() < f64::EPSILON);
        assert!(grid.f_max_global() <= 2.0);
        assert!(grid.f_max_global() > 1.5);
    }

    proptest! {
        #[test]
        fn pack_unpack_roundtrip(cell in 0_usize..243) {
            let grid = GridParameters::new(5).unwrap();
            let coords = grid.coordinates(cell).clone();
            prop_assert!(coords.iter().all(|&c| (c as usize) < M_BIN));
            prop_assert_eq!(GridParameters::pack_index(&coords), cell);
        }
    }
}
