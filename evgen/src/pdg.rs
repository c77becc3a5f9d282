//! Particle properties database, seeded with the common particle content and
//! extensible from MCD-formatted particle data files.

use super::error::{Error, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{OnceLock, RwLock};
use tracing::debug;

/// Environment variable naming a colon-separated list of directories searched
/// for particle-data files and plug-in objects.
pub const SEARCH_PATH_VAR: &str = "EVGEN_DATA_PATH";

/// Integer-like PDG identifier (unsigned; the sign carries the charge and is
/// handled at the particle level).
pub type PdgId = u64;

/// A few identifiers used throughout the built-in modules.
pub mod ids {
    /// Electron.
    pub const ELECTRON: super::PdgId = 11;
    /// Muon.
    pub const MUON: super::PdgId = 13;
    /// Tau lepton.
    pub const TAU: super::PdgId = 15;
    /// Photon.
    pub const PHOTON: super::PdgId = 22;
    /// Proton.
    pub const PROTON: super::PdgId = 2212;
}

/// Collection of physics constants associated to a single particle species.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ParticleProperties {
    /// PDG identifier.
    pub pdgid: PdgId,
    /// Short name.
    pub name: String,
    /// Colour factor.
    pub colours: i32,
    /// Mass, in GeV/c².
    pub mass: f64,
    /// Decay width, in GeV/c².
    pub width: f64,
    /// Electric charges of the particle and antiparticle, in e/3.
    pub charges: Vec<i16>,
    /// Is the particle a fermion?
    pub fermion: bool,
}

impl ParticleProperties {
    /// Integer charge of the particle alternative, in e/3.
    #[must_use]
    pub fn integer_charge(&self) -> i16 {
        self.charges.first().copied().unwrap_or_default()
    }
}

/// The process-wide particle database.
#[derive(Debug, Default)]
pub struct ParticleDatabase {
    map: FxHashMap<PdgId, ParticleProperties>,
}

impl ParticleDatabase {
    fn seeded() -> Self {
        let mut db = Self::default();
        let quark = |id, name: &str, mass, charge| ParticleProperties {
            pdgid: id,
            name: name.to_owned(),
            colours: 3,
            mass,
            width: 0.0,
            charges: vec![charge, -charge],
            fermion: true,
        };
        let lepton = |id, name: &str, mass| ParticleProperties {
            pdgid: id,
            name: name.to_owned(),
            colours: 1,
            mass,
            width: 0.0,
            charges: vec![-3, 3],
            fermion: true,
        };
        for prop in [
            quark(1, "d", 0.0048, -1),
            quark(2, "u", 0.0023, 2),
            quark(3, "s", 0.095, -1),
            quark(4, "c", 1.29, 2),
            quark(5, "b", 4.18, -1),
            quark(6, "t", 172.44, 2),
            lepton(ids::ELECTRON, "e", 0.000510998928),
            lepton(ids::MUON, "mu", 0.1056583715),
            lepton(ids::TAU, "tau", 1.77682),
            ParticleProperties {
                pdgid: 21,
                name: "g".to_owned(),
                colours: 9,
                ..Default::default()
            },
            ParticleProperties {
                pdgid: ids::PHOTON,
                name: "gamma".to_owned(),
                colours: 1,
                ..Default::default()
            },
            ParticleProperties {
                pdgid: 23,
                name: "Z".to_owned(),
                colours: 1,
                mass: 91.1876,
                width: 2.4952,
                ..Default::default()
            },
            ParticleProperties {
                pdgid: 24,
                name: "W".to_owned(),
                colours: 1,
                mass: 80.385,
                width: 2.085,
                charges: vec![3, -3],
                ..Default::default()
            },
            ParticleProperties {
                pdgid: 211,
                name: "pi".to_owned(),
                colours: 1,
                mass: 0.13957018,
                charges: vec![3, -3],
                ..Default::default()
            },
            ParticleProperties {
                pdgid: ids::PROTON,
                name: "p".to_owned(),
                colours: 1,
                mass: 0.938272046,
                charges: vec![3, -3],
                fermion: true,
                ..Default::default()
            },
        ] {
            db.map.insert(prop.pdgid, prop);
        }
        db
    }

    /// Inserts or overrides a particle definition.
    pub fn define(&mut self, prop: ParticleProperties) {
        self.map.insert(prop.pdgid, prop);
    }

    /// Is this identifier known?
    #[must_use]
    pub fn has(&self, pdgid: PdgId) -> bool {
        self.map.contains_key(&pdgid)
    }

    /// Number of known species.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Is the database empty?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Full properties of one species.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kinematics`] for an unknown identifier.
    pub fn properties(&self, pdgid: PdgId) -> Result<&ParticleProperties> {
        self.map
            .get(&pdgid)
            .ok_or_else(|| Error::Kinematics(format!("unknown PDG id {pdgid}")))
    }

    /// Mass of one species, in GeV/c².
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kinematics`] for an unknown identifier.
    pub fn mass(&self, pdgid: PdgId) -> Result<f64> {
        Ok(self.properties(pdgid)?.mass)
    }
}

/// Shared handle on the process-wide database, seeded on first access.
pub fn database() -> &'static RwLock<ParticleDatabase> {
    static DATABASE: OnceLock<RwLock<ParticleDatabase>> = OnceLock::new();
    DATABASE.get_or_init(|| RwLock::new(ParticleDatabase::seeded()))
}

/// Mass lookup through the shared database.
///
/// # Errors
///
/// Returns [`Error::Kinematics`] for an unknown identifier.
///
/// # Panics
///
/// Panics if the database lock is poisoned.
pub fn mass(pdgid: PdgId) -> Result<f64> {
    database().read().unwrap().mass(pdgid)
}

/// Searches the [`SEARCH_PATH_VAR`] directories (falling back to the working
/// directory) for a data file.
#[must_use]
pub fn locate(filename: &str) -> Option<PathBuf> {
    let direct = PathBuf::from(filename);
    if direct.is_file() {
        return Some(direct);
    }
    let paths = env::var(SEARCH_PATH_VAR).unwrap_or_default();
    paths
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(dir).join(filename))
        .find(|path| path.is_file())
}

const MASS_BEG: usize = 32;
const WIDTH_BEG: usize = 69;
const AUX_BEG: usize = 106;

fn charge_from_str(charge: &str) -> Result<i16> {
    match charge {
        "-" => Ok(-3),
        "--" => Ok(-6),
        "+" => Ok(3),
        "++" => Ok(6),
        "0" => Ok(0),
        "-1/3" => Ok(-1),
        "-2/3" => Ok(-2),
        "+1/3" => Ok(1),
        "+2/3" => Ok(2),
        other => Err(Error::config(
            "mcd",
            format!("failed to retrieve an integer charge for string \"{other}\""),
        )),
    }
}

fn leading_f64(column: &str) -> f64 {
    column
        .split_whitespace()
        .next()
        .and_then(|word| word.parse().ok())
        .unwrap_or_default()
}

fn clip(line: &str, begin: usize, end: Option<usize>) -> &str {
    let clipped = line.get(begin..).unwrap_or_default();
    match end {
        Some(end) if end > begin => clipped.get(..end - begin).unwrap_or(clipped),
        _ => clipped,
    }
}

/// Parses an MCD-formatted (fixed-column) particle data file into the shared
/// database, returning the number of species defined.
///
/// # Errors
///
/// Returns [`Error::Configuration`] when the file cannot be read or a line is
/// malformed.
///
/// # Panics
///
/// Panics if the database lock is poisoned.
pub fn parse_mcd(path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|err| {
        Error::config(
            path.display().to_string(),
            format!("failed to read the MCD file: {err}"),
        )
    })?;
    let mut defined = 0;
    for line in content.lines() {
        // asterisk-prefixed lines are comments
        if line.starts_with('*') || line.trim().is_empty() {
            continue;
        }
        let pdg_ids: Vec<PdgId> = clip(line, 0, Some(MASS_BEG))
            .split_whitespace()
            .map(|word| {
                word.parse().map_err(|_| {
                    Error::config(
                        path.display().to_string(),
                        format!("invalid PDG id \"{word}\""),
                    )
                })
            })
            .collect::<Result<_>>()?;
        let mass = leading_f64(clip(line, MASS_BEG, Some(WIDTH_BEG)));
        let width = leading_f64(clip(line, WIDTH_BEG, Some(AUX_BEG)));
        let mut aux = clip(line, AUX_BEG, None).split_whitespace();
        let name = aux.next().unwrap_or_default().to_owned();
        let charges = aux
            .next()
            .unwrap_or_default()
            .split(',')
            .filter(|s| !s.is_empty())
            .map(charge_from_str)
            .collect::<Result<Vec<_>>>()?;
        if pdg_ids.len() != charges.len() {
            return Err(Error::config(
                path.display().to_string(),
                format!(
                    "invalid PDG ids / charges multiplicities: {} != {}",
                    pdg_ids.len(),
                    charges.len()
                ),
            ));
        }
        let mut db = database().write().unwrap();
        for (&pdgid, &charge) in pdg_ids.iter().zip(&charges) {
            let (colours, fermion) = match pdgid {
                1..=6 => (3, true),
                11..=16 => (1, true),
                21 => (9, false),
                _ => (1, false),
            };
            db.define(ParticleProperties {
                pdgid,
                name: name.clone(),
                colours,
                mass,
                width,
                charges: if charge == 0 {
                    vec![0]
                } else {
                    vec![charge, -charge]
                },
                fermion,
            });
            defined += 1;
        }
    }
    debug!(
        path = %path.display(),
        defined, "particle definitions loaded from MCD file"
    );
    Ok(defined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use std::io::Write;

    #[test]
    fn seeded_database_knows_the_basics() {
        let db = database().read().unwrap();
        assert_approx_eq!(f64, db.mass(ids::PROTON).unwrap(), 0.938272046, ulps = 2);
        assert!(db.properties(ids::MUON).unwrap().fermion);
        assert!(db.mass(999_999).is_err());
    }

    #[test]
    fn mcd_lines_are_sliced_by_column() {
        // column layout of the 2019 PDG "mass_width" file
        let line = format!(
            "{:<32}{:<37}{:<37}{}",
            "     13", "1.056584E-01 +6.0E-09 -6.0E-09", "3.0E-19 +1.0E-20 -1.0E-20", "mu -"
        );
        let mut file = tempfile_with(&line);
        let path = file.path().to_owned();
        file.flush().unwrap();
        let defined = parse_mcd(&path).unwrap();
        assert_eq!(defined, 1);
        let db = database().read().unwrap();
        let mu = db.properties(ids::MUON).unwrap();
        assert_approx_eq!(f64, mu.mass, 0.1056584, epsilon = 1e-7);
        assert_eq!(mu.integer_charge(), -3);
        assert_eq!(mu.name, "mu");
    }

    #[test]
    fn comment_lines_are_skipped() {
        let mut file = tempfile_with("* MASSES, WIDTHS, AND MC ID NUMBERS\n");
        file.flush().unwrap();
        assert_eq!(parse_mcd(file.path()).unwrap(), 0);
    }

    struct TempFile {
        path: PathBuf,
        file: fs::File,
    }

    impl TempFile {
        fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Write for TempFile {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.file.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.file.flush()
        }
    }

    impl Drop for TempFile {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.path);
        }
    }

    fn tempfile_with(content: &str) -> TempFile {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let path = env::temp_dir().join(format!(
            "evgen-mcd-{}-{}.txt",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        TempFile { path, file }
    }
}
