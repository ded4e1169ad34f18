use std::collections::BTreeMap;
use std::io::Write;
use std::ops::Bound::{
    Excluded,
    Unbounded,
};
use std::path::Path;
use std::time::Duration;

use serde::{
    Deserialize,
    Serialize,
};
use tracing::debug;

use super::master_peak::MasterPeak;
use super::peak::{
    MAX_MZ,
    Peak,
    PeakLike,
};
use super::summary::MergeSummary;
use super::tolerance::{
    MzTolerance,
    ToleranceFunction,
};
use crate::errors::{
    ClusteringError,
    DataIoError,
};
use crate::utils::cancellation::GroupBudget;

/// How often (in insertions) the budget of a load is checked.
const BUDGET_CHECK_INTERVAL: usize = 1024;

/// Charge bucket used when charges are ignored.
pub const DEFAULT_CHARGE: u8 = 0;

/// Handle of a master peak inside the spectrum arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeakId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

/// Where the second master peak of a three way merge lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighbor {
    SameBin(Direction),
    AdjacentBin(Direction),
}

/// Result of looking up a peak in its bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Nothing in the bin contains the peak. `neighbor` is set when the
    /// edge master peak of the bin to that side does.
    NoMatch { neighbor: Option<Direction> },
    /// The master peak at `index` of the bin contains the peak.
    /// `extra_merge` is set when a second master peak contains it too.
    Match {
        index: usize,
        extra_merge: Option<Neighbor>,
    },
}

type Bins = BTreeMap<i64, Vec<PeakId>>;

/// One row of the flattened spectrum.
///
/// Column names follow the historical table layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterPeakRecord {
    pub mz: f64,
    pub intensity: f64,
    pub counts: u32,
    #[serde(rename = "left border")]
    pub left: f64,
    #[serde(rename = "right border")]
    pub right: f64,
    #[serde(rename = "start_mz")]
    pub mz_origin: f64,
    #[serde(rename = "ms1_charge")]
    pub charge: u8,
    pub rel_intensity_ratio: f64,
    pub counts_ratio: f64,
}

impl MasterPeakRecord {
    fn new(charge: u8, mp: &MasterPeak) -> Self {
        Self {
            mz: mp.mz(),
            intensity: mp.intensity(),
            counts: mp.counts(),
            left: mp.left(),
            right: mp.right(),
            mz_origin: mp.mz_origin(),
            charge,
            rel_intensity_ratio: mp.rel_intensity_ratio(),
            counts_ratio: mp.counts_ratio(),
        }
    }
}

/// Incremental clustering of peaks into master peaks.
///
/// Master peaks live in an arena, the spectrum itself is a two level
/// ordered map `charge -> bin key -> [ids sorted by left border]`
/// where the bin key is `ceil(left)`. Binning keeps every lookup to
/// a handful of candidates.
///
/// After every [MasterSpectrum::add] the windows of all master peaks
/// of a charge are pairwise non overlapping (touching is allowed).
///
/// Insertion order matters, merge decisions depend on what is already
/// in the spectrum, so peaks of one spectrum must be added sequentially.
///
/// ```
/// use timscombine::MasterSpectrum;
///
/// let mut ms = MasterSpectrum::default(); // 40 ppm
/// ms.load_from_tims(&[100.0, 100.0004, 200.0], &[0.5, 0.5, 1.0], true)
///     .unwrap();
/// assert_eq!(ms.len(), 2);
/// assert_eq!(ms.merged(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MasterSpectrum<T: ToleranceFunction = MzTolerance> {
    tolerance: T,
    arena: Vec<Option<MasterPeak>>,
    /// Creation order of the master peak in each arena slot.
    births: Vec<u64>,
    next_birth: u64,
    free_slots: Vec<usize>,
    spectrum: BTreeMap<u8, Bins>,
    inserted: usize,
    merged: usize,
    appended: usize,
    multimerged: usize,
    cascaded: usize,
}

impl Default for MasterSpectrum<MzTolerance> {
    fn default() -> Self {
        Self::new(MzTolerance::default())
    }
}

impl<T: ToleranceFunction> MasterSpectrum<T> {
    pub fn new(tolerance: T) -> Self {
        Self {
            tolerance,
            arena: Vec::new(),
            births: Vec::new(),
            next_birth: 0,
            free_slots: Vec::new(),
            spectrum: BTreeMap::new(),
            inserted: 0,
            merged: 0,
            appended: 0,
            multimerged: 0,
            cascaded: 0,
        }
    }

    pub fn tolerance(&self) -> &T {
        &self.tolerance
    }

    /// Number of master peaks across all charges.
    pub fn len(&self) -> usize {
        self.arena.len() - self.free_slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Peaks that were merged into a single existing master peak.
    pub fn merged(&self) -> usize {
        self.merged
    }

    /// Peaks that started a new master peak.
    pub fn appended(&self) -> usize {
        self.appended
    }

    /// Insertions that merged three master peaks in one step.
    pub fn multimerged(&self) -> usize {
        self.multimerged
    }

    /// Merges done to remove window overlap after an insertion.
    pub fn cascaded(&self) -> usize {
        self.cascaded
    }

    pub fn summary(&self, elapsed: Duration) -> MergeSummary {
        MergeSummary {
            input_peaks: self.inserted,
            output_peaks: self.len(),
            merged: self.merged,
            appended: self.appended,
            multimerged: self.multimerged,
            cascaded: self.cascaded,
            elapsed,
        }
    }

    /// Builds a peak with this spectrum's tolerance.
    pub fn make_peak(&self, mz: f64, intensity: f64) -> Result<Peak, ClusteringError> {
        Peak::new(mz, intensity, &self.tolerance)
    }

    /// Bin keys in use for a charge, ascending.
    pub fn bin_keys(&self, charge: u8) -> Vec<i64> {
        self.spectrum
            .get(&charge)
            .map(|bins| bins.keys().copied().collect())
            .unwrap_or_default()
    }

    /// All master peaks ordered by charge, then left border.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &MasterPeak)> + '_ {
        self.iter_ids().map(|(charge, id)| (charge, self.peak(id)))
    }

    fn iter_ids(&self) -> impl Iterator<Item = (u8, PeakId)> + '_ {
        self.spectrum.iter().flat_map(|(&charge, bins)| {
            bins.values()
                .flat_map(move |bin| bin.iter().map(move |&id| (charge, id)))
        })
    }

    fn peak(&self, id: PeakId) -> &MasterPeak {
        self.arena[id.0]
            .as_ref()
            .expect("peak ids in the spectrum always point to live slots")
    }

    fn bin(&self, charge: u8, key: i64) -> &[PeakId] {
        self.spectrum
            .get(&charge)
            .and_then(|bins| bins.get(&key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Looks up which master peak (if any) should receive `peak`.
    ///
    /// Only the bin of the peak and the edges of the two bins next to it
    /// are inspected. Containment is strict, a peak exactly on a border
    /// is not claimed by that master peak.
    pub fn search<P: PeakLike + ?Sized>(&self, peak: &P, charge: u8) -> SearchOutcome {
        let Some(bins) = self.spectrum.get(&charge) else {
            return SearchOutcome::NoMatch { neighbor: None };
        };
        let key = peak.key();
        let bin = self.bin(charge, key);

        let mut imin: isize = 0;
        let mut imax: isize = bin.len() as isize - 1;
        while imin <= imax {
            let imid = (imin + imax + 1) / 2;
            let mp = self.peak(bin[imid as usize]);
            if mp.greater(peak) || mp.left() == peak.mz() {
                imax = imid - 1;
            } else if mp.smaller(peak) || mp.right() == peak.mz() {
                imin = imid + 1;
            } else {
                let index = imid as usize;
                return SearchOutcome::Match {
                    index,
                    extra_merge: self.extra_merge(bins, key, bin, index, peak.mz()),
                };
            }
        }

        SearchOutcome::NoMatch {
            neighbor: self.adjacent_match(bins, key, peak.mz()),
        }
    }

    fn adjacent_match(&self, bins: &Bins, key: i64, mz: f64) -> Option<Direction> {
        let left_edge = bins.get(&(key - 1)).and_then(|b| b.last());
        if let Some(&id) = left_edge {
            if self.peak(id).is_inside_mz(mz) {
                return Some(Direction::Left);
            }
        }
        let right_edge = bins.get(&(key + 1)).and_then(|b| b.first());
        if let Some(&id) = right_edge {
            if self.peak(id).is_inside_mz(mz) {
                return Some(Direction::Right);
            }
        }
        None
    }

    fn extra_merge(
        &self,
        bins: &Bins,
        key: i64,
        bin: &[PeakId],
        index: usize,
        mz: f64,
    ) -> Option<Neighbor> {
        if index > 0 {
            if self.peak(bin[index - 1]).is_inside_mz(mz) {
                return Some(Neighbor::SameBin(Direction::Left));
            }
        } else if let Some(Direction::Left) = self.adjacent_match(bins, key, mz) {
            return Some(Neighbor::AdjacentBin(Direction::Left));
        }

        if index + 1 < bin.len() {
            if self.peak(bin[index + 1]).is_inside_mz(mz) {
                return Some(Neighbor::SameBin(Direction::Right));
            }
        } else {
            let right_edge = bins.get(&(key + 1)).and_then(|b| b.first());
            if let Some(&id) = right_edge {
                if self.peak(id).is_inside_mz(mz) {
                    return Some(Neighbor::AdjacentBin(Direction::Right));
                }
            }
        }
        None
    }

    fn adjacent_edge(&self, charge: u8, key: i64, direction: Direction) -> PeakId {
        let edge = match direction {
            Direction::Left => self.bin(charge, key - 1).last(),
            Direction::Right => self.bin(charge, key + 1).first(),
        };
        *edge.expect("search only reports neighbors that exist")
    }

    fn neighbor_id(&self, charge: u8, key: i64, index: usize, neighbor: Neighbor) -> PeakId {
        match neighbor {
            Neighbor::SameBin(Direction::Left) => self.bin(charge, key)[index - 1],
            Neighbor::SameBin(Direction::Right) => self.bin(charge, key)[index + 1],
            Neighbor::AdjacentBin(direction) => self.adjacent_edge(charge, key, direction),
        }
    }

    /// Adds a peak to the spectrum (charge `0` pools everything).
    ///
    /// Either a new master peak is appended, or the peak is merged into
    /// the master peak whose window contains it (and into a second one
    /// if that one contains it as well). Merged master peaks are moved
    /// to the bin of their new key. Finally any window overlap with the
    /// adjacent master peaks is merged away.
    pub fn add(&mut self, peak: Peak, charge: u8) -> Result<(), ClusteringError> {
        let key = peak.key();
        let touched = match self.search(&peak, charge) {
            SearchOutcome::NoMatch { neighbor: None } => {
                let mp = MasterPeak::new(&peak, &self.tolerance)?;
                let id = self.alloc(mp);
                self.file(charge, id);
                self.appended += 1;
                id
            }
            SearchOutcome::NoMatch {
                neighbor: Some(direction),
            } => {
                let id = self.adjacent_edge(charge, key, direction);
                let id = self.merge_into(charge, id, None, Some(&peak))?;
                self.merged += 1;
                id
            }
            SearchOutcome::Match {
                index,
                extra_merge: None,
            } => {
                let id = self.bin(charge, key)[index];
                let id = self.merge_into(charge, id, None, Some(&peak))?;
                self.merged += 1;
                id
            }
            SearchOutcome::Match {
                index,
                extra_merge: Some(neighbor),
            } => {
                let id = self.bin(charge, key)[index];
                let other = self.neighbor_id(charge, key, index, neighbor);
                let id = self.merge_into(charge, id, Some(other), Some(&peak))?;
                self.multimerged += 1;
                id
            }
        };
        self.inserted += 1;

        let survivor = self.resolve_overlaps(charge, touched)?;
        self.check_neighborhood(charge, survivor)
    }

    fn alloc(&mut self, mp: MasterPeak) -> PeakId {
        let birth = self.next_birth;
        self.next_birth += 1;
        match self.free_slots.pop() {
            Some(slot) => {
                self.arena[slot] = Some(mp);
                self.births[slot] = birth;
                PeakId(slot)
            }
            None => {
                self.arena.push(Some(mp));
                self.births.push(birth);
                PeakId(self.arena.len() - 1)
            }
        }
    }

    fn release(&mut self, id: PeakId) {
        self.arena[id.0] = None;
        self.free_slots.push(id.0);
    }

    /// Inserts the id in the bin matching the current key of its master peak.
    fn file(&mut self, charge: u8, id: PeakId) {
        let arena = &self.arena;
        let mp = arena[id.0]
            .as_ref()
            .expect("filed peak ids always point to live slots");
        let bin = self
            .spectrum
            .entry(charge)
            .or_default()
            .entry(mp.key())
            .or_default();
        let pos = bin.partition_point(|other| {
            arena[other.0]
                .as_ref()
                .is_some_and(|o| o.left() <= mp.left())
        });
        bin.insert(pos, id);
    }

    /// Removes the id from its bin, dropping the bin if it ends up empty.
    fn unfile(&mut self, charge: u8, id: PeakId) {
        let key = self.peak(id).key();
        let Some(bins) = self.spectrum.get_mut(&charge) else {
            return;
        };
        if let Some(bin) = bins.get_mut(&key) {
            if let Some(pos) = bin.iter().position(|x| *x == id) {
                bin.remove(pos);
            }
            if bin.is_empty() {
                bins.remove(&key);
            }
        }
    }

    /// Folds `absorbed` (if any) and then `incoming` (if any) into one
    /// master peak and refiles it under its new key.
    ///
    /// Of two master peaks the older one survives, so the result keeps the
    /// `mz_origin` of whichever cluster was started first. Returns the id
    /// of the survivor. On error the spectrum is left untouched.
    fn merge_into(
        &mut self,
        charge: u8,
        target: PeakId,
        absorbed: Option<PeakId>,
        incoming: Option<&Peak>,
    ) -> Result<PeakId, ClusteringError> {
        let (survivor, absorbed) = match absorbed {
            Some(other) if self.births[other.0] < self.births[target.0] => (other, Some(target)),
            other => (target, other),
        };

        let mut merged = self.peak(survivor).clone();
        if let Some(other) = absorbed {
            merged.add(self.peak(other), &self.tolerance)?;
        }
        if let Some(peak) = incoming {
            merged.add(peak, &self.tolerance)?;
        }

        if let Some(other) = absorbed {
            self.unfile(charge, other);
            self.release(other);
        }
        self.unfile(charge, survivor);
        self.arena[survivor.0] = Some(merged);
        self.file(charge, survivor);
        Ok(survivor)
    }

    fn predecessor(&self, charge: u8, id: PeakId) -> Option<PeakId> {
        let key = self.peak(id).key();
        let bins = self.spectrum.get(&charge)?;
        let bin = bins.get(&key)?;
        let pos = bin.iter().position(|x| *x == id)?;
        if pos > 0 {
            return Some(bin[pos - 1]);
        }
        bins.range(..key)
            .next_back()
            .and_then(|(_, b)| b.last().copied())
    }

    fn successor(&self, charge: u8, id: PeakId) -> Option<PeakId> {
        let key = self.peak(id).key();
        let bins = self.spectrum.get(&charge)?;
        let bin = bins.get(&key)?;
        let pos = bin.iter().position(|x| *x == id)?;
        if pos + 1 < bin.len() {
            return Some(bin[pos + 1]);
        }
        bins.range((Excluded(key), Unbounded))
            .next()
            .and_then(|(_, b)| b.first().copied())
    }

    /// Merges the adjacent master peaks with `id` for as long as their
    /// windows overlap with its window. Returns the id of the resulting
    /// master peak.
    fn resolve_overlaps(&mut self, charge: u8, mut id: PeakId) -> Result<PeakId, ClusteringError> {
        loop {
            let prev = self
                .predecessor(charge, id)
                .filter(|&p| self.peak(p).overlaps(self.peak(id)));
            let next = self
                .successor(charge, id)
                .filter(|&n| self.peak(n).overlaps(self.peak(id)));
            match prev.or(next) {
                Some(other) => {
                    id = self.merge_into(charge, id, Some(other), None)?;
                    self.cascaded += 1;
                }
                None => return Ok(id),
            }
        }
    }

    fn check_neighborhood(&self, charge: u8, id: PeakId) -> Result<(), ClusteringError> {
        let mp = self.peak(id);
        if !self.bin(charge, mp.key()).contains(&id) {
            return Err(ClusteringError::InvariantViolation {
                charge,
                key: mp.key(),
                detail: format!("master peak at mz {} is not filed under its key", mp.mz()),
            });
        }
        let neighbors = [self.predecessor(charge, id), self.successor(charge, id)];
        for other in neighbors.into_iter().flatten() {
            let other = self.peak(other);
            if other.overlaps(mp) {
                return Err(ClusteringError::InvariantViolation {
                    charge,
                    key: mp.key(),
                    detail: format!(
                        "windows ({}, {}) and ({}, {}) overlap",
                        mp.left(),
                        mp.right(),
                        other.left(),
                        other.right()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Full consistency check of the spectrum: every master peak sits
    /// in the bin of its key, bins are ordered by left border and
    /// consecutive windows do not overlap.
    pub fn validate(&self) -> Result<(), ClusteringError> {
        for (&charge, bins) in self.spectrum.iter() {
            let mut last: Option<&MasterPeak> = None;
            for (&key, bin) in bins.iter() {
                if bin.is_empty() {
                    return Err(ClusteringError::InvariantViolation {
                        charge,
                        key,
                        detail: "empty bin".to_string(),
                    });
                }
                for &id in bin {
                    let mp = self.peak(id);
                    if mp.key() != key {
                        return Err(ClusteringError::InvariantViolation {
                            charge,
                            key,
                            detail: format!("master peak with key {} in wrong bin", mp.key()),
                        });
                    }
                    if let Some(prev) = last {
                        if prev.left() > mp.left() || prev.right() > mp.left() {
                            return Err(ClusteringError::InvariantViolation {
                                charge,
                                key,
                                detail: format!(
                                    "windows ({}, {}) and ({}, {}) are unordered or overlap",
                                    prev.left(),
                                    prev.right(),
                                    mp.left(),
                                    mp.right()
                                ),
                            });
                        }
                    }
                    last = Some(mp);
                }
            }
        }
        Ok(())
    }

    /// Loads one batch of peaks (typically all the peaks belonging to a
    /// precursor) into the spectrum.
    ///
    /// Intensities are made relative to the maximum of THIS batch, not of
    /// the whole spectrum. Peaks are inserted in input order.
    pub fn load_from_tims(
        &mut self,
        mzs: &[f64],
        intensities: &[f64],
        ignore_charges: bool,
    ) -> Result<(), ClusteringError> {
        self.load_from_tims_with_budget(mzs, intensities, ignore_charges, &GroupBudget::unlimited())
    }

    pub fn load_from_tims_with_budget(
        &mut self,
        mzs: &[f64],
        intensities: &[f64],
        ignore_charges: bool,
        budget: &GroupBudget,
    ) -> Result<(), ClusteringError> {
        if !ignore_charges {
            return Err(ClusteringError::UnsupportedConfiguration {
                option: "ignore_charges",
                reason: "adding up intensities using precursor charge is not supported",
            });
        }
        if mzs.len() != intensities.len() {
            return Err(ClusteringError::MismatchedLengths {
                mzs: mzs.len(),
                intensities: intensities.len(),
            });
        }
        if mzs.is_empty() {
            return Ok(());
        }

        // The whole batch is checked before the first insertion.
        let rel_intensities = relative_intensities(intensities)?;
        let peaks = mzs
            .iter()
            .zip(rel_intensities)
            .enumerate()
            .map(|(i, (&mz, intensity))| {
                if !mz.is_finite() || mz.abs() >= MAX_MZ {
                    return Err(ClusteringError::InvalidMz { index: i, mz });
                }
                Peak::new(mz, intensity, &self.tolerance)
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (i, peak) in peaks.into_iter().enumerate() {
            if i % BUDGET_CHECK_INTERVAL == 0 {
                budget.check()?;
            }
            self.add(peak, DEFAULT_CHARGE)?;
        }
        debug!(
            "Loaded {} peaks, spectrum now has {} master peaks",
            mzs.len(),
            self.len()
        );
        Ok(())
    }

    /// One record per master peak, ordered by charge then left border.
    pub fn records(&self) -> Vec<MasterPeakRecord> {
        self.iter()
            .map(|(charge, mp)| MasterPeakRecord::new(charge, mp))
            .collect()
    }

    /// Parallel (mz, intensity) arrays over all charges, sorted by mz.
    pub fn to_arrays(&self) -> (Vec<f64>, Vec<f64>) {
        let mut pairs: Vec<(f64, f64)> = self
            .iter()
            .map(|(_, mp)| (mp.mz(), mp.intensity()))
            .collect();
        pairs.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));
        pairs.into_iter().unzip()
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), DataIoError> {
        let mut wtr = csv::Writer::from_writer(writer);
        for record in self.records() {
            wtr.serialize(record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn export_to_csv(&self, path: impl AsRef<Path>) -> Result<(), DataIoError> {
        let path = path.as_ref();
        let file =
            std::fs::File::create(path).map_err(|e| DataIoError::io_at(e, path))?;
        self.write_csv(std::io::BufWriter::new(file))
    }

    /// Finds the master peak whose window contains `mz`.
    pub fn find(&self, mz: f64, charge: u8) -> Result<Option<&MasterPeak>, ClusteringError> {
        let probe = Peak::new(mz, 0.0, &self.tolerance)?;
        let key = probe.key();
        let found = match self.search(&probe, charge) {
            SearchOutcome::Match { index, .. } => Some(self.bin(charge, key)[index]),
            SearchOutcome::NoMatch {
                neighbor: Some(direction),
            } => Some(self.adjacent_edge(charge, key, direction)),
            SearchOutcome::NoMatch { neighbor: None } => None,
        };
        Ok(found.map(|id| self.peak(id)))
    }

    /// Compares this spectrum against a reference spectrum, storing the
    /// intensity and count ratios on every master peak that has a
    /// counterpart (same charge, window containing its mz).
    ///
    /// Returns how many master peaks were matched.
    pub fn compare_to<U: ToleranceFunction>(
        &mut self,
        reference: &MasterSpectrum<U>,
    ) -> Result<usize, ClusteringError> {
        let ids: Vec<(u8, PeakId)> = self.iter_ids().collect();
        let mut matched = 0;
        for (charge, id) in ids {
            let mz = self.peak(id).mz();
            if let Some(ref_peak) = reference.find(mz, charge)? {
                self.arena[id.0]
                    .as_mut()
                    .expect("ids from iteration always point to live slots")
                    .recalculate_ratio(ref_peak);
                matched += 1;
            }
        }
        Ok(matched)
    }

    #[cfg(test)]
    fn insert_unchecked(&mut self, peak: &Peak, charge: u8) {
        let mp = MasterPeak::new(peak, &self.tolerance).unwrap();
        let id = self.alloc(mp);
        self.file(charge, id);
    }
}

/// Divides every intensity by the maximum of the slice.
fn relative_intensities(intensities: &[f64]) -> Result<Vec<f64>, ClusteringError> {
    let mut max = 0.0;
    for (index, &value) in intensities.iter().enumerate() {
        if !value.is_finite() || value < 0.0 {
            return Err(ClusteringError::InvalidIntensity { index, value });
        }
        if value > max {
            max = value;
        }
    }
    if max <= 0.0 {
        return Err(ClusteringError::InvalidIntensity {
            index: 0,
            value: max,
        });
    }
    Ok(intensities.iter().map(|x| x / max).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abs_spectrum(da: f64) -> MasterSpectrum {
        MasterSpectrum::new(MzTolerance::Absolute(da))
    }

    fn add(ms: &mut MasterSpectrum, mz: f64, intensity: f64) {
        let peak = ms.make_peak(mz, intensity).unwrap();
        ms.add(peak, DEFAULT_CHARGE).unwrap();
    }

    #[test]
    fn test_single_insertion() {
        let mut ms = MasterSpectrum::default();
        add(&mut ms, 512.25, 0.7);
        assert_eq!(ms.len(), 1);
        assert_eq!(ms.appended(), 1);
        let records = ms.records();
        assert_eq!(records[0].counts, 1);
        assert_eq!(records[0].mz, 512.25);
        assert_eq!(records[0].intensity, 0.7);
        assert_eq!(records[0].mz_origin, 512.25);
        assert_eq!(records[0].charge, 0);
    }

    #[test]
    fn test_merge_into_containing_peak() {
        let mut ms = MasterSpectrum::default();
        add(&mut ms, 100.0, 0.5);
        add(&mut ms, 100.0004, 0.5);
        assert_eq!(ms.len(), 1);
        assert_eq!(ms.merged(), 1);
        let (mzs, ints) = ms.to_arrays();
        assert!((mzs[0] - 100.0002).abs() < 1e-9);
        assert_eq!(ints[0], 1.0);
    }

    #[test]
    fn test_search_outcomes() {
        let mut ms = abs_spectrum(0.1);
        add(&mut ms, 100.5, 1.0);
        add(&mut ms, 100.8, 1.0);

        let inside = ms.make_peak(100.82, 1.0).unwrap();
        assert_eq!(
            ms.search(&inside, 0),
            SearchOutcome::Match {
                index: 1,
                extra_merge: None
            }
        );
        let between = ms.make_peak(100.65, 1.0).unwrap();
        assert_eq!(
            ms.search(&between, 0),
            SearchOutcome::NoMatch { neighbor: None }
        );
        // Unknown charge bucket
        assert_eq!(
            ms.search(&inside, 2),
            SearchOutcome::NoMatch { neighbor: None }
        );
    }

    #[test]
    fn test_merge_from_right_neighbor_bin() {
        let mut ms = abs_spectrum(0.3);
        add(&mut ms, 100.5, 1.0); // window (100.2, 100.8), key 101
        let peak = ms.make_peak(100.25, 1.0).unwrap(); // key 100
        assert_eq!(peak.key(), 100);
        assert_eq!(
            ms.search(&peak, 0),
            SearchOutcome::NoMatch {
                neighbor: Some(Direction::Right)
            }
        );
        ms.add(peak, 0).unwrap();
        assert_eq!(ms.len(), 1);
        assert_eq!(ms.merged(), 1);
        let rec = &ms.records()[0];
        assert_eq!(rec.counts, 2);
        assert!((rec.mz - 100.375).abs() < 1e-9);
        assert_eq!(ms.bin_keys(0), vec![101]);
    }

    #[test]
    fn test_merge_from_left_neighbor_bin() {
        let mut ms = abs_spectrum(0.3);
        add(&mut ms, 100.1, 1.0); // window (99.8, 100.4), key 100
        let peak = ms.make_peak(100.35, 1.0).unwrap(); // key 101
        assert_eq!(
            ms.search(&peak, 0),
            SearchOutcome::NoMatch {
                neighbor: Some(Direction::Left)
            }
        );
        ms.add(peak, 0).unwrap();
        assert_eq!(ms.len(), 1);
        assert!((ms.records()[0].mz - 100.225).abs() < 1e-9);
        assert_eq!(ms.bin_keys(0), vec![100]);
    }

    #[test]
    fn test_merged_peak_moves_to_new_bin() {
        let mut ms = abs_spectrum(0.5);
        add(&mut ms, 100.45, 1.0); // left 99.95, key 100
        assert_eq!(ms.bin_keys(0), vec![100]);
        add(&mut ms, 100.6, 1.0);
        // new centroid 100.525 -> left 100.025 -> key 101
        assert_eq!(ms.len(), 1);
        assert_eq!(ms.bin_keys(0), vec![101]);
        ms.validate().unwrap();
    }

    #[test]
    fn test_three_way_merge_same_bin() {
        let mut ms = abs_spectrum(0.5);
        // Two overlapping master peaks can only exist if built by hand.
        let a = ms.make_peak(100.2, 1.0).unwrap();
        let b = ms.make_peak(100.4, 1.0).unwrap();
        ms.insert_unchecked(&a, 0);
        ms.insert_unchecked(&b, 0);

        let peak = ms.make_peak(100.5, 1.0).unwrap();
        assert_eq!(
            ms.search(&peak, 0),
            SearchOutcome::Match {
                index: 1,
                extra_merge: Some(Neighbor::SameBin(Direction::Left))
            }
        );
        ms.add(peak, 0).unwrap();
        assert_eq!(ms.multimerged(), 1);
        assert_eq!(ms.len(), 1);
        let rec = &ms.records()[0];
        assert_eq!(rec.counts, 3);
        assert_eq!(rec.intensity, 3.0);
        assert!((rec.mz - (100.2 + 100.4 + 100.5) / 3.0).abs() < 1e-9);
        ms.validate().unwrap();
    }

    #[test]
    fn test_three_way_merge_adjacent_bin() {
        let mut ms = abs_spectrum(0.3);
        let a = ms.make_peak(100.25, 1.0).unwrap(); // key 100, window (99.95, 100.55)
        let b = ms.make_peak(100.45, 1.0).unwrap(); // key 101, window (100.15, 100.75)
        ms.insert_unchecked(&a, 0);
        ms.insert_unchecked(&b, 0);

        let peak = ms.make_peak(100.5, 1.0).unwrap(); // key 101
        assert_eq!(
            ms.search(&peak, 0),
            SearchOutcome::Match {
                index: 0,
                extra_merge: Some(Neighbor::AdjacentBin(Direction::Left))
            }
        );
        ms.add(peak, 0).unwrap();
        assert_eq!(ms.multimerged(), 1);
        assert_eq!(ms.len(), 1);
        assert_eq!(ms.records()[0].counts, 3);
    }

    #[test]
    fn test_boundary_peak_starts_new_cluster_then_cascades() {
        let mut ms = abs_spectrum(0.5);
        add(&mut ms, 100.0, 1.0); // window (99.5, 100.5)
        let on_edge = ms.make_peak(100.5, 1.0).unwrap();
        assert_eq!(
            ms.search(&on_edge, 0),
            SearchOutcome::NoMatch { neighbor: None }
        );
        ms.add(on_edge, 0).unwrap();
        // Not claimed by the lookup ...
        assert_eq!(ms.appended(), 2);
        assert_eq!(ms.merged(), 0);
        // ... but the overlapping windows get folded together.
        assert_eq!(ms.cascaded(), 1);
        assert_eq!(ms.len(), 1);
        assert_eq!(ms.records()[0].counts, 2);
        // The cluster started first keeps its origin.
        assert_eq!(ms.records()[0].mz_origin, 100.0);
        ms.validate().unwrap();
    }

    #[test]
    fn test_peak_on_left_edge_starts_new_cluster_then_cascades() {
        let mut ms = abs_spectrum(0.125);
        add(&mut ms, 100.375, 1.0); // window (100.25, 100.5), key 101
        let on_edge = ms.make_peak(100.25, 1.0).unwrap();
        assert_eq!(on_edge.key(), 101);
        assert_eq!(
            ms.search(&on_edge, 0),
            SearchOutcome::NoMatch { neighbor: None }
        );
        ms.add(on_edge, 0).unwrap();
        assert_eq!(ms.appended(), 2);
        assert_eq!(ms.merged(), 0);
        assert_eq!(ms.cascaded(), 1);
        assert_eq!(ms.len(), 1);
        let rec = &ms.records()[0];
        assert_eq!(rec.counts, 2);
        assert_eq!(rec.mz, 100.3125);
        assert_eq!(rec.mz_origin, 100.375);
        ms.validate().unwrap();
    }

    #[test]
    fn test_touching_windows_are_kept_apart() {
        let mut ms = abs_spectrum(0.5);
        add(&mut ms, 100.0, 1.0); // (99.5, 100.5)
        add(&mut ms, 101.0, 1.0); // (100.5, 101.5)
        assert_eq!(ms.len(), 2);
        assert_eq!(ms.cascaded(), 0);
        ms.validate().unwrap();
    }

    #[test]
    fn test_append_between_clusters_bridges_them() {
        let mut ms = abs_spectrum(0.5);
        add(&mut ms, 100.0, 1.0);
        add(&mut ms, 101.2, 1.0);
        assert_eq!(ms.len(), 2);
        // Not inside either window, overlaps both once appended.
        add(&mut ms, 100.6, 1.0);
        assert_eq!(ms.len(), 1);
        assert_eq!(ms.records()[0].counts, 3);
        assert_eq!(ms.records()[0].mz_origin, 100.0);
        assert_eq!(ms.cascaded(), 2);
        ms.validate().unwrap();
    }

    #[test]
    fn test_oldest_origin_wins_regardless_of_slot() {
        let mut ms = abs_spectrum(0.5);
        add(&mut ms, 300.0, 1.0);
        add(&mut ms, 301.2, 1.0);
        add(&mut ms, 101.2, 1.0);
        // Bridges the first two, freeing their slots.
        add(&mut ms, 300.6, 1.0);
        assert_eq!(ms.len(), 2);

        // 100.0 lands in a lower slot than the older 101.2.
        add(&mut ms, 100.0, 1.0);
        add(&mut ms, 100.6, 1.0);
        assert_eq!(ms.arena.len(), 4);
        let records = ms.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].counts, 3);
        assert_eq!(records[0].mz_origin, 101.2);
        assert_eq!(records[1].counts, 3);
        assert_eq!(records[1].mz_origin, 300.0);
        ms.validate().unwrap();
    }

    #[test]
    fn test_charges_are_independent() {
        let mut ms = MasterSpectrum::default();
        let p1 = ms.make_peak(300.0, 1.0).unwrap();
        let p2 = ms.make_peak(300.0, 1.0).unwrap();
        ms.add(p1, 0).unwrap();
        ms.add(p2, 2).unwrap();
        assert_eq!(ms.len(), 2);
        let charges: Vec<u8> = ms.records().iter().map(|r| r.charge).collect();
        assert_eq!(charges, vec![0, 2]);
    }

    #[test]
    fn test_load_rejects_charge_mode() {
        let mut ms = MasterSpectrum::default();
        let err = ms.load_from_tims(&[100.0], &[1.0], false).unwrap_err();
        assert!(matches!(
            err,
            ClusteringError::UnsupportedConfiguration { .. }
        ));
        assert!(ms.is_empty());
    }

    #[test]
    fn test_load_input_validation() {
        let mut ms = MasterSpectrum::default();
        assert!(matches!(
            ms.load_from_tims(&[100.0, 200.0], &[1.0], true),
            Err(ClusteringError::MismatchedLengths { .. })
        ));
        assert!(matches!(
            ms.load_from_tims(&[100.0, 200.0], &[1.0, -1.0], true),
            Err(ClusteringError::InvalidIntensity { index: 1, .. })
        ));
        assert!(matches!(
            ms.load_from_tims(&[100.0], &[0.0], true),
            Err(ClusteringError::InvalidIntensity { .. })
        ));
        assert!(matches!(
            ms.load_from_tims(&[f64::NAN], &[1.0], true),
            Err(ClusteringError::InvalidMz { index: 0, .. })
        ));
        ms.load_from_tims(&[], &[], true).unwrap();
        assert!(ms.is_empty());
    }

    #[test]
    fn test_bad_mz_rejects_whole_batch() {
        let mut ms = MasterSpectrum::default();
        assert!(matches!(
            ms.load_from_tims(&[100.0, f64::NAN], &[1.0, 1.0], true),
            Err(ClusteringError::InvalidMz { index: 1, .. })
        ));
        assert!(ms.is_empty());
        assert_eq!(ms.summary(Duration::ZERO).input_peaks, 0);
    }

    #[test]
    fn test_huge_mz_is_rejected() {
        let mut ms = abs_spectrum(0.5);
        assert!(matches!(
            ms.load_from_tims(&[1e300, 2e300], &[1.0, 1.0], true),
            Err(ClusteringError::InvalidMz { index: 0, .. })
        ));
        assert!(matches!(
            ms.load_from_tims(&[100.0, -1e300], &[1.0, 1.0], true),
            Err(ClusteringError::InvalidMz { index: 1, .. })
        ));
        assert!(ms.is_empty());

        let peak = ms.make_peak(1e300, 1.0);
        assert!(matches!(peak, Err(ClusteringError::MzOutOfRange { .. })));
    }

    #[test]
    fn test_malformed_tolerance_fails_fast() {
        let mut ms = MasterSpectrum::new(|mz: f64| if mz > 150.0 { -1.0 } else { 0.01 });
        ms.load_from_tims(&[100.0], &[1.0], true).unwrap();
        let err = ms.load_from_tims(&[200.0], &[1.0], true).unwrap_err();
        assert!(matches!(err, ClusteringError::MalformedTolerance { .. }));

        // Checked before the first peak of the batch goes in.
        let err = ms
            .load_from_tims(&[120.0, 200.0], &[1.0, 1.0], true)
            .unwrap_err();
        assert!(matches!(err, ClusteringError::MalformedTolerance { .. }));
        assert_eq!(ms.len(), 1);
    }

    #[test]
    fn test_failed_merge_leaves_spectrum_intact() {
        let mut ms =
            MasterSpectrum::new(|mz: f64| if (100.15..100.25).contains(&mz) { -1.0 } else { 0.5 });
        ms.load_from_tims(&[100.0], &[1.0], true).unwrap();
        // Inside the window of 100.0, but the merged centroid 100.2 has
        // no valid window.
        let err = ms.load_from_tims(&[100.4], &[1.0], true).unwrap_err();
        assert!(matches!(err, ClusteringError::MalformedTolerance { .. }));

        ms.validate().unwrap();
        assert_eq!(ms.len(), 1);
        assert_eq!(ms.merged(), 0);
        assert_eq!(ms.bin_keys(0), vec![100]);
        let rec = &ms.records()[0];
        assert_eq!(rec.mz, 100.0);
        assert_eq!(rec.counts, 1);
        assert_eq!(rec.left, 99.5);
    }

    #[test]
    fn test_normalization_is_per_batch() {
        let mut ms = MasterSpectrum::default();
        ms.load_from_tims(&[100.0, 300.0], &[10.0, 5.0], true)
            .unwrap();
        ms.load_from_tims(&[500.0], &[1000.0], true).unwrap();
        let (mzs, ints) = ms.to_arrays();
        assert_eq!(mzs, vec![100.0, 300.0, 500.0]);
        assert_eq!(ints, vec![1.0, 0.5, 1.0]);
    }

    #[test]
    fn test_budget_cancellation_stops_load() {
        use crate::utils::cancellation::CancellationToken;

        let token = CancellationToken::new();
        token.cancel();
        let budget = GroupBudget::new(Some(token), None);
        let mut ms = MasterSpectrum::default();
        let err = ms
            .load_from_tims_with_budget(&[100.0], &[1.0], true, &budget)
            .unwrap_err();
        assert_eq!(err, ClusteringError::Cancelled);
    }

    #[test]
    fn test_compare_to_reference() {
        let mut ms = MasterSpectrum::default();
        ms.load_from_tims(&[100.0, 100.0001, 250.0], &[1.0, 1.0, 1.0], true)
            .unwrap();
        let mut reference = MasterSpectrum::default();
        reference
            .load_from_tims(&[100.00005, 400.0], &[0.5, 1.0], true)
            .unwrap();

        let matched = ms.compare_to(&reference).unwrap();
        assert_eq!(matched, 1);
        let records = ms.records();
        // (2 / 2) / (0.5 / 1)
        assert!((records[0].rel_intensity_ratio - 2.0).abs() < 1e-9);
        assert_eq!(records[0].counts_ratio, 2.0);
        assert_eq!(records[1].rel_intensity_ratio, 0.0);
    }

    #[test]
    fn test_find() {
        let mut ms = MasterSpectrum::default();
        ms.load_from_tims(&[100.0, 200.0], &[1.0, 1.0], true)
            .unwrap();
        assert!(ms.find(100.001, 0).unwrap().is_some());
        assert!(ms.find(150.0, 0).unwrap().is_none());
        assert!(ms.find(100.0, 1).unwrap().is_none());
    }

    #[test]
    fn test_csv_export() {
        let mut ms = MasterSpectrum::default();
        ms.load_from_tims(&[100.0, 200.0], &[1.0, 0.5], true)
            .unwrap();
        let mut buf = Vec::new();
        ms.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "mz,intensity,counts,left border,right border,start_mz,ms1_charge,rel_intensity_ratio,counts_ratio"
        );
        assert_eq!(lines.count(), 2);
    }

    #[test]
    fn test_arena_slots_are_reused() {
        let mut ms = abs_spectrum(0.5);
        add(&mut ms, 100.0, 1.0);
        add(&mut ms, 101.2, 1.0);
        add(&mut ms, 100.6, 1.0);
        assert_eq!(ms.len(), 1);
        add(&mut ms, 300.0, 1.0);
        add(&mut ms, 400.0, 1.0);
        assert_eq!(ms.len(), 3);
        assert!(ms.arena.len() <= 3);
    }
}
