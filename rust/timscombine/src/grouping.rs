use std::collections::{
    BTreeMap,
    HashMap,
};

use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    instrument,
};

use crate::aggregation::ScanGroup;

/// A single fragment peak as read from the raw data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPeakRecord {
    #[serde(rename = "FRAME")]
    pub frame: u32,
    #[serde(rename = "SCAN")]
    pub scan: u32,
    #[serde(rename = "PRECURSOR")]
    pub precursor: u32,
    /// Seconds.
    #[serde(rename = "RETENTION_TIME")]
    pub retention_time: f64,
    #[serde(rename = "INV_ION_MOBILITY")]
    pub inv_ion_mobility: f64,
    #[serde(rename = "MZ")]
    pub mz: f64,
    #[serde(rename = "INTENSITY")]
    pub intensity: f64,
}

/// Which (precursor, frame, scan range) belongs to which scan number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecursorMapEntry {
    #[serde(rename = "SCAN_NUMBER")]
    pub scan_number: u32,
    #[serde(rename = "PRECURSOR")]
    pub precursor: u32,
    #[serde(rename = "FRAME")]
    pub frame: u32,
    #[serde(rename = "SCAN_NUM_BEGIN")]
    pub scan_num_begin: u32,
    #[serde(rename = "SCAN_NUM_END")]
    pub scan_num_end: u32,
    #[serde(rename = "COLLISION_ENERGY")]
    pub collision_energy: f64,
}

impl PrecursorMapEntry {
    fn contains_scan(&self, scan: u32) -> bool {
        (self.scan_num_begin..=self.scan_num_end).contains(&scan)
    }
}

/// Peaks of one (precursor, frame) pair that fell inside a map entry.
#[derive(Debug, Default)]
struct FrameSlice {
    mzs: Vec<f64>,
    intensities: Vec<f64>,
    retention_time: Option<f64>,
    inv_ion_mobility: Option<f64>,
}

/// Median of the values, `NaN` if empty.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Builds one [ScanGroup] per scan number.
///
/// A raw peak belongs to a map entry when precursor and frame match and
/// its scan lies in the inclusive scan range of the entry. For every entry
/// the retention time (converted to minutes) and mobility of its first
/// peak are used. Per scan number the peak lists of its entries are
/// concatenated in (precursor, frame) order and the collision energy,
/// retention time and mobility are the medians over the entries.
///
/// Entries without any peak are skipped, groups come out sorted by scan
/// number.
#[instrument(skip_all)]
pub fn group_scans(raw: &[RawPeakRecord], map: &[PrecursorMapEntry]) -> Vec<ScanGroup> {
    let mut entries_by_pf: HashMap<(u32, u32), Vec<usize>> = HashMap::new();
    for (i, entry) in map.iter().enumerate() {
        entries_by_pf
            .entry((entry.precursor, entry.frame))
            .or_default()
            .push(i);
    }

    let mut slices: Vec<FrameSlice> = map.iter().map(|_| FrameSlice::default()).collect();
    let mut unmatched = 0usize;
    for peak in raw {
        let Some(candidates) = entries_by_pf.get(&(peak.precursor, peak.frame)) else {
            unmatched += 1;
            continue;
        };
        for &i in candidates {
            if !map[i].contains_scan(peak.scan) {
                continue;
            }
            let slice = &mut slices[i];
            slice.mzs.push(peak.mz);
            slice.intensities.push(peak.intensity);
            slice
                .retention_time
                .get_or_insert(peak.retention_time / 60.0);
            slice.inv_ion_mobility.get_or_insert(peak.inv_ion_mobility);
        }
    }
    if unmatched > 0 {
        debug!("{} raw peaks have no matching precursor/frame", unmatched);
    }

    // scan number -> (precursor, frame) -> entry indices
    let mut by_scan: BTreeMap<u32, BTreeMap<(u32, u32), Vec<usize>>> = BTreeMap::new();
    for (i, entry) in map.iter().enumerate() {
        if slices[i].mzs.is_empty() {
            continue;
        }
        by_scan
            .entry(entry.scan_number)
            .or_default()
            .entry((entry.precursor, entry.frame))
            .or_default()
            .push(i);
    }

    by_scan
        .into_iter()
        .map(|(scan_number, parts)| {
            let mut mzs = Vec::new();
            let mut intensities = Vec::new();
            let mut energies = Vec::new();
            let mut rts = Vec::new();
            let mut mobilities = Vec::new();
            for i in parts.into_values().flatten() {
                let slice = &slices[i];
                mzs.extend_from_slice(&slice.mzs);
                intensities.extend_from_slice(&slice.intensities);
                energies.push(map[i].collision_energy);
                rts.extend(slice.retention_time);
                mobilities.extend(slice.inv_ion_mobility);
            }
            ScanGroup {
                scan_number,
                mzs,
                intensities,
                collision_energy: median(&energies),
                retention_time: median(&rts),
                inv_ion_mobility: median(&mobilities),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(frame: u32, scan: u32, precursor: u32, rt: f64, mz: f64) -> RawPeakRecord {
        RawPeakRecord {
            frame,
            scan,
            precursor,
            retention_time: rt,
            inv_ion_mobility: 1.0 + scan as f64 / 1000.0,
            mz,
            intensity: 10.0,
        }
    }

    fn entry(scan_number: u32, precursor: u32, frame: u32, range: (u32, u32), ce: f64) -> PrecursorMapEntry {
        PrecursorMapEntry {
            scan_number,
            precursor,
            frame,
            scan_num_begin: range.0,
            scan_num_end: range.1,
            collision_energy: ce,
        }
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn test_group_scans() {
        let raw = vec![
            raw(10, 100, 1, 600.0, 500.0),
            raw(10, 105, 1, 600.0, 501.0),
            raw(10, 300, 1, 600.0, 502.0), // outside the scan range
            raw(12, 110, 1, 660.0, 503.0),
            raw(11, 100, 2, 630.0, 700.0),
            raw(99, 100, 9, 630.0, 800.0), // not mapped
        ];
        let map = vec![
            entry(5, 1, 12, (100, 200), 30.0),
            entry(5, 1, 10, (100, 200), 20.0),
            entry(3, 2, 11, (50, 150), 25.0),
            entry(8, 3, 11, (50, 150), 25.0), // no peaks
        ];
        let groups = group_scans(&raw, &map);
        assert_eq!(groups.len(), 2);

        assert_eq!(groups[0].scan_number, 3);
        assert_eq!(groups[0].mzs, vec![700.0]);
        assert_eq!(groups[0].retention_time, 10.5);

        let g = &groups[1];
        assert_eq!(g.scan_number, 5);
        // frame 10 before frame 12
        assert_eq!(g.mzs, vec![500.0, 501.0, 503.0]);
        assert_eq!(g.intensities.len(), 3);
        assert_eq!(g.collision_energy, 25.0);
        assert_eq!(g.retention_time, 10.5);
        assert!((g.inv_ion_mobility - 1.105).abs() < 1e-9);
    }
}
