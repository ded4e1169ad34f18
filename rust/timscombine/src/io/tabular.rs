use std::fs::File;
use std::io::{
    BufReader,
    Read,
};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::info;

use crate::errors::DataIoError;
use crate::grouping::{
    PrecursorMapEntry,
    RawPeakRecord,
};

fn read_records<T: DeserializeOwned, R: Read>(reader: R) -> Result<Vec<T>, DataIoError> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut out = Vec::new();
    for record in rdr.deserialize::<T>() {
        out.push(record?);
    }
    Ok(out)
}

fn read_records_at<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, DataIoError> {
    let file = File::open(path).map_err(|e| DataIoError::io_at(e, path))?;
    let out = read_records(BufReader::new(file))?;
    info!("Read {} rows from {}", out.len(), path.display());
    Ok(out)
}

/// Reads raw fragment peaks from a csv file with the columns
/// `FRAME,SCAN,PRECURSOR,RETENTION_TIME,INV_ION_MOBILITY,MZ,INTENSITY`.
pub fn read_raw_peaks(path: impl AsRef<Path>) -> Result<Vec<RawPeakRecord>, DataIoError> {
    read_records_at(path.as_ref())
}

/// Reads the scan number to precursor map. Extra columns are ignored.
pub fn read_precursor_map(path: impl AsRef<Path>) -> Result<Vec<PrecursorMapEntry>, DataIoError> {
    read_records_at(path.as_ref())
}

/// A plain centroided peak list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakListRecord {
    pub mz: f64,
    pub intensity: f64,
}

/// Reads a `mz,intensity` csv file into parallel arrays, in file order.
pub fn read_peak_list(path: impl AsRef<Path>) -> Result<(Vec<f64>, Vec<f64>), DataIoError> {
    let records: Vec<PeakListRecord> = read_records_at(path.as_ref())?;
    Ok(records.into_iter().map(|x| (x.mz, x.intensity)).unzip())
}
