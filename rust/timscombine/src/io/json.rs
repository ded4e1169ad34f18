use std::fs::File;
use std::io::{
    BufReader,
    BufWriter,
    Write,
};
use std::path::Path;

use crate::aggregation::ScanGroup;
use crate::errors::DataIoError;

/// Reads scan groups stored as a json array.
pub fn read_scan_groups(path: impl AsRef<Path>) -> Result<Vec<ScanGroup>, DataIoError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| DataIoError::io_at(e, path))?;
    let groups = serde_json::from_reader(BufReader::new(file))?;
    Ok(groups)
}

pub fn write_scan_groups(path: impl AsRef<Path>, groups: &[ScanGroup]) -> Result<(), DataIoError> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| DataIoError::io_at(e, path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, groups)?;
    writer.flush()?;
    Ok(())
}
