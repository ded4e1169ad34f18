//! File adapters. These only move records in and out of files, all the
//! processing lives in [crate::grouping] and [crate::aggregation].

pub mod json;
pub mod tabular;

pub use json::{
    read_scan_groups,
    write_scan_groups,
};
pub use tabular::{
    read_peak_list,
    read_precursor_map,
    read_raw_peaks,
};
