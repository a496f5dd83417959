//! Persistence of attack results
//!
//! Adversarial clouds are written per sample as a JSON record and as a
//! plain-text vertex list, and every run appends its success rate to a
//! summary file in the output directory.

pub mod record;
pub mod vertex_list;
pub mod export;

pub use record::{read_record, record_name, write_record, AttackRecord};
pub use vertex_list::{read_vertex_list, write_vertex_list};
pub use export::{append_summary, export_outcome, DenseReference, ExportOptions, SUMMARY_FILE};
