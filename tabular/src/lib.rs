pub use csv::reader::{CsvChunks, CsvTableReader};
pub use csv::writer::{CsvTableWriter, WriteMode};
pub use shred::{ARRAY_BATCH, ShreddedBatch, Shredder};
pub use stitch::{StitchOutcome, StitchState};
pub use table::{ChildCsv, Row};

pub mod csv;
pub mod shred;
pub mod stitch;
pub mod table;
