//! Everything that reads `/proc`: the process-table snapshot (component A)
//! and the per-process address-space mapping inspector (component B).

pub mod mapping;
pub mod table;

pub use mapping::MappingInspector;
pub use table::ProcessTableReader;
