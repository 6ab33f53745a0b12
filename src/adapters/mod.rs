// Adapters layer: concrete implementations of the domain ports for external formats.

pub mod csv_workbook;

pub use csv_workbook::ZipCsvWorkbook;
