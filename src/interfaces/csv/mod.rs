pub mod balance_writer;
pub mod scenario_reader;
