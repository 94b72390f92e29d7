pub mod assembly_store;
pub mod inputs;
