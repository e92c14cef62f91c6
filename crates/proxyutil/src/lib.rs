pub mod metadata_constants;
