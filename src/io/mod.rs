pub mod binary;
pub mod csv;
pub mod gpkg;
pub mod inc;
pub mod netcdf;
