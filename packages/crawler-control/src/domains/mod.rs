// Business domains
pub mod runs;
