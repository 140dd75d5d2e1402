pub mod backend;
pub mod run;
