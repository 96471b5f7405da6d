pub mod doctor;
pub mod parse;
pub mod run;
