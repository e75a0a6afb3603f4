pub mod cbr;
