// Unit tests that span more than one module

mod catalog;
mod errors;
