mod common;

mod catalog;
mod cloner;
