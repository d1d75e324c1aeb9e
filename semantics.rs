//! Concrete and abstract evaluation of While+ programs.

pub mod abstract_interp;
pub mod concrete;
pub mod domain;
pub mod interval;
pub mod state;
