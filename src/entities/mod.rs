pub mod prelude;

pub mod vote;
