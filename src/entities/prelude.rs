#![allow(unused_imports)]

pub use super::vote::Entity as Vote;
