//! Terminal output: the batch spinner and the interactive session screens

pub mod spinner;
pub mod terminal;
