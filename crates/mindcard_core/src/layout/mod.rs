//! Free-form canvas layout and drag interaction.

pub mod drag;
