// THEORY:
// This file is the main entry point for the `sortie_engine` library crate.
// It exposes two layers:
//
// 1. `core_modules`: the map perception engine. It rectifies a capture,
//    finds the tile lattice, classifies every cell, votes several frames
//    into one map and searches it for objectives. It is pure computation
//    over `image` buffers and never talks to the device.
// 2. The orchestration layer (`combat`, `navigation`, `battle`, `fleet`,
//    `boss_resolver`): the `CombatModule` state machine that drives one
//    sortie through the `Device`, `Collaborators` and `MapReader` seams and
//    ends every stage with an `ExitCode`.
//
// Static screen knowledge (`ui`, `presets`) and the run configuration
// (`config`) are plain data shared by both layers.

pub mod battle;
pub mod boss_resolver;
pub mod combat;
pub mod config;
pub mod core_modules;
pub mod device;
pub mod error;
pub mod fleet;
pub mod navigation;
pub mod perception;
pub mod presets;
pub mod session;
pub mod ui;

#[cfg(test)]
mod testing;

pub use combat::CombatModule;
pub use config::CombatConfig;
pub use device::{Collaborators, Device};
pub use perception::{MapPerception, MapReader};
pub use session::{CombatSession, ExitCode};
