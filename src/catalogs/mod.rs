//! Text inputs for batch runs: target lists and map lists.

pub mod maplist;
pub mod targets;

pub use maplist::read_map_list;
pub use targets::read_target_csv;
