pub mod catalog;
pub mod config;
pub mod doctor;
pub mod episodes;
pub mod player;
pub mod sources;
