mod config;
mod guard;
mod profile;
mod race;
