//! Data store modules for the external highscore backend

pub mod highscores;

pub use highscores::{
    submit_in_background, HighscoreEntry, HighscoreError, HighscoreStore, MemoryHighscoreStore, RestHighscoreStore,
};
