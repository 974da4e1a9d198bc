//! CLI smoke entry point.
//!
//! Usage: `notedao_cli [config.toml]`. Without a config the store is
//! in-memory and logging stays off.

use log::info;
use notedao_core::model::note::NOTE_COUNT;
use notedao_core::{init_from_config, Note, Repository, Session, SessionConfig, NOTE_SCHEMA};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("notedao_cli error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args_os().nth(1) {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    init_from_config(&config)?;

    let session = Session::open(&config)?;
    let notes = Repository::<Note>::try_new(&session)?;
    let count = notes.count_total_record(NOTE_COUNT)?;
    info!(
        "event=cli_probe module=cli status=ok entity={} count={count}",
        NOTE_SCHEMA.name
    );

    println!("notedao_core ping={}", notedao_core::ping());
    println!("notedao_core version={}", notedao_core::core_version());
    println!("notedao_core notes={count}");
    Ok(())
}
