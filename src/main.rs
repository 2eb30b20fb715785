//! Tool to inspect Thunderbolt controller firmware images
//!
//! Before an update, the image at hand has to match the controller: same
//! device id, vendor and model, and for host controllers also the same
//! generation, port count, flash size and PD presence. This tool shows what
//! an image claims about itself.

use std::{fs, process};

use clap::{Parser, Subcommand};
use log::{debug, error, info};

mod show;

use tbt_fw::{CHUNK_SIZE, ThunderboltFirmware};

#[derive(Subcommand, Debug)]
enum Command {
    /// Display the metadata of a full firmware image
    #[clap(verbatim_doc_comment)]
    Show {
        /// File to read
        file_name: String,
    },
    /// Decode only the first chunk of an image, as read from a controller
    #[clap(verbatim_doc_comment)]
    Native {
        /// File to read
        file_name: String,
    },
}

/// Analyze Thunderbolt controller firmware images
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Command to run
    #[command(subcommand)]
    cmd: Command,
    #[clap(long, short, action)]
    debug: bool,
    #[clap(long, short, action)]
    verbose: bool,
}

fn read(file_name: &str) -> Vec<u8> {
    info!("Reading {file_name}...");
    match fs::read(file_name) {
        Ok(d) => d,
        Err(e) => {
            error!("Cannot read {file_name}: {e}");
            process::exit(1);
        }
    }
}

fn parse(data: &[u8]) -> ThunderboltFirmware {
    match ThunderboltFirmware::parse(data) {
        Ok(fw) => fw,
        Err(e) => {
            error!("Invalid or unsupported firmware image: {e}");
            process::exit(1);
        }
    }
}

fn main() {
    let Cli {
        cmd,
        debug,
        verbose,
    } = Cli::parse();

    // Default to log level "info". Otherwise, you get no "regular" logs.
    let level = if debug { "debug" } else { "info" };
    let env = env_logger::Env::default().default_filter_or(level);
    env_logger::Builder::from_env(env).init();

    match cmd {
        Command::Show { file_name } => {
            let data = read(&file_name);
            debug!("Image size: {:08x}", data.len());
            let fw = parse(&data);
            show::show(&fw, verbose);
        }
        Command::Native { file_name } => {
            let data = read(&file_name);
            let chunk = data.get(..CHUNK_SIZE).unwrap_or(data.as_slice());
            let fw = parse(chunk);
            show::show_native(&fw, verbose);
        }
    }
}
