//! Unpack every file inside an SFS archive into a directory tree. This will
//! not support archives with compression or encryption enabled.

use std::path::Path;

use clap::{Arg, Command};
use log::{error, info};

use bcf2hdf5::SfsReader;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("unbcf")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Unpack all files contained in a Bruker .bcf (SFS) archive.")
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("The path to the input .bcf file."),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("The directory to unpack into."),
        )
        .get_matches();

    let input = matches.get_one::<String>("input").unwrap();
    let output_dir = matches.get_one::<String>("output").unwrap();

    let archive = match SfsReader::open(input) {
        Ok(archive) => archive,
        Err(err) => {
            error!("Error: {}", err);
            std::process::exit(1);
        }
    };

    let base_name = Path::new(input)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let destination = Path::new(output_dir).join(base_name);

    info!("Extracting to {}", destination.display());
    if let Err(err) = archive.extract_all(&destination) {
        error!("Error: {}", err);
        std::process::exit(1);
    }
    info!("Complete");
}
